//! Error types for the driver layer.

use muxlink_core::FrameError;

use crate::dce::{DceError, WorkingMode};

/// Errors surfaced by a [`UartPort`](crate::uart::UartPort) implementation.
#[derive(Debug, thiserror::Error)]
pub enum UartError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UART driver error: {0}")]
    Driver(String),
    #[error("UART read timed out")]
    Timeout,
}

/// Errors from DTE operations.
#[derive(Debug, thiserror::Error)]
pub enum DteError {
    #[error("UART error: {0}")]
    Uart(#[from] UartError),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("DCE error: {0}")]
    Dce(#[from] DceError),
    #[error("DTE is not bound to a DCE")]
    NotBound,
    #[error("command timed out waiting for a response")]
    Timeout,
    #[error("already in mode {0:?}")]
    AlreadyInMode(WorkingMode),
    #[error("reader task already started")]
    AlreadyStarted,
    #[error("expected prompt {expected:?}, got {got:?}")]
    PromptMismatch { expected: String, got: String },
}
