//! DTE-side CMUX serial-link modem driver.
//!
//! This crate carries two logically independent streams — an interactive
//! AT command channel and a PPP data channel — over one physical UART by
//! multiplexing both into CMUX (3GPP TS 27.010) frames, while also
//! supporting plain AT and raw PPP operation.
//!
//! The engine is the [`Dte`]: it spawns the single reader task that scans
//! the inbound byte stream (line-oriented in command mode, frame-oriented
//! in CMUX/PPP mode), drives the Command/CMUX/PPP mode machine, and
//! exposes a synchronous send surface with a command rendezvous so callers
//! can issue AT transactions and block for the response. Modem-specific AT
//! semantics live behind the [`Dce`] trait; UART hardware behind
//! [`UartPort`]. Wire-level encoding comes from `muxlink-core`.

pub mod config;
pub mod dce;
pub mod dte;
pub mod error;
pub mod events;
pub mod framing;
mod reader;
pub mod testing;
pub mod uart;

pub use config::DteConfig;
pub use dce::{result_codes, timeouts, Dce, DceError, DceState, WorkingMode};
pub use dte::Dte;
pub use error::{DteError, UartError};
pub use events::ModemEvent;
pub use framing::{FeedOutcome, MuxAccumulator};
pub use uart::{
    FlowControl, Parity, PatternIntervals, StopBits, UartConfig, UartEvent, UartPort, LINE_PATTERN,
};
