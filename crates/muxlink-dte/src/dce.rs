//! The DCE contract: what the modem-specific layer exposes to the DTE.
//!
//! The DTE never interprets AT responses itself. Decoded lines and frames
//! are handed to the bound [`Dce`], which acknowledges a completed
//! transaction by calling [`Dte::process_cmd_done`](crate::Dte::process_cmd_done)
//! from within the dispatch, releasing the caller blocked in the send
//! surface.

use async_trait::async_trait;

/// Working mode of the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingMode {
    /// Plain AT: line-oriented reception via the pattern detector.
    Command,
    /// Multiplexed: AT and data channels carried in CMUX frames.
    Cmux,
    /// Raw PPP: the data stream owns the wire.
    Ppp,
}

/// Processing state of the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DceState {
    Processing,
    Success,
    Fail,
}

/// V.25ter result codes reported by a modem.
pub mod result_codes {
    /// Acknowledges execution of a command.
    pub const OK: &str = "OK";
    /// A connection has been established.
    pub const CONNECT: &str = "CONNECT";
    /// Incoming call signal from the network.
    pub const RING: &str = "RING";
    /// Connection terminated, or establishing one failed.
    pub const NO_CARRIER: &str = "NO CARRIER";
    /// Command not recognized, line too long, or parameter invalid.
    pub const ERROR: &str = "ERROR";
    /// No dial tone detected.
    pub const NO_DIALTONE: &str = "NO DIALTONE";
    /// Engaged signal detected.
    pub const BUSY: &str = "BUSY";
    /// Wait for quiet answer.
    pub const NO_ANSWER: &str = "NO ANSWER";
}

/// Command timeout constants.
pub mod timeouts {
    use std::time::Duration;

    /// Default for most commands.
    pub const DEFAULT: Duration = Duration::from_millis(1500);
    /// Operator query.
    pub const OPERATOR: Duration = Duration::from_secs(75);
    /// Working-mode change.
    pub const MODE_CHANGE: Duration = Duration::from_secs(5);
    /// Hang-up.
    pub const HANG_UP: Duration = Duration::from_secs(90);
    /// Normal power-down.
    pub const POWER_OFF: Duration = Duration::from_secs(1);
}

/// Errors returned by DCE handlers.
#[derive(Debug, thiserror::Error)]
pub enum DceError {
    #[error("no handler for response")]
    NoHandler,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("{0}")]
    Other(String),
}

/// The modem-specific layer bound to a [`Dte`](crate::Dte).
#[async_trait]
pub trait Dce: Send + Sync {
    /// Consume one response line (command mode, or text extracted from a
    /// CMUX frame).
    fn handle_line(&self, line: &str) -> Result<(), DceError>;

    /// Consume one raw CMUX frame during channel establishment.
    fn handle_mux_frame(&self, frame: &[u8]) -> Result<(), DceError>;

    /// Record the processing state of the current transaction.
    fn set_state(&self, state: DceState);

    /// The link's working mode is changing.
    fn set_working_mode(&self, mode: WorkingMode) -> Result<(), DceError>;

    /// Establish the CMUX logical channels on the peer, typically a SABM
    /// handshake on DLCIs 0, 1 and 2 via
    /// [`Dte::send_sabm`](crate::Dte::send_sabm).
    async fn setup_cmux(&self) -> Result<(), DceError>;

    /// Terminate the data call.
    async fn hang_up(&self) -> Result<(), DceError>;

    /// Define a PDP context on the peer.
    async fn define_pdp_context(&self, cid: u8, pdp_type: &str, apn: &str)
        -> Result<(), DceError>;
}
