//! The UART port abstraction consumed by the DTE.
//!
//! A driver implementation owns the hardware (or a pty, or a mock) and
//! delivers [`UartEvent`]s on an mpsc queue handed to
//! [`Dte::start`](crate::Dte::start). The DTE drives reception discipline
//! through the pattern-detection and RX-interrupt toggles: command mode
//! uses newline pattern detection, CMUX/PPP modes use raw RX events.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::UartError;

/// The byte used to split command-mode responses into lines.
pub const LINE_PATTERN: u8 = b'\n';

/// Events delivered by a UART driver on its event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    /// Received bytes are waiting in the driver's RX buffer.
    Data,
    /// The line-pattern detector matched; a position is queued.
    PatternDetected,
    /// Hardware FIFO overflow.
    FifoOverflow,
    /// Driver RX ring buffer full.
    BufferFull,
    /// Break condition on the line.
    Break,
    /// Parity error.
    ParityError,
    /// Framing error.
    FrameError,
}

/// Idle thresholds for the pattern detector, in baud cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternIntervals {
    /// Maximum gap between consecutive pattern characters.
    pub chr_tout: u16,
    /// Idle time required after the last pattern character.
    pub post_idle: u16,
    /// Idle time required before the first pattern character.
    pub pre_idle: u16,
}

impl Default for PatternIntervals {
    fn default() -> Self {
        Self {
            chr_tout: 9,
            post_idle: 0,
            pre_idle: 0,
        }
    }
}

/// Operations the DTE needs from a UART driver.
#[async_trait]
pub trait UartPort: Send + Sync {
    /// Write `data`, returning the number of bytes accepted.
    async fn write(&self, data: &[u8]) -> Result<usize, UartError>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for the
    /// first byte. Returns the number of bytes read (0 on timeout).
    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, UartError>;

    /// Number of received bytes currently buffered by the driver.
    async fn buffered_len(&self) -> Result<usize, UartError>;

    /// Discard all buffered received bytes.
    async fn flush_input(&self) -> Result<(), UartError>;

    /// Enable the pattern-detection interrupt for `count` repetitions of
    /// `pattern`.
    async fn enable_pattern_detect(
        &self,
        pattern: u8,
        count: u8,
        intervals: PatternIntervals,
    ) -> Result<(), UartError>;

    /// Disable the pattern-detection interrupt.
    async fn disable_pattern_detect(&self) -> Result<(), UartError>;

    /// Pop the byte offset of the next detected pattern, if any.
    async fn pop_pattern_position(&self) -> Option<usize>;

    /// Reset the pattern position queue to `depth` entries.
    async fn reset_pattern_queue(&self, depth: usize) -> Result<(), UartError>;

    /// Enable raw RX interrupts (CMUX/PPP reception).
    async fn enable_rx_interrupt(&self) -> Result<(), UartError>;

    /// Disable raw RX interrupts.
    async fn disable_rx_interrupt(&self) -> Result<(), UartError>;

    /// Set the RX idle timeout in symbol times.
    async fn set_rx_timeout_symbols(&self, symbols: u8) -> Result<(), UartError>;
}

/// Flow control discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    None,
    /// RTS/CTS.
    Hardware,
    /// XON/XOFF.
    Software,
}

/// Parity discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Stop bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    OneAndHalf,
    Two,
}

/// UART driver configuration, consumed by port implementations.
#[derive(Debug, Clone, Deserialize)]
pub struct UartConfig {
    /// UART port index.
    #[serde(default)]
    pub port_num: u8,
    /// Line rate in bit/s.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits per symbol.
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub flow_control: FlowControl,
    /// TX pin assignment, if the platform needs one.
    #[serde(default)]
    pub tx_io: Option<u8>,
    /// RX pin assignment.
    #[serde(default)]
    pub rx_io: Option<u8>,
    /// RTS pin assignment (hardware flow control).
    #[serde(default)]
    pub rts_io: Option<u8>,
    /// CTS pin assignment (hardware flow control).
    #[serde(default)]
    pub cts_io: Option<u8>,
    /// Driver RX ring size in bytes.
    #[serde(default = "default_rx_buffer_size")]
    pub rx_buffer_size: usize,
    /// Driver TX ring size in bytes.
    #[serde(default = "default_tx_buffer_size")]
    pub tx_buffer_size: usize,
    /// Depth of the UART event queue.
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_rx_buffer_size() -> usize {
    32 * 1024
}

fn default_tx_buffer_size() -> usize {
    4 * 1024
}

fn default_event_queue_size() -> usize {
    16
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port_num: 0,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            tx_io: None,
            rx_io: None,
            rts_io: None,
            cts_io: None,
            rx_buffer_size: default_rx_buffer_size(),
            tx_buffer_size: default_tx_buffer_size(),
            event_queue_size: default_event_queue_size(),
        }
    }
}
