//! In-memory test doubles for the driver: a scripted UART port and a
//! recording DCE.
//!
//! `MockUart` stands in for a UART driver: tests queue received bytes and
//! pattern positions with the `inject_*` helpers, which also raise the
//! matching [`UartEvent`] on the queue handed to the DTE. Written bytes
//! and control operations are journalled for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dce::{Dce, DceError, DceState, WorkingMode};
use crate::dte::Dte;
use crate::error::UartError;
use crate::uart::{PatternIntervals, UartEvent, UartPort};

/// Control operations recorded by [`MockUart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOp {
    PatternEnabled,
    PatternDisabled,
    PatternQueueReset,
    RxIntEnabled,
    RxIntDisabled,
    RxTimeoutSet,
    Flushed,
}

/// A scripted in-memory UART port.
pub struct MockUart {
    rx: Mutex<VecDeque<u8>>,
    pattern_positions: Mutex<VecDeque<usize>>,
    written: Mutex<Vec<u8>>,
    write_calls: Mutex<Vec<Vec<u8>>>,
    ops: Mutex<Vec<PortOp>>,
    events_tx: mpsc::Sender<UartEvent>,
}

impl MockUart {
    /// Create the mock together with the event queue its DTE consumes.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<UartEvent>) {
        let (events_tx, events_rx) = mpsc::channel(32);
        let port = Arc::new(Self {
            rx: Mutex::new(VecDeque::new()),
            pattern_positions: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            write_calls: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
            events_tx,
        });
        (port, events_rx)
    }

    /// Queue a command-mode line, one pattern event per newline it
    /// contains. Positions are relative to the driver's read pointer, as a
    /// real pattern detector reports them.
    pub async fn inject_line(&self, line: &str) {
        let start = self.rx.lock().unwrap().len();
        self.rx.lock().unwrap().extend(line.bytes());
        let mut consumed = 0usize;
        let mut pattern_count = 0usize;
        for (index, byte) in line.bytes().enumerate() {
            if byte == b'\n' {
                self.pattern_positions
                    .lock()
                    .unwrap()
                    .push_back(start + index - consumed);
                consumed = index + 1;
                pattern_count += 1;
            }
        }
        for _ in 0..pattern_count {
            let _ = self.events_tx.send(UartEvent::PatternDetected).await;
        }
    }

    /// Queue raw received bytes and raise a data event.
    pub async fn inject_bytes(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
        let _ = self.events_tx.send(UartEvent::Data).await;
    }

    /// Queue received bytes without raising any event, for paths that read
    /// the port directly (prompt waits).
    pub fn push_rx(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Raise a pattern event without queueing a position (queue overflow).
    pub async fn inject_orphan_pattern(&self) {
        let _ = self.events_tx.send(UartEvent::PatternDetected).await;
    }

    /// Raise an arbitrary UART event.
    pub async fn inject_event(&self, event: UartEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Every byte written so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Written bytes, one entry per `write` call.
    pub fn write_calls(&self) -> Vec<Vec<u8>> {
        self.write_calls.lock().unwrap().clone()
    }

    /// Forget recorded writes.
    pub fn clear_written(&self) {
        self.written.lock().unwrap().clear();
        self.write_calls.lock().unwrap().clear();
    }

    /// Control operations in invocation order.
    pub fn ops(&self) -> Vec<PortOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Forget recorded control operations.
    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    fn record(&self, op: PortOp) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl UartPort for MockUart {
    async fn write(&self, data: &[u8]) -> Result<usize, UartError> {
        self.written.lock().unwrap().extend_from_slice(data);
        self.write_calls.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, UartError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut rx = self.rx.lock().unwrap();
                if !rx.is_empty() {
                    let count = buf.len().min(rx.len());
                    for slot in buf[..count].iter_mut() {
                        *slot = rx.pop_front().unwrap();
                    }
                    return Ok(count);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(0);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn buffered_len(&self) -> Result<usize, UartError> {
        Ok(self.rx.lock().unwrap().len())
    }

    async fn flush_input(&self) -> Result<(), UartError> {
        self.rx.lock().unwrap().clear();
        self.pattern_positions.lock().unwrap().clear();
        self.record(PortOp::Flushed);
        Ok(())
    }

    async fn enable_pattern_detect(
        &self,
        _pattern: u8,
        _count: u8,
        _intervals: PatternIntervals,
    ) -> Result<(), UartError> {
        self.record(PortOp::PatternEnabled);
        Ok(())
    }

    async fn disable_pattern_detect(&self) -> Result<(), UartError> {
        self.record(PortOp::PatternDisabled);
        Ok(())
    }

    async fn pop_pattern_position(&self) -> Option<usize> {
        self.pattern_positions.lock().unwrap().pop_front()
    }

    async fn reset_pattern_queue(&self, _depth: usize) -> Result<(), UartError> {
        self.pattern_positions.lock().unwrap().clear();
        self.record(PortOp::PatternQueueReset);
        Ok(())
    }

    async fn enable_rx_interrupt(&self) -> Result<(), UartError> {
        self.record(PortOp::RxIntEnabled);
        Ok(())
    }

    async fn disable_rx_interrupt(&self) -> Result<(), UartError> {
        self.record(PortOp::RxIntDisabled);
        Ok(())
    }

    async fn set_rx_timeout_symbols(&self, _symbols: u8) -> Result<(), UartError> {
        self.record(PortOp::RxTimeoutSet);
        Ok(())
    }
}

/// A DCE that records every dispatch and can acknowledge transactions.
///
/// With auto-complete on (the default) every handled line or frame calls
/// [`Dte::process_cmd_done`] on the attached DTE, releasing the pending
/// send. Turn it off to hold a transaction open across several dispatches
/// and finish it manually with [`finish`](Self::finish).
pub struct RecordingDce {
    dte: Mutex<Option<Dte>>,
    lines: Mutex<Vec<String>>,
    frames: Mutex<Vec<Vec<u8>>>,
    modes: Mutex<Vec<WorkingMode>>,
    states: Mutex<Vec<DceState>>,
    pdp_contexts: Mutex<Vec<(u8, String, String)>>,
    hangups: AtomicUsize,
    setup_calls: AtomicUsize,
    auto_complete: AtomicBool,
    fail_lines: AtomicBool,
}

impl RecordingDce {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dte: Mutex::new(None),
            lines: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            modes: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
            pdp_contexts: Mutex::new(Vec::new()),
            hangups: AtomicUsize::new(0),
            setup_calls: AtomicUsize::new(0),
            auto_complete: AtomicBool::new(true),
            fail_lines: AtomicBool::new(false),
        })
    }

    /// Attach the DTE handle used for `process_cmd_done`.
    pub fn attach(&self, dte: Dte) {
        *self.dte.lock().unwrap() = Some(dte);
    }

    /// Whether handled lines/frames complete the pending transaction.
    pub fn set_auto_complete(&self, on: bool) {
        self.auto_complete.store(on, Ordering::SeqCst);
    }

    /// Make `handle_line` fail, as a DCE rejecting a response would.
    pub fn set_fail_lines(&self, on: bool) {
        self.fail_lines.store(on, Ordering::SeqCst);
    }

    /// Complete the pending transaction by hand.
    pub fn finish(&self) {
        if let Some(dte) = self.dte.lock().unwrap().as_ref() {
            dte.process_cmd_done();
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn modes(&self) -> Vec<WorkingMode> {
        self.modes.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<DceState> {
        self.states.lock().unwrap().clone()
    }

    pub fn pdp_contexts(&self) -> Vec<(u8, String, String)> {
        self.pdp_contexts.lock().unwrap().clone()
    }

    pub fn hangup_count(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }

    pub fn setup_count(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    fn complete_if_auto(&self) {
        if self.auto_complete.load(Ordering::SeqCst) {
            self.finish();
        }
    }
}

#[async_trait]
impl Dce for RecordingDce {
    fn handle_line(&self, line: &str) -> Result<(), DceError> {
        if self.fail_lines.load(Ordering::SeqCst) {
            return Err(DceError::UnexpectedResponse(line.to_owned()));
        }
        self.lines.lock().unwrap().push(line.to_owned());
        self.complete_if_auto();
        Ok(())
    }

    fn handle_mux_frame(&self, frame: &[u8]) -> Result<(), DceError> {
        self.frames.lock().unwrap().push(frame.to_vec());
        self.complete_if_auto();
        Ok(())
    }

    fn set_state(&self, state: DceState) {
        self.states.lock().unwrap().push(state);
    }

    fn set_working_mode(&self, mode: WorkingMode) -> Result<(), DceError> {
        self.modes.lock().unwrap().push(mode);
        Ok(())
    }

    async fn setup_cmux(&self) -> Result<(), DceError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn hang_up(&self) -> Result<(), DceError> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn define_pdp_context(
        &self,
        cid: u8,
        pdp_type: &str,
        apn: &str,
    ) -> Result<(), DceError> {
        self.pdp_contexts
            .lock()
            .unwrap()
            .push((cid, pdp_type.to_owned(), apn.to_owned()));
        Ok(())
    }
}
