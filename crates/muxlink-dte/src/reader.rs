//! The DTE reader task.
//!
//! Exactly one reader runs per DTE for its whole lifetime. It blocks on
//! the UART event queue, reads lines (command mode) or raw bytes
//! (CMUX/PPP modes) out of the driver, and dispatches decoded lines and
//! frames to the bound DCE. The reassembly state is owned by the task;
//! callers never touch it.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use muxlink_core::frame::{MuxFrame, AT_DLCI, CONTROL_DLCI, DATA_DLCI};

use crate::dte::{DteShared, ResponseRoute};
use crate::events::ModemEvent;
use crate::framing::MuxAccumulator;
use crate::uart::UartEvent;

/// Timeout for draining bytes the driver has already announced.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Reader task entry point.
pub(crate) async fn run(
    shared: Arc<DteShared>,
    mut events: mpsc::Receiver<UartEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let capacity = shared.config.line_buffer_size;
    let mut line_buf = vec![0u8; capacity];
    let mut chunk = vec![0u8; capacity];
    let mut accumulator = MuxAccumulator::new(capacity);

    debug!("reader task running");
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("UART event queue closed");
                    break;
                }
            },
            _ = stop_rx.changed() => break,
        };

        match event {
            UartEvent::PatternDetected => handle_pattern(&shared, &mut line_buf).await,
            UartEvent::Data => handle_data(&shared, &mut chunk, &mut accumulator).await,
            UartEvent::FifoOverflow => {
                warn!("hardware FIFO overflow");
                recover_overrun(&shared, &mut events).await;
            }
            UartEvent::BufferFull => {
                warn!("RX ring buffer full");
                recover_overrun(&shared, &mut events).await;
            }
            UartEvent::Break => warn!("RX break"),
            UartEvent::ParityError => error!("parity error"),
            UartEvent::FrameError => error!("frame error"),
        }
    }
    debug!("reader task exiting");
}

/// Flush pending input and drop queued UART events after an overrun.
async fn recover_overrun(shared: &DteShared, events: &mut mpsc::Receiver<UartEvent>) {
    if let Err(err) = shared.port.flush_input().await {
        error!(%err, "flush after overrun failed");
    }
    while events.try_recv().is_ok() {}
}

/// Command mode: the pattern detector saw a newline; read the line out of
/// the driver and dispatch it.
async fn handle_pattern(shared: &DteShared, line_buf: &mut [u8]) {
    let Some(position) = shared.port.pop_pattern_position().await else {
        // More newlines arrived than the position queue could hold.
        warn!("pattern position queue exhausted, flushing");
        if let Err(err) = shared.port.flush_input().await {
            error!(%err, "flush failed");
        }
        return;
    };

    // One line including its terminating newline, clamped to the buffer.
    let want = if position < line_buf.len() - 1 {
        position + 1
    } else {
        warn!("line buffer too small for detected line");
        line_buf.len() - 1
    };

    match shared.port.read(&mut line_buf[..want], READ_TIMEOUT).await {
        Ok(got) if got > 0 => {
            trace!(
                line = %String::from_utf8_lossy(&line_buf[..got]).trim_end(),
                "< line"
            );
            dispatch_line(shared, &line_buf[..got]);
        }
        Ok(_) => error!("UART returned no line data"),
        Err(err) => error!(%err, "UART read failed"),
    }
}

/// Forward one raw response line to the bound DCE.
fn dispatch_line(shared: &DteShared, raw: &[u8]) {
    // Skip empty lines and pure "\r\n" noise.
    if raw.len() <= 2 || raw.iter().all(|&b| b == b'\r' || b == b'\n') {
        return;
    }
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches(['\r', '\n']);

    let Some(dce) = shared.bound_dce() else {
        error!("line received but no DCE is bound");
        return;
    };

    if shared.route() == ResponseRoute::AwaitLine {
        if let Err(err) = dce.handle_line(text) {
            warn!(%err, line = text, "line handler failed");
            shared
                .events
                .publish(ModemEvent::UnknownLine(text.to_owned()));
        }
        // The route stays armed: the send path disarms it when the
        // transaction ends.
    } else {
        shared
            .events
            .publish(ModemEvent::UnknownLine(text.to_owned()));
    }
}

/// CMUX/PPP mode: drain the driver's RX buffer into the accumulator and
/// dispatch every complete frame.
async fn handle_data(shared: &DteShared, chunk: &mut [u8], accumulator: &mut MuxAccumulator) {
    let pending = match shared.port.buffered_len().await {
        Ok(pending) => pending,
        Err(err) => {
            error!(%err, "buffered length query failed");
            return;
        }
    };
    if pending == 0 {
        return;
    }

    let want = pending.min(chunk.len());
    let got = match shared.port.read(&mut chunk[..want], READ_TIMEOUT).await {
        Ok(got) => got,
        Err(err) => {
            error!(%err, "UART read failed");
            return;
        }
    };
    if got == 0 {
        return;
    }

    let outcome = accumulator.feed(&chunk[..got]);
    if outcome.bad_frames > 0 {
        shared
            .events
            .publish(ModemEvent::UnknownLine("cmux framing error".to_owned()));
    }
    for frame in &outcome.frames {
        dispatch_frame(shared, frame);
    }
}

/// Route one decoded frame.
///
/// Order matters and mirrors the transaction model: a pending frame
/// handshake wins, then CONNECT text on the data channel (one-shot), then
/// AT-channel text (reusable until the send path disarms it), then raw
/// data payload, and anything else off the control channel is dropped.
fn dispatch_frame(shared: &DteShared, frame: &MuxFrame) {
    let dlci = frame.dlci();
    let payload = frame.payload();
    debug!(
        dlci,
        control = frame.control(),
        len = payload.len(),
        "< CMUX frame"
    );

    let Some(dce) = shared.bound_dce() else {
        error!("frame received but no DCE is bound");
        return;
    };

    let route = shared.route();

    if route == ResponseRoute::AwaitFrame {
        match dce.handle_mux_frame(frame.as_bytes()) {
            Ok(()) => shared.set_route(ResponseRoute::Idle),
            Err(err) => {
                warn!(%err, "frame handler failed");
                shared
                    .events
                    .publish(ModemEvent::UnknownLine("cmux frame invalid".to_owned()));
            }
        }
        return;
    }

    if frame.is_uih() && dlci == DATA_DLCI && route == ResponseRoute::AwaitLine {
        if let Some(text) = line_text(payload) {
            // The post-dial CONNECT arrives on the data channel; one-shot.
            info!(line = %text, "line on data channel");
            match dce.handle_line(&text) {
                Ok(()) => shared.set_route(ResponseRoute::Idle),
                Err(err) => {
                    warn!(%err, line = %text, "line handler failed");
                    shared.events.publish(ModemEvent::UnknownLine(text));
                }
            }
            return;
        }
    }

    if frame.is_uih() && dlci == AT_DLCI && route == ResponseRoute::AwaitLine {
        if let Some(text) = line_text(payload) {
            debug!(line = %text, "line on AT channel");
            if let Err(err) = dce.handle_line(&text) {
                warn!(%err, line = %text, "line handler failed");
                shared.events.publish(ModemEvent::UnknownLine(text));
            }
        }
        return;
    }

    if frame.is_uih() && dlci == DATA_DLCI && !payload.is_empty() {
        let callback = shared
            .receive_cb
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            trace!(len = payload.len(), "< data channel payload");
            callback(payload);
            return;
        }
    }

    if dlci != CONTROL_DLCI {
        warn!(dlci, "frame in unknown state, dropping");
    }
}

/// Extract the response text carried in a UIH payload.
///
/// Modems prepend CRLF to framed responses: the first two payload bytes
/// are skipped. The text is truncated at an interior NUL, must be longer
/// than two bytes, and is delivered with trailing CR/LF trimmed.
fn line_text(payload: &[u8]) -> Option<String> {
    let body = payload.get(2..)?;
    let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
    let body = &body[..end];
    if body.len() <= 2 {
        return None;
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}
