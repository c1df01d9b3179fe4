//! Streaming CMUX deframer.
//!
//! Accumulates raw UART bytes across reads and extracts every complete
//! SOF-delimited frame. The byte stream is not trusted: leading garbage is
//! discarded once an SOF shows up, a complete-length frame without its
//! trailing SOF is counted as a fault and skipped so later frames still
//! extract, and the buffer never grows past its configured capacity.

use muxlink_core::frame::{MuxFrame, OVERHEAD, SOF};
use tracing::{debug, warn};

/// Bytes needed before the length field can be trusted.
const MIN_HEADER: usize = 5;

/// Outcome of one [`MuxAccumulator::feed`] call.
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// Complete frames extracted, in arrival order.
    pub frames: Vec<MuxFrame>,
    /// Bytes skipped while resynchronising to an SOF.
    pub skipped: usize,
    /// Complete-length frames discarded for a missing trailing SOF.
    pub bad_frames: usize,
}

/// Stateful accumulator that buffers stream data and extracts complete
/// CMUX frames delimited by SOF (0xF9) bytes.
pub struct MuxAccumulator {
    buffer: Vec<u8>,
    capacity: usize,
}

impl MuxAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Feed new bytes and extract every complete frame.
    pub fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut out = FeedOutcome::default();

        let room = self.capacity.saturating_sub(self.buffer.len());
        if data.len() > room {
            warn!(
                dropped = data.len() - room,
                "reassembly buffer full, dropping input"
            );
        }
        self.buffer.extend_from_slice(&data[..data.len().min(room)]);

        loop {
            // Drop whatever sits ahead of the next SOF.
            if !self.buffer.is_empty() && self.buffer[0] != SOF {
                match self.buffer.iter().position(|&b| b == SOF) {
                    Some(pos) => {
                        self.buffer.drain(..pos);
                        out.skipped += pos;
                    }
                    None => {
                        out.skipped += self.buffer.len();
                        self.buffer.clear();
                    }
                }
            }

            if self.buffer.len() < MIN_HEADER {
                break;
            }

            let payload_len = (self.buffer[3] >> 1) as usize;
            let total = payload_len + OVERHEAD;
            if self.buffer.len() < total {
                // Frame incomplete; wait for more bytes.
                break;
            }

            if self.buffer[total - 1] != SOF {
                warn!(expected = total, "missing trailing SOF, skipping frame");
                out.bad_frames += 1;
                // Step past the bogus leading SOF and rescan.
                self.buffer.drain(..1);
                out.skipped += 1;
                continue;
            }

            let raw: Vec<u8> = self.buffer.drain(..total).collect();
            match MuxFrame::parse(raw) {
                Ok(frame) => out.frames.push(frame),
                Err(err) => {
                    warn!(%err, "discarding malformed frame");
                    out.bad_frames += 1;
                }
            }
        }

        if out.skipped > 0 {
            debug!(skipped = out.skipped, "resynchronised to SOF");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxlink_core::frame::{address, encode_into, sabm_frame, uih_frame, FrameType, PF};

    fn uih(dlci: u8, payload: &[u8]) -> Vec<u8> {
        uih_frame(dlci, payload).unwrap()
    }

    #[test]
    fn whole_frame_in_one_feed() {
        let mut acc = MuxAccumulator::new(1024);
        let out = acc.feed(&uih(2, b"\r\nOK\r\n"));
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0].dlci(), 2);
        assert_eq!(out.frames[0].payload(), b"\r\nOK\r\n");
        assert!(acc.is_empty());
    }

    #[test]
    fn two_concatenated_frames_extract_in_order() {
        let mut acc = MuxAccumulator::new(1024);
        let mut stream = uih(2, b"\r\n+CSQ: 21,0\r\n");
        stream.extend_from_slice(&uih(2, b"\r\nOK\r\n"));

        let out = acc.feed(&stream);
        assert_eq!(out.frames.len(), 2);
        assert_eq!(out.frames[0].payload(), b"\r\n+CSQ: 21,0\r\n");
        assert_eq!(out.frames[1].payload(), b"\r\nOK\r\n");
        assert_eq!(acc.len(), 0);
    }

    #[test]
    fn chunked_delivery_matches_single_feed() {
        // Any split of the stream must produce the same dispatch sequence.
        let mut stream = Vec::new();
        stream.extend_from_slice(&sabm_frame(0));
        stream.extend_from_slice(&uih(1, b"\r\nCONNECT 115200\r\n"));
        stream.extend_from_slice(&uih(2, b"\r\nOK\r\n"));
        stream.extend_from_slice(&uih(1, &[0x7E; 64]));

        let mut whole = MuxAccumulator::new(1024);
        let expected: Vec<_> = whole.feed(&stream).frames;
        assert_eq!(expected.len(), 4);

        for chunk_size in [1usize, 2, 3, 5, 7, 11, 64] {
            let mut acc = MuxAccumulator::new(1024);
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                frames.extend(acc.feed(chunk).frames);
            }
            assert_eq!(frames, expected, "chunk size {chunk_size}");
            assert!(acc.is_empty());
        }
    }

    #[test]
    fn truncated_frame_waits_for_the_rest() {
        let frame = uih(2, b"\r\nOK\r\n");
        let mut acc = MuxAccumulator::new(1024);

        let out = acc.feed(&frame[..5]);
        assert!(out.frames.is_empty());
        assert_eq!(acc.len(), 5);

        let out = acc.feed(&frame[5..]);
        assert_eq!(out.frames.len(), 1);
        assert!(acc.is_empty());
    }

    #[test]
    fn garbage_prefix_is_discarded_at_the_next_sof() {
        let mut acc = MuxAccumulator::new(1024);
        let out = acc.feed(&[0x00, 0x11, 0x22]);
        assert!(out.frames.is_empty());

        let out = acc.feed(&uih(2, b"\r\nRDY\r\n"));
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0].payload(), b"\r\nRDY\r\n");
        assert!(acc.is_empty());
    }

    #[test]
    fn missing_trailing_sof_skips_to_the_next_frame() {
        let mut corrupt = uih(2, b"\r\nERROR\r\n");
        let last = corrupt.len() - 1;
        corrupt[last] = 0x00;
        corrupt.extend_from_slice(&uih(2, b"\r\nOK\r\n"));

        let mut acc = MuxAccumulator::new(1024);
        let out = acc.feed(&corrupt);
        assert_eq!(out.bad_frames, 1);
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0].payload(), b"\r\nOK\r\n");
    }

    #[test]
    fn uih_with_poll_final_extracts() {
        let mut raw = Vec::new();
        encode_into(
            &mut raw,
            address(2, true),
            FrameType::Uih as u8 | PF,
            b"\r\nOK\r\n",
        )
        .unwrap();
        let mut acc = MuxAccumulator::new(1024);
        let out = acc.feed(&raw);
        assert_eq!(out.frames.len(), 1);
        assert!(out.frames[0].is_uih());
        assert!(out.frames[0].poll_final());
    }

    #[test]
    fn input_beyond_capacity_is_dropped() {
        let mut acc = MuxAccumulator::new(8);
        let out = acc.feed(&[0xAA; 32]);
        assert!(out.frames.is_empty());
        assert!(acc.len() <= 8);
    }
}
