//! Wire-level codec for CMUX (3GPP TS 27.010) serial multiplexing.
//!
//! This crate knows nothing about UARTs or modems: it is the pure byte
//! layer shared by everything that speaks CMUX. It provides the reflected
//! CRC-8/ROHC used for the frame check sequence, the frame constants and
//! type codes, encoders for the frames a DTE originates (SABM channel
//! establishment, UIH data/command frames), and a validating parser for
//! complete frames. Streaming deframing of a raw byte stream lives in the
//! driver crate on top of this one.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod crc;
pub mod error;
pub mod frame;

pub use crc::{crc8, fcs, FCS_GOOD, FCS_INIT, FCS_POLYNOMIAL};
pub use error::FrameError;
pub use frame::{
    address, encode_into, sabm_frame, uih_frame, uih_frame_into, FrameType, MuxFrame, AT_DLCI,
    CLOSE_DOWN_FRAME, CONTROL_DLCI, DATA_DLCI, MAX_DLCI, MAX_PAYLOAD, SOF,
};
