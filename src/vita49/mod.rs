//! VITA-49 frame decoding.
//!
//! The daemon wraps each VRT packet in a VRL frame and sends fixed size wire frames of
//! [WIRE_FRAME_LEN] bytes:
//!
//! | offset      | content                              |
//! |-------------|--------------------------------------|
//! | 0..8        | VRL header ([VrlHeader])             |
//! | 8..28       | VRT header ([VrtHeader])             |
//! | 28..8188    | payload, interleaved I/Q `i16`       |
//! | 8188..8192  | VEND trailer, not checked            |
//!
//! Nothing in this module performs I/O.
mod packet;

pub use packet::*;

use serde::{Deserialize, Serialize};

/// Length in bytes of a single wire frame.
pub const WIRE_FRAME_LEN: usize = 8192;
/// Byte offset of the first payload word in a wire frame.
pub const PAYLOAD_OFFSET: usize = VrlHeader::LEN + VrtHeader::LEN;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FramingError {
    #[error("not enough bytes: got {actual}, need {minimum}")]
    NotEnoughData { actual: usize, minimum: usize },
    #[error("bad frame alignment word {actual:#010x}")]
    BadFrameAlignment { actual: u32 },
    #[error("unexpected VRT packet size {actual:#x} words")]
    BadPacketSize { actual: u16 },
    /// Buffer handed to the decoder is not a whole number of wire frames.
    #[error("buffer of {len} bytes is not a multiple of the wire frame length")]
    PartialFrame { len: usize },
}

/// Byte order of header words and payload samples on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    #[must_use]
    pub fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        }
    }

    #[must_use]
    pub fn i16(self, b: [u8; 2]) -> i16 {
        match self {
            ByteOrder::Big => i16::from_be_bytes(b),
            ByteOrder::Little => i16::from_le_bytes(b),
        }
    }
}

fn words<const N: usize>(dat: &[u8], order: ByteOrder) -> Result<[u32; N], FramingError> {
    if dat.len() < N * 4 {
        return Err(FramingError::NotEnoughData {
            actual: dat.len(),
            minimum: N * 4,
        });
    }
    let mut words = [0u32; N];
    for (word, chunk) in words.iter_mut().zip(dat.chunks_exact(4)) {
        *word = order.u32([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

/// VITA Radio Link header.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct VrlHeader {
    pub frame_alignment_word: u32,
    /// Frame size in 32-bit words.
    pub frame_size: u32,
    /// Rolling frame counter, 0..4096.
    pub frame_count: u16,
}

impl VrlHeader {
    /// VRL header length in bytes
    pub const LEN: usize = 8;
    /// Frame alignment word, "VRLP"
    pub const FAW: u32 = 0x5652_4C50;
    /// Frame size in words of a standard 8192 byte wire frame
    pub const FRAME_SIZE: u32 = 0x800;

    /// Decode from the first [Self::LEN] bytes of `dat`.
    ///
    /// # Errors
    /// [FramingError::NotEnoughData] if `dat` is too short.
    pub fn decode(dat: &[u8], order: ByteOrder) -> Result<Self, FramingError> {
        let [faw, x] = words::<2>(dat, order)?;
        Ok(VrlHeader {
            frame_alignment_word: faw,
            frame_size: x & 0x0000_FFFF,
            frame_count: (x >> 20) as u16,
        })
    }
}

/// VITA Radio Transport packet header, including the timestamp words.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct VrtHeader {
    pub packet_type: u8,
    /// Class id present
    pub c: bool,
    /// Trailer present
    pub t: bool,
    pub rr: u8,
    /// Integer timestamp type
    pub tsi: u8,
    /// Fractional timestamp type
    pub tsf: u8,
    pub packet_count: u8,
    /// Packet size in 32-bit words, including the header.
    pub packet_size: u16,
    pub stream_id: u32,
    pub integer_seconds: u32,
    pub fractional_seconds_msw: u32,
    pub fractional_seconds_lsw: u32,
}

impl VrtHeader {
    /// VRT header length in bytes
    pub const LEN: usize = 20;
    /// VRT header length in words
    pub const WORDS: usize = 5;
    /// The only packet size the daemon produces, header included.
    pub const EXPECTED_PACKET_SIZE: u16 = 0x7FD;

    /// Decode from the first [Self::LEN] bytes of `dat`.
    ///
    /// # Errors
    /// [FramingError::NotEnoughData] if `dat` is too short.
    pub fn decode(dat: &[u8], order: ByteOrder) -> Result<Self, FramingError> {
        let [x, stream_id, integer_seconds, msw, lsw] = words::<5>(dat, order)?;
        Ok(VrtHeader {
            packet_type: (x >> 28) as u8,
            c: (x & 0x0800_0000) >> 27 == 1,
            t: (x & 0x0400_0000) >> 26 == 1,
            rr: ((x & 0x0300_0000) >> 24) as u8,
            tsi: ((x & 0x00C0_0000) >> 22) as u8,
            tsf: ((x & 0x0030_0000) >> 20) as u8,
            packet_count: ((x & 0x000F_0000) >> 16) as u8,
            packet_size: (x & 0xFFFF) as u16,
            stream_id,
            integer_seconds,
            fractional_seconds_msw: msw,
            fractional_seconds_lsw: lsw,
        })
    }

    /// Number of payload words following the header, or `None` if `packet_size` is smaller
    /// than the header itself.
    #[must_use]
    pub fn payload_words(&self) -> Option<usize> {
        usize::from(self.packet_size).checked_sub(Self::WORDS)
    }

    /// Full 64-bit fractional timestamp.
    #[must_use]
    pub fn fractional_seconds(&self) -> u64 {
        (u64::from(self.fractional_seconds_msw) << 32) | u64::from(self.fractional_seconds_lsw)
    }
}

/// Check the headers of a single wire frame.
///
/// # Errors
/// If the frame alignment word or the packet size are not the expected constants.
pub fn validate(vrl: &VrlHeader, vrt: &VrtHeader) -> Result<(), FramingError> {
    if vrl.frame_alignment_word != VrlHeader::FAW {
        return Err(FramingError::BadFrameAlignment {
            actual: vrl.frame_alignment_word,
        });
    }
    if vrt.packet_size != VrtHeader::EXPECTED_PACKET_SIZE {
        return Err(FramingError::BadPacketSize {
            actual: vrt.packet_size,
        });
    }
    Ok(())
}
