use serde::{Deserialize, Serialize};

use super::{
    validate, ByteOrder, FramingError, VrlHeader, VrtHeader, PAYLOAD_OFFSET, WIRE_FRAME_LEN,
};

/// Decode interleaved `i16` samples from `dat`, appending to `out`. A trailing odd byte is
/// ignored.
pub fn decode_samples(dat: &[u8], order: ByteOrder, out: &mut Vec<i16>) {
    out.reserve(dat.len() / 2);
    out.extend(dat.chunks_exact(2).map(|b| order.i16([b[0], b[1]])));
}

/// Extract the payload samples of a single wire frame described by `vrt`.
///
/// # Errors
/// If `vrt` declares fewer words than its own header or more payload than `frame` holds.
pub fn extract_payload(
    frame: &[u8],
    vrt: &VrtHeader,
    order: ByteOrder,
) -> Result<Vec<i16>, FramingError> {
    let end = payload_end(frame, vrt)?;
    let mut samples = Vec::new();
    decode_samples(&frame[PAYLOAD_OFFSET..end], order, &mut samples);
    Ok(samples)
}

fn payload_end(frame: &[u8], vrt: &VrtHeader) -> Result<usize, FramingError> {
    let words = vrt.payload_words().ok_or(FramingError::BadPacketSize {
        actual: vrt.packet_size,
    })?;
    let end = PAYLOAD_OFFSET + words * 4;
    if frame.len() < end {
        return Err(FramingError::NotEnoughData {
            actual: frame.len(),
            minimum: end,
        });
    }
    Ok(end)
}

/// A single validated wire frame borrowed from a receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct WireFrame<'a> {
    pub vrl: VrlHeader,
    pub vrt: VrtHeader,
    order: ByteOrder,
    payload: &'a [u8],
}

impl<'a> WireFrame<'a> {
    /// Decode and validate the headers at the start of `dat`.
    ///
    /// # Errors
    /// If either header cannot be decoded, fails [validate], or the payload it declares does
    /// not fit in `dat`.
    pub fn decode(dat: &'a [u8], order: ByteOrder) -> Result<Self, FramingError> {
        let vrl = VrlHeader::decode(dat, order)?;
        let vrt = VrtHeader::decode(&dat[VrlHeader::LEN..], order)?;
        validate(&vrl, &vrt)?;
        let end = payload_end(dat, &vrt)?;
        Ok(WireFrame {
            vrl,
            vrt,
            order,
            payload: &dat[PAYLOAD_OFFSET..end],
        })
    }

    /// Raw payload bytes.
    #[must_use]
    pub fn payload_bytes(&self) -> &'a [u8] {
        self.payload
    }

    #[must_use]
    pub fn payload(&self) -> Vec<i16> {
        let mut samples = Vec::new();
        decode_samples(self.payload, self.order, &mut samples);
        samples
    }
}

/// One or more wire frames combined into a single logical packet sharing the first frame's
/// headers, and therefore its timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Vita49Packet {
    pub vrl: VrlHeader,
    pub vrt: VrtHeader,
    /// Interleaved I/Q samples of all frames in arrival order.
    pub payload: Vec<i16>,
    /// VRL frame count of each aggregated wire frame, in arrival order.
    pub frame_counts: Vec<u16>,
}

impl Vita49Packet {
    fn new(first: &WireFrame, capacity: usize) -> Self {
        let mut packet = Vita49Packet {
            vrl: first.vrl,
            vrt: first.vrt,
            payload: Vec::with_capacity(capacity * first.payload.len() / 2),
            frame_counts: Vec::with_capacity(capacity),
        };
        packet.push(first);
        packet
    }

    fn push(&mut self, frame: &WireFrame) {
        decode_samples(frame.payload, frame.order, &mut self.payload);
        self.frame_counts.push(frame.vrl.frame_count);
    }

    /// Number of wire frames aggregated.
    #[must_use]
    pub fn num_frames(&self) -> usize {
        self.frame_counts.len()
    }

    /// Number of complex (I/Q) samples.
    #[must_use]
    pub fn complex_len(&self) -> usize {
        self.payload.len() / 2
    }
}

/// Combine `frames` into a single packet keeping the first frame's headers, or `None` if
/// there are no frames.
pub fn aggregate<'a, I>(frames: I) -> Option<Vita49Packet>
where
    I: IntoIterator<Item = WireFrame<'a>>,
{
    let mut frames = frames.into_iter();
    let first = frames.next()?;
    let mut packet = Vita49Packet::new(&first, frames.size_hint().0 + 1);
    for frame in frames {
        packet.push(&frame);
    }
    Some(packet)
}

/// Decode a receive buffer holding a whole number of wire frames into a single aggregated
/// packet.
///
/// Any frame failing to decode or validate fails the entire buffer.
///
/// # Errors
/// [FramingError::PartialFrame] if `buf` is not a multiple of [WIRE_FRAME_LEN], otherwise
/// the first error of any individual frame.
pub fn decode_frames(buf: &[u8], order: ByteOrder) -> Result<Vita49Packet, FramingError> {
    if buf.len() < WIRE_FRAME_LEN {
        return Err(FramingError::NotEnoughData {
            actual: buf.len(),
            minimum: WIRE_FRAME_LEN,
        });
    }
    if buf.len() % WIRE_FRAME_LEN != 0 {
        return Err(FramingError::PartialFrame { len: buf.len() });
    }

    let num_frames = buf.len() / WIRE_FRAME_LEN;
    let mut frames = Vec::with_capacity(num_frames);
    for idx in 0..num_frames {
        let start = idx * WIRE_FRAME_LEN;
        frames.push(WireFrame::decode(&buf[start..start + WIRE_FRAME_LEN], order)?);
    }

    aggregate(frames).ok_or(FramingError::NotEnoughData {
        actual: buf.len(),
        minimum: WIRE_FRAME_LEN,
    })
}
