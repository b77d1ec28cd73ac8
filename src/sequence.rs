//! VRL frame counter continuity tracking.
use serde::{Deserialize, Serialize};

/// VRL frame counts roll over at this value.
pub const FRAME_COUNT_MODULUS: u16 = 4096;

/// A discontinuity in the VRL frame counter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub expected: u16,
    pub actual: u16,
}

impl SequenceGap {
    /// Number of frames missing between `expected` and `actual`, accounting for rollover.
    /// A count that went backwards, e.g., a duplicate, shows up as a large value.
    #[must_use]
    pub fn missing(&self) -> u16 {
        (self.actual + FRAME_COUNT_MODULUS - self.expected) % FRAME_COUNT_MODULUS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// First count seen since the last reset, adopted without checking.
    Baseline,
    InSequence,
    Gap(SequenceGap),
}

/// Tracks the expected next VRL frame count.
#[derive(Debug, Clone, Default)]
pub struct FrameSequenceTracker {
    expected: Option<u16>,
}

impl FrameSequenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the expected count; the next observation becomes the new baseline.
    pub fn reset(&mut self) {
        self.expected = None;
    }

    /// The next frame count expected, if any has been observed since the last reset.
    #[must_use]
    pub fn expected(&self) -> Option<u16> {
        self.expected
    }

    /// Check `actual` against the expected count, then expect `actual + advance` next.
    ///
    /// `advance` is the number of frames the observation covers. On a gap the tracker
    /// re-baselines on `actual` so a single drop is reported once.
    pub fn observe(&mut self, actual: u16, advance: u32) -> SequenceStatus {
        let actual = actual % FRAME_COUNT_MODULUS;
        let next = ((u32::from(actual) + advance) % u32::from(FRAME_COUNT_MODULUS)) as u16;
        let status = match self.expected {
            None => SequenceStatus::Baseline,
            Some(expected) if expected == actual => SequenceStatus::InSequence,
            Some(expected) => SequenceStatus::Gap(SequenceGap { expected, actual }),
        };
        self.expected = Some(next);
        status
    }
}
