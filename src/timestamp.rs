//! Sample block timestamps.
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vita49::VrtHeader;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRateMode {
    #[default]
    #[serde(alias = "auto", alias = "AUTO")]
    Auto,
    #[serde(alias = "manual", alias = "MANUAL")]
    Manual,
}

/// The device's authoritative sample clock, as reported by the `master` group.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MasterClock {
    #[serde(rename = "sampleRate", alias = "SampleRate")]
    pub sample_rate: f64,
    #[serde(rename = "sampleRateMode", alias = "SampleRateMode", default)]
    pub sample_rate_mode: SampleRateMode,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    /// Reconstructed from VRT timestamp words.
    Device,
    /// Local wall-clock at the time the data was read.
    WallClock,
}

/// Whole seconds since the Unix epoch plus a fractional part.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    pub seconds: i64,
    /// Fractional seconds. Reconstructed device values are not normalized and may be >= 1.
    pub fractional: f64,
    pub source: TimestampSource,
}

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        let now = Utc::now();
        Timestamp {
            seconds: now.timestamp(),
            fractional: f64::from(now.timestamp_subsec_nanos()) / 1e9,
            source: TimestampSource::WallClock,
        }
    }

    /// Reconstruct the timestamp of a VRT packet, converting the fractional sample count to
    /// seconds using the master clock sample rate.
    ///
    /// # Errors
    /// [Error::Configuration] if there is no master clock or its sample rate is not positive.
    pub fn from_vrt(vrt: &VrtHeader, clock: Option<&MasterClock>) -> Result<Self> {
        let Some(clock) = clock else {
            return Err(Error::Configuration(
                "master clock has not been queried".into(),
            ));
        };
        if clock.sample_rate.is_nan() || clock.sample_rate <= 0.0 {
            return Err(Error::Configuration(format!(
                "master clock sample rate {} cannot be used for timestamps",
                clock.sample_rate
            )));
        }
        Ok(Timestamp {
            seconds: i64::from(vrt.integer_seconds),
            fractional: f64::from(vrt.fractional_seconds_lsw) * (1.0 / clock.sample_rate),
            source: TimestampSource::Device,
        })
    }

    #[must_use]
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.fractional
    }

    /// Convert to a `DateTime`, carrying any whole seconds in the fractional part. `None` if
    /// out of range.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let whole = self.fractional.floor();
        let nanos = ((self.fractional - whole) * 1e9).round().min(999_999_999.0) as u32;
        Utc.timestamp_opt(self.seconds + whole as i64, nanos).single()
    }
}
