use std::{fs::File, io::Read, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::Span;
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};
use crate::vita49::{ByteOrder, WIRE_FRAME_LEN};

/// Control port of the device manager; device `n` listens on `BASE_CONTROL_PORT + n`.
pub const BASE_CONTROL_PORT: u16 = 12900;
/// Device `n` serves receive data on `BASE_RECEIVE_PORT + n`.
pub const BASE_RECEIVE_PORT: u16 = 12700;

pub const DEFAULT_HOST: &str = "localhost";
/// Wire frames combined into one sample block in VITA-49 mode.
pub const DEFAULT_FRAMES_PER_READ: usize = 64;
/// Bytes per sample block in raw complex mode.
pub const DEFAULT_RAW_READ_LEN: usize = 1024 * 512;
pub const DEFAULT_DATA_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 5000;

/// Format of the daemon data stream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Unframed interleaved I/Q `i16` samples.
    #[default]
    RawComplex,
    /// Fixed size VRL/VRT wire frames.
    Vita49,
}

impl OutputFormat {
    #[must_use]
    pub fn is_vita49(self) -> bool {
        self == OutputFormat::Vita49
    }
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_true() -> bool {
    true
}

fn default_frames_per_read() -> usize {
    DEFAULT_FRAMES_PER_READ
}

fn default_raw_read_len() -> usize {
    DEFAULT_RAW_READ_LEN
}

fn default_data_timeout_ms() -> u64 {
    DEFAULT_DATA_TIMEOUT_MS
}

fn default_control_timeout_ms() -> u64 {
    DEFAULT_CONTROL_TIMEOUT_MS
}

/// Configuration of a single [DeviceController](crate::DeviceController).
///
/// ```
/// use avs4000::{ControllerConfig, OutputFormat};
///
/// let config = ControllerConfig::builder()
///     .device_number(1)
///     .output_format(OutputFormat::Vita49)
///     .build();
/// assert_eq!(config.control_port().unwrap(), 12901);
/// assert_eq!(config.data_port().unwrap(), 12701);
/// ```
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone)]
pub struct ControllerConfig {
    pub device_number: u16,
    #[builder(default = default_host(), setter(into))]
    #[serde(default = "default_host")]
    pub host: String,
    /// Overrides `BASE_CONTROL_PORT + device_number`.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub control_port: Option<u16>,
    /// Overrides `BASE_RECEIVE_PORT + device_number`.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub data_port: Option<u16>,
    #[builder(default)]
    #[serde(default)]
    pub output_format: OutputFormat,
    #[builder(default)]
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// When false another consumer reads the data port and no data connection is opened.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub owns_data_socket: bool,
    #[builder(default = DEFAULT_FRAMES_PER_READ)]
    #[serde(default = "default_frames_per_read")]
    pub frames_per_read: usize,
    /// Must be a non-zero multiple of 4, i.e., whole I/Q pairs.
    #[builder(default = DEFAULT_RAW_READ_LEN)]
    #[serde(default = "default_raw_read_len")]
    pub raw_read_len: usize,
    #[builder(default = DEFAULT_DATA_TIMEOUT_MS)]
    #[serde(default = "default_data_timeout_ms")]
    pub data_timeout_ms: u64,
    #[builder(default = DEFAULT_CONTROL_TIMEOUT_MS)]
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    /// Span used for all of the controller's diagnostics. Defaults to an `avs4000` span
    /// carrying the device number.
    #[builder(default, setter(strip_option))]
    #[serde(skip)]
    pub span: Option<Span>,
}

impl ControllerConfig {
    /// Read a JSON configuration.
    ///
    /// # Errors
    /// [Error::Configuration] if the JSON is invalid or missing `device_number`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        serde_json::from_reader(reader)
            .map_err(|err| Error::Configuration(format!("invalid controller config: {err}")))
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    /// [Error::Configuration] if the file cannot be read or is not a valid configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            Error::Configuration(format!("cannot open config {}: {err}", path.display()))
        })?;
        Self::from_reader(file)
    }

    /// # Errors
    /// [Error::Configuration] if the default port is out of range.
    pub fn control_port(&self) -> Result<u16> {
        resolve_port(self.control_port, BASE_CONTROL_PORT, self.device_number)
    }

    /// # Errors
    /// [Error::Configuration] if the default port is out of range.
    pub fn data_port(&self) -> Result<u16> {
        resolve_port(self.data_port, BASE_RECEIVE_PORT, self.device_number)
    }

    #[must_use]
    pub fn data_timeout(&self) -> Duration {
        Duration::from_millis(self.data_timeout_ms)
    }

    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// [Error::Configuration] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.control_port()?;
        self.data_port()?;
        if self.host.is_empty() {
            return Err(Error::Configuration("host must not be empty".into()));
        }
        if self.frames_per_read == 0 {
            return Err(Error::Configuration("frames_per_read must be > 0".into()));
        }
        if self.frames_per_read.checked_mul(WIRE_FRAME_LEN).is_none() {
            return Err(Error::Configuration(format!(
                "frames_per_read {} is too large",
                self.frames_per_read
            )));
        }
        if self.raw_read_len == 0 || self.raw_read_len % 4 != 0 {
            return Err(Error::Configuration(format!(
                "raw_read_len must be a non-zero multiple of 4, got {}",
                self.raw_read_len
            )));
        }
        if self.data_timeout_ms == 0 || self.control_timeout_ms == 0 {
            return Err(Error::Configuration("timeouts must be > 0".into()));
        }
        Ok(())
    }
}

fn resolve_port(port: Option<u16>, base: u16, device_number: u16) -> Result<u16> {
    match port {
        Some(port) => Ok(port),
        None => base.checked_add(device_number).ok_or_else(|| {
            Error::Configuration(format!("device number {device_number} is out of range"))
        }),
    }
}
