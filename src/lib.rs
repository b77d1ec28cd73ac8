//! Client for the AVS4000 software defined radio receiver daemon.
//!
//! The daemon exposes each receiver on two TCP ports: a control port speaking newline
//! delimited JSON ([control]) and a data port streaming either raw interleaved `i16` I/Q
//! samples or VITA-49 frames ([vita49]). A [DeviceController] drives the receiver through
//! setup, tuning, enable and disable, and hands out [SampleBlock]s with timestamps from
//! [DeviceController::pull_block].
//!
//! Diagnostics are emitted with `tracing`; each controller logs inside its own span.
mod config;
mod controller;
mod error;
mod manager;

pub mod control;
pub mod data;
pub mod sequence;
pub mod timestamp;
pub mod vita49;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::*;
pub use controller::*;
pub use error::{Error, Result};
pub use manager::*;
pub use timestamp::{MasterClock, SampleRateMode, Timestamp, TimestampSource};
pub use vita49::ByteOrder;

/// Lock `mutex`, recovering the data of a poisoned lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
