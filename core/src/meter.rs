//! Meter reader seam — the cumulative length counter on the inspection
//! frame.
//!
//! The physical poller keeps a cached last-known reading, so reads are
//! synchronous and never block on the device. Reset is a device write and
//! can fail.

use thiserror::Error;

/// Errors from the meter device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeterError {
    /// The reset write did not reach the device.
    #[error("meter device error: {0}")]
    Device(String),
}

/// Current cumulative length reading plus reset-to-zero, as exposed by the
/// physical poller. The poller itself is outside the pipeline; only this
/// contract matters here.
pub trait MeterReader: Send + Sync {
    /// Last known cumulative meter reading.
    fn current_meters(&self) -> f64;

    /// Reset the counter to zero (done at every roll boundary).
    ///
    /// # Errors
    ///
    /// [`MeterError::Device`] when the write fails. Callers treat this as a
    /// peripheral fault: logged, but the roll data is already safe.
    fn reset(&self) -> Result<(), MeterError>;
}
