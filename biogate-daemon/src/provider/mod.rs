//! Capture provider abstraction.
//!
//! A provider wraps one fingerprint device. The session runner only talks to
//! it through [`CaptureProvider`], so the vendor SDK and the simulated device
//! are interchangeable.

mod sdk;
mod simulated;

use std::time::Duration;

use async_trait::async_trait;

pub use sdk::{classify_sdk_code, describe_sdk_code, SdkCode};
pub use simulated::{ParseStepError, SimulatedProvider, SimulatedStep, DEFAULT_TEMPLATE_SIZE};

/// Result of a capture call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The device produced a template with the given quality score.
    Captured { template: Vec<u8>, quality: u8 },
    /// The device reported that no finger was presented.
    NoInput,
}

/// Error type for provider operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("capture device disconnected")]
    Disconnected,

    #[error("capture read failed: {0}")]
    ReadFailed(String),

    #[error("device SDK error {code}: {message}")]
    Sdk { code: u32, message: String },
}

impl CaptureError {
    /// Returns true if the device cannot continue the session.
    ///
    /// Read failures are per-attempt and may be retried.
    pub fn is_device_fault(&self) -> bool {
        !matches!(self, Self::ReadFailed(_))
    }
}

/// A fingerprint capture device.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Short name for logs and `/status`.
    fn name(&self) -> &str;

    /// Prepare the device for capturing. Called once per session, after the
    /// lease has been acquired.
    async fn initialize(&self) -> Result<(), CaptureError>;

    /// Capture one fingerprint, waiting at most `timeout` for placement.
    ///
    /// Implementations may overrun `timeout`; the caller enforces its own
    /// deadline around this call. `NoInput` may be reported early; the caller
    /// still waits out the attempt window before the next attempt.
    async fn capture(&self, timeout: Duration) -> Result<CaptureOutcome, CaptureError>;
}
