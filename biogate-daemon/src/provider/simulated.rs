//! Simulated fingerprint device.
//!
//! Replays a script of [`SimulatedStep`]s, one per capture call. Once the
//! script runs out every capture succeeds with a random good score. Used for
//! development without hardware and throughout the test suite.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, RngCore};

use super::sdk::{classify_sdk_code, SdkCode};
use super::{CaptureError, CaptureOutcome, CaptureProvider};

/// Template size of the SG400 format, in bytes.
pub const DEFAULT_TEMPLATE_SIZE: usize = 400;

/// Scripted behaviour of one capture call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedStep {
    /// Return a template with this quality score.
    Quality(u8),
    /// Wait out the timeout and report that no finger was presented.
    NoInput,
    /// Return the given vendor status code.
    SdkCode(u32),
    /// Report the device as unplugged.
    Disconnect,
    /// Never return.
    Stall,
}

/// Error type for parsing a simulation script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "invalid simulated step '{0}' \
     (expected a score 0-100, no-input, sdk:<code>, disconnect or stall)"
)]
pub struct ParseStepError(String);

impl SimulatedStep {
    /// Parse a comma separated script such as `"30,35,no-input,75"`.
    pub fn parse_script(script: &str) -> Result<Vec<Self>, ParseStepError> {
        script
            .split(',')
            .map(str::trim)
            .filter(|step| !step.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for SimulatedStep {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseStepError(s.to_string());
        match s {
            "no-input" => Ok(Self::NoInput),
            "disconnect" => Ok(Self::Disconnect),
            "stall" => Ok(Self::Stall),
            _ => {
                if let Some(code) = s.strip_prefix("sdk:") {
                    return code.parse().map(Self::SdkCode).map_err(|_| invalid());
                }
                match s.parse::<u8>() {
                    Ok(score) if score <= 100 => Ok(Self::Quality(score)),
                    _ => Err(invalid()),
                }
            }
        }
    }
}

/// In-process stand-in for a fingerprint scanner.
#[derive(Debug)]
pub struct SimulatedProvider {
    script: Mutex<VecDeque<SimulatedStep>>,
    init_error: Option<CaptureError>,
    placement_delay: Duration,
    template_size: usize,
    initializations: AtomicUsize,
    captures: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            init_error: None,
            placement_delay: Duration::ZERO,
            template_size: DEFAULT_TEMPLATE_SIZE,
            initializations: AtomicUsize::new(0),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn with_script(self, steps: impl IntoIterator<Item = SimulatedStep>) -> Self {
        self.script.lock().extend(steps);
        self
    }

    pub fn with_template_size(mut self, bytes: usize) -> Self {
        self.template_size = bytes;
        self
    }

    /// Time the simulated operator takes to place a finger.
    pub fn with_placement_delay(mut self, delay: Duration) -> Self {
        self.placement_delay = delay;
        self
    }

    /// Make every `initialize` call fail with `err`.
    pub fn failing_initialize(mut self, err: CaptureError) -> Self {
        self.init_error = Some(err);
        self
    }

    /// Append steps to the remaining script.
    pub fn push_steps(&self, steps: impl IntoIterator<Item = SimulatedStep>) {
        self.script.lock().extend(steps);
    }

    pub fn capture_calls(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn remaining_steps(&self) -> usize {
        self.script.lock().len()
    }

    fn template(&self, quality: u8) -> CaptureOutcome {
        let mut template = vec![0u8; self.template_size];
        rand::thread_rng().fill_bytes(&mut template);
        CaptureOutcome::Captured { template, quality }
    }

    fn good_capture(&self) -> CaptureOutcome {
        let quality = rand::thread_rng().gen_range(70..=100);
        self.template(quality)
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        match &self.init_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn capture(&self, timeout: Duration) -> Result<CaptureOutcome, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front();

        match step {
            Some(SimulatedStep::Quality(score)) => {
                tokio::time::sleep(self.placement_delay.min(timeout)).await;
                Ok(self.template(score))
            }
            Some(SimulatedStep::NoInput) => {
                tokio::time::sleep(timeout).await;
                Ok(CaptureOutcome::NoInput)
            }
            Some(SimulatedStep::SdkCode(code)) => match classify_sdk_code(code) {
                SdkCode::Success => Ok(self.good_capture()),
                SdkCode::NoInput => {
                    tokio::time::sleep(timeout).await;
                    Ok(CaptureOutcome::NoInput)
                }
                SdkCode::Failed(err) => Err(err),
            },
            Some(SimulatedStep::Disconnect) => Err(CaptureError::Disconnected),
            Some(SimulatedStep::Stall) => std::future::pending().await,
            None => {
                tokio::time::sleep(self.placement_delay.min(timeout)).await;
                Ok(self.good_capture())
            }
        }
    }
}
