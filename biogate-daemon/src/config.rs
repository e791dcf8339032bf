//! Daemon configuration.
//!
//! Every setting is a CLI flag with an environment variable fallback, so a
//! `.env` file loaded by `dotenvy` can configure a kiosk without arguments.

use std::net::SocketAddr;
use std::time::Duration;

use biogate_core::quality::{MAX_QUALITY_SCORE, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUALITY_THRESHOLD};
use biogate_core::QualityPolicy;
use clap::Args;

use crate::provider::{ParseStepError, SimulatedStep, DEFAULT_TEMPLATE_SIZE};

/// Default per-attempt capture deadline.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on a whole capture run.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);

/// Capacity of a session's outbound message queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 32;

/// Error type for configuration problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("quality threshold {0} is above the maximum score of 100")]
    ThresholdOutOfRange(u8),

    #[error("max attempts must be at least 1")]
    NoAttempts,

    #[error("capture timeout must be greater than zero")]
    ZeroCaptureTimeout,

    #[error("session timeout must be greater than zero")]
    ZeroSessionTimeout,

    #[error("invalid simulation script: {0}")]
    Script(#[from] ParseStepError),
}

/// Error type for duration strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{0}' (expected e.g. 500ms, 20s, 5m, 1h or bare seconds)")]
pub struct DurationParseError(String);

/// Parse a duration such as `"500ms"`, `"20s"`, `"5m"`, `"1h"` or `"20"`.
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    let invalid = || DurationParseError(s.to_string());

    let (num_str, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else {
        (s, 1_000)
    };

    let num: u64 = num_str.trim().parse().map_err(|_| invalid())?;
    Ok(Duration::from_millis(num.saturating_mul(unit_ms)))
}

/// Settings shared by every session the daemon runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub policy: QualityPolicy,
    /// Upper bound on a single capture attempt.
    pub capture_timeout: Duration,
    /// Upper bound on the whole capture run, retries included.
    pub session_timeout: Duration,
    /// How long `start_capture` waits for a busy device. Zero fails at once.
    pub lease_wait: Duration,
    pub outbound_buffer: usize,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.threshold > MAX_QUALITY_SCORE {
            return Err(ConfigError::ThresholdOutOfRange(self.policy.threshold));
        }
        if self.policy.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.capture_timeout.is_zero() {
            return Err(ConfigError::ZeroCaptureTimeout);
        }
        if self.session_timeout.is_zero() {
            return Err(ConfigError::ZeroSessionTimeout);
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: QualityPolicy::default(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            lease_wait: Duration::ZERO,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Arguments of `biogate-daemon serve`.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "BIOGATE_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Minimum quality score (0-100) for an accepted capture
    #[arg(long, env = "BIOGATE_QUALITY_THRESHOLD", default_value_t = DEFAULT_QUALITY_THRESHOLD)]
    pub quality_threshold: u8,

    /// Counted capture attempts per session
    #[arg(long, env = "BIOGATE_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Deadline for one capture attempt (e.g. "20s")
    #[arg(
        long,
        env = "BIOGATE_CAPTURE_TIMEOUT",
        default_value = "20s",
        value_parser = parse_duration
    )]
    pub capture_timeout: Duration,

    /// Deadline for a whole capture run, retries included
    #[arg(
        long,
        env = "BIOGATE_SESSION_TIMEOUT",
        default_value = "600s",
        value_parser = parse_duration
    )]
    pub session_timeout: Duration,

    /// How long to wait for a busy scanner before reporting device_unavailable
    #[arg(long, env = "BIOGATE_LEASE_WAIT", default_value = "0s", value_parser = parse_duration)]
    pub lease_wait: Duration,

    /// Template size produced by the simulated scanner, in bytes
    #[arg(long, env = "BIOGATE_TEMPLATE_SIZE", default_value_t = DEFAULT_TEMPLATE_SIZE)]
    pub template_size: usize,

    /// Scripted simulated captures, e.g. "30,35,no-input,sdk:57,75"
    #[arg(long, env = "BIOGATE_SIMULATE_SCRIPT", default_value = "")]
    pub simulate_script: String,

    /// Sustained WebSocket upgrades allowed per second
    #[arg(long, env = "BIOGATE_RATE_PER_SECOND", default_value_t = 2)]
    pub rate_limit_per_second: u32,

    /// Burst of WebSocket upgrades allowed above the sustained rate
    #[arg(long, env = "BIOGATE_RATE_BURST", default_value_t = 10)]
    pub rate_limit_burst: u32,
}

impl ServeArgs {
    /// Build and validate the session settings.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let config = SessionConfig {
            policy: QualityPolicy::new(self.quality_threshold, self.max_attempts),
            capture_timeout: self.capture_timeout,
            session_timeout: self.session_timeout,
            lease_wait: self.lease_wait,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn simulation_script(&self) -> Result<Vec<SimulatedStep>, ConfigError> {
        Ok(SimulatedStep::parse_script(&self.simulate_script)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration(" 0s ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ten seconds").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.threshold, 40);
        assert_eq!(config.policy.max_attempts, 3);
        assert_eq!(config.capture_timeout, Duration::from_secs(20));
        assert_eq!(config.session_timeout, Duration::from_secs(600));
        assert!(config.lease_wait.is_zero());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.policy.threshold = 101;
        assert_eq!(config.validate(), Err(ConfigError::ThresholdOutOfRange(101)));

        let mut config = SessionConfig::default();
        config.policy.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoAttempts));

        let mut config = SessionConfig::default();
        config.capture_timeout = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCaptureTimeout));
    }

    #[test]
    fn serve_args_from_flags() {
        let cli = TestCli::try_parse_from([
            "biogate-daemon",
            "--quality-threshold",
            "60",
            "--max-attempts",
            "5",
            "--capture-timeout",
            "10s",
            "--lease-wait",
            "500ms",
            "--simulate-script",
            "30,75",
        ])
        .unwrap();

        let config = cli.serve.session_config().unwrap();
        assert_eq!(config.policy, QualityPolicy::new(60, 5));
        assert_eq!(config.capture_timeout, Duration::from_secs(10));
        assert_eq!(config.lease_wait, Duration::from_millis(500));
        assert_eq!(
            cli.serve.simulation_script().unwrap(),
            vec![SimulatedStep::Quality(30), SimulatedStep::Quality(75)]
        );
    }

    #[test]
    fn serve_args_reject_bad_threshold() {
        let cli =
            TestCli::try_parse_from(["biogate-daemon", "--quality-threshold", "150"]).unwrap();
        assert_eq!(
            cli.serve.session_config(),
            Err(ConfigError::ThresholdOutOfRange(150))
        );
    }
}
