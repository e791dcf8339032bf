//! Enrollment session data model and state machine.
//!
//! ```text
//! Idle → Initializing → AwaitingPlacement → Capturing → QualityCheck
//!                              ↑                 │             │
//!                              └──── Retrying ←──┴─────────────┤
//!                                                              ↓
//!                                                   Succeeded | Failed
//! ```
//!
//! Every transition is a synchronous method on [`EnrollmentSession`]. Methods
//! return [`InvalidTransition`] instead of panicking when called from the
//! wrong state, and never mutate the session in that case.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quality::{QualityLevel, QualityPolicy, MAX_QUALITY_SCORE};
use crate::template::CapturedTemplate;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for one client connection's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally supplied correlation key (e.g. an identity number).
///
/// Opaque to the session; it is only carried along for logging and for
/// whoever consumes the captured template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectKey(pub String);

impl SubjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// States and Outcomes
// ============================================================================

/// State of an enrollment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, waiting for `start_capture`.
    Idle,
    /// Acquiring the device lease and initializing the device.
    Initializing,
    /// Device ready, operator prompted to place a finger.
    AwaitingPlacement,
    /// Capture call in flight.
    Capturing,
    /// Capture returned a score that is being evaluated.
    QualityCheck,
    /// Previous attempt rejected, another one will follow.
    Retrying,
    /// Template accepted.
    Succeeded,
    /// Session ended without a template.
    Failed,
}

impl SessionState {
    /// Returns true if no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingPlacement => "awaiting_placement",
            Self::Capturing => "capturing",
            Self::QualityCheck => "quality_check",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code attached to a failed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Another session holds the device lease.
    DeviceUnavailable,
    /// Attempts exhausted without an acceptable capture.
    QualityTooLow,
    /// No finger placed within the capture deadline.
    Timeout,
    /// Device or SDK fault. Reported as `error`, not `capture_failed`.
    DeviceDisconnected,
    /// Client cancelled or the connection was lost.
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable => "device_unavailable",
            Self::QualityTooLow => "quality_too_low",
            Self::Timeout => "timeout",
            Self::DeviceDisconnected => "device_disconnected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for hardware faults, which are surfaced as `error`
    /// messages rather than `capture_failed`.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceDisconnected)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a session. Set exactly once, on entering a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    Captured(CapturedTemplate),
    Failed(FailureReason),
}

/// A capture attempt that produced no template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMiss {
    /// The device reported that no finger was presented.
    NoInput,
    /// The device read something but could not produce a template.
    ReadFailed,
    /// The capture deadline elapsed before the provider returned.
    TimedOut,
}

impl CaptureMiss {
    /// Returns true if this miss consumes one of the session's attempts.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, Self::NoInput)
    }

    /// Failure reason reported when this miss exhausts the attempts.
    pub fn exhausted_reason(&self) -> FailureReason {
        match self {
            Self::TimedOut => FailureReason::Timeout,
            Self::NoInput | Self::ReadFailed => FailureReason::QualityTooLow,
        }
    }
}

/// Outcome of evaluating one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Template accepted; the session is `Succeeded`.
    Accepted,
    /// Attempt rejected; the session is `Retrying`.
    Retry,
    /// Attempt rejected and no attempts remain; the session is `Failed`.
    Exhausted(FailureReason),
}

// ============================================================================
// Transition Errors
// ============================================================================

/// Error when a state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: cannot apply '{event}' to session in state '{from}': {reason}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: &'static str,
    pub reason: String,
}

// ============================================================================
// Status Snapshot
// ============================================================================

/// Read-only view returned by `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_quality_score: Option<u8>,
    pub last_quality_level: Option<QualityLevel>,
}

// ============================================================================
// Session
// ============================================================================

/// One enrollment attempt, owned by the connection that started it.
///
/// Fields are private so that only the transition methods below can change
/// them. `0 <= attempt_count <= max_attempts` holds after every call.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentSession {
    id: SessionId,
    subject_key: SubjectKey,
    state: SessionState,
    policy: QualityPolicy,
    attempt_count: u32,
    last_quality_score: Option<u8>,
    last_quality_level: Option<QualityLevel>,
    result: Option<SessionResult>,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl EnrollmentSession {
    /// Create a new session in `Idle`.
    pub fn new(id: SessionId, subject_key: SubjectKey, policy: QualityPolicy) -> Self {
        Self {
            id,
            subject_key,
            state: SessionState::Idle,
            policy,
            attempt_count: 0,
            last_quality_score: None,
            last_quality_level: None,
            result: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn subject_key(&self) -> &SubjectKey {
        &self.subject_key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> QualityPolicy {
        self.policy
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn last_quality_score(&self) -> Option<u8> {
        self.last_quality_score
    }

    pub fn last_quality_level(&self) -> Option<QualityLevel> {
        self.last_quality_level
    }

    pub fn result(&self) -> Option<&SessionResult> {
        self.result.as_ref()
    }

    /// The accepted template, if the session succeeded.
    pub fn template(&self) -> Option<&CapturedTemplate> {
        match &self.result {
            Some(SessionResult::Captured(template)) => Some(template),
            _ => None,
        }
    }

    /// The failure reason, if the session failed.
    pub fn failure(&self) -> Option<FailureReason> {
        match self.result {
            Some(SessionResult::Failed(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Snapshot for `get_status`. Never mutates the session.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            attempt_count: self.attempt_count,
            max_attempts: self.policy.max_attempts,
            last_quality_score: self.last_quality_score,
            last_quality_level: self.last_quality_level,
        }
    }

    // ── Transitions ───────────────────────────────────────────────────────

    /// `Idle → Initializing`, on `start_capture`.
    pub fn begin(&mut self) -> Result<(), InvalidTransition> {
        self.expect_state(SessionState::Idle, "begin", "capture already started")?;
        self.state = SessionState::Initializing;
        Ok(())
    }

    /// `Initializing → AwaitingPlacement`, once the lease is held and the
    /// device reports ready.
    pub fn device_ready(&mut self) -> Result<(), InvalidTransition> {
        self.expect_state(
            SessionState::Initializing,
            "device_ready",
            "session must be Initializing",
        )?;
        self.state = SessionState::AwaitingPlacement;
        Ok(())
    }

    /// `AwaitingPlacement → Capturing`. Returns the 1-based attempt number
    /// that this capture will count as.
    pub fn begin_capture(&mut self) -> Result<u32, InvalidTransition> {
        self.expect_state(
            SessionState::AwaitingPlacement,
            "begin_capture",
            "session must be AwaitingPlacement",
        )?;
        if self.attempt_count >= self.policy.max_attempts {
            return Err(self.invalid("begin_capture", "no attempts remaining"));
        }
        self.state = SessionState::Capturing;
        Ok(self.attempt_count + 1)
    }

    /// `Capturing → QualityCheck`, when the provider returned a template.
    pub fn enter_quality_check(&mut self, score: u8) -> Result<QualityLevel, InvalidTransition> {
        self.expect_state(
            SessionState::Capturing,
            "enter_quality_check",
            "session must be Capturing",
        )?;
        let score = score.min(MAX_QUALITY_SCORE);
        let level = QualityLevel::from_score(score);
        self.state = SessionState::QualityCheck;
        self.last_quality_score = Some(score);
        self.last_quality_level = Some(level);
        Ok(level)
    }

    /// `QualityCheck → Succeeded | Retrying | Failed`.
    ///
    /// Consumes one attempt. The template is kept only if accepted.
    pub fn resolve_quality_check(
        &mut self,
        template: Vec<u8>,
    ) -> Result<Verdict, InvalidTransition> {
        self.expect_state(
            SessionState::QualityCheck,
            "resolve_quality_check",
            "session must be in QualityCheck",
        )?;
        let score = self.last_quality_score.unwrap_or(0);

        if self.policy.accepts(score) {
            self.attempt_count += 1;
            self.finish(
                SessionState::Succeeded,
                SessionResult::Captured(CapturedTemplate::new(template, score)),
            );
            return Ok(Verdict::Accepted);
        }

        Ok(self.reject(FailureReason::QualityTooLow))
    }

    /// `Capturing → Retrying | Failed`, when the capture produced nothing.
    ///
    /// [`CaptureMiss::NoInput`] does not consume an attempt.
    pub fn capture_missed(&mut self, miss: CaptureMiss) -> Result<Verdict, InvalidTransition> {
        self.expect_state(
            SessionState::Capturing,
            "capture_missed",
            "session must be Capturing",
        )?;

        if !miss.counts_as_attempt() {
            self.state = SessionState::Retrying;
            return Ok(Verdict::Retry);
        }

        Ok(self.reject(miss.exhausted_reason()))
    }

    /// `Retrying → AwaitingPlacement`, before the next attempt.
    pub fn resume(&mut self) -> Result<(), InvalidTransition> {
        self.expect_state(SessionState::Retrying, "resume", "session must be Retrying")?;
        if self.attempt_count >= self.policy.max_attempts {
            return Err(self.invalid("resume", "no attempts remaining"));
        }
        self.state = SessionState::AwaitingPlacement;
        Ok(())
    }

    /// Any non-terminal state `→ Failed`.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), InvalidTransition> {
        if self.state.is_terminal() {
            return Err(self.invalid("fail", "session has already ended"));
        }
        self.finish(SessionState::Failed, SessionResult::Failed(reason));
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn reject(&mut self, reason: FailureReason) -> Verdict {
        self.attempt_count += 1;
        if self.attempt_count >= self.policy.max_attempts {
            self.finish(SessionState::Failed, SessionResult::Failed(reason));
            Verdict::Exhausted(reason)
        } else {
            self.state = SessionState::Retrying;
            Verdict::Retry
        }
    }

    fn finish(&mut self, state: SessionState, result: SessionResult) {
        debug_assert!(self.result.is_none(), "session result set twice");
        self.state = state;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
    }

    fn expect_state(
        &self,
        expected: SessionState,
        event: &'static str,
        reason: &str,
    ) -> Result<(), InvalidTransition> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(event, reason))
        }
    }

    fn invalid(&self, event: &'static str, reason: &str) -> InvalidTransition {
        InvalidTransition {
            from: self.state,
            event,
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
