//! Quality bands and the acceptance/retry policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest score a capture provider can report.
pub const MAX_QUALITY_SCORE: u8 = 100;

/// Default minimum score for an accepted capture.
pub const DEFAULT_QUALITY_THRESHOLD: u8 = 40;

/// Default number of counted capture attempts per session.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Banded classification of a quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLevel {
    /// Below 40. Never accepted, whatever the threshold.
    Low,
    /// 40 to 49.
    Acceptable,
    /// 50 to 69.
    Good,
    /// 70 and above.
    Excellent,
}

impl QualityLevel {
    /// Classify a score. Scores above 100 are treated as 100.
    pub fn from_score(score: u8) -> Self {
        match score.min(MAX_QUALITY_SCORE) {
            70..=MAX_QUALITY_SCORE => Self::Excellent,
            50..=69 => Self::Good,
            40..=49 => Self::Acceptable,
            _ => Self::Low,
        }
    }

    /// Band name as shown to the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Acceptable => "ACCEPTABLE",
            Self::Good => "GOOD",
            Self::Excellent => "EXCELLENT",
        }
    }

    /// Operator-facing hint for this band.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Excellent => "Image quality is excellent for registration.",
            Self::Good => "Image quality is good.",
            Self::Acceptable => "Image quality is acceptable for verification.",
            Self::Low => "Image quality is low. Consider recapturing.",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceptance threshold and retry budget for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// Minimum score (inclusive) for a capture to be accepted.
    pub threshold: u8,
    /// Number of counted attempts before the session fails.
    pub max_attempts: u32,
}

impl QualityPolicy {
    pub fn new(threshold: u8, max_attempts: u32) -> Self {
        Self {
            threshold,
            max_attempts,
        }
    }

    /// Returns true if a capture with this score passes the quality check.
    ///
    /// `LOW` captures are rejected even when the threshold is configured
    /// below 40.
    pub fn accepts(&self, score: u8) -> bool {
        score >= self.threshold && QualityLevel::from_score(score) != QualityLevel::Low
    }
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY_THRESHOLD, DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(QualityLevel::from_score(0), QualityLevel::Low);
        assert_eq!(QualityLevel::from_score(39), QualityLevel::Low);
        assert_eq!(QualityLevel::from_score(40), QualityLevel::Acceptable);
        assert_eq!(QualityLevel::from_score(49), QualityLevel::Acceptable);
        assert_eq!(QualityLevel::from_score(50), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(69), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(70), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(100), QualityLevel::Excellent);
    }

    #[test]
    fn out_of_range_scores_clamp() {
        assert_eq!(QualityLevel::from_score(255), QualityLevel::Excellent);
    }

    #[test]
    fn low_band_never_accepted() {
        let lenient = QualityPolicy::new(10, 3);
        assert!(!lenient.accepts(35));
        assert!(lenient.accepts(40));
    }

    #[test]
    fn threshold_is_inclusive() {
        let policy = QualityPolicy::new(60, 3);
        assert!(!policy.accepts(59));
        assert!(policy.accepts(60));
    }

    #[test]
    fn level_serializes_as_band_name() {
        assert_eq!(
            serde_json::to_string(&QualityLevel::Excellent).unwrap(),
            r#""EXCELLENT""#
        );
        assert_eq!(
            serde_json::to_string(&QualityLevel::Low).unwrap(),
            r#""LOW""#
        );
        assert_eq!(QualityLevel::Acceptable.to_string(), "ACCEPTABLE");
    }
}
