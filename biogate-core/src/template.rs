//! Captured template value type.

use std::fmt;

use crate::quality::QualityLevel;

/// SDK-derived template of an accepted capture.
///
/// Only template bytes are retained, never the raw image. `Debug` prints the
/// length instead of the bytes so templates cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedTemplate {
    bytes: Vec<u8>,
    quality: u8,
    level: QualityLevel,
}

impl CapturedTemplate {
    pub fn new(bytes: Vec<u8>, quality: u8) -> Self {
        Self {
            bytes,
            quality,
            level: QualityLevel::from_score(quality),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Template length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn level(&self) -> QualityLevel {
        self.level
    }
}

impl fmt::Debug for CapturedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedTemplate")
            .field("len", &self.bytes.len())
            .field("quality", &self.quality)
            .field("level", &self.level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_derived_from_quality() {
        let template = CapturedTemplate::new(vec![1, 2, 3], 55);
        assert_eq!(template.level(), QualityLevel::Good);
        assert_eq!(template.len(), 3);
    }

    #[test]
    fn debug_hides_template_bytes() {
        let template = CapturedTemplate::new(vec![0xAB; 16], 80);
        let rendered = format!("{:?}", template);
        assert!(rendered.contains("len: 16"));
        assert!(!rendered.contains("171"));
    }
}
