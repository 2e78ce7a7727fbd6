use std::fmt;
use std::time::Duration;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::{MAX_STRENGTH, MIN_STRENGTH};
use crate::error::{Result, TransformError};

/// The six supported transformation platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Local,
    DeepAi,
    HuggingFace,
    Leonardo,
    Replicate,
    StabilityAi,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Local,
        Platform::DeepAi,
        Platform::HuggingFace,
        Platform::Leonardo,
        Platform::Replicate,
        Platform::StabilityAi,
    ];

    /// Human-readable platform name used in messages and batch metadata.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Local => "Local GPU",
            Platform::DeepAi => "DeepAI",
            Platform::HuggingFace => "Hugging Face",
            Platform::Leonardo => "Leonardo.ai",
            Platform::Replicate => "Replicate",
            Platform::StabilityAi => "Stability AI",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One transformation request, shared unchanged across all variations of a
/// batch (only the advisory seed differs per call).
///
/// Strength is validated at construction: the core re-checks the
/// [0.3, 0.9] bound instead of trusting the caller.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// PNG-encoded source image.
    pub image_bytes: Vec<u8>,
    /// Transformation guidance. May be empty; adapters substitute their own
    /// default enhancement prompt.
    pub prompt: String,
    /// Attributes the output should avoid. Ignored by backends without
    /// negative-prompt support (DeepAI, Replicate).
    pub negative_prompt: String,
    /// How far the output departs from the input, in [0.3, 0.9].
    pub strength: f32,
    /// Advisory per-variation seed. Forward-compatibility slot; no current
    /// backend guarantees it is honored.
    pub seed: Option<i64>,
}

impl TransformRequest {
    /// Create a request, rejecting out-of-range strength.
    pub fn new(image_bytes: Vec<u8>, prompt: impl Into<String>, strength: f32) -> Result<Self> {
        validate_strength(strength)?;
        Ok(Self {
            image_bytes,
            prompt: prompt.into(),
            negative_prompt: String::new(),
            strength,
            seed: None,
        })
    }

    /// Set the negative prompt.
    pub fn with_negative(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = negative_prompt.into();
        self
    }

    /// Set the advisory seed.
    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Re-validate the request. Adapters call this defensively on entry.
    pub fn validate(&self) -> Result<()> {
        validate_strength(self.strength)
    }
}

/// Check the shared strength bound.
pub fn validate_strength(strength: f32) -> Result<()> {
    if !(MIN_STRENGTH..=MAX_STRENGTH).contains(&strength) {
        return Err(TransformError::StrengthOutOfRange(strength));
    }
    Ok(())
}

/// Metadata stamped onto a fully successful batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    /// Human-readable platform name.
    pub platform: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub strength: f32,
    /// Wall-clock duration from before the first call to after the last, ms.
    pub duration_ms: u64,
    /// Local completion timestamp, e.g. "21 August 2026, 14:05".
    pub completed_at: String,
    /// Number of variations generated.
    pub count: u32,
}

/// One user-requested group of variations. Exists only when every requested
/// variation succeeded; `results.len()` always equals `metadata.count`.
#[derive(Debug)]
pub struct VariationBatch {
    /// Decoded variation bitmaps, in request order.
    pub results: Vec<DynamicImage>,
    pub metadata: BatchMetadata,
}

impl VariationBatch {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.metadata.duration_ms)
    }
}

/// Advisory progress signal emitted at coarse checkpoints during a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Monotonically increasing, 0-100.
    pub percent: u8,
    /// Short status phrase.
    pub phase: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_bounds() {
        assert!(TransformRequest::new(vec![], "p", 0.3).is_ok());
        assert!(TransformRequest::new(vec![], "p", 0.9).is_ok());
        assert!(TransformRequest::new(vec![], "p", 0.6).is_ok());
        assert!(matches!(
            TransformRequest::new(vec![], "p", 0.29),
            Err(TransformError::StrengthOutOfRange(_))
        ));
        assert!(matches!(
            TransformRequest::new(vec![], "p", 0.91),
            Err(TransformError::StrengthOutOfRange(_))
        ));
    }

    #[test]
    fn test_request_builder() {
        let req = TransformRequest::new(vec![1, 2, 3], "oil painting", 0.6)
            .unwrap()
            .with_negative("blurry")
            .with_seed(42);
        assert_eq!(req.negative_prompt, "blurry");
        assert_eq!(req.seed, Some(42));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(Platform::DeepAi.to_string(), "DeepAI");
        assert_eq!(Platform::StabilityAi.display_name(), "Stability AI");
        assert_eq!(Platform::ALL.len(), 6);
    }

    #[test]
    fn test_platform_serde() {
        let json = serde_json::to_string(&Platform::HuggingFace).unwrap();
        assert_eq!(json, "\"hugging_face\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Platform::HuggingFace);
    }

    #[test]
    fn test_metadata_serialization() {
        let meta = BatchMetadata {
            platform: "DeepAI".into(),
            prompt: "sketch".into(),
            negative_prompt: String::new(),
            strength: 0.6,
            duration_ms: 4200,
            completed_at: "21 August 2026, 14:05".into(),
            count: 2,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"durationMs\":4200"));
        assert!(json.contains("\"count\":2"));
    }
}
