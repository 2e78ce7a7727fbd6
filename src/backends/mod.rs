//! The six backend adapters and the uniform contract they satisfy.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;

use crate::config::{AppConfig, MAX_STRENGTH, MIN_STRENGTH};
use crate::error::{Result, TransformError};
use crate::imaging;
use crate::presets::StylePreset;
use crate::types::{Platform, TransformRequest};

pub mod deepai;
pub mod huggingface;
pub mod leonardo;
pub mod local;
pub mod replicate;
pub mod stability;

pub use deepai::DeepAiBackend;
pub use huggingface::HuggingFaceBackend;
pub use leonardo::LeonardoBackend;
pub use local::{DiffusionPipeline, InferenceJob, LocalBackend, PipelineError};
pub use replicate::ReplicateBackend;
pub use stability::StabilityBackend;

/// Uniform transformation contract implemented by all six adapters.
///
/// Every call either fully succeeds with one decoded bitmap or fully fails
/// with one [`TransformError`]; adapters never surface partial results or
/// raw wire-level failures.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Which platform this adapter talks to.
    fn platform(&self) -> Platform;

    /// Transform the image per the request. Output dimensions are
    /// backend-determined and output is not deterministic across calls.
    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage>;

    /// Transform using a preset style template. Preset strengths outside
    /// the shared bound are clamped into it.
    async fn transform_with_style(
        &self,
        image_bytes: Vec<u8>,
        preset: &StylePreset,
    ) -> Result<DynamicImage> {
        let strength = preset.strength.clamp(MIN_STRENGTH, MAX_STRENGTH);
        let request = TransformRequest::new(image_bytes, preset.prompt, strength)?
            .with_negative(preset.negative_prompt);
        self.transform(&request).await
    }
}

/// Build the adapter for a platform from startup configuration.
///
/// Missing credentials do not fail here; each adapter reports
/// `CredentialMissing` at call time so one unconfigured platform never
/// disables the rest.
pub fn create_backend(platform: Platform, config: &AppConfig) -> Result<Box<dyn ImageBackend>> {
    let creds = &config.credentials;
    match platform {
        Platform::DeepAi => Ok(Box::new(DeepAiBackend::new(creds.deepai.clone()))),
        Platform::HuggingFace => Ok(Box::new(HuggingFaceBackend::new(
            creds.hugging_face.clone(),
        ))),
        Platform::Leonardo => Ok(Box::new(LeonardoBackend::new(creds.leonardo.clone()))),
        Platform::Replicate => Ok(Box::new(ReplicateBackend::new(creds.replicate.clone()))),
        Platform::StabilityAi => Ok(Box::new(StabilityBackend::new(creds.stability.clone()))),
        #[cfg(feature = "local-inference")]
        Platform::Local => Ok(Box::new(LocalBackend::candle())),
        #[cfg(not(feature = "local-inference"))]
        Platform::Local => Err(TransformError::InvalidConfig(
            "local inference support was not compiled in (enable the local-inference feature)"
                .to_string(),
        )),
    }
}

// ── Shared adapter helpers ──────────────────────────────────────────

/// Download an image from a result URL and decode it.
pub(crate) async fn download_image(
    http: &Client,
    url: &str,
    platform: Platform,
    timeout: Duration,
) -> Result<DynamicImage> {
    let resp = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| TransformError::Network {
            context: format!("Could not download image from {}", platform),
            source: e,
        })?;

    if !resp.status().is_success() {
        return Err(TransformError::MalformedResponse {
            platform,
            detail: format!("image download returned HTTP {}", resp.status().as_u16()),
        });
    }

    let bytes = resp.bytes().await.map_err(|e| TransformError::Network {
        context: format!("Could not read image bytes from {}", platform),
        source: e,
    })?;

    decode_response_image(platform, &bytes)
}

/// Decode bytes returned by a backend, mapping failures to
/// `MalformedResponse` rather than `InvalidImage` (the input was ours, the
/// response is theirs).
pub(crate) fn decode_response_image(platform: Platform, bytes: &[u8]) -> Result<DynamicImage> {
    imaging::decode_image(bytes).map_err(|_| TransformError::MalformedResponse {
        platform,
        detail: "response was not a decodable image".to_string(),
    })
}

/// Base64-encode PNG bytes as a `data:` URI.
pub(crate) fn png_data_uri(bytes: &[u8]) -> String {
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes);
    format!("data:image/png;base64,{}", encoded)
}

/// Base64-encode bytes without the URI wrapper.
pub(crate) fn base64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

/// Build a PNG multipart part named like a file upload.
pub(crate) fn png_part(bytes: Vec<u8>) -> Result<reqwest::multipart::Part> {
    reqwest::multipart::Part::bytes(bytes)
        .file_name("image.png")
        .mime_str("image/png")
        .map_err(|e| TransformError::InvalidConfig(format!("could not build image part: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_data_uri() {
        let uri = png_data_uri(&[1, 2, 3]);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(uri.ends_with("AQID"));
    }

    #[test]
    fn test_create_backend_for_remote_platforms() {
        let config = AppConfig::default();
        for platform in [
            Platform::DeepAi,
            Platform::HuggingFace,
            Platform::Leonardo,
            Platform::Replicate,
            Platform::StabilityAi,
        ] {
            let backend = create_backend(platform, &config).unwrap();
            assert_eq!(backend.platform(), platform);
        }
    }

    #[cfg(not(feature = "local-inference"))]
    #[test]
    fn test_local_requires_feature() {
        let config = AppConfig::default();
        assert!(matches!(
            create_backend(Platform::Local, &config),
            Err(TransformError::InvalidConfig(_))
        ));
    }
}
