//! Stability AI adapter: SDXL image-to-image over the REST API.
//!
//! The input is remapped to the nearest SDXL-supported resolution before
//! upload. Stability's `image_strength` runs the opposite direction of the
//! shared strength scale (0 keeps the original, 1 replaces it), so the value
//! sent is `1.0 - strength`.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;

use crate::error::{Result, TransformError};
use crate::imaging;
use crate::types::{Platform, TransformRequest};

use super::{decode_response_image, png_part, ImageBackend};

const API_HOST: &str = "https://api.stability.ai";
const ENGINE_ID: &str = "stable-diffusion-xl-1024-v1-0";
const DEFAULT_PROMPT: &str = "high quality, detailed, improved";
const CFG_SCALE: f64 = 12.0;
const STEPS: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Map a non-200 response to a failure. A 404 means the configured engine
/// id does not exist, which is a configuration problem rather than a
/// platform fault; everything else uses the shared status table.
fn map_error_status(status: u16, detail: &str) -> TransformError {
    match status {
        404 => TransformError::InvalidConfig(format!("engine not found: {}", ENGINE_ID)),
        _ => TransformError::from_status(Platform::StabilityAi, status, detail),
    }
}

pub struct StabilityBackend {
    http: Client,
    api_key: Option<String>,
    api_host: String,
}

impl StabilityBackend {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key,
            api_host: API_HOST.to_string(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    fn build_form(&self, init_png: Vec<u8>, request: &TransformRequest) -> Result<Form> {
        let prompt = if request.prompt.is_empty() {
            DEFAULT_PROMPT
        } else {
            request.prompt.as_str()
        };
        let image_strength = 1.0 - request.strength;

        let mut form = Form::new()
            .part("init_image", png_part(init_png)?)
            .text("text_prompts[0][text]", prompt.to_string())
            .text("text_prompts[0][weight]", "1.0")
            .text("image_strength", format!("{:.2}", image_strength))
            .text("cfg_scale", CFG_SCALE.to_string())
            .text("samples", "1")
            .text("steps", STEPS.to_string());

        if !request.negative_prompt.is_empty() {
            form = form
                .text("text_prompts[1][text]", request.negative_prompt.clone())
                .text("text_prompts[1][weight]", "-1.0");
        }
        Ok(form)
    }
}

#[async_trait]
impl ImageBackend for StabilityBackend {
    fn platform(&self) -> Platform {
        Platform::StabilityAi
    }

    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
        request.validate()?;
        let platform = self.platform();

        let api_key = self
            .api_key
            .as_deref()
            .ok_or(TransformError::CredentialMissing {
                platform,
                env_var: "STABILITY_API_KEY",
            })?;

        let decoded = imaging::decode_image(&request.image_bytes)?;
        let resized = imaging::resize_for_sdxl(&decoded);
        let init_png = imaging::encode_png(&resized)?;

        let url = format!(
            "{}/v1/generation/{}/image-to-image",
            self.api_host, ENGINE_ID
        );
        let form = self.build_form(init_png, request)?;
        log::debug!(
            "posting to {} at {}x{}, image_strength {:.2}",
            ENGINE_ID,
            resized.width(),
            resized.height(),
            1.0 - request.strength
        );

        let resp = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .bearer_auth(api_key)
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                TransformError::from_request_error(platform, REQUEST_TIMEOUT.as_secs(), e)
            })?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(body);
            return Err(map_error_status(status, &detail));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| TransformError::MalformedResponse {
                platform,
                detail: format!("response was not JSON: {}", e),
            })?;

        let artifact = json
            .pointer("/artifacts/0")
            .ok_or_else(|| TransformError::MalformedResponse {
                platform,
                detail: "no artifacts returned".to_string(),
            })?;

        if artifact.get("finishReason").and_then(|v| v.as_str()) == Some("CONTENT_FILTERED") {
            return Err(TransformError::ContentPolicyRejected { platform });
        }

        let b64 = artifact
            .get("base64")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TransformError::MalformedResponse {
                platform,
                detail: "artifact carried no base64 payload".to_string(),
            })?;

        let bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64.as_bytes())
                .map_err(|e| TransformError::MalformedResponse {
                    platform,
                    detail: format!("bad base64 artifact: {}", e),
                })?;
        decode_response_image(platform, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_inversion() {
        // strength 0.6 becomes image_strength 0.4
        let inverted = 1.0_f32 - 0.6_f32;
        assert!((inverted - 0.4).abs() < 1e-6);
        assert_eq!(format!("{:.2}", inverted), "0.40");
        assert_eq!(format!("{:.2}", 1.0_f32 - 0.3_f32), "0.70");
        assert_eq!(format!("{:.2}", 1.0_f32 - 0.9_f32), "0.10");
    }

    #[test]
    fn test_unknown_engine_is_a_config_error() {
        let err = map_error_status(404, "engine not found");
        assert!(matches!(err, TransformError::InvalidConfig(_)));
        assert_eq!(err.kind(), crate::error::FailureKind::Precondition);
        assert!(err.to_string().contains(ENGINE_ID));
        // other statuses keep the shared mapping
        assert!(matches!(
            map_error_status(401, ""),
            TransformError::CredentialInvalid { .. }
        ));
        assert!(matches!(
            map_error_status(500, ""),
            TransformError::TransientServer { .. }
        ));
    }

    #[test]
    fn test_content_filter_detection() {
        let json: Value = serde_json::from_str(
            r#"{"artifacts": [{"finishReason": "CONTENT_FILTERED", "base64": ""}]}"#,
        )
        .unwrap();
        let artifact = json.pointer("/artifacts/0").unwrap();
        assert_eq!(
            artifact.get("finishReason").and_then(|v| v.as_str()),
            Some("CONTENT_FILTERED")
        );
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_io() {
        let backend = StabilityBackend::new(None);
        let request = TransformRequest::new(vec![0u8; 4], "p", 0.6).unwrap();
        let err = backend.transform(&request).await.unwrap_err();
        assert!(err.to_string().contains("STABILITY_API_KEY"));
    }

    #[tokio::test]
    async fn test_undecodable_input_rejected() {
        let backend = StabilityBackend::new(Some("key".into()));
        let request = TransformRequest::new(b"junk".to_vec(), "p", 0.6).unwrap();
        assert!(matches!(
            backend.transform(&request).await,
            Err(TransformError::InvalidImage(_))
        ));
    }
}
