//! DeepAI adapter: one synchronous multipart request against the Image
//! Editor endpoint.
//!
//! DeepAI has no native strength parameter, so strength is folded into the
//! prompt text in three bands. The negative prompt is accepted but unused
//! by the platform.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::multipart::Form;
use reqwest::Client;
use serde_json::Value;

use crate::error::{Result, TransformError};
use crate::types::{Platform, TransformRequest};

use super::{download_image, png_part, ImageBackend};

const API_BASE_URL: &str = "https://api.deepai.org/api";
const DEFAULT_PROMPT: &str = "enhance, improve quality, detailed";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Fold strength into the prompt text. Pure function of (prompt, strength).
fn banded_prompt(prompt: &str, strength: f32) -> String {
    let prompt = if prompt.is_empty() {
        DEFAULT_PROMPT
    } else {
        prompt
    };
    if strength < 0.5 {
        format!("slightly modify: {}, keep original style", prompt)
    } else if strength < 0.7 {
        format!("transform into: {}", prompt)
    } else {
        format!(
            "completely transform into: {}, creative interpretation",
            prompt
        )
    }
}

pub struct DeepAiBackend {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

impl DeepAiBackend {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: API_BASE_URL.to_string(),
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }
}

#[async_trait]
impl ImageBackend for DeepAiBackend {
    fn platform(&self) -> Platform {
        Platform::DeepAi
    }

    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
        request.validate()?;
        let platform = self.platform();

        let api_key = self
            .api_key
            .as_deref()
            .ok_or(TransformError::CredentialMissing {
                platform,
                env_var: "DEEPAI_API_KEY",
            })?;

        let text = banded_prompt(&request.prompt, request.strength);
        log::debug!("DeepAI prompt after banding: {}", text);

        let form = Form::new()
            .part("image", png_part(request.image_bytes.clone())?)
            .text("text", text);

        let resp = self
            .http
            .post(format!("{}/image-editor", self.base_url))
            .header("api-key", api_key)
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
            return Err(TransformError::from_status(platform, status, &body));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| TransformError::MalformedResponse {
                platform,
                detail: format!("response was not JSON: {}", e),
            })?;

        let output_url = json
            .get("output_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TransformError::MalformedResponse {
                platform,
                detail: "missing output_url".to_string(),
            })?;

        download_image(&self.http, output_url, platform, DOWNLOAD_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banding_is_pure_in_strength() {
        assert_eq!(
            banded_prompt("a sketch", 0.4),
            "slightly modify: a sketch, keep original style"
        );
        assert_eq!(banded_prompt("a sketch", 0.6), "transform into: a sketch");
        assert_eq!(
            banded_prompt("a sketch", 0.8),
            "completely transform into: a sketch, creative interpretation"
        );
    }

    #[test]
    fn test_banding_boundaries() {
        // 0.5 and 0.7 belong to the upper bands
        assert!(banded_prompt("p", 0.5).starts_with("transform into:"));
        assert!(banded_prompt("p", 0.7).starts_with("completely transform into:"));
        assert!(banded_prompt("p", 0.49).starts_with("slightly modify:"));
    }

    #[test]
    fn test_empty_prompt_gets_default() {
        let text = banded_prompt("", 0.6);
        assert_eq!(text, format!("transform into: {}", DEFAULT_PROMPT));
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_io() {
        let backend = DeepAiBackend::new(None);
        let request = TransformRequest::new(vec![0u8; 4], "p", 0.6).unwrap();
        let err = backend.transform(&request).await.unwrap_err();
        assert!(matches!(err, TransformError::CredentialMissing { .. }));
        assert!(err.to_string().contains("DEEPAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_out_of_range_strength_rejected() {
        let backend = DeepAiBackend::new(Some("key".into()));
        let mut request = TransformRequest::new(vec![0u8; 4], "p", 0.6).unwrap();
        request.strength = 0.95; // bypass constructor validation
        assert!(matches!(
            backend.transform(&request).await,
            Err(TransformError::StrengthOutOfRange(_))
        ));
    }
}
