//! Replicate adapter: one blocking prediction against instruct-pix2pix.
//!
//! The prediction is created with `Prefer: wait` so the response carries the
//! terminal state directly. Replicate's output field is polymorphic (a URL
//! string, a data URI, or a list of either), so the result is normalized
//! before decoding.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{Result, TransformError};
use crate::types::{Platform, TransformRequest};

use super::{decode_response_image, download_image, png_data_uri, ImageBackend};

const PREDICTIONS_URL: &str = "https://api.replicate.com/v1/predictions";
const MODEL_VERSION: &str = "30c1d0b916a6f8efce20493f5d61ee27491ab2a60437c13c588468b9810ec23f";
const DEFAULT_PROMPT: &str = "improve the image quality";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// The output image location extracted from a prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PredictionOutput {
    /// `https://` URL to fetch.
    Url(String),
    /// Inline `data:...;base64,` payload.
    DataUri(String),
}

/// Flatten Replicate's polymorphic `output` field to a single location.
/// Lists yield their first element.
fn normalize_output(output: &Value) -> Option<PredictionOutput> {
    let text = match output {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items.first().and_then(|v| v.as_str())?,
        _ => return None,
    };
    if let Some(rest) = text.strip_prefix("data:") {
        let b64 = rest.split_once("base64,").map(|(_, b)| b)?;
        Some(PredictionOutput::DataUri(b64.to_string()))
    } else if text.starts_with("http") {
        Some(PredictionOutput::Url(text.to_string()))
    } else {
        None
    }
}

/// Early exit for a prediction that did not succeed.
///
/// With `Prefer: wait` the API returns the prediction in whatever state it
/// reached when the wait window lapsed, so a non-terminal status means the
/// generation outran the window — a timeout, not a malformed payload.
fn status_error(prediction: &Value) -> Option<TransformError> {
    let platform = Platform::Replicate;
    match prediction.get("status").and_then(|v| v.as_str()) {
        Some("succeeded") => None,
        Some("failed") | Some("canceled") => {
            let detail = prediction
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("prediction failed")
                .to_string();
            Some(TransformError::Unknown { platform, detail })
        }
        Some("starting") | Some("queued") | Some("processing") => Some(TransformError::Timeout {
            platform,
            seconds: REQUEST_TIMEOUT.as_secs(),
        }),
        other => Some(TransformError::MalformedResponse {
            platform,
            detail: format!("unexpected prediction status: {:?}", other),
        }),
    }
}

pub struct ReplicateBackend {
    http: Client,
    api_token: Option<String>,
    predictions_url: String,
}

impl ReplicateBackend {
    pub fn new(api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_token,
            predictions_url: PREDICTIONS_URL.to_string(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }
}

#[async_trait]
impl ImageBackend for ReplicateBackend {
    fn platform(&self) -> Platform {
        Platform::Replicate
    }

    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
        request.validate()?;
        let platform = self.platform();

        let api_token = self
            .api_token
            .as_deref()
            .ok_or(TransformError::CredentialMissing {
                platform,
                env_var: "REPLICATE_API_TOKEN",
            })?;

        let prompt = if request.prompt.is_empty() {
            DEFAULT_PROMPT
        } else {
            request.prompt.as_str()
        };

        let payload = json!({
            "version": MODEL_VERSION,
            "input": {
                "image": png_data_uri(&request.image_bytes),
                "prompt": prompt,
                "num_inference_steps": 20,
                "image_guidance_scale": 1.5,
                "guidance_scale": 7.5,
            },
        });
        log::debug!("submitting prediction, prompt: {}", prompt);

        let resp = self
            .http
            .post(&self.predictions_url)
            .bearer_auth(api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                TransformError::from_request_error(platform, REQUEST_TIMEOUT.as_secs(), e)
            })?;

        let status = resp.status().as_u16();
        if status != 200 && status != 201 {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransformError::from_status(platform, status, &body));
        }

        let prediction: Value =
            resp.json()
                .await
                .map_err(|e| TransformError::MalformedResponse {
                    platform,
                    detail: format!("prediction was not JSON: {}", e),
                })?;

        if let Some(err) = status_error(&prediction) {
            return Err(err);
        }

        let output = prediction.get("output").unwrap_or(&Value::Null);
        match normalize_output(output) {
            Some(PredictionOutput::Url(url)) => {
                download_image(&self.http, &url, platform, DOWNLOAD_TIMEOUT).await
            }
            Some(PredictionOutput::DataUri(b64)) => {
                let bytes = base64::Engine::decode(
                    &base64::engine::general_purpose::STANDARD,
                    b64.as_bytes(),
                )
                .map_err(|e| TransformError::MalformedResponse {
                    platform,
                    detail: format!("bad base64 in prediction output: {}", e),
                })?;
                decode_response_image(platform, &bytes)
            }
            None => Err(TransformError::MalformedResponse {
                platform,
                detail: "unexpected prediction output shape".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_string() {
        let output = json!("https://replicate.delivery/abc/out.png");
        assert_eq!(
            normalize_output(&output),
            Some(PredictionOutput::Url(
                "https://replicate.delivery/abc/out.png".to_string()
            ))
        );
    }

    #[test]
    fn test_normalize_data_uri() {
        let output = json!("data:image/png;base64,QUJD");
        assert_eq!(
            normalize_output(&output),
            Some(PredictionOutput::DataUri("QUJD".to_string()))
        );
    }

    #[test]
    fn test_normalize_list_takes_first() {
        let output = json!([
            "https://replicate.delivery/first.png",
            "https://replicate.delivery/second.png"
        ]);
        assert_eq!(
            normalize_output(&output),
            Some(PredictionOutput::Url(
                "https://replicate.delivery/first.png".to_string()
            ))
        );
    }

    #[test]
    fn test_normalize_rejects_other_shapes() {
        assert_eq!(normalize_output(&json!(42)), None);
        assert_eq!(normalize_output(&json!({})), None);
        assert_eq!(normalize_output(&json!([])), None);
        assert_eq!(normalize_output(&json!("not-a-url")), None);
    }

    #[test]
    fn test_status_dispatch() {
        use crate::error::FailureKind;

        assert!(status_error(&json!({"status": "succeeded"})).is_none());

        let err = status_error(&json!({"status": "failed", "error": "NSFW detected"})).unwrap();
        assert_eq!(err.kind(), FailureKind::Unknown);
        assert!(err.to_string().contains("NSFW detected"));

        // a prediction still running when the wait window lapses is a timeout
        for pending in ["starting", "queued", "processing"] {
            let err = status_error(&json!({ "status": pending })).unwrap();
            assert_eq!(err.kind(), FailureKind::Timeout);
        }

        let err = status_error(&json!({})).unwrap();
        assert_eq!(err.kind(), FailureKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_any_io() {
        let backend = ReplicateBackend::new(None);
        let request = TransformRequest::new(vec![0u8; 4], "p", 0.6).unwrap();
        let err = backend.transform(&request).await.unwrap_err();
        assert!(err.to_string().contains("REPLICATE_API_TOKEN"));
    }
}
