//! Leonardo.ai adapter: three-step asynchronous generation.
//!
//! Upload the source image, submit a generation job against the Phoenix
//! model, then poll the job every 2 seconds for up to 60 attempts. COMPLETE
//! fetches and downloads the result URL; FAILED fails immediately; poll
//! budget exhaustion is a timeout.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{Result, TransformError};
use crate::poller::{JobPoll, JobPoller, PollOutcome};
use crate::types::{Platform, TransformRequest};

use super::{download_image, png_data_uri, ImageBackend};

const API_BASE_URL: &str = "https://cloud.leonardo.ai/api/rest/v1";
const PHOENIX_MODEL_ID: &str = "6b645e3a-d64f-4341-a6d8-7a3690fbf042";
const DEFAULT_PROMPT: &str = "high quality, detailed, professional, improved";
const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, blurry, distorted";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Map one status-read response to a poll observation.
///
/// A non-200 read is a transient glitch and keeps polling. COMPLETE without
/// an image URL and FAILED are terminal failures; anything else is pending.
fn classify_generation(status: u16, json: &Value) -> JobPoll<String, TransformError> {
    if status != 200 {
        return JobPoll::Pending;
    }
    let info = json.get("generations_by_pk").cloned().unwrap_or(Value::Null);
    match info.get("status").and_then(|v| v.as_str()).unwrap_or("") {
        "COMPLETE" => match info
            .pointer("/generated_images/0/url")
            .and_then(|v| v.as_str())
        {
            Some(image_url) => JobPoll::Complete(image_url.to_string()),
            None => JobPoll::Failed(TransformError::Unknown {
                platform: Platform::Leonardo,
                detail: "image could not be generated".to_string(),
            }),
        },
        "FAILED" => JobPoll::Failed(TransformError::Unknown {
            platform: Platform::Leonardo,
            detail: "generation failed".to_string(),
        }),
        _ => JobPoll::Pending,
    }
}

pub struct LeonardoBackend {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    poller: JobPoller,
}

impl LeonardoBackend {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: API_BASE_URL.to_string(),
            poller: JobPoller::default(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Override the poll cadence (mainly for tests).
    pub fn with_poller(mut self, poller: JobPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Step 1: upload the init image, returning its server-side id.
    async fn upload_init_image(&self, api_key: &str, image_bytes: &[u8]) -> Result<String> {
        let platform = self.platform();
        let payload = json!({
            "extension": "png",
            "name": "init_image.png",
            "imageDataUrl": png_data_uri(image_bytes),
        });

        let resp = self
            .http
            .post(format!("{}/init-image", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransformError::Network {
                context: "Leonardo.ai connection error".to_string(),
                source: e,
            })?;

        let status = resp.status().as_u16();
        let json: Value = resp.json().await.unwrap_or(Value::Null);
        if status != 200 {
            let detail = json
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("image upload failed")
                .to_string();
            return Err(TransformError::from_status(platform, status, &detail));
        }

        json.pointer("/uploadInitImage/id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| TransformError::MalformedResponse {
                platform,
                detail: "missing init image id".to_string(),
            })
    }

    /// Step 2: submit the generation job, returning its id.
    async fn submit_generation(
        &self,
        api_key: &str,
        init_image_id: &str,
        request: &TransformRequest,
    ) -> Result<String> {
        let platform = self.platform();
        let prompt = if request.prompt.is_empty() {
            DEFAULT_PROMPT
        } else {
            request.prompt.as_str()
        };
        let negative_prompt = if request.negative_prompt.is_empty() {
            DEFAULT_NEGATIVE_PROMPT
        } else {
            request.negative_prompt.as_str()
        };

        let payload = json!({
            "modelId": PHOENIX_MODEL_ID,
            "prompt": prompt,
            "negative_prompt": negative_prompt,
            "init_strength": request.strength,
            "init_image_id": init_image_id,
            "width": 1024,
            "height": 1024,
            "num_images": 1,
            "guidance_scale": 7.0,
            "num_inference_steps": 30,
        });

        let resp = self
            .http
            .post(format!("{}/generations", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransformError::Network {
                context: "Leonardo.ai connection error".to_string(),
                source: e,
            })?;

        let status = resp.status().as_u16();
        let json: Value = resp.json().await.unwrap_or(Value::Null);
        if status != 200 {
            let detail = json
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("generation start failed")
                .to_string();
            return Err(TransformError::from_status(platform, status, &detail));
        }

        json.pointer("/sdGenerationJob/generationId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| TransformError::MalformedResponse {
                platform,
                detail: "missing generation id".to_string(),
            })
    }

    /// Step 3: poll until terminal status, returning the result image URL.
    async fn poll_generation(&self, api_key: &str, generation_id: &str) -> Result<String> {
        let platform = self.platform();
        let status_url = format!("{}/generations/{}", self.base_url, generation_id);

        let outcome = self
            .poller
            .run(|attempt| {
                let http = self.http.clone();
                let url = status_url.clone();
                let key = api_key.to_string();
                async move {
                    let resp = match http.get(&url).bearer_auth(&key).send().await {
                        Ok(r) => r,
                        Err(e) => {
                            return JobPoll::Failed(TransformError::Network {
                                context: "Leonardo.ai connection error".to_string(),
                                source: e,
                            })
                        }
                    };
                    let status = resp.status().as_u16();
                    let json = if status == 200 {
                        match resp.json().await {
                            Ok(j) => j,
                            Err(e) => {
                                return JobPoll::Failed(TransformError::MalformedResponse {
                                    platform: Platform::Leonardo,
                                    detail: format!("bad status payload: {}", e),
                                })
                            }
                        }
                    } else {
                        Value::Null
                    };
                    log::debug!("generation status read HTTP {} (attempt {})", status, attempt);
                    classify_generation(status, &json)
                }
            })
            .await;

        match outcome {
            PollOutcome::Complete(url) => Ok(url),
            PollOutcome::Failed(failure) => Err(failure),
            PollOutcome::TimedOut => Err(TransformError::Timeout {
                platform,
                seconds: self.poller.budget().as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ImageBackend for LeonardoBackend {
    fn platform(&self) -> Platform {
        Platform::Leonardo
    }

    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
        request.validate()?;
        let platform = self.platform();

        let api_key = self
            .api_key
            .clone()
            .ok_or(TransformError::CredentialMissing {
                platform,
                env_var: "LEONARDO_API_KEY",
            })?;

        let init_image_id = self.upload_init_image(&api_key, &request.image_bytes).await?;
        log::debug!("init image uploaded: {}", init_image_id);

        let generation_id = self
            .submit_generation(&api_key, &init_image_id, request)
            .await?;
        log::debug!("generation started: {}", generation_id);

        let image_url = self.poll_generation(&api_key, &generation_id).await?;

        // A failed download after COMPLETE is a failure, never retried.
        download_image(&self.http, &image_url, platform, DOWNLOAD_TIMEOUT).await
    }
}
