//! Hugging Face adapter: ordered-attempt fallback chain.
//!
//! Method 1 walks a list of candidate models on the managed inference
//! endpoint. Method 2 falls back to direct calls against the router
//! endpoint, with a secondary payload-shape retry on HTTP 422. A 503 means
//! the model is still warming up and is a skippable attempt, not a failure.
//! Only after every model/method combination is exhausted does the adapter
//! return one aggregated failure.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::{Result, TransformError};
use crate::types::{Platform, TransformRequest};

use super::{base64_encode, decode_response_image, ImageBackend};

const MANAGED_ENDPOINT: &str = "https://api-inference.huggingface.co/models";
const DIRECT_ENDPOINT: &str = "https://router.huggingface.co/hf-inference/models";
const DEFAULT_PROMPT: &str = "improve image quality, add details, enhance colors";
const GUIDANCE_SCALE: f64 = 7.5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Verbs that mark a prompt as already being an instruction.
const INSTRUCTION_VERBS: [&str; 5] = ["turn", "make", "change", "convert", "transform"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelKind {
    /// InstructPix2Pix-style models take an instruction-phrased prompt and
    /// no negative prompt.
    Instruct,
    /// Standard img2img models take prompt plus optional negative prompt.
    Standard,
}

struct CandidateModel {
    name: &'static str,
    kind: ModelKind,
}

static CANDIDATE_MODELS: [CandidateModel; 3] = [
    CandidateModel {
        name: "timbrooks/instruct-pix2pix",
        kind: ModelKind::Instruct,
    },
    CandidateModel {
        name: "lllyasviel/sd-controlnet-canny",
        kind: ModelKind::Standard,
    },
    CandidateModel {
        name: "stabilityai/stable-diffusion-xl-refiner-1.0",
        kind: ModelKind::Standard,
    },
];

static DIRECT_MODELS: [&str; 2] = [
    "timbrooks/instruct-pix2pix",
    "stabilityai/stable-diffusion-xl-refiner-1.0",
];

const EXHAUSTED_MESSAGE: &str = "No suitable model found in the Hugging Face free API. \
Possible solutions: wait a few minutes and try again (models might be loading), \
try a different platform (DeepAI, Stability AI, Replicate), \
or upgrade to a Hugging Face Pro account. \
Note: image-to-image support is limited in the Hugging Face free tier.";

/// Rephrase the prompt as an instruction unless it already reads like one.
fn instruct_prompt(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    if INSTRUCTION_VERBS.iter().any(|verb| lower.contains(verb)) {
        prompt.to_string()
    } else {
        format!("transform this image: {}", prompt)
    }
}

/// Primary direct-call payload shape: image and prompt nested under inputs.
fn direct_payload(image_b64: &str, prompt: &str, strength: f32) -> Value {
    json!({
        "inputs": {
            "image": image_b64,
            "prompt": prompt,
        },
        "parameters": {
            "strength": strength,
            "guidance_scale": GUIDANCE_SCALE,
        },
    })
}

/// Alternate payload shape tried after an HTTP 422: bare base64 inputs with
/// the prompt moved into parameters.
fn direct_payload_alt(image_b64: &str, prompt: &str, strength: f32) -> Value {
    json!({
        "inputs": image_b64,
        "parameters": {
            "prompt": prompt,
            "strength": strength,
            "guidance_scale": GUIDANCE_SCALE,
        },
    })
}

pub struct HuggingFaceBackend {
    http: Client,
    token: Option<String>,
}

impl HuggingFaceBackend {
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            token,
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// One managed-endpoint attempt. Any error is non-fatal to the chain.
    async fn managed_attempt(
        &self,
        token: &str,
        model: &CandidateModel,
        image_b64: &str,
        prompt: &str,
        negative_prompt: &str,
        strength: f32,
    ) -> Result<DynamicImage> {
        let platform = self.platform();
        let mut parameters = json!({
            "prompt": prompt,
            "strength": strength,
            "guidance_scale": GUIDANCE_SCALE,
        });
        if model.kind == ModelKind::Standard && !negative_prompt.is_empty() {
            parameters["negative_prompt"] = Value::String(negative_prompt.to_string());
        }
        let body = json!({
            "inputs": image_b64,
            "parameters": parameters,
        });

        let resp = self
            .http
            .post(format!("{}/{}", MANAGED_ENDPOINT, model.name))
            .bearer_auth(token)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                TransformError::from_request_error(platform, REQUEST_TIMEOUT.as_secs(), e)
            })?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            if status == 503 {
                // Model is warming up; the caller skips to the next candidate.
                log::info!("{} is loading, skipping this attempt", model.name);
            }
            return Err(TransformError::from_status(platform, status, &body));
        }

        let bytes = resp.bytes().await.map_err(|e| TransformError::Network {
            context: "Could not read Hugging Face response".to_string(),
            source: e,
        })?;
        decode_response_image(platform, &bytes)
    }

    /// One direct router-endpoint attempt, with the 422 alternate-shape retry.
    async fn direct_attempt(
        &self,
        token: &str,
        model: &str,
        image_b64: &str,
        prompt: &str,
        strength: f32,
    ) -> Result<DynamicImage> {
        let platform = self.platform();
        let url = format!("{}/{}", DIRECT_ENDPOINT, model);

        let payload = direct_payload(image_b64, prompt, strength);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                TransformError::from_request_error(platform, REQUEST_TIMEOUT.as_secs(), e)
            })?;

        let status = resp.status().as_u16();
        if status == 200 {
            let bytes = resp.bytes().await.map_err(|e| TransformError::Network {
                context: "Could not read Hugging Face response".to_string(),
                source: e,
            })?;
            return decode_response_image(platform, &bytes);
        }

        if status == 503 {
            if let Ok(info) = resp.json::<Value>().await {
                let wait = info
                    .get("estimated_time")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(30.0);
                log::info!("{} is loading, estimated {:.0}s", model, wait);
            }
            return Err(TransformError::TransientServer {
                platform,
                status: 503,
            });
        }

        if status == 422 {
            // Payload shape rejected; retry once with the alternate shape.
            log::debug!("{} rejected payload shape, retrying alternate", model);
            let alt = direct_payload_alt(image_b64, prompt, strength);
            let resp2 = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(&alt)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
                .map_err(|e| {
                    TransformError::from_request_error(platform, REQUEST_TIMEOUT.as_secs(), e)
                })?;
            let status2 = resp2.status().as_u16();
            if status2 == 200 {
                let bytes = resp2.bytes().await.map_err(|e| TransformError::Network {
                    context: "Could not read Hugging Face response".to_string(),
                    source: e,
                })?;
                return decode_response_image(platform, &bytes);
            }
            let body = resp2.text().await.unwrap_or_default();
            return Err(TransformError::from_status(platform, status2, &body));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(TransformError::from_status(platform, status, &body))
    }
}

#[async_trait]
impl ImageBackend for HuggingFaceBackend {
    fn platform(&self) -> Platform {
        Platform::HuggingFace
    }

    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
        request.validate()?;
        let platform = self.platform();

        let token = self
            .token
            .as_deref()
            .ok_or(TransformError::CredentialMissing {
                platform,
                env_var: "HF_API_TOKEN",
            })?;

        let prompt = if request.prompt.is_empty() {
            DEFAULT_PROMPT.to_string()
        } else {
            request.prompt.clone()
        };
        let instructed = instruct_prompt(&prompt);
        let image_b64 = base64_encode(&request.image_bytes);

        // Method 1: managed endpoint, ordered candidate models.
        for model in &CANDIDATE_MODELS {
            let attempt_prompt = match model.kind {
                ModelKind::Instruct => instructed.as_str(),
                ModelKind::Standard => prompt.as_str(),
            };
            match self
                .managed_attempt(
                    token,
                    model,
                    &image_b64,
                    attempt_prompt,
                    &request.negative_prompt,
                    request.strength,
                )
                .await
            {
                Ok(image) => return Ok(image),
                Err(e) => log::debug!("managed attempt {} failed: {}", model.name, e),
            }
        }

        // Method 2: direct router endpoint.
        for model in DIRECT_MODELS {
            match self
                .direct_attempt(token, model, &image_b64, &instructed, request.strength)
                .await
            {
                Ok(image) => return Ok(image),
                Err(e) => log::debug!("direct attempt {} failed: {}", model, e),
            }
        }

        Err(TransformError::Unknown {
            platform,
            detail: EXHAUSTED_MESSAGE.to_string(),
        })
    }
}
