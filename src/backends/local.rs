//! Local diffusion adapter.
//!
//! The pipeline is expensive to build (weights load from disk or the hub),
//! so one instance is built lazily and cached for the life of the process.
//! Device cache is released after every run, successful or not, so an
//! out-of-memory failure leaves the device usable for the next attempt.

use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::{truncate_diagnostic, Result, TransformError, DIAGNOSTIC_LIMIT};
use crate::imaging::{self, MAX_LOCAL_DIMENSION};
use crate::types::{Platform, TransformRequest};

use super::ImageBackend;

const DEFAULT_PROMPT: &str = "high quality, detailed, improved, professional";
const INFERENCE_STEPS: usize = 30;
const GUIDANCE_SCALE: f64 = 7.5;

/// Failures internal to a diffusion pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The device ran out of memory mid-inference.
    #[error("device out of memory")]
    OutOfMemory,
    /// Weights could not be fetched or loaded.
    #[error("model load failed: {0}")]
    ModelLoad(String),
    /// Any other inference failure.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// One unit of work handed to the pipeline.
pub struct InferenceJob {
    pub image: DynamicImage,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub strength: f32,
    pub steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<i64>,
}

/// A loaded image-to-image diffusion pipeline.
///
/// Implementations own their device handle. `run` is synchronous; callers
/// serialize runs through the backend's cache lock.
pub trait DiffusionPipeline: Send {
    fn run(&mut self, job: &InferenceJob) -> std::result::Result<DynamicImage, PipelineError>;

    /// Return scratch device memory after a run. Idempotent.
    fn release_cache(&mut self);
}

type BoxedPipeline = Box<dyn DiffusionPipeline>;
type PipelineFactory =
    Box<dyn Fn() -> std::result::Result<BoxedPipeline, PipelineError> + Send + Sync>;

pub struct LocalBackend {
    pipeline: Mutex<Option<BoxedPipeline>>,
    factory: PipelineFactory,
}

impl LocalBackend {
    /// Build with a custom pipeline factory (tests, alternative engines).
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> std::result::Result<BoxedPipeline, PipelineError> + Send + Sync + 'static,
    {
        Self {
            pipeline: Mutex::new(None),
            factory: Box::new(factory),
        }
    }

    /// The candle-backed pipeline against SD v1.5 weights.
    #[cfg(feature = "local-inference")]
    pub fn candle() -> Self {
        Self::with_factory(|| {
            let pipeline = candle_pipeline::CandlePipeline::load()?;
            Ok(Box::new(pipeline) as BoxedPipeline)
        })
    }

    /// Drop the cached pipeline, returning its memory to the device.
    pub async fn unload(&self) {
        let mut slot = self.pipeline.lock().await;
        if let Some(mut pipeline) = slot.take() {
            pipeline.release_cache();
            log::info!("local pipeline unloaded");
        }
    }
}

fn map_pipeline_error(e: PipelineError) -> TransformError {
    match e {
        PipelineError::OutOfMemory => TransformError::DeviceOutOfMemory,
        PipelineError::ModelLoad(detail) => TransformError::InvalidConfig(format!(
            "could not load local pipeline: {}",
            truncate_diagnostic(&detail, DIAGNOSTIC_LIMIT)
        )),
        PipelineError::Inference(detail) => TransformError::Unknown {
            platform: Platform::Local,
            detail: truncate_diagnostic(&detail, DIAGNOSTIC_LIMIT),
        },
    }
}

#[async_trait]
impl ImageBackend for LocalBackend {
    fn platform(&self) -> Platform {
        Platform::Local
    }

    async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
        request.validate()?;

        let decoded = imaging::decode_image(&request.image_bytes)?;
        let init_image = imaging::downscale_to_max(decoded, MAX_LOCAL_DIMENSION);

        let prompt = if request.prompt.is_empty() {
            DEFAULT_PROMPT.to_string()
        } else {
            request.prompt.clone()
        };
        let negative_prompt = if request.negative_prompt.is_empty() {
            None
        } else {
            Some(request.negative_prompt.clone())
        };

        let job = InferenceJob {
            image: init_image,
            prompt,
            negative_prompt,
            strength: request.strength,
            steps: INFERENCE_STEPS,
            guidance_scale: GUIDANCE_SCALE,
            seed: request.seed,
        };

        // The lock also serializes inference; the device cannot run two
        // jobs at once anyway.
        let mut slot = self.pipeline.lock().await;
        let cached = match slot.take() {
            Some(pipeline) => {
                log::debug!("local pipeline served from cache");
                pipeline
            }
            None => {
                log::info!("loading local diffusion pipeline");
                (self.factory)().map_err(map_pipeline_error)?
            }
        };
        let pipeline = slot.insert(cached);

        let outcome = pipeline.run(&job);
        pipeline.release_cache();
        outcome.map_err(map_pipeline_error)
    }
}

/// Candle-backed Stable Diffusion v1.5 image-to-image.
#[cfg(feature = "local-inference")]
mod candle_pipeline {
    use candle_core::{DType, Device, IndexOp, Module, Tensor};
    use candle_transformers::models::stable_diffusion::{self, StableDiffusionConfig};
    use image::DynamicImage;
    use tokenizers::Tokenizer;

    use super::{DiffusionPipeline, InferenceJob, PipelineError};

    const MODEL_REPO: &str = "runwayml/stable-diffusion-v1-5";
    const TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";
    const VAE_SCALE: f64 = 0.18215;

    fn classify(e: candle_core::Error) -> PipelineError {
        let text = e.to_string();
        if text.to_lowercase().contains("out of memory") {
            PipelineError::OutOfMemory
        } else {
            PipelineError::Inference(text)
        }
    }

    pub struct CandlePipeline {
        device: Device,
        dtype: DType,
        config: StableDiffusionConfig,
        tokenizer: Tokenizer,
        clip: stable_diffusion::clip::ClipTextTransformer,
        vae: stable_diffusion::vae::AutoEncoderKL,
        unet: stable_diffusion::unet_2d::UNet2DConditionModel,
    }

    impl CandlePipeline {
        pub fn load() -> Result<Self, PipelineError> {
            let device =
                Device::cuda_if_available(0).map_err(|e| PipelineError::ModelLoad(e.to_string()))?;
            let dtype = if device.is_cuda() {
                DType::F16
            } else {
                DType::F32
            };
            log::info!(
                "loading {} on {}",
                MODEL_REPO,
                if device.is_cuda() { "cuda" } else { "cpu" }
            );

            let config = StableDiffusionConfig::v1_5(None, None, None);

            let api = hf_hub::api::sync::Api::new()
                .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;
            let repo = api.model(MODEL_REPO.to_string());
            let fetch = |name: &str| {
                repo.get(name)
                    .map_err(|e| PipelineError::ModelLoad(format!("{}: {}", name, e)))
            };

            let tokenizer_path = api
                .model(TOKENIZER_REPO.to_string())
                .get("tokenizer.json")
                .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;
            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;

            let clip_weights = fetch("text_encoder/model.safetensors")?;
            let clip = stable_diffusion::build_clip_transformer(
                &config.clip,
                clip_weights,
                &device,
                dtype,
            )
            .map_err(classify)?;

            let vae_weights = fetch("vae/diffusion_pytorch_model.safetensors")?;
            let vae = config
                .build_vae(vae_weights, &device, dtype)
                .map_err(classify)?;

            let unet_weights = fetch("unet/diffusion_pytorch_model.safetensors")?;
            let unet = config
                .build_unet(unet_weights, &device, 4, false, dtype)
                .map_err(classify)?;

            Ok(Self {
                device,
                dtype,
                config,
                tokenizer,
                clip,
                vae,
                unet,
            })
        }

        fn encode_prompt(&self, prompt: &str) -> Result<Tensor, PipelineError> {
            let pad_id = match &self.config.clip.pad_with {
                Some(padding) => *self
                    .tokenizer
                    .get_vocab(true)
                    .get(padding.as_str())
                    .ok_or_else(|| PipelineError::Inference("pad token not found".into()))?,
                None => *self
                    .tokenizer
                    .get_vocab(true)
                    .get("<|endoftext|>")
                    .ok_or_else(|| PipelineError::Inference("end token not found".into()))?,
            };
            let mut tokens = self
                .tokenizer
                .encode(prompt, true)
                .map_err(|e| PipelineError::Inference(e.to_string()))?
                .get_ids()
                .to_vec();
            while tokens.len() < self.config.clip.max_position_embeddings {
                tokens.push(pad_id);
            }
            let tokens = Tensor::new(tokens.as_slice(), &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(classify)?;
            self.clip.forward(&tokens).map_err(classify)
        }

        fn image_to_latents(&self, image: &DynamicImage) -> Result<Tensor, PipelineError> {
            // latent grid wants dimensions divisible by 8
            let width = (image.width() / 8) * 8;
            let height = (image.height() / 8) * 8;
            let rgb = image
                .resize_exact(width, height, image::imageops::FilterType::CatmullRom)
                .to_rgb8();
            let data = rgb.into_raw();
            let tensor = Tensor::from_vec(data, (height as usize, width as usize, 3), &self.device)
                .and_then(|t| t.permute((2, 0, 1)))
                .and_then(|t| t.to_dtype(DType::F32))
                .and_then(|t| (t / 255.0)?.affine(2.0, -1.0))
                .and_then(|t| t.unsqueeze(0))
                .and_then(|t| t.to_dtype(self.dtype))
                .map_err(classify)?;
            let dist = self.vae.encode(&tensor).map_err(classify)?;
            let latents = dist.sample().map_err(classify)?;
            (latents * VAE_SCALE).map_err(classify)
        }
    }

    impl DiffusionPipeline for CandlePipeline {
        fn run(&mut self, job: &InferenceJob) -> Result<DynamicImage, PipelineError> {
            if let Some(seed) = job.seed {
                self.device
                    .set_seed(seed.unsigned_abs())
                    .map_err(classify)?;
            }

            let text_embeddings = self.encode_prompt(&job.prompt)?;
            let uncond = self.encode_prompt(job.negative_prompt.as_deref().unwrap_or(""))?;
            let text_embeddings =
                Tensor::cat(&[uncond, text_embeddings], 0).map_err(classify)?;

            let scheduler = self
                .config
                .build_scheduler(job.steps)
                .map_err(classify)?;
            let timesteps = scheduler.timesteps().to_vec();

            // strength picks how far into the schedule to start: higher
            // strength keeps less of the original image
            let start = job
                .steps
                .saturating_sub((job.steps as f32 * job.strength) as usize)
                .min(job.steps - 1);

            let init_latents = self.image_to_latents(&job.image)?;
            let noise = init_latents
                .randn_like(0.0, 1.0)
                .map_err(classify)?;
            let mut latents = scheduler
                .add_noise(&init_latents, noise, timesteps[start])
                .map_err(classify)?;

            for &timestep in &timesteps[start..] {
                let input = Tensor::cat(&[&latents, &latents], 0).map_err(classify)?;
                let input = scheduler
                    .scale_model_input(input, timestep)
                    .map_err(classify)?;
                let noise_pred = self
                    .unet
                    .forward(&input, timestep as f64, &text_embeddings)
                    .map_err(classify)?;
                let chunks = noise_pred.chunk(2, 0).map_err(classify)?;
                let (uncond_pred, text_pred) = (&chunks[0], &chunks[1]);
                let guided = (uncond_pred
                    + ((text_pred - uncond_pred).map_err(classify)? * job.guidance_scale)
                        .map_err(classify)?)
                .map_err(classify)?;
                latents = scheduler
                    .step(&guided, timestep, &latents)
                    .map_err(classify)?;
            }

            let image = self
                .vae
                .decode(&(&latents / VAE_SCALE).map_err(classify)?)
                .map_err(classify)?;
            let image = ((image / 2.0).map_err(classify)? + 0.5)
                .map_err(classify)?
                .to_device(&Device::Cpu)
                .map_err(classify)?;
            let image = (image.clamp(0f32, 1.0).map_err(classify)? * 255.0)
                .map_err(classify)?
                .to_dtype(DType::U8)
                .map_err(classify)?;

            let (_, _, height, width) = image.dims4().map_err(classify)?;
            let image = image.i(0).map_err(classify)?;
            let data = image
                .permute((1, 2, 0))
                .and_then(|t| t.to_vec3::<u8>())
                .map_err(classify)?;
            let data: Vec<u8> = data.into_iter().flatten().flatten().collect();

            image::RgbImage::from_raw(width as u32, height as u32, data)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| PipelineError::Inference("decoded tensor had wrong size".into()))
        }

        fn release_cache(&mut self) {
            if self.device.is_cuda() {
                if let Err(e) = self.device.synchronize() {
                    log::warn!("device synchronize failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        built: AtomicU32,
        runs: AtomicU32,
        releases: AtomicU32,
    }

    struct MockPipeline {
        counters: Arc<Counters>,
        fail_oom: bool,
    }

    impl DiffusionPipeline for MockPipeline {
        fn run(&mut self, job: &InferenceJob) -> std::result::Result<DynamicImage, PipelineError> {
            self.counters.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_oom {
                return Err(PipelineError::OutOfMemory);
            }
            assert!(job.image.width().max(job.image.height()) <= MAX_LOCAL_DIMENSION);
            Ok(job.image.clone())
        }

        fn release_cache(&mut self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn mock_backend(counters: Arc<Counters>, fail_oom: bool) -> LocalBackend {
        LocalBackend::with_factory(move || {
            counters.built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockPipeline {
                counters: counters.clone(),
                fail_oom,
            }))
        })
    }

    fn png_request(width: u32, height: u32) -> TransformRequest {
        let bytes = imaging::encode_png(&DynamicImage::new_rgb8(width, height)).unwrap();
        TransformRequest::new(bytes, "a prompt", 0.6).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_is_built_once() {
        let counters = Arc::new(Counters::default());
        let backend = mock_backend(counters.clone(), false);
        let request = png_request(64, 64);

        backend.transform(&request).await.unwrap();
        backend.transform(&request).await.unwrap();

        assert_eq!(counters.built.load(Ordering::SeqCst), 1);
        assert_eq!(counters.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_released_after_every_run() {
        let counters = Arc::new(Counters::default());
        let backend = mock_backend(counters.clone(), false);
        let request = png_request(64, 64);

        backend.transform(&request).await.unwrap();
        backend.transform(&request).await.unwrap();
        assert_eq!(counters.releases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oom_maps_to_device_error_and_still_releases() {
        let counters = Arc::new(Counters::default());
        let backend = mock_backend(counters.clone(), true);
        let request = png_request(64, 64);

        let err = backend.transform(&request).await.unwrap_err();
        assert!(matches!(err, TransformError::DeviceOutOfMemory));
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_large_input_downscaled_before_inference() {
        let counters = Arc::new(Counters::default());
        let backend = mock_backend(counters.clone(), false);
        // the mock asserts the job image fits within MAX_LOCAL_DIMENSION
        let request = png_request(2048, 1024);
        let out = backend.transform(&request).await.unwrap();
        assert_eq!((out.width(), out.height()), (1024, 512));
    }

    #[tokio::test]
    async fn test_unload_forces_rebuild() {
        let counters = Arc::new(Counters::default());
        let backend = mock_backend(counters.clone(), false);
        let request = png_request(64, 64);

        backend.transform(&request).await.unwrap();
        backend.unload().await;
        backend.transform(&request).await.unwrap();
        assert_eq!(counters.built.load(Ordering::SeqCst), 2);
        // unload releases once, plus once per run
        assert_eq!(counters.releases.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_undecodable_input_rejected() {
        let counters = Arc::new(Counters::default());
        let backend = mock_backend(counters, false);
        let request = TransformRequest::new(b"junk".to_vec(), "p", 0.6).unwrap();
        assert!(matches!(
            backend.transform(&request).await,
            Err(TransformError::InvalidImage(_))
        ));
    }
}
