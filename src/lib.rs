//! # image-variations
//!
//! Multi-backend image-to-image transformation with variation batches.
//!
//! One request — source image, prompt, negative prompt, strength — runs
//! against any of six interchangeable backends: a local diffusion pipeline
//! and five hosted platforms (DeepAI, Hugging Face, Leonardo.ai, Replicate,
//! Stability AI). Each adapter hides its platform's protocol shape
//! (synchronous response, fallback chain, or submit-and-poll job) behind the
//! same [`ImageBackend`] contract, and every failure is normalized into one
//! [`TransformError`] taxonomy with a user-presentable message.
//!
//! ## Quick Start
//!
//! ```no_run
//! use image_variations::{
//!     create_backend, AppConfig, Platform, TransformRequest, VariationOrchestrator,
//! };
//!
//! # async fn example() -> image_variations::Result<()> {
//! let config = AppConfig::load();
//! let backend = create_backend(Platform::StabilityAi, &config)?;
//!
//! let image_bytes = std::fs::read("photo.png").unwrap();
//! let request = TransformRequest::new(image_bytes, "turn into an oil painting", 0.6)?
//!     .with_negative("blurry, low quality");
//!
//! // Three variations of the same request, each with a fresh seed
//! let orchestrator = VariationOrchestrator::new();
//! let batch = orchestrator
//!     .run(backend.as_ref(), &request, 3, |p| {
//!         println!("{}% {}", p.percent, p.phase)
//!     })
//!     .await?;
//!
//! for (i, image) in batch.results.iter().enumerate() {
//!     image.save(format!("variation_{}.png", i + 1)).unwrap();
//! }
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod imaging;
pub mod orchestrator;
pub mod poller;
pub mod presets;
pub mod types;

pub use backends::{
    create_backend, DeepAiBackend, DiffusionPipeline, HuggingFaceBackend, ImageBackend,
    InferenceJob, LeonardoBackend, LocalBackend, PipelineError, ReplicateBackend,
    StabilityBackend,
};
pub use config::{AppConfig, Credentials, UploadLimits};
pub use error::{FailureKind, Result, TransformError};
pub use orchestrator::{VariationOrchestrator, MAX_VARIATIONS};
pub use poller::{JobPoll, JobPoller, PollOutcome};
pub use presets::{all_presets, find_preset, StyleCategory, StylePreset, ALL_CATEGORIES};
pub use types::{BatchMetadata, BatchProgress, Platform, TransformRequest, VariationBatch};
