//! Variation batches: N sequential transforms of the same request.
//!
//! A batch is all-or-nothing. Variations run strictly one at a time against
//! one backend, each with a fresh advisory seed; the first failure abandons
//! the batch and discards every variation already produced. Only one batch
//! may be in flight per orchestrator at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::Rng;

use crate::backends::ImageBackend;
use crate::error::{Result, TransformError};
use crate::types::{BatchMetadata, BatchProgress, TransformRequest, VariationBatch};

/// Most variations one batch may request.
pub const MAX_VARIATIONS: u32 = 4;
/// Inclusive seed range handed to each variation.
pub const SEED_RANGE: std::ops::RangeInclusive<i64> = 1..=2_147_483_647;

const TIMESTAMP_FORMAT: &str = "%d %B %Y, %H:%M";

/// Clears the in-flight flag on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct VariationOrchestrator {
    in_flight: AtomicBool,
}

impl VariationOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a batch of `count` variations against `backend`.
    ///
    /// `on_progress` receives coarse checkpoints with monotonically
    /// increasing percentages; it is advisory and may be a no-op.
    pub async fn run(
        &self,
        backend: &dyn ImageBackend,
        request: &TransformRequest,
        count: u32,
        mut on_progress: impl FnMut(BatchProgress) + Send,
    ) -> Result<VariationBatch> {
        if count == 0 || count > MAX_VARIATIONS {
            return Err(TransformError::InvalidConfig(format!(
                "variation count must be between 1 and {}, got {}",
                MAX_VARIATIONS, count
            )));
        }
        request.validate()?;

        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(TransformError::BatchInFlight);
        }
        let _guard = FlightGuard(&self.in_flight);

        let platform = backend.platform();
        on_progress(BatchProgress {
            percent: 10,
            phase: format!("Connecting to {}...", platform),
        });
        on_progress(BatchProgress {
            percent: 20,
            phase: "Loading model...".to_string(),
        });

        // duration covers the first call through the last
        let started = Instant::now();
        let mut results = Vec::with_capacity(count as usize);

        for i in 0..count {
            let percent = 20 + (i * 70 / count) as u8;
            on_progress(BatchProgress {
                percent,
                phase: format!("Generating variation {}/{}...", i + 1, count),
            });

            // fresh advisory seed per variation; backends without seed
            // support ignore it
            let seed = rand::rng().random_range(SEED_RANGE);
            let variation_request = request.clone().with_seed(seed);
            log::debug!(
                "variation {}/{} on {} (seed {})",
                i + 1,
                count,
                platform,
                seed
            );

            match backend.transform(&variation_request).await {
                Ok(image) => results.push(image),
                Err(e) => {
                    // fail fast, discarding completed variations
                    log::warn!("variation {}/{} failed on {}: {}", i + 1, count, platform, e);
                    return Err(e);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        on_progress(BatchProgress {
            percent: 100,
            phase: "Completed".to_string(),
        });

        let metadata = BatchMetadata {
            platform: platform.display_name().to_string(),
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            strength: request.strength,
            duration_ms,
            completed_at: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            count,
        };
        log::info!(
            "batch of {} complete on {} in {} ms",
            count,
            platform,
            duration_ms
        );

        Ok(VariationBatch { results, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    struct MockBackend {
        calls: AtomicU32,
        fail_at: Option<u32>,
        seeds: Mutex<Vec<i64>>,
    }

    impl MockBackend {
        fn new(fail_at: Option<u32>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_at,
                seeds: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageBackend for MockBackend {
        fn platform(&self) -> Platform {
            Platform::DeepAi
        }

        async fn transform(&self, request: &TransformRequest) -> Result<DynamicImage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(seed) = request.seed {
                self.seeds.lock().unwrap().push(seed);
            }
            if self.fail_at == Some(call) {
                return Err(TransformError::RateLimited {
                    platform: Platform::DeepAi,
                });
            }
            Ok(DynamicImage::new_rgb8(1 + call, 1))
        }
    }

    fn request() -> TransformRequest {
        TransformRequest::new(vec![1, 2, 3], "oil painting", 0.6)
            .unwrap()
            .with_negative("blurry")
    }

    #[tokio::test]
    async fn test_full_batch_in_order() {
        let backend = MockBackend::new(None);
        let orchestrator = VariationOrchestrator::new();
        let batch = orchestrator
            .run(&backend, &request(), 3, |_| {})
            .await
            .unwrap();

        assert_eq!(batch.results.len(), 3);
        assert_eq!(batch.metadata.count, 3);
        // request order preserved: the mock encodes the call index as width
        let widths: Vec<u32> = batch.results.iter().map(|i| i.width()).collect();
        assert_eq!(widths, vec![1, 2, 3]);
        assert_eq!(batch.metadata.platform, "DeepAI");
        assert_eq!(batch.metadata.prompt, "oil painting");
    }

    #[tokio::test]
    async fn test_fail_fast_stops_remaining_calls() {
        let backend = MockBackend::new(Some(2));
        let orchestrator = VariationOrchestrator::new();
        let err = orchestrator
            .run(&backend, &request(), 4, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, TransformError::RateLimited { .. }));
        // the third call failed; the fourth was never issued
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_seeds_are_fresh_and_in_range() {
        let backend = MockBackend::new(None);
        let orchestrator = VariationOrchestrator::new();
        orchestrator
            .run(&backend, &request(), 4, |_| {})
            .await
            .unwrap();

        let seeds = backend.seeds.lock().unwrap();
        assert_eq!(seeds.len(), 4);
        for seed in seeds.iter() {
            assert!(SEED_RANGE.contains(seed));
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let backend = MockBackend::new(None);
        let orchestrator = VariationOrchestrator::new();
        let mut percents = Vec::new();
        orchestrator
            .run(&backend, &request(), 4, |p| percents.push(p.percent))
            .await
            .unwrap();

        assert_eq!(percents.first(), Some(&10));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_count_bounds() {
        let backend = MockBackend::new(None);
        let orchestrator = VariationOrchestrator::new();
        for bad in [0, 5] {
            assert!(matches!(
                orchestrator.run(&backend, &request(), bad, |_| {}).await,
                Err(TransformError::InvalidConfig(_))
            ));
        }
        // no transform calls were issued for rejected counts
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flag_clears_after_failure() {
        let backend = MockBackend::new(Some(0));
        let orchestrator = VariationOrchestrator::new();
        assert!(orchestrator.run(&backend, &request(), 1, |_| {}).await.is_err());
        // a subsequent batch is accepted
        let backend = MockBackend::new(None);
        assert!(orchestrator.run(&backend, &request(), 1, |_| {}).await.is_ok());
    }
}
