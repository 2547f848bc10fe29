use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use image::RgbImage;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::ml::emotion::{EmotionClassifier, FrameOutcome};

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Classifier threads (0 = one per CPU).
    pub workers: usize,
    /// Upper bound on frames queued on the pool across all requests.
    pub max_queued_frames: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_queued_frames: 1024,
        }
    }
}

/// Shared worker pool that classifies frames off the async runtime.
///
/// Every frame becomes one job. Results come back in frame order no matter
/// which job finishes first.
pub struct FrameAnalyzer {
    pool: ThreadPool,
    classifier: Arc<dyn EmotionClassifier>,
    admission: Arc<Semaphore>,
    max_queued_frames: usize,
}

impl FrameAnalyzer {
    pub fn new(classifier: Arc<dyn EmotionClassifier>, config: PoolConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("classifier-{}", i))
            .build()
            .context("Failed to build classifier pool")?;

        let max_queued_frames = config.max_queued_frames.clamp(1, max_queue_bound());

        Ok(Self {
            pool,
            classifier,
            admission: Arc::new(Semaphore::new(max_queued_frames)),
            max_queued_frames,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub async fn analyze(&self, frames: Vec<RgbImage>) -> Vec<FrameOutcome> {
        if frames.is_empty() {
            return Vec::new();
        }

        // Large batches take the whole budget rather than waiting forever.
        let wanted = u32::try_from(frames.len().min(self.max_queued_frames)).unwrap_or(u32::MAX);
        // Jobs hold the permits, so a dropped request keeps counting until its queued work drains.
        let permits = match Arc::clone(&self.admission).acquire_many_owned(wanted).await {
            Ok(permits) => Arc::new(permits),
            Err(_) => {
                // The semaphore is never closed while the analyzer is alive.
                return frames
                    .iter()
                    .map(|_| FrameOutcome::Failed("classifier pool closed".to_string()))
                    .collect();
            }
        };

        debug!(frames = frames.len(), "Submitting frames to classifier pool");

        let mut pending = Vec::with_capacity(frames.len());
        for (index, frame) in frames.into_iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            let classifier = Arc::clone(&self.classifier);
            let permits = Arc::clone(&permits);

            self.pool.spawn(move || {
                let outcome = classify_frame(classifier.as_ref(), index, &frame);
                drop(permits);
                // The receiver is gone only if the request was dropped.
                let _ = tx.send(outcome);
            });

            pending.push(rx);
        }
        drop(permits);

        join_all(pending)
            .await
            .into_iter()
            .map(|received| {
                received.unwrap_or_else(|_| FrameOutcome::Failed("classifier job was dropped".to_string()))
            })
            .collect()
    }
}

/// Largest queue bound the admission semaphore can represent.
pub fn max_queue_bound() -> usize {
    Semaphore::MAX_PERMITS.min(u32::MAX as usize)
}

fn classify_frame(classifier: &dyn EmotionClassifier, index: usize, frame: &RgbImage) -> FrameOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(frame))) {
        Ok(Ok(emotion)) => FrameOutcome::Classified(emotion),
        Ok(Err(e)) => {
            warn!(frame = index, "Error processing frame: {:#}", e);
            FrameOutcome::Failed(format!("{:#}", e))
        }
        Err(_) => {
            warn!(frame = index, "Classifier panicked on frame");
            FrameOutcome::Failed("classifier panicked".to_string())
        }
    }
}
