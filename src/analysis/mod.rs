//! Video-to-distribution pipeline: sample frames, classify them on the
//! shared pool, and tally the labels that came back.

pub mod aggregate;
pub mod fan_out;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::media::sampler::{self, SamplingConfig, VideoDecoder};
use aggregate::Tally;
use fan_out::FrameAnalyzer;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("No frames processed successfully")]
    NoFramesProcessed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct VideoAnalysis {
    decoder: Arc<dyn VideoDecoder>,
    analyzer: FrameAnalyzer,
    sampling: SamplingConfig,
}

impl VideoAnalysis {
    pub fn new(decoder: Arc<dyn VideoDecoder>, analyzer: FrameAnalyzer, sampling: SamplingConfig) -> Self {
        Self {
            decoder,
            analyzer,
            sampling,
        }
    }

    pub async fn run(&self, video_path: &Path) -> Result<Tally, AnalysisError> {
        let decoder = Arc::clone(&self.decoder);
        let path = video_path.to_path_buf();
        let sampling = self.sampling;

        let frames = tokio::task::spawn_blocking(move || sampler::sample_frames(decoder.as_ref(), &path, sampling))
            .await
            .context("Frame sampling task failed")?;

        let frames_sampled = frames.len();
        let outcomes = self.analyzer.analyze(frames).await;
        let tally = aggregate::tally(&outcomes);

        match &tally {
            Ok(t) => info!(
                frames_sampled = t.frames_sampled,
                frames_classified = t.frames_classified,
                frames_failed = t.frames_failed(),
                emotions = t.distribution.len(),
                "Video analyzed"
            ),
            Err(_) => info!(frames_sampled, "No frame produced an emotion"),
        }

        tally
    }
}
