mod analysis;
mod api;
mod media;
mod ml;
mod utils;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::analysis::fan_out::{FrameAnalyzer, PoolConfig};
use crate::analysis::VideoAnalysis;
use crate::api::AppState;
use crate::media::ffmpeg::FfmpegDecoder;
use crate::media::sampler::SamplingConfig;
use crate::ml::engine::InferenceEngine;
use crate::utils::config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// ONNX emotion model; discovered from .env or nearby directories when omitted
    #[arg(short, long, env = "EMOTION_MODEL_PATH")]
    model: Option<PathBuf>,

    /// ONNX face detector (UltraFace RFB-320); discovered like the emotion model
    #[arg(long, env = "FACE_MODEL_PATH")]
    face_model: Option<PathBuf>,

    /// Detections scoring at or below this are ignored
    #[arg(long, env = "FACE_THRESHOLD", default_value_t = 0.7)]
    face_threshold: f32,

    /// Frames sampled per second of video
    #[arg(long, env = "SAMPLE_RATE", default_value_t = 1.0)]
    sample_rate: f64,

    /// Stop sampling after this many frames (0 = unlimited)
    #[arg(long, env = "MAX_FRAMES", default_value_t = 0)]
    max_frames: usize,

    /// Classifier threads (0 = one per CPU)
    #[arg(long, env = "CLASSIFIER_WORKERS", default_value_t = 0)]
    workers: usize,

    /// Frames allowed in the classifier queue across all requests
    #[arg(long, env = "MAX_QUEUED_FRAMES", default_value_t = 1024)]
    max_queued_frames: usize,

    /// Predictions below this softmax confidence count as failed frames
    #[arg(long, env = "MIN_CONFIDENCE", default_value_t = 0.0)]
    min_confidence: f32,

    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 512)]
    max_upload_mb: usize,

    #[arg(long, env = "FFMPEG_BIN", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    #[arg(long, env = "FFPROBE_BIN", default_value = "ffprobe")]
    ffprobe: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deep_affect=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let sample_rate = config::validate_sample_rate(args.sample_rate)?;
    let min_confidence = config::validate_confidence("Minimum confidence", args.min_confidence)?;
    let face_threshold = config::validate_confidence("Face threshold", args.face_threshold)?;
    let max_queued_frames = config::validate_queue_bound(args.max_queued_frames)?;
    let models = config::get_model_paths(args.model.as_deref(), args.face_model.as_deref())?;

    info!("Emotion Analysis API starting...");
    info!("Emotion model: {:?}", models.emotion);
    info!("Face model: {:?}", models.face);

    let engine = InferenceEngine::new(&models, min_confidence, face_threshold)?;
    let analyzer = FrameAnalyzer::new(
        Arc::new(engine),
        PoolConfig {
            workers: args.workers,
            max_queued_frames,
        },
    )?;
    info!(
        workers = analyzer.workers(),
        max_queued_frames,
        "Classifier pool ready"
    );

    let decoder = FfmpegDecoder::new(args.ffmpeg, args.ffprobe);
    let sampling = SamplingConfig {
        target_fps: sample_rate,
        max_frames: args.max_frames,
    };

    let state = Arc::new(AppState {
        analysis: VideoAnalysis::new(Arc::new(decoder), analyzer, sampling),
    });
    let app = api::router(state, args.max_upload_mb * 1024 * 1024);

    let addr = SocketAddr::new(args.host.parse().context("Invalid host")?, args.port);
    info!("Running server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
