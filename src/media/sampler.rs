use std::path::Path;

use anyhow::Result;
use image::RgbImage;
use tracing::{debug, warn};

/// Sequential reader over the decoded frames of one video.
pub trait FrameStream {
    /// Native frame rate reported by the container.
    fn native_fps(&self) -> f64;

    /// Next decoded frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Opens videos for sequential decoding.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameStream>>;
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    /// Frames to keep per second of video.
    pub target_fps: f64,
    /// Stop after this many retained frames (0 = unlimited).
    pub max_frames: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_fps: 1.0,
            max_frames: 0,
        }
    }
}

/// Number of native frames between two retained frames. Never zero.
pub fn frame_stride(native_fps: f64, target_fps: f64) -> usize {
    if !native_fps.is_finite() || !target_fps.is_finite() || target_fps <= 0.0 {
        return 1;
    }
    let stride = (native_fps / target_fps).floor();
    if stride < 1.0 {
        1
    } else {
        stride as usize
    }
}

/// Decodes `path` and keeps every frame whose index is a multiple of the stride.
///
/// Undecodable input yields whatever frames were read before the failure,
/// possibly none.
pub fn sample_frames(decoder: &dyn VideoDecoder, path: &Path, config: SamplingConfig) -> Vec<RgbImage> {
    let mut stream = match decoder.open(path) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to open video {:?}: {:#}", path, e);
            return Vec::new();
        }
    };

    let stride = frame_stride(stream.native_fps(), config.target_fps);
    debug!(
        native_fps = stream.native_fps(),
        target_fps = config.target_fps,
        stride,
        "Sampling video"
    );

    let mut frames = Vec::new();
    let mut index = 0usize;
    loop {
        match stream.next_frame() {
            Ok(Some(frame)) => {
                if index % stride == 0 {
                    frames.push(frame);
                    if config.max_frames > 0 && frames.len() >= config.max_frames {
                        debug!(max_frames = config.max_frames, "Frame cap reached");
                        break;
                    }
                }
                index += 1;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Decoding stopped after {} frames: {:#}", index, e);
                break;
            }
        }
    }

    frames
}
