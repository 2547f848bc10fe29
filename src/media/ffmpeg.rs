use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;
use tracing::warn;

use crate::media::sampler::{FrameStream, VideoDecoder};

/// Decodes videos by piping raw RGB frames out of the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn probe(&self, input_path: &Path) -> Result<StreamInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate"])
            .args(["-of", "json"])
            .arg(input_path)
            .stderr(Stdio::null())
            .output()
            .context("Failed to execute ffprobe. Is it installed?")?;

        if !output.status.success() {
            return Err(anyhow!("ffprobe exited with non-zero status"));
        }

        parse_probe(&output.stdout)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameStream>> {
        let info = self.probe(path)?;

        let mut child = Command::new(&self.ffmpeg)
            .args(decode_args(path))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn ffmpeg command")?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("Failed to open stdout"))?;

        Ok(Box::new(RawFrameStream::new(stdout, Some(child), info)))
    }
}

/// Arguments for streaming the first video track as packed rgb24.
///
/// The frame size comes from ffprobe, which reports the coded (unrotated)
/// dimensions, so autorotation must stay off or rotated phone clips would be
/// split at the wrong width. `-vsync 0` passes the container's frames through
/// without duplicating or dropping any.
fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        ["-map", "0:v:0", "-vsync", "0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .iter()
            .map(OsString::from),
    );
    args
}

/// Geometry and timing of the first video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl StreamInfo {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

fn parse_probe(stdout: &[u8]) -> Result<StreamInfo> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe output")?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No video stream found"))?;

    let width = stream.width.filter(|w| *w > 0).ok_or_else(|| anyhow!("Video stream has no width"))?;
    let height = stream.height.filter(|h| *h > 0).ok_or_else(|| anyhow!("Video stream has no height"))?;

    // avg_frame_rate is what players report; some containers leave it as 0/0.
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(0.0);

    Ok(StreamInfo { width, height, fps })
}

/// Parses ffprobe rationals such as `30000/1001` or plain numbers.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Splits a raw rgb24 byte stream into frames of the probed size.
///
/// When `child` is set it is the process writing `reader`; it is reaped once
/// the stream ends and killed if the stream is dropped early.
struct RawFrameStream<R> {
    reader: R,
    child: Option<Child>,
    info: StreamInfo,
    finished: bool,
}

impl<R: Read> RawFrameStream<R> {
    fn new(reader: R, child: Option<Child>, info: StreamInfo) -> Self {
        Self {
            reader,
            child,
            info,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.wait() {
            Ok(status) if !status.success() => {
                warn!("ffmpeg exited with {}; keeping frames decoded so far", status);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to wait on ffmpeg: {}", e),
        }
    }
}

impl<R: Read> FrameStream for RawFrameStream<R> {
    fn native_fps(&self) -> f64 {
        self.info.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.info.frame_len()];
        match self.reader.read_exact(&mut buffer) {
            Ok(()) => {}
            // A short read means end of stream; partial trailing frames are dropped.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish();
                return Ok(None);
            }
            Err(e) => {
                self.finish();
                return Err(e).context("Failed to read ffmpeg output");
            }
        }

        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| anyhow!("Raw frame does not match {}x{}", self.info.width, self.info.height))
    }
}

impl<R> Drop for RawFrameStream<R> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            // Sampling stopped early; don't leave ffmpeg writing into a dead pipe.
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe() -> Result<()> {
        let json = br#"{"streams":[{"width":640,"height":360,"avg_frame_rate":"30/1","r_frame_rate":"30/1"}]}"#;
        let info = parse_probe(json)?;
        assert_eq!(info, StreamInfo { width: 640, height: 360, fps: 30.0 });
        assert_eq!(info.frame_len(), 640 * 360 * 3);
        Ok(())
    }

    #[test]
    fn test_parse_probe_falls_back_to_r_frame_rate() -> Result<()> {
        let json = br#"{"streams":[{"width":2,"height":2,"avg_frame_rate":"0/0","r_frame_rate":"24/1"}]}"#;
        assert_eq!(parse_probe(json)?.fps, 24.0);
        Ok(())
    }

    #[test]
    fn test_parse_probe_without_video_stream() {
        assert!(parse_probe(br#"{"streams":[]}"#).is_err());
        assert!(parse_probe(br#"{}"#).is_err());
        assert!(parse_probe(b"not json").is_err());
    }

    fn two_by_one() -> StreamInfo {
        StreamInfo { width: 2, height: 1, fps: 10.0 }
    }

    #[test]
    fn test_raw_stream_drops_partial_trailing_frame() -> Result<()> {
        // Two whole 2x1 frames followed by half of a third.
        let mut bytes = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        bytes.extend([13, 14, 15]);
        let mut stream = RawFrameStream::new(Cursor::new(bytes), None, two_by_one());

        assert_eq!(stream.native_fps(), 10.0);
        let first = stream.next_frame()?.unwrap();
        assert_eq!(first.dimensions(), (2, 1));
        assert_eq!(first.as_raw(), &vec![1, 2, 3, 4, 5, 6]);
        let second = stream.next_frame()?.unwrap();
        assert_eq!(second.get_pixel(1, 0).0, [10, 11, 12]);

        assert!(stream.next_frame()?.is_none());
        assert!(stream.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn test_raw_stream_empty_input() -> Result<()> {
        let mut stream = RawFrameStream::new(Cursor::new(Vec::new()), None, two_by_one());
        assert!(stream.next_frame()?.is_none());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_stream_keeps_frames_when_ffmpeg_fails() -> Result<()> {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn()?;
        let bytes = vec![9u8; 6];
        let mut stream = RawFrameStream::new(Cursor::new(bytes), Some(child), two_by_one());

        assert!(stream.next_frame()?.is_some());
        assert!(stream.next_frame()?.is_none());
        assert!(stream.finished);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_dropping_unfinished_stream_kills_decoder() -> Result<()> {
        let child = Command::new("sleep").arg("30").spawn()?;
        let stream = RawFrameStream::new(Cursor::new(vec![0u8; 6]), Some(child), two_by_one());

        let started = Instant::now();
        drop(stream);
        assert!(started.elapsed() < Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn test_decode_args_disable_autorotate() {
        let args = decode_args(Path::new("/tmp/upload.mp4"));
        let position = |flag: &str| args.iter().position(|a| a == flag).unwrap();

        assert!(position("-noautorotate") < position("-i"));
        assert_eq!(args[position("-i") + 1], OsString::from("/tmp/upload.mp4"));
        assert_eq!(args[position("-pix_fmt") + 1], OsString::from("rgb24"));
        assert_eq!(args.last(), Some(&OsString::from("-")));
    }

    #[test]
    fn test_missing_binary_fails_to_open() {
        let decoder = FfmpegDecoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(decoder.open(Path::new("clip.mp4")).is_err());
    }
}
