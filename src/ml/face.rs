use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{Array, Array4};
use ort::session::Session;
use ort::value::Tensor;

use crate::ml::engine;

/// Input geometry of the UltraFace RFB-320 detector.
pub const DETECTOR_INPUT_WIDTH: u32 = 320;
pub const DETECTOR_INPUT_HEIGHT: u32 = 240;

/// Overlap above which a lower-scoring box is treated as the same face.
const IOU_THRESHOLD: f32 = 0.3;

/// A detected face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &FaceBox) -> f32 {
        let overlap = FaceBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
            score: 0.0,
        }
        .area();
        let union = self.area() + other.area() - overlap;
        if union <= 0.0 {
            0.0
        } else {
            overlap / union
        }
    }
}

/// UltraFace detector run ahead of the emotion model.
pub struct FaceDetector {
    session: Session,
    input_name: String,
    threshold: f32,
}

impl FaceDetector {
    pub fn new(model_path: &Path, threshold: f32) -> Result<Self> {
        let (session, input_name) = engine::load_session(model_path, "face detection")?;
        Ok(Self {
            session,
            input_name,
            threshold,
        })
    }

    pub fn detect(&self, frame: &RgbImage) -> Result<Vec<FaceBox>> {
        let input = normalize_for_detector(frame)?;
        let tensor = Tensor::from_array(input).context("Failed to build detector tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor]?)
            .context("Face detection failed")?;

        // UltraFace exports scores first, then corner-form boxes.
        let scores: Vec<f32> = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to read face scores")?
            .iter()
            .copied()
            .collect();
        let boxes: Vec<f32> = outputs[1]
            .try_extract_tensor::<f32>()
            .context("Failed to read face boxes")?
            .iter()
            .copied()
            .collect();

        let (width, height) = frame.dimensions();
        decode_faces(&scores, &boxes, width, height, self.threshold)
    }
}

/// Resizes the whole frame to 320x240 and scales pixels to roughly -1..1.
pub fn normalize_for_detector(frame: &RgbImage) -> Result<Array4<f32>> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("Frame has no pixels ({}x{})", width, height));
    }

    let resized = imageops::resize(frame, DETECTOR_INPUT_WIDTH, DETECTOR_INPUT_HEIGHT, FilterType::Triangle);

    let mut array = Array::zeros((1, 3, DETECTOR_INPUT_HEIGHT as usize, DETECTOR_INPUT_WIDTH as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - 127.0) / 128.0;
        }
    }

    Ok(array)
}

/// Turns raw detector output into non-overlapping faces, best score first.
///
/// `scores` holds a (background, face) pair per anchor and `boxes` holds
/// normalized `x1, y1, x2, y2` per anchor.
pub fn decode_faces(scores: &[f32], boxes: &[f32], width: u32, height: u32, threshold: f32) -> Result<Vec<FaceBox>> {
    if scores.len() % 2 != 0 || boxes.len() != scores.len() * 2 {
        return Err(anyhow!(
            "Detector output mismatch: {} scores for {} box coordinates",
            scores.len(),
            boxes.len()
        ));
    }

    let (w, h) = (width as f32, height as f32);
    let mut candidates: Vec<FaceBox> = scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(pair, _)| pair[1] > threshold)
        .map(|(pair, corners)| FaceBox {
            x1: corners[0].clamp(0.0, 1.0) * w,
            y1: corners[1].clamp(0.0, 1.0) * h,
            x2: corners[2].clamp(0.0, 1.0) * w,
            y2: corners[3].clamp(0.0, 1.0) * h,
            score: pair[1],
        })
        .filter(|face| face.area() > 0.0)
        .collect();

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<FaceBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|face| face.iou(&candidate) <= IOU_THRESHOLD) {
            kept.push(candidate);
        }
    }

    Ok(kept)
}

/// The face the frame is labelled by: the largest one.
pub fn primary_face(faces: &[FaceBox]) -> Result<FaceBox> {
    faces
        .iter()
        .copied()
        .max_by(|a, b| a.area().total_cmp(&b.area()))
        .ok_or_else(|| anyhow!("Face could not be detected"))
}

pub fn crop_face(frame: &RgbImage, face: &FaceBox) -> Result<RgbImage> {
    let (width, height) = frame.dimensions();
    let x1 = (face.x1.floor().max(0.0) as u32).min(width);
    let y1 = (face.y1.floor().max(0.0) as u32).min(height);
    let x2 = (face.x2.ceil().max(0.0) as u32).min(width);
    let y2 = (face.y2.ceil().max(0.0) as u32).min(height);

    if x2 <= x1 || y2 <= y1 {
        return Err(anyhow!("Detected face box is empty"));
    }

    Ok(imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_normalize_for_detector() -> Result<()> {
        let frame = RgbImage::from_pixel(640, 480, Rgb([255, 127, 0]));
        let input = normalize_for_detector(&frame)?;
        assert_eq!(input.shape(), &[1, 3, 240, 320]);
        // One step of rounding in the resize is 1/128.
        assert!((input[[0, 0, 10, 10]] - 1.0).abs() < 0.02);
        assert!(input[[0, 1, 10, 10]].abs() < 0.02);
        assert!((input[[0, 2, 10, 10]] + 127.0 / 128.0).abs() < 0.02);

        assert!(normalize_for_detector(&RgbImage::new(0, 0)).is_err());
        Ok(())
    }

    #[test]
    fn test_decode_faces_applies_threshold() -> Result<()> {
        let scores = [0.9, 0.1, 0.05, 0.95];
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.25, 0.5, 0.75, 1.0];
        let faces = decode_faces(&scores, &boxes, 200, 100, 0.7)?;

        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0], face(50.0, 50.0, 150.0, 100.0, 0.95));
        Ok(())
    }

    #[test]
    fn test_decode_faces_suppresses_overlaps() -> Result<()> {
        // Two near-identical boxes and one separate face.
        let scores = [0.1, 0.8, 0.1, 0.9, 0.2, 0.75];
        let boxes = [
            0.10, 0.10, 0.40, 0.40,
            0.11, 0.11, 0.41, 0.41,
            0.60, 0.60, 0.90, 0.90,
        ];
        let faces = decode_faces(&scores, &boxes, 100, 100, 0.7)?;

        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].score, 0.9);
        assert_eq!(faces[1].score, 0.75);
        Ok(())
    }

    #[test]
    fn test_decode_faces_rejects_mismatched_output() {
        assert!(decode_faces(&[0.1, 0.9], &[0.0, 0.0, 1.0], 10, 10, 0.5).is_err());
        assert!(decode_faces(&[0.1], &[], 10, 10, 0.5).is_err());
    }

    #[test]
    fn test_primary_face_is_largest() -> Result<()> {
        let small = face(0.0, 0.0, 10.0, 10.0, 0.99);
        let large = face(20.0, 20.0, 60.0, 70.0, 0.75);
        assert_eq!(primary_face(&[small, large])?, large);
        Ok(())
    }

    #[test]
    fn test_no_face_is_an_error() {
        let err = primary_face(&[]).unwrap_err();
        assert_eq!(err.to_string(), "Face could not be detected");
    }

    #[test]
    fn test_crop_face_clamps_to_frame() -> Result<()> {
        let frame = RgbImage::from_fn(100, 80, |x, y| Rgb([x as u8, y as u8, 0]));
        let crop = crop_face(&frame, &face(90.2, 70.5, 120.0, 95.0, 0.9))?;
        assert_eq!(crop.dimensions(), (10, 10));
        assert_eq!(crop.get_pixel(0, 0).0, [90, 70, 0]);

        assert!(crop_face(&frame, &face(100.0, 0.0, 120.0, 10.0, 0.9)).is_err());
        Ok(())
    }
}
