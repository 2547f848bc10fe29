use anyhow::{anyhow, Result};
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array, Array4};

use crate::ml::emotion::Emotion;

/// Side length of the square grayscale input expected by the FER+ model.
pub const EMOTION_INPUT_SIZE: u32 = 64;

/// Output order of the FER+ logits, already mapped onto the service vocabulary.
pub const EMOTION_LABELS: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];

pub fn normalize_for_emotion(frame: &RgbImage) -> Result<Array4<f32>> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("Frame has no pixels ({}x{})", width, height));
    }

    // Center crop to a square before resizing so faces keep their aspect ratio.
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    let cropped = imageops::crop_imm(frame, x, y, side, side).to_image();

    let gray = DynamicImage::ImageRgb8(cropped)
        .resize_exact(EMOTION_INPUT_SIZE, EMOTION_INPUT_SIZE, FilterType::Triangle)
        .grayscale();

    let size = EMOTION_INPUT_SIZE as usize;
    let mut array = Array::zeros((1, 1, size, size));

    // FER+ takes raw luma in 0..=255, no scaling.
    for (x, y, pixel) in gray.pixels() {
        array[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
    }

    Ok(array)
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Picks the most probable label, rejecting predictions below `min_confidence`.
pub fn decode_dominant(logits: &[f32], min_confidence: f32) -> Result<Emotion> {
    if logits.len() != EMOTION_LABELS.len() {
        return Err(anyhow!(
            "Expected {} emotion scores, model produced {}",
            EMOTION_LABELS.len(),
            logits.len()
        ));
    }

    let probs = softmax(logits);
    let (index, confidence) = probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| anyhow!("Model produced no scores"))?;

    if !confidence.is_finite() {
        return Err(anyhow!("Model produced non-finite scores"));
    }
    if confidence < min_confidence {
        return Err(anyhow!(
            "No confident expression (best {} at {:.2})",
            EMOTION_LABELS[index],
            confidence
        ));
    }

    Ok(Emotion::new(EMOTION_LABELS[index]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_normalize_shape_and_range() -> Result<()> {
        let frame = RgbImage::from_pixel(320, 240, Rgb([255, 255, 255]));
        let input = normalize_for_emotion(&frame)?;
        assert_eq!(input.shape(), &[1, 1, 64, 64]);
        assert!(input.iter().all(|v| (*v - 255.0).abs() < 1.0));
        Ok(())
    }

    #[test]
    fn test_normalize_crops_center() -> Result<()> {
        // Left and right bands are white, the centered square is black.
        let frame = RgbImage::from_fn(300, 100, |x, _| {
            if (100..200).contains(&x) {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let input = normalize_for_emotion(&frame)?;
        assert!(input.iter().all(|v| *v < 1.0));
        Ok(())
    }

    #[test]
    fn test_normalize_rejects_empty_frame() {
        let frame = RgbImage::new(0, 0);
        assert!(normalize_for_emotion(&frame).is_err());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_decode_dominant_maps_label() -> Result<()> {
        let mut logits = [0.0f32; 8];
        logits[1] = 10.0;
        assert_eq!(decode_dominant(&logits, 0.5)?, Emotion::from("happy"));

        let mut logits = [0.0f32; 8];
        logits[7] = 10.0;
        assert_eq!(decode_dominant(&logits, 0.0)?, Emotion::from("contempt"));
        Ok(())
    }

    #[test]
    fn test_decode_dominant_rejects_low_confidence() {
        // Uniform scores give every label 1/8 confidence.
        let logits = [0.0f32; 8];
        assert!(decode_dominant(&logits, 0.5).is_err());
        assert!(decode_dominant(&logits, 0.1).is_ok());
    }

    #[test]
    fn test_decode_dominant_rejects_wrong_arity() {
        assert!(decode_dominant(&[1.0, 2.0], 0.0).is_err());
    }
}
