use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;

use crate::ml::emotion::{Emotion, EmotionClassifier};
use crate::ml::face::{self, FaceDetector};
use crate::ml::pipeline;
use crate::utils::config::ModelPaths;

/// Face detection followed by FER+ emotion recognition, served through ONNX Runtime.
pub struct InferenceEngine {
    detector: FaceDetector,
    session: Session,
    input_name: String,
    min_confidence: f32,
}

impl InferenceEngine {
    pub fn new(models: &ModelPaths, min_confidence: f32, face_threshold: f32) -> Result<Self> {
        // Global environment; committing twice is harmless.
        let _ = ort::init().with_name("deep-affect-inference").commit();

        let detector = FaceDetector::new(&models.face, face_threshold)?;
        let (session, input_name) = load_session(&models.emotion, "emotion")?;

        Ok(Self {
            detector,
            session,
            input_name,
            min_confidence,
        })
    }
}

/// Opens a model and returns it with the name of its first input.
pub(crate) fn load_session(model_path: &Path, kind: &str) -> Result<(Session, String)> {
    // Concurrency comes from the classifier pool, so each run stays single threaded.
    let session = Session::builder()?
        .with_intra_threads(1)?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load {} model {:?}", kind, model_path))?;

    let input_name = session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .ok_or_else(|| anyhow!("The {} model declares no inputs", kind))?;

    Ok((session, input_name))
}

impl EmotionClassifier for InferenceEngine {
    fn classify(&self, frame: &RgbImage) -> Result<Emotion> {
        let faces = self.detector.detect(frame)?;
        let face = face::primary_face(&faces)?;
        let crop = face::crop_face(frame, &face)?;

        let input = pipeline::normalize_for_emotion(&crop)?;
        let tensor = Tensor::from_array(input).context("Failed to build input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor]?)
            .context("Emotion inference failed")?;

        let scores = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to read emotion scores")?;
        let logits: Vec<f32> = scores.iter().copied().collect();

        pipeline::decode_dominant(&logits, self.min_confidence)
    }
}
