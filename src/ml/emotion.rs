use std::fmt;

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

/// Labels the service documents as its expected vocabulary. Classifier output
/// is not filtered against this list.
pub const DECLARED_EMOTIONS: [&str; 7] = [
    "happy", "sad", "neutral", "angry", "surprise", "fear", "disgust",
];

/// A dominant-emotion label as reported by a classifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Emotion(String);

impl Emotion {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the label belongs to [`DECLARED_EMOTIONS`].
    pub fn is_declared(&self) -> bool {
        DECLARED_EMOTIONS.contains(&self.as_str())
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Emotion {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Result of classifying one sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Classified(Emotion),
    Failed(String),
}

impl FrameOutcome {
    pub fn emotion(&self) -> Option<&Emotion> {
        match self {
            FrameOutcome::Classified(emotion) => Some(emotion),
            FrameOutcome::Failed(_) => None,
        }
    }
}

/// Returns the dominant emotion visible in a single frame.
///
/// Implementations are called concurrently from the classifier pool and must
/// not rely on call order.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, frame: &RgbImage) -> Result<Emotion>;
}
