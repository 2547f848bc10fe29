use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::analysis::AnalysisError;
use crate::ml::emotion::{Emotion, FrameOutcome};

/// Share of classified frames per observed emotion, in percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EmotionDistribution(BTreeMap<Emotion, f64>);

impl EmotionDistribution {
    pub fn get(&self, emotion: &str) -> Option<f64> {
        self.0.get(&Emotion::from(emotion)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub distribution: EmotionDistribution,
    pub frames_sampled: usize,
    pub frames_classified: usize,
}

impl Tally {
    pub fn frames_failed(&self) -> usize {
        self.frames_sampled - self.frames_classified
    }
}

/// Turns per-frame outcomes into percentages over the frames that produced a label.
pub fn tally(outcomes: &[FrameOutcome]) -> Result<Tally, AnalysisError> {
    let mut counts: BTreeMap<Emotion, usize> = BTreeMap::new();
    for emotion in outcomes.iter().filter_map(FrameOutcome::emotion) {
        if !emotion.is_declared() {
            debug!(emotion = %emotion, "Classifier returned an undeclared emotion");
        }
        *counts.entry(emotion.clone()).or_default() += 1;
    }

    let classified: usize = counts.values().sum();
    if classified == 0 {
        return Err(AnalysisError::NoFramesProcessed);
    }

    let distribution = counts
        .into_iter()
        .map(|(emotion, count)| (emotion, count as f64 / classified as f64 * 100.0))
        .collect();

    Ok(Tally {
        distribution: EmotionDistribution(distribution),
        frames_sampled: outcomes.len(),
        frames_classified: classified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(label: &str) -> FrameOutcome {
        FrameOutcome::Classified(Emotion::from(label))
    }

    fn failed() -> FrameOutcome {
        FrameOutcome::Failed("Face could not be detected".to_string())
    }

    #[test]
    fn test_all_happy() {
        let outcomes = vec![classified("happy"); 10];
        let tally = tally(&outcomes).unwrap();
        assert_eq!(tally.distribution.get("happy"), Some(100.0));
        assert_eq!(tally.distribution.len(), 1);
        assert_eq!(tally.frames_classified, 10);
    }

    #[test]
    fn test_failures_leave_denominator() {
        let mut outcomes = Vec::new();
        outcomes.extend(vec![classified("happy"); 4]);
        outcomes.extend(vec![classified("neutral"); 4]);
        outcomes.extend(vec![failed(); 2]);

        let tally = tally(&outcomes).unwrap();
        assert_eq!(tally.distribution.get("happy"), Some(50.0));
        assert_eq!(tally.distribution.get("neutral"), Some(50.0));
        assert_eq!(tally.frames_sampled, 10);
        assert_eq!(tally.frames_classified, 8);
        assert_eq!(tally.frames_failed(), 2);
    }

    #[test]
    fn test_percentages_sum_to_hundred() {
        let outcomes = vec![
            classified("happy"),
            classified("sad"),
            classified("sad"),
            failed(),
            classified("surprise"),
            classified("angry"),
            classified("fear"),
            failed(),
        ];
        let tally = tally(&outcomes).unwrap();
        let sum: f64 = tally.distribution.0.values().sum();
        assert!((sum - 100.0).abs() < 1e-9);
        let sad = tally.distribution.get("sad").unwrap();
        assert!((sad - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unseen_labels_are_absent() {
        let tally = tally(&[classified("happy")]).unwrap();
        assert_eq!(tally.distribution.get("disgust"), None);
    }

    #[test]
    fn test_undeclared_labels_pass_through() {
        let tally = tally(&[classified("contempt"), classified("happy")]).unwrap();
        assert_eq!(tally.distribution.get("contempt"), Some(50.0));
    }

    #[test]
    fn test_no_frames() {
        assert!(matches!(tally(&[]), Err(AnalysisError::NoFramesProcessed)));
        assert!(matches!(tally(&[failed(), failed()]), Err(AnalysisError::NoFramesProcessed)));
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let tally = tally(&[classified("happy"), classified("neutral")]).unwrap();
        let json = serde_json::to_value(&tally.distribution).unwrap();
        assert_eq!(json, serde_json::json!({"happy": 50.0, "neutral": 50.0}));
    }
}
