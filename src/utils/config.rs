use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use anyhow::{Result, Context, anyhow};
use tracing::info;

pub const EMOTION_MODEL_FILE: &str = "emotion.onnx";
pub const FACE_MODEL_FILE: &str = "face.onnx";
const EMOTION_MODEL_KEY: &str = "EMOTION_MODEL_PATH";
const FACE_MODEL_KEY: &str = "FACE_MODEL_PATH";
const SEARCH_DEPTH: usize = 5;

pub struct ModelPaths {
    pub emotion: PathBuf,
    pub face: PathBuf,
}

/// Resolves both models. Each one comes from its flag when given, otherwise
/// from .env, otherwise from a filesystem search that is then saved to .env.
pub fn get_model_paths(emotion: Option<&Path>, face: Option<&Path>) -> Result<ModelPaths> {
    let env_path = Path::new(".env");
    Ok(ModelPaths {
        emotion: resolve_model(env_path, emotion, EMOTION_MODEL_FILE, EMOTION_MODEL_KEY)?,
        face: resolve_model(env_path, face, FACE_MODEL_FILE, FACE_MODEL_KEY)?,
    })
}

fn resolve_model(env_path: &Path, explicit: Option<&Path>, file_name: &str, key: &str) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(anyhow!("Model not found at {:?}", path));
        }
        return Ok(path.to_path_buf());
    }

    if env_path.exists() {
        if let Ok(path) = load_from_env(env_path, key) {
            if path.is_file() {
                info!("Loaded {} from .env", key);
                return Ok(path);
            }
        }
    }

    info!("{} not found in .env or .env missing. Searching filesystem...", key);
    let root = std::env::current_dir()?;
    let model = find_file(&root, file_name, SEARCH_DEPTH)?;
    info!("Found {}: {:?}", file_name, model);

    save_to_env(env_path, key, &model)?;
    info!("Saved {} to .env", key);

    Ok(model)
}

fn find_file(root: &Path, filename: &str, max_depth: usize) -> Result<PathBuf> {
    let search = |dir: &Path| {
        WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename)
            .map(|e| e.path().to_path_buf())
    };

    if let Some(found) = search(root) {
        return Ok(found);
    }

    // Running from a subdirectory such as target/ is common in development.
    if let Some(found) = root.parent().and_then(search) {
        return Ok(found);
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

fn load_from_env(path: &Path, key: &str) -> Result<PathBuf> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line?;
        if let Some((name, value)) = line.split_once('=') {
            if name.trim() == key {
                return Ok(PathBuf::from(value.trim()));
            }
        }
    }

    Err(anyhow!("{} missing from .env", key))
}

/// Records one model path, keeping any other entries already in the file.
fn save_to_env(path: &Path, key: &str, model: &Path) -> Result<()> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();

    let mut file = File::create(path).context("Failed to create .env file")?;
    for line in existing.lines() {
        let same_key = line
            .split_once('=')
            .map(|(name, _)| name.trim() == key)
            .unwrap_or(false);
        if !same_key {
            writeln!(file, "{}", line)?;
        }
    }
    writeln!(file, "{}={}", key, model.display())?;
    Ok(())
}

pub fn validate_sample_rate(rate: f64) -> Result<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(anyhow!("Sample rate must be a positive number, got {}", rate))
    }
}

pub fn validate_confidence(name: &str, confidence: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(anyhow!("{} must be within 0..=1, got {}", name, confidence))
    }
}

pub fn validate_queue_bound(frames: usize) -> Result<usize> {
    let max = crate::analysis::fan_out::max_queue_bound();
    if (1..=max).contains(&frames) {
        Ok(frames)
    } else {
        Err(anyhow!("Max queued frames must be within 1..={}, got {}", max, frames))
    }
}
