// Model directory resolution
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{EngineConfig, MODEL_SUBDIR};
use crate::types::{OcrError, Result};

/// Candidate directories in lookup order: override, `<base>/OcrModels/pix2text-mfr`,
/// the same one level up, then the development tree.
pub fn candidate_dirs(config: &EngineConfig) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(ref dir) = config.model_dir {
        candidates.push(dir.clone());
    }
    if let Some(base) = config.resolved_base_dir() {
        candidates.push(base.join(MODEL_SUBDIR));
        if let Some(parent) = base.parent() {
            candidates.push(parent.join(MODEL_SUBDIR));
        }
    }
    candidates.push(config.resolved_dev_fallback_dir());
    candidates
}

pub fn locate_model_dir(config: &EngineConfig) -> Result<PathBuf> {
    let candidates = candidate_dirs(config);
    for dir in &candidates {
        if dir.is_dir() {
            debug!(dir = %dir.display(), "model directory resolved");
            return Ok(dir.clone());
        }
    }
    Err(OcrError::model_not_found(format!(
        "no model directory found; tried {}",
        join_paths(&candidates)
    )))
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// First existing file among `names` inside `dir`, skipping repeated names.
pub fn first_existing_file(dir: &Path, names: &[&str]) -> std::result::Result<PathBuf, Vec<String>> {
    let mut tried: Vec<String> = Vec::new();
    for name in names {
        if tried.iter().any(|t| t == name) {
            continue;
        }
        tried.push(name.to_string());
        let path = dir.join(name);
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(tried)
}
