// Configuration for mfr-ocr
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{OcrError, OcrErrorKind, Result};

/// Points straight at a model directory; wins over every other candidate.
pub const MODEL_DIR_ENV: &str = "MFR_OCR_MODEL_DIR";
pub const BASE_DIR_ENV: &str = "MFR_OCR_BASE_DIR";
pub const INTRA_THREADS_ENV: &str = "MFR_OCR_INTRA_THREADS";

/// Relative location of the model bundle below a base directory.
pub const MODEL_SUBDIR: &str = "OcrModels/pix2text-mfr";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub dev_fallback_dir: Option<PathBuf>,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u8,
    #[serde(default = "default_log_every_steps")]
    pub log_every_steps: usize,
}

fn default_intra_threads() -> usize { 4 }
fn default_optimization_level() -> u8 { 3 }
fn default_log_every_steps() -> usize { 10 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            base_dir: None,
            dev_fallback_dir: None,
            intra_threads: default_intra_threads(),
            optimization_level: default_optimization_level(),
            log_every_steps: default_log_every_steps(),
        }
    }
}

impl EngineConfig {
    /// Defaults with the `MFR_OCR_*` environment variables applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            OcrError::with_cause(
                OcrErrorKind::ModelInitFailed,
                format!("reading config {}", path.display()),
                e,
            )
        })?;
        toml::from_str(&content).map_err(|e| {
            OcrError::with_cause(
                OcrErrorKind::ModelInitFailed,
                format!("parsing config {}", path.display()),
                e,
            )
        })
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mfr-ocr").join("config.toml"))
    }

    pub fn with_env_overrides(mut self) -> Self {
        // Only an existing directory counts as an override
        if let Ok(dir) = env::var(MODEL_DIR_ENV) {
            let dir = PathBuf::from(dir);
            if dir.is_dir() {
                self.model_dir = Some(dir);
            }
        }
        if let Ok(dir) = env::var(BASE_DIR_ENV) {
            self.base_dir = Some(PathBuf::from(dir));
        }
        if let Some(threads) = env::var(INTRA_THREADS_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            self.intra_threads = threads;
        }
        self
    }

    /// Base directory for `<base>/OcrModels/pix2text-mfr`; the executable's directory by default.
    pub fn resolved_base_dir(&self) -> Option<PathBuf> {
        if let Some(ref dir) = self.base_dir {
            return Some(dir.clone());
        }
        env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
    }

    pub fn resolved_dev_fallback_dir(&self) -> PathBuf {
        self.dev_fallback_dir
            .clone()
            .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join(MODEL_SUBDIR))
    }
}
