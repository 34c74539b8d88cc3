// Model manifest: file names, preprocessing parameters and special token ids
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::recognition::locator::first_existing_file;
use crate::types::{OcrError, OcrErrorKind, Result};

pub const MANIFEST_FILE: &str = "MODEL_MANIFEST.json";

/// Tried in order after the manifest's own decoder name.
pub const DEFAULT_DECODER_FILES: [&str; 2] = ["decoder_model_merged.onnx", "decoder_model.onnx"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    pub encoder_file: String,
    pub decoder_file: String,
    pub tokenizer_file: String,
    pub generation_config_file: String,
    pub image_size: u32,
    pub pixel_mean: [f32; 3],
    pub pixel_std: [f32; 3],
    pub bos_token_id: i64,
    pub eos_token_id: i64,
    pub pad_token_id: i64,
    pub decoder_start_token_id: i64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            encoder_file: "encoder_model.onnx".to_string(),
            decoder_file: "decoder_model.onnx".to_string(),
            tokenizer_file: "tokenizer.json".to_string(),
            generation_config_file: "generation_config.json".to_string(),
            image_size: 384,
            pixel_mean: [0.5, 0.5, 0.5],
            pixel_std: [0.5, 0.5, 0.5],
            bos_token_id: 0,
            eos_token_id: 2,
            pad_token_id: 1,
            decoder_start_token_id: 2,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestOverrides {
    #[serde(alias = "encoder_file")]
    encoder_file: Option<String>,
    #[serde(alias = "decoder_file")]
    decoder_file: Option<String>,
    #[serde(alias = "tokenizer_file")]
    tokenizer_file: Option<String>,
    #[serde(alias = "generation_config_file")]
    generation_config_file: Option<String>,
    #[serde(alias = "image_size")]
    image_size: Option<u32>,
    #[serde(alias = "pixel_mean")]
    pixel_mean: Option<Vec<f32>>,
    #[serde(alias = "pixel_std")]
    pixel_std: Option<Vec<f32>>,
    #[serde(alias = "bos_token_id")]
    bos_token_id: Option<i64>,
    #[serde(alias = "eos_token_id")]
    eos_token_id: Option<i64>,
    #[serde(alias = "pad_token_id")]
    pad_token_id: Option<i64>,
    #[serde(alias = "decoder_start_token_id")]
    decoder_start_token_id: Option<i64>,
}

/// The Hugging Face `generation_config.json` subset that matters here.
#[derive(Debug, Default, Deserialize)]
struct GenerationConfig {
    bos_token_id: Option<TokenIdField>,
    eos_token_id: Option<TokenIdField>,
    pad_token_id: Option<TokenIdField>,
    decoder_start_token_id: Option<TokenIdField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenIdField {
    One(i64),
    Many(Vec<i64>),
}

impl TokenIdField {
    fn first(&self) -> Option<i64> {
        match self {
            TokenIdField::One(id) => Some(*id),
            TokenIdField::Many(ids) => ids.first().copied(),
        }
    }
}

impl ModelManifest {
    /// Defaults, then `MODEL_MANIFEST.json`, then the generation config (token ids only).
    pub fn load(model_dir: &Path) -> Result<Self> {
        let mut manifest = Self::default();

        let manifest_path = model_dir.join(MANIFEST_FILE);
        if manifest_path.is_file() {
            let overrides: ManifestOverrides = read_json(&manifest_path)?;
            manifest.apply(overrides);
            debug!(path = %manifest_path.display(), "manifest overrides applied");
            if manifest.image_size == 0 {
                return Err(OcrError::model_init(format!(
                    "imageSize must be positive in {}",
                    manifest_path.display()
                )));
            }
        }

        let generation_path = model_dir.join(&manifest.generation_config_file);
        if generation_path.is_file() {
            let generation: GenerationConfig = read_json(&generation_path)?;
            manifest.apply_generation(generation);
            debug!(path = %generation_path.display(), "generation config applied");
        }

        info!(
            image_size = manifest.image_size,
            bos = manifest.bos_token_id,
            eos = manifest.eos_token_id,
            pad = manifest.pad_token_id,
            decoder_start = manifest.decoder_start_token_id,
            "model manifest loaded"
        );
        Ok(manifest)
    }

    fn apply(&mut self, o: ManifestOverrides) {
        if let Some(v) = o.encoder_file { self.encoder_file = v; }
        if let Some(v) = o.decoder_file { self.decoder_file = v; }
        if let Some(v) = o.tokenizer_file { self.tokenizer_file = v; }
        if let Some(v) = o.generation_config_file { self.generation_config_file = v; }
        if let Some(v) = o.image_size { self.image_size = v; }
        if let Some(v) = o.pixel_mean.as_deref().and_then(triple) { self.pixel_mean = v; }
        if let Some(v) = o.pixel_std.as_deref().and_then(triple) { self.pixel_std = v; }
        if let Some(v) = o.bos_token_id { self.bos_token_id = v; }
        if let Some(v) = o.eos_token_id { self.eos_token_id = v; }
        if let Some(v) = o.pad_token_id { self.pad_token_id = v; }
        if let Some(v) = o.decoder_start_token_id { self.decoder_start_token_id = v; }
    }

    fn apply_generation(&mut self, g: GenerationConfig) {
        if let Some(v) = g.bos_token_id.as_ref().and_then(TokenIdField::first) { self.bos_token_id = v; }
        if let Some(v) = g.eos_token_id.as_ref().and_then(TokenIdField::first) { self.eos_token_id = v; }
        if let Some(v) = g.pad_token_id.as_ref().and_then(TokenIdField::first) { self.pad_token_id = v; }
        if let Some(v) = g.decoder_start_token_id.as_ref().and_then(TokenIdField::first) {
            self.decoder_start_token_id = v;
        }
    }

    pub fn special_token_ids(&self) -> [i64; 4] {
        [
            self.bos_token_id,
            self.eos_token_id,
            self.pad_token_id,
            self.decoder_start_token_id,
        ]
    }

    /// Decoder file names in lookup order, repeats removed.
    pub fn decoder_candidates(&self) -> Vec<&str> {
        let mut names: Vec<&str> = vec![self.decoder_file.as_str()];
        for name in DEFAULT_DECODER_FILES {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

fn triple(values: &[f32]) -> Option<[f32; 3]> {
    match values {
        [a, b, c] => Some([*a, *b, *c]),
        _ => None,
    }
}

/// On-disk artifacts of one model bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    pub fn resolve(model_dir: &Path, manifest: &ModelManifest) -> Result<Self> {
        let encoder = model_dir.join(&manifest.encoder_file);
        if !encoder.is_file() {
            return Err(OcrError::model_not_found(format!(
                "encoder model not found: {}",
                encoder.display()
            )));
        }

        let tokenizer = model_dir.join(&manifest.tokenizer_file);
        if !tokenizer.is_file() {
            return Err(OcrError::model_not_found(format!(
                "tokenizer not found: {}",
                tokenizer.display()
            )));
        }

        let decoder = first_existing_file(model_dir, &manifest.decoder_candidates()).map_err(|tried| {
            OcrError::model_not_found(format!(
                "decoder model not found in {}; tried {}",
                model_dir.display(),
                tried.join(", ")
            ))
        })?;

        Ok(Self { encoder, decoder, tokenizer })
    }
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        OcrError::with_cause(
            OcrErrorKind::ModelInitFailed,
            format!("reading {}", path.display()),
            e,
        )
    })?;
    serde_json::from_str(&content).map_err(|e| {
        OcrError::with_cause(
            OcrErrorKind::ModelInitFailed,
            format!("parsing {}", path.display()),
            e,
        )
    })
}
