// Shared fixtures: a scripted session factory and throwaway model directories
#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mfr_ocr::recognition::{ElementKind, ModelSession, NamedTensors, SessionFactory, TensorData, TensorSpec};
use mfr_ocr::{EngineConfig, OcrEngine};

pub const FAKE_ENGINE_TAG: &str = "fake-cpu";

/// How the fake decoder behaves.
#[derive(Clone)]
pub struct DecoderScript {
    pub input_names: Vec<String>,
    /// Token emitted at each step; the last one repeats.
    pub tokens: Vec<i64>,
    pub vocab_size: i64,
    pub step_delay: Option<Duration>,
}

impl DecoderScript {
    pub fn emitting(tokens: &[i64]) -> Self {
        Self {
            input_names: ["input_ids", "encoder_hidden_states", "use_cache_branch"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tokens: tokens.to_vec(),
            vocab_size: 8,
            step_delay: None,
        }
    }

    pub fn with_inputs(mut self, names: &[&str]) -> Self {
        self.input_names = names.iter().map(|s| s.to_string()).collect();
        self
    }
}

pub struct FakeFactory {
    pub script: DecoderScript,
    pub opened: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(script: DecoderScript) -> (Self, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script,
                opened: Arc::clone(&opened),
            },
            opened,
        )
    }
}

impl SessionFactory for FakeFactory {
    fn open(&self, path: &Path) -> mfr_ocr::types::Result<Box<dyn ModelSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.contains("encoder") {
            Ok(Box::new(FakeEncoder::new()))
        } else {
            Ok(Box::new(FakeDecoder::new(self.script.clone())))
        }
    }

    fn engine_tag(&self) -> &'static str {
        FAKE_ENGINE_TAG
    }
}

pub struct FakeEncoder {
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

impl FakeEncoder {
    fn new() -> Self {
        Self {
            inputs: vec![TensorSpec::new("pixel_values", ElementKind::Float32)],
            outputs: vec![TensorSpec::new("last_hidden_state", ElementKind::Float32)],
        }
    }
}

impl ModelSession for FakeEncoder {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn run(&self, inputs: NamedTensors) -> mfr_ocr::types::Result<NamedTensors> {
        let (_, pixels) = inputs
            .into_iter()
            .find(|(name, _)| name == "pixel_values")
            .expect("pixel_values fed");
        let (_, data) = pixels.as_f32().expect("float pixels");
        let mean = data.iter().sum::<f32>() / data.len() as f32;
        Ok(vec![(
            "last_hidden_state".to_string(),
            TensorData::F32 {
                shape: vec![1, 4, 2],
                data: vec![mean; 8],
            },
        )])
    }
}

pub struct FakeDecoder {
    script: DecoderScript,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

impl FakeDecoder {
    fn new(script: DecoderScript) -> Self {
        let inputs = script
            .input_names
            .iter()
            .map(|n| TensorSpec::new(n.clone(), ElementKind::Int64))
            .collect();
        Self {
            script,
            inputs,
            outputs: vec![
                TensorSpec::new("present.0.decoder.key", ElementKind::Float32),
                TensorSpec::new("logits", ElementKind::Float32),
            ],
        }
    }
}

impl ModelSession for FakeDecoder {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn run(&self, inputs: NamedTensors) -> mfr_ocr::types::Result<NamedTensors> {
        if let Some(delay) = self.script.step_delay {
            std::thread::sleep(delay);
        }
        let seq = inputs
            .iter()
            .find_map(|(name, tensor)| (name == "input_ids").then(|| tensor.shape()[1]))
            .unwrap_or(1);
        let step = (seq - 1) as usize;
        let token = self.script.tokens[step.min(self.script.tokens.len() - 1)];

        let vocab = self.script.vocab_size;
        let mut data = vec![0.0f32; (seq * vocab.max(0)) as usize];
        if vocab > 0 {
            data[((seq - 1) * vocab + token) as usize] = 5.0;
        }
        Ok(vec![(
            "logits".to_string(),
            TensorData::F32 {
                shape: vec![1, seq, vocab],
                data,
            },
        )])
    }
}

/// A model directory holding placeholder model files and a tokenizer.
pub struct ModelDir {
    pub root: tempfile::TempDir,
}

impl ModelDir {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        fs::write(root.path().join("encoder_model.onnx"), b"").unwrap();
        fs::write(root.path().join("decoder_model.onnx"), b"").unwrap();
        let dir = Self { root };
        dir.write(
            "tokenizer.json",
            r#"{
                "model": { "vocab": { "<s>": 0, "<pad>": 1, "</s>": 2, "x": 3, "^": 4, "2": 5, "Ġ+": 6, "y": 7 } },
                "added_tokens": [
                    { "id": 0, "content": "<s>", "special": true },
                    { "id": 1, "content": "<pad>", "special": true },
                    { "id": 2, "content": "</s>", "special": true }
                ],
                "decoder": { "type": "ByteLevel" }
            }"#,
        );
        dir
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn write(&self, name: &str, content: &str) {
        fs::write(self.root.path().join(name), content).unwrap();
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.root.path().join(name)).unwrap();
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            model_dir: Some(self.path().to_path_buf()),
            base_dir: Some(self.path().join("no-base")),
            dev_fallback_dir: Some(PathBuf::from("/nonexistent/mfr-ocr-dev")),
            ..EngineConfig::default()
        }
    }

    pub fn engine(&self, script: DecoderScript) -> (OcrEngine, Arc<AtomicUsize>) {
        let (factory, opened) = FakeFactory::new(script);
        (OcrEngine::with_factory(self.config(), Box::new(factory)), opened)
    }
}

pub fn formula_png_base64() -> String {
    let img = ImageBuffer::from_fn(64, 24, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Rgba([0u8, 0, 0, 255])
        } else {
            Rgba([255u8, 255, 255, 255])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    BASE64.encode(buf.into_inner())
}
