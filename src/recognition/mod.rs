// Formula recognition pipeline
pub mod byte_level;
pub mod decoding;
pub mod engine;
pub mod locator;
pub mod manifest;
pub mod preprocess;
pub mod session;
pub mod tokenizer;

pub use engine::{recognize_with_timeout, ModelInfo, OcrEngine};
pub use manifest::ModelManifest;
pub use session::{ElementKind, ModelSession, NamedTensors, SessionFactory, TensorData, TensorSpec};
pub use tokenizer::Vocabulary;
