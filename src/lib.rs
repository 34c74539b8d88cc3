//! Offline math formula recognition.
//!
//! A formula image (base64 or data URL) goes through an image encoder and a
//! greedily decoded transformer decoder, both ONNX models, and comes back as
//! LaTeX. See [`OcrEngine::recognize`].

pub mod config;
pub mod recognition;
pub mod types;

pub use config::EngineConfig;
pub use recognition::{recognize_with_timeout, OcrEngine};
pub use types::{ErrorPayload, OcrError, OcrErrorKind, OcrOptions, OcrResult};

/// Installs a `RUST_LOG`-driven stderr subscriber. For binaries only.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
