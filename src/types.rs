// Core types for mfr-ocr: options, results and the error taxonomy
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MAX_TOKENS: usize = 256;
pub const MIN_MAX_TOKENS: usize = 16;
pub const MAX_MAX_TOKENS: usize = 1024;

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Per-call options as handed over by the host application.
///
/// Values are clamped, never rejected: see [`OcrOptions::max_tokens`] and
/// [`OcrOptions::timeout`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

impl OcrOptions {
    pub fn new(max_tokens: i64, timeout_ms: i64) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            timeout_ms: Some(timeout_ms),
        }
    }

    /// Decode step limit, clamped into [16, 1024].
    pub fn max_tokens(&self) -> usize {
        match self.max_tokens {
            None => DEFAULT_MAX_TOKENS,
            Some(n) => n.clamp(MIN_MAX_TOKENS as i64, MAX_MAX_TOKENS as i64) as usize,
        }
    }

    /// Caller-side wait budget, clamped into [1s, 60s].
    pub fn timeout(&self) -> Duration {
        let ms = match self.timeout_ms {
            None => DEFAULT_TIMEOUT_MS,
            Some(ms) => ms.clamp(MIN_TIMEOUT_MS as i64, MAX_TIMEOUT_MS as i64) as u64,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub latex: String,
    pub elapsed_ms: u64,
    pub engine: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcrErrorKind {
    ModelNotFound,
    ModelInitFailed,
    InferenceFailed,
    Timeout,
    BadImage,
}

impl OcrErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            OcrErrorKind::ModelNotFound => "ModelNotFound",
            OcrErrorKind::ModelInitFailed => "ModelInitFailed",
            OcrErrorKind::InferenceFailed => "InferenceFailed",
            OcrErrorKind::Timeout => "Timeout",
            OcrErrorKind::BadImage => "BadImage",
        }
    }
}

impl fmt::Display for OcrErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Error types
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OcrError {
    kind: OcrErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl OcrError {
    pub fn new(kind: OcrErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a lower-level fault, appending its message and keeping it as the source.
    pub fn with_cause<E>(kind: OcrErrorKind, context: impl fmt::Display, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: format!("{}: {}", context, cause),
            source: Some(Box::new(cause)),
        }
    }

    pub fn model_not_found(message: impl Into<String>) -> Self {
        Self::new(OcrErrorKind::ModelNotFound, message)
    }

    pub fn model_init(message: impl Into<String>) -> Self {
        Self::new(OcrErrorKind::ModelInitFailed, message)
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::new(OcrErrorKind::InferenceFailed, message)
    }

    pub fn bad_image(message: impl Into<String>) -> Self {
        Self::new(OcrErrorKind::BadImage, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            OcrErrorKind::Timeout,
            format!("recognition did not finish within {} ms", after.as_millis()),
        )
    }

    pub fn kind(&self) -> OcrErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.message.clone(),
        }
    }
}

/// The `{code, message}` shape callers receive on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl Serialize for OcrError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_payload().serialize(serializer)
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
