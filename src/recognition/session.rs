// Model execution seam: owned tensors in, owned tensors out
use ort::{
    session::builder::GraphOptimizationLevel,
    session::{Session, SessionInputValue, SessionInputs},
    tensor::TensorElementType,
    value::{Tensor, ValueType},
};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::types::{OcrError, OcrErrorKind, Result};

pub const ORT_ENGINE_TAG: &str = "onnxruntime-cpu";

/// A tensor that owns its buffer, so it outlives the run that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32 { shape: Vec<i64>, data: Vec<f32> },
    I64 { shape: Vec<i64>, data: Vec<i64> },
    Bool { shape: Vec<i64>, data: Vec<bool> },
}

impl TensorData {
    pub fn i64_row(values: Vec<i64>) -> Self {
        TensorData::I64 {
            shape: vec![1, values.len() as i64],
            data: values,
        }
    }

    pub fn shape(&self) -> &[i64] {
        match self {
            TensorData::F32 { shape, .. } | TensorData::I64 { shape, .. } | TensorData::Bool { shape, .. } => shape,
        }
    }

    pub fn element(&self) -> ElementKind {
        match self {
            TensorData::F32 { .. } => ElementKind::Float32,
            TensorData::I64 { .. } => ElementKind::Int64,
            TensorData::Bool { .. } => ElementKind::Bool,
        }
    }

    pub fn as_f32(&self) -> Option<(&[i64], &[f32])> {
        match self {
            TensorData::F32 { shape, data } => Some((shape, data)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<(&[i64], &[i64])> {
        match self {
            TensorData::I64 { shape, data } => Some((shape, data)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Float32,
    Int64,
    Bool,
    Other,
}

/// A declared model input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub element: ElementKind,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, element: ElementKind) -> Self {
        Self { name: name.into(), element }
    }
}

pub type NamedTensors = Vec<(String, TensorData)>;

pub trait ModelSession: Send + Sync {
    fn inputs(&self) -> &[TensorSpec];
    fn outputs(&self) -> &[TensorSpec];
    /// Runs one forward pass; returned tensors are fully copied out of the runtime.
    fn run(&self, inputs: NamedTensors) -> Result<NamedTensors>;
}

pub trait SessionFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ModelSession>>;
    /// Backend identifier reported in every result.
    fn engine_tag(&self) -> &'static str;
}

pub struct OrtSessionFactory {
    intra_threads: usize,
    optimization_level: u8,
}

impl OrtSessionFactory {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            intra_threads: config.intra_threads.max(1),
            optimization_level: config.optimization_level,
        }
    }

    fn level(&self) -> GraphOptimizationLevel {
        match self.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        }
    }
}

impl SessionFactory for OrtSessionFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn ModelSession>> {
        info!(path = %path.display(), "loading ONNX model");
        let build = || -> ort::Result<Session> {
            Ok(Session::builder()?
                .with_optimization_level(self.level())?
                .with_intra_threads(self.intra_threads)?
                .commit_from_file(path)?)
        };
        let session = build().map_err(|e| {
            OcrError::with_cause(
                OcrErrorKind::ModelInitFailed,
                format!("failed to load {}", path.display()),
                e,
            )
        })?;

        let inputs: Vec<TensorSpec> = session
            .inputs
            .iter()
            .map(|i| TensorSpec::new(i.name.clone(), element_kind(&i.input_type)))
            .collect();
        let outputs: Vec<TensorSpec> = session
            .outputs
            .iter()
            .map(|o| TensorSpec::new(o.name.clone(), element_kind(&o.output_type)))
            .collect();
        debug!(?inputs, ?outputs, "model loaded");

        Ok(Box::new(OrtSession {
            session: Mutex::new(session),
            inputs,
            outputs,
        }))
    }

    fn engine_tag(&self) -> &'static str {
        ORT_ENGINE_TAG
    }
}

fn element_kind(value_type: &ValueType) -> ElementKind {
    match value_type {
        ValueType::Tensor { ty: TensorElementType::Float32, .. } => ElementKind::Float32,
        ValueType::Tensor { ty: TensorElementType::Int64, .. } => ElementKind::Int64,
        ValueType::Tensor { ty: TensorElementType::Bool, .. } => ElementKind::Bool,
        _ => ElementKind::Other,
    }
}

/// `Session::run` needs exclusive access, so calls on one session are serialized.
pub struct OrtSession {
    session: Mutex<Session>,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

fn inference_error(context: &str, e: ort::Error) -> OcrError {
    OcrError::with_cause(OcrErrorKind::InferenceFailed, context, e)
}

impl ModelSession for OrtSession {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn run(&self, inputs: NamedTensors) -> Result<NamedTensors> {
        let mut values: Vec<(Cow<'static, str>, SessionInputValue<'static>)> = Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let value: SessionInputValue<'static> = match tensor {
                TensorData::F32 { shape, data } => Tensor::from_array((shape, data.into_boxed_slice()))
                    .map_err(|e| inference_error(&format!("building input '{}'", name), e))?
                    .into(),
                TensorData::I64 { shape, data } => Tensor::from_array((shape, data.into_boxed_slice()))
                    .map_err(|e| inference_error(&format!("building input '{}'", name), e))?
                    .into(),
                TensorData::Bool { shape, data } => Tensor::from_array((shape, data.into_boxed_slice()))
                    .map_err(|e| inference_error(&format!("building input '{}'", name), e))?
                    .into(),
            };
            values.push((Cow::Owned(name), value));
        }

        let ort_inputs: SessionInputs<'_, '_, 0> = SessionInputs::ValueMap(values);
        let mut session = self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let outputs = session
            .run(ort_inputs)
            .map_err(|e| inference_error("ONNX Runtime run failed", e))?;

        let mut results = Vec::with_capacity(self.outputs.len());
        for spec in &self.outputs {
            let Some(value) = outputs.get(spec.name.as_str()) else {
                continue;
            };
            let tensor = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                TensorData::F32 {
                    shape: shape.iter().copied().collect(),
                    data: data.to_vec(),
                }
            } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
                TensorData::I64 {
                    shape: shape.iter().copied().collect(),
                    data: data.to_vec(),
                }
            } else if let Ok((shape, data)) = value.try_extract_tensor::<bool>() {
                TensorData::Bool {
                    shape: shape.iter().copied().collect(),
                    data: data.to_vec(),
                }
            } else {
                debug!(output = %spec.name, "skipping output with unsupported element type");
                continue;
            };
            results.push((spec.name.clone(), tensor));
        }
        Ok(results)
    }
}
