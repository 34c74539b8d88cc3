// Encoder pass and greedy autoregressive decoding
//
// Every decode step re-runs the decoder over the whole prefix; no key/value
// cache is carried between steps, so total cost grows with steps squared.
use tracing::{debug, warn};

use crate::recognition::session::{ElementKind, ModelSession, TensorData, TensorSpec};
use crate::types::{OcrError, Result};

pub const PIXEL_VALUES_INPUT: &str = "pixel_values";
pub const LOGITS_OUTPUT: &str = "logits";

/// Input and output names of the image encoder, fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderPlan {
    pub input: String,
    pub output: String,
}

impl EncoderPlan {
    pub fn resolve(session: &dyn ModelSession) -> Result<Self> {
        let inputs = session.inputs();
        let input = inputs
            .iter()
            .find(|spec| spec.name == PIXEL_VALUES_INPUT)
            .or_else(|| inputs.first())
            .ok_or_else(|| OcrError::model_init("encoder declares no inputs"))?;
        let output = prefer_float(session.outputs())
            .ok_or_else(|| OcrError::model_init("encoder declares no outputs"))?;
        Ok(Self {
            input: input.name.clone(),
            output: output.name.clone(),
        })
    }

    /// Runs the encoder and returns its hidden states.
    pub fn run(&self, session: &dyn ModelSession, pixels: TensorData) -> Result<TensorData> {
        let outputs = session.run(vec![(self.input.clone(), pixels)])?;
        let hidden = take_output(outputs, &self.output)
            .ok_or_else(|| OcrError::inference(format!("encoder output '{}' missing", self.output)))?;
        if hidden.as_f32().is_none() {
            return Err(OcrError::inference(format!(
                "encoder output '{}' is not a float tensor",
                self.output
            )));
        }
        debug!(shape = ?hidden.shape(), "encoder produced hidden states");
        Ok(hidden)
    }
}

fn prefer_float(specs: &[TensorSpec]) -> Option<&TensorSpec> {
    specs
        .iter()
        .find(|spec| spec.element == ElementKind::Float32)
        .or_else(|| specs.first())
}

fn take_output(outputs: Vec<(String, TensorData)>, name: &str) -> Option<TensorData> {
    outputs.into_iter().find(|(n, _)| n == name).map(|(_, t)| t)
}

/// The decoder inputs this engine knows how to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInput {
    InputIds,
    EncoderHiddenStates,
    AttentionMask,
    EncoderAttentionMask,
    PositionIds,
    UseCacheBranch,
}

impl DecoderInput {
    /// Case-insensitive lookup of a declared input name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "input_ids" | "decoder_input_ids" => Some(DecoderInput::InputIds),
            "encoder_hidden_states" => Some(DecoderInput::EncoderHiddenStates),
            "attention_mask" | "decoder_attention_mask" => Some(DecoderInput::AttentionMask),
            "encoder_attention_mask" => Some(DecoderInput::EncoderAttentionMask),
            "position_ids" => Some(DecoderInput::PositionIds),
            "use_cache_branch" => Some(DecoderInput::UseCacheBranch),
            _ => None,
        }
    }

    fn build(self, ids: &[i64], hidden: &TensorData) -> TensorData {
        match self {
            DecoderInput::InputIds => TensorData::i64_row(ids.to_vec()),
            DecoderInput::EncoderHiddenStates => hidden.clone(),
            DecoderInput::AttentionMask => TensorData::i64_row(vec![1; ids.len()]),
            DecoderInput::EncoderAttentionMask => TensorData::i64_row(vec![1; encoder_length(hidden)]),
            DecoderInput::PositionIds => TensorData::i64_row((0..ids.len() as i64).collect()),
            // disables the cache-reuse branch of merged decoders
            DecoderInput::UseCacheBranch => TensorData::Bool {
                shape: vec![1],
                data: vec![false],
            },
        }
    }
}

fn encoder_length(hidden: &TensorData) -> usize {
    match hidden.shape() {
        [_, len, ..] if *len > 0 => *len as usize,
        _ => 1,
    }
}

/// How to feed the decoder and where to read logits, fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderPlan {
    pub inputs: Vec<(String, DecoderInput)>,
    pub logits_output: String,
}

impl DecoderPlan {
    pub fn resolve(session: &dyn ModelSession) -> Result<Self> {
        if session.inputs().is_empty() {
            return Err(OcrError::model_init("decoder declares no inputs"));
        }
        let inputs = session
            .inputs()
            .iter()
            .map(|spec| {
                DecoderInput::from_name(&spec.name)
                    .map(|kind| (spec.name.clone(), kind))
                    .ok_or_else(|| {
                        OcrError::model_init(format!("unsupported decoder input '{}'", spec.name))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let outputs = session.outputs();
        let logits = outputs
            .iter()
            .find(|spec| spec.name == LOGITS_OUTPUT)
            .or_else(|| prefer_float(outputs))
            .ok_or_else(|| OcrError::model_init("decoder declares no outputs"))?;

        Ok(Self {
            inputs,
            logits_output: logits.name.clone(),
        })
    }

    fn feed(&self, ids: &[i64], hidden: &TensorData) -> Vec<(String, TensorData)> {
        self.inputs
            .iter()
            .map(|(name, kind)| (name.clone(), kind.build(ids, hidden)))
            .collect()
    }
}

/// Scores of the last sequence position: the trailing `[seq, vocab]` block
/// of a `[batch, seq, vocab]` (or any `[.., seq, vocab]`) tensor, first batch.
pub fn last_step_slice<'a>(data: &'a [f32], shape: &[i64]) -> Result<&'a [f32]> {
    let (seq, vocab) = match shape {
        [] => return Err(OcrError::inference("logits tensor has no dimensions")),
        [vocab] => (1, *vocab),
        [.., seq, vocab] => (*seq, *vocab),
    };
    if vocab <= 0 {
        return Err(OcrError::inference(format!(
            "logits vocabulary size must be positive, shape {:?}",
            shape
        )));
    }
    if seq <= 0 {
        return Err(OcrError::inference(format!(
            "logits sequence length must be positive, shape {:?}",
            shape
        )));
    }
    let start = (seq - 1)
        .checked_mul(vocab)
        .and_then(|s| usize::try_from(s).ok());
    let end = start.and_then(|s| s.checked_add(vocab as usize));
    match (start, end) {
        (Some(start), Some(end)) if end <= data.len() => Ok(&data[start..end]),
        _ => Err(OcrError::inference(format!(
            "logits shape {:?} does not fit {} values",
            shape,
            data.len()
        ))),
    }
}

/// Index of the largest score; the lowest index wins ties. NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((idx, score));
        }
    }
    Some(best.map_or(0, |(idx, _)| idx))
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub decoder_start_token_id: i64,
    pub eos_token_id: i64,
    pub max_tokens: usize,
    pub log_every_steps: usize,
}

/// Greedy decoding. The returned sequence starts with the decoder start id
/// and holds at most `max_tokens + 1` ids; it ends right after the first
/// generated EOS if one appears.
pub fn generate(
    session: &dyn ModelSession,
    plan: &DecoderPlan,
    hidden: &TensorData,
    params: GenerationParams,
) -> Result<Vec<i64>> {
    let mut ids = vec![params.decoder_start_token_id];

    for step in 0..params.max_tokens {
        let outputs = session.run(plan.feed(&ids, hidden))?;
        let logits = take_output(outputs, &plan.logits_output).ok_or_else(|| {
            OcrError::inference(format!("decoder output '{}' missing", plan.logits_output))
        })?;
        let (shape, data) = logits.as_f32().ok_or_else(|| {
            OcrError::inference(format!(
                "decoder output '{}' is not a float tensor",
                plan.logits_output
            ))
        })?;

        let scores = last_step_slice(data, shape)?;
        let next = argmax(scores)
            .ok_or_else(|| OcrError::inference("empty logits at last position"))? as i64;
        ids.push(next);

        if next == params.eos_token_id {
            debug!(step, "EOS token reached");
            return Ok(ids);
        }
        if params.log_every_steps > 0 && step > 0 && step % params.log_every_steps == 0 {
            debug!(generated = ids.len() - 1, "decoding");
        }
    }

    warn!(max_tokens = params.max_tokens, "step limit reached without EOS");
    Ok(ids)
}
