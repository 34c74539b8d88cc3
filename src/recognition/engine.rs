// Formula recognition engine: lazy model loading, recognize, shutdown
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::recognition::decoding::{generate, DecoderPlan, EncoderPlan, GenerationParams};
use crate::recognition::locator::locate_model_dir;
use crate::recognition::manifest::{ModelFiles, ModelManifest};
use crate::recognition::preprocess::preprocess;
use crate::recognition::session::{ModelSession, OrtSessionFactory, SessionFactory};
use crate::recognition::tokenizer::Vocabulary;
use crate::types::{OcrError, OcrErrorKind, OcrOptions, OcrResult, Result};

/// Everything loaded from one model directory. Read-only once built.
struct LoadedModel {
    manifest: ModelManifest,
    vocab: Vocabulary,
    encoder: Box<dyn ModelSession>,
    decoder: Box<dyn ModelSession>,
    encoder_plan: EncoderPlan,
    decoder_plan: DecoderPlan,
}

/// Where a model bundle lives and how it is configured.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_dir: PathBuf,
    pub encoder: PathBuf,
    pub decoder: PathBuf,
    pub tokenizer: PathBuf,
    pub manifest: ModelManifest,
}

pub struct OcrEngine {
    config: EngineConfig,
    factory: Box<dyn SessionFactory>,
    // None until the first successful load, and again after shutdown
    state: Mutex<Option<Arc<LoadedModel>>>,
}

impl OcrEngine {
    /// Engine backed by ONNX Runtime on the CPU.
    pub fn new(config: EngineConfig) -> Self {
        let factory = OrtSessionFactory::new(&config);
        Self::with_factory(config, Box::new(factory))
    }

    pub fn with_factory(config: EngineConfig, factory: Box<dyn SessionFactory>) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(None),
        }
    }

    pub fn engine_tag(&self) -> &'static str {
        self.factory.engine_tag()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_state().is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<Arc<LoadedModel>>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves the model directory, manifest and files without opening sessions.
    pub fn inspect(&self) -> Result<ModelInfo> {
        let model_dir = locate_model_dir(&self.config)?;
        let manifest = ModelManifest::load(&model_dir)?;
        let files = ModelFiles::resolve(&model_dir, &manifest)?;
        Ok(ModelInfo {
            model_dir,
            encoder: files.encoder,
            decoder: files.decoder,
            tokenizer: files.tokenizer,
            manifest,
        })
    }

    /// Loads the model on first use. Concurrent callers wait on the same
    /// load; a failed load leaves the engine empty so the next call retries.
    fn loaded(&self) -> Result<Arc<LoadedModel>> {
        let mut state = self.lock_state();
        if let Some(ref model) = *state {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(self.load()?);
        *state = Some(Arc::clone(&model));
        Ok(model)
    }

    fn load(&self) -> Result<LoadedModel> {
        let started = Instant::now();
        let info = self.inspect()?;
        info!(dir = %info.model_dir.display(), "initializing formula recognizer");

        let vocab = Vocabulary::load(&info.tokenizer, &info.manifest)?;
        let encoder = self.factory.open(&info.encoder)?;
        let decoder = self.factory.open(&info.decoder)?;
        let encoder_plan = EncoderPlan::resolve(encoder.as_ref())?;
        let decoder_plan = DecoderPlan::resolve(decoder.as_ref())?;
        debug!(?encoder_plan, ?decoder_plan, "model bindings resolved");

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "formula recognizer ready");
        Ok(LoadedModel {
            manifest: info.manifest,
            vocab,
            encoder,
            decoder,
            encoder_plan,
            decoder_plan,
        })
    }

    /// Recognizes one formula image given as base64 or a base64 data URL.
    ///
    /// Blocking and CPU bound. The timeout in `options` is not enforced here;
    /// use [`recognize_with_timeout`] for that.
    pub fn recognize(&self, image: &str, options: &OcrOptions) -> Result<OcrResult> {
        let started = Instant::now();
        let model = self.loaded()?;

        let pixels = preprocess(image, &model.manifest)?;
        let hidden = model.encoder_plan.run(model.encoder.as_ref(), pixels)?;

        let params = GenerationParams {
            decoder_start_token_id: model.manifest.decoder_start_token_id,
            eos_token_id: model.manifest.eos_token_id,
            max_tokens: options.max_tokens(),
            log_every_steps: self.config.log_every_steps,
        };
        let ids = generate(model.decoder.as_ref(), &model.decoder_plan, &hidden, params)?;
        let latex = model.vocab.decode(&ids);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(tokens = ids.len() - 1, chars = latex.len(), elapsed_ms, "formula recognized");
        Ok(OcrResult {
            latex,
            elapsed_ms,
            engine: self.engine_tag().to_string(),
        })
    }

    /// Drops both sessions. Calls already running keep their copy until they
    /// finish; the next call loads everything again.
    pub fn shutdown(&self) {
        if self.lock_state().take().is_some() {
            info!("formula recognizer shut down");
        }
    }
}

/// Runs [`OcrEngine::recognize`] on the blocking pool and gives up after the
/// clamped `timeoutMs`.
///
/// On timeout the computation is abandoned, not cancelled: the decoder keeps
/// running on its blocking thread until it finishes on its own.
pub async fn recognize_with_timeout(
    engine: Arc<OcrEngine>,
    image: String,
    options: OcrOptions,
) -> Result<OcrResult> {
    let budget = options.timeout();
    let task = tokio::task::spawn_blocking(move || engine.recognize(&image, &options));
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(OcrError::with_cause(
            OcrErrorKind::InferenceFailed,
            "recognition task failed",
            join_error,
        )),
        Err(_) => {
            warn!(timeout_ms = budget.as_millis() as u64, "recognition timed out; abandoning task");
            Err(OcrError::timeout(budget))
        }
    }
}
