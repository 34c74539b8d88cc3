// mfr-ocr - formula image to LaTeX from the command line
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mfr_ocr::{recognize_with_timeout, EngineConfig, OcrEngine, OcrOptions};

#[derive(Parser)]
#[command(name = "mfr-ocr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Math formula recognition: formula image in, LaTeX out", long_about = None)]
struct Cli {
    /// Settings file (TOML). Defaults to <config dir>/mfr-ocr/config.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model directory, checked before every other location
    #[arg(long = "model-dir", global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize one formula image and print the result as JSON
    Recognize {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,

        /// Treat the file as base64 text or a data URL instead of raw image bytes
        #[arg(long)]
        base64: bool,

        /// Decode step limit (clamped to 16..=1024)
        #[arg(long = "max-tokens")]
        max_tokens: Option<i64>,

        /// Wait budget in milliseconds (clamped to 1000..=60000)
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<i64>,
    },
    /// Print the resolved model directory and manifest as JSON
    Locate,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let file = cli
        .config
        .clone()
        .or_else(|| EngineConfig::default_config_path().filter(|p| p.is_file()));
    let mut config = match file {
        Some(path) => EngineConfig::load(&path)?.with_env_overrides(),
        None => EngineConfig::from_env(),
    };
    if let Some(ref dir) = cli.model_dir {
        config.model_dir = Some(dir.clone());
    }
    Ok(config)
}

fn read_image(path: &Path, is_base64: bool) -> Result<String> {
    if is_base64 {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

#[tokio::main]
async fn main() -> Result<()> {
    mfr_ocr::init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let engine = Arc::new(OcrEngine::new(config));
    tracing::debug!(config = ?engine.config(), "engine configured");

    let outcome = match cli.command {
        Commands::Recognize {
            ref image,
            base64,
            max_tokens,
            timeout_ms,
        } => {
            let payload = read_image(image, base64)?;
            let options = OcrOptions { max_tokens, timeout_ms };
            recognize_with_timeout(Arc::clone(&engine), payload, options)
                .await
                .map(|result| serde_json::to_string_pretty(&result))
        }
        // serialized straight from the struct so fields keep their declared order
        Commands::Locate => engine.inspect().map(|info| serde_json::to_string_pretty(&info)),
    };

    match outcome {
        Ok(json) => {
            println!("{}", json?);
            engine.shutdown();
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.to_payload())?);
            // exit now rather than wait on an abandoned decode
            std::process::exit(1);
        }
    }
}
