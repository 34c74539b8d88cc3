// Drives the mfr-ocr binary through a pty
#![cfg(unix)]

use anyhow::Result;
use rexpect::session::spawn_command;
use std::fs;
use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_mfr-ocr");

fn command(args: &[&str], base_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(BIN);
    cmd.args(args)
        .env("MFR_OCR_BASE_DIR", base_dir)
        .env_remove("MFR_OCR_MODEL_DIR")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_commands() -> Result<()> {
    let mut help = Command::new(BIN);
    help.arg("--help");
    let mut session = spawn_command(help, Some(5000))?;
    session.exp_string("Math formula recognition")?;
    session.exp_string("recognize")?;
    session.exp_string("locate")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_locate_without_models_reports_model_not_found() -> Result<()> {
    let base = tempfile::tempdir()?;
    let missing = base.path().join("nowhere");
    let missing = missing.to_string_lossy();

    let mut session = spawn_command(command(&["--model-dir", &missing, "locate"], base.path()), Some(5000))?;
    session.exp_string("\"code\": \"ModelNotFound\"")?;
    session.exp_string("nowhere")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_locate_prints_resolved_bundle() -> Result<()> {
    let base = tempfile::tempdir()?;
    let model_dir = base.path().join("OcrModels").join("pix2text-mfr");
    fs::create_dir_all(&model_dir)?;
    fs::write(model_dir.join("encoder_model.onnx"), b"")?;
    fs::write(model_dir.join("decoder_model_merged.onnx"), b"")?;
    fs::write(model_dir.join("tokenizer.json"), r#"{ "model": { "vocab": { "a": 0 } } }"#)?;
    fs::write(model_dir.join("MODEL_MANIFEST.json"), r#"{ "imageSize": 256 }"#)?;

    let mut session = spawn_command(command(&["locate"], base.path()), Some(5000))?;
    // fields print in declaration order: modelDir, encoder, decoder, tokenizer, manifest
    session.exp_string("\"modelDir\"")?;
    session.exp_string("\"encoder\"")?;
    session.exp_string("\"decoder\"")?;
    session.exp_string("decoder_model_merged.onnx")?;
    session.exp_string("\"tokenizer\"")?;
    session.exp_string("\"manifest\"")?;
    session.exp_string("\"imageSize\": 256")?;
    session.exp_eof()?;
    Ok(())
}

#[test]
fn test_recognize_missing_file_fails() -> Result<()> {
    let base = tempfile::tempdir()?;
    let image = base.path().join("absent.png");
    let image = image.to_string_lossy();

    let mut session = spawn_command(command(&["recognize", &image], base.path()), Some(5000))?;
    session.exp_string("Failed to read")?;
    session.exp_eof()?;
    Ok(())
}
