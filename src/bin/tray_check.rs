//! tray_check - Inspect a single tray photograph from the command line.
//!
//! Runs the same pipeline as the prediction API, writes the annotated image
//! next to the input (or to `--output`) and prints the verdict.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tray_inspector::{
    config::{parse_class_ids, TrayConfig},
    detect::registry_from_config,
    TrayAnalyzer,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "tray_check", about = "Count eggs and empty slots in a tray photograph")]
struct Args {
    /// Tray image (JPEG or PNG)
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// Where to write the annotated image (default: <IMAGE stem>_annotated.<ext>)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Config file (TOML or JSON)
    #[arg(long, env = "TRAY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the minimum detection confidence
    #[arg(long, value_name = "0..1")]
    confidence: Option<f32>,

    /// Comma separated class ids to keep; empty keeps all
    #[arg(long, value_name = "IDS")]
    classes: Option<String>,

    /// Detector backend (stub|tract)
    #[arg(long)]
    backend: Option<String>,

    /// Detection fixture for the stub backend
    #[arg(long, value_name = "PATH")]
    fixture: Option<PathBuf>,

    /// ONNX model for the tract backend
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Print the full JSON report (with base64 image) instead of a summary
    #[arg(long)]
    json: bool,

    /// UI mode for stderr progress (auto|plain|pretty|quiet)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal(), args.json);

    let config = {
        let _stage = ui.stage("Load configuration");
        load_config(&args)?
    };

    let analyzer = {
        let mut stage = ui.stage("Load detector");
        let registry = registry_from_config(&config)?;
        let backend = registry
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        stage.note(registry.default_name().unwrap_or("none").to_string());
        TrayAnalyzer::from_config(backend, &config)
    };

    let bytes = {
        let _stage = ui.stage("Read image");
        std::fs::read(&args.image)
            .with_context(|| format!("failed to read {}", args.image.display()))?
    };

    let result = {
        let mut stage = ui.stage("Inspect tray");
        let result = analyzer.analyze(&bytes)?;
        stage.note(result.tray_status.as_str());
        result
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| annotated_path(&args.image, result.format.extension()));
    {
        let _stage = ui.stage("Write annotated image");
        std::fs::write(&output, &result.annotated_image)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_report())?);
    } else {
        println!("tray_check: {}", args.image.display());
        println!("  eggs:        {}", result.num_eggs);
        println!("  empty slots: {}", result.num_empty_slots);
        println!("  status:      {}", result.tray_status.as_str());
        println!("  annotated:   {}", output.display());
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<TrayConfig> {
    let mut config = TrayConfig::load_from(args.config.as_deref())?;
    if let Some(confidence) = args.confidence {
        config.detection.confidence_threshold = confidence;
    }
    if let Some(classes) = &args.classes {
        config.detection.classes_to_track = parse_class_ids(classes)?;
    }
    if let Some(backend) = &args.backend {
        config.model.backend = backend.clone();
    }
    if let Some(fixture) = &args.fixture {
        config.model.fixture_path = Some(fixture.clone());
    }
    if let Some(model) = &args.model {
        config.model.path = Some(model.clone());
    }
    config.validate()?;
    Ok(config)
}

fn annotated_path(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tray");
    input.with_file_name(format!("{stem}_annotated.{extension}"))
}
