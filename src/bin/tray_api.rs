//! tray_api - HTTP service for egg tray inspection
//!
//! This daemon:
//! 1. Loads configuration and the detector once
//! 2. Serves `POST /predict` with the shared analyzer
//! 3. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use tray_inspector::{
    api::{ApiConfig, ApiServer},
    config::TrayConfig,
    detect::registry_from_config,
    TrayAnalyzer,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TrayConfig::load()?;
    let registry = registry_from_config(&config)?;
    let backend = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    let analyzer = TrayAnalyzer::from_config(backend, &config);

    let api_handle = ApiServer::new(ApiConfig::from_tray_config(&config), analyzer).spawn()?;
    log::info!("prediction api listening on {}", api_handle.addr);
    log::info!(
        "tray_api running: backend={} confidence_threshold={} output={}",
        registry.default_name().unwrap_or("none"),
        config.detection.confidence_threshold,
        config.output.format.extension()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("tray_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
