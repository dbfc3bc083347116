//! Invoice Extractor - line-item extraction from invoice images via a multimodal model.
//!
//! Runs as an HTTP server by default. Passing an image path runs a single
//! extraction and prints the result instead.

mod config;
mod extractor;
mod gateway;
mod prompt;
mod provider;
mod repair;
mod schema;
mod upload;

use anyhow::Context;
use config::{ConfigStore, Settings};
use extractor::Extractor;
use gateway::AppState;
use provider::gemini::GeminiClient;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "invoice_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let configs = match &settings.config_dir {
        Some(dir) => ConfigStore::load_from_dir(dir)?,
        None => ConfigStore::builtin(),
    };
    info!("Loaded {} configs: {:?}", configs.list().len(), configs.list());

    let gemini = GeminiClient::new(&settings);
    info!("Gemini client initialized (model={})", settings.model);

    let extractor = Extractor::new(Arc::new(gemini), settings.temperature);

    if let Some(image_path) = std::env::args().nth(1) {
        return run_once(&extractor, &configs, Path::new(&image_path)).await;
    }

    std::fs::create_dir_all(&settings.upload_dir)
        .with_context(|| format!("Failed to create upload dir {:?}", settings.upload_dir))?;

    let state = AppState {
        extractor: Arc::new(extractor),
        configs: Arc::new(configs),
        upload_dir: settings.upload_dir.clone(),
    };
    let app = gateway::router(state, settings.max_upload_bytes);

    // Run server
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Extract a single local image and print the items as JSON.
async fn run_once(extractor: &Extractor, configs: &ConfigStore, image_path: &Path) -> anyhow::Result<()> {
    let config = configs
        .resolve(None)
        .context("built-in extraction config is missing")?;

    let items = extractor
        .extract(image_path, config)
        .await
        .with_context(|| format!("Extraction failed for {:?}", image_path))?;

    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
