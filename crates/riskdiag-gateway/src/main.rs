//! RISKDIAG Gateway — lead form, bot webhook and the diagnostics web app on one port.

mod app;

use std::path::PathBuf;
use std::sync::Arc;

use riskdiag_core::{
    AppConfig, AssetLocation, BitrixCrm, ChatRegistry, ScenarioAssetCatalog, TelegramClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::{build_app, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[riskdiag] .env not loaded ({}); using process environment", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "gateway stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = AppConfig::load()?;
    let missing = cfg.missing_settings();
    if !missing.is_empty() {
        return Err(format!("missing required settings: {}", missing.join(", ")).into());
    }
    tracing::info!(version = riskdiag_core::version(), config = ?cfg, "starting gateway");

    let catalog = match cfg.asset_catalog_path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => ScenarioAssetCatalog::load(path, &cfg.asset_root)?,
        _ => ScenarioAssetCatalog::builtin(
            &cfg.asset_root,
            AssetLocation::File(PathBuf::from(&cfg.pdf_path)),
        ),
    };
    tracing::info!(scenarios = catalog.len(), "asset catalog ready");

    let telegram = Arc::new(TelegramClient::new(
        cfg.telegram_api_base.clone(),
        cfg.bot_token.clone(),
        cfg.telegram_timeout(),
    )?);
    let crm = Arc::new(BitrixCrm::new(cfg.bitrix_webhook_url.clone(), cfg.crm_timeout())?);

    // Updates are still served if registration fails; a previous registration may hold.
    if let Err(e) = telegram
        .set_webhook(
            &cfg.webhook_url(),
            cfg.webhook_secret.as_deref().filter(|s| !s.is_empty()),
        )
        .await
    {
        tracing::warn!(error = %e, url = %cfg.webhook_url(), "webhook registration failed");
    }

    let state = AppState::assemble(&cfg, crm, telegram, catalog, ChatRegistry::new());
    let app = build_app(state);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
