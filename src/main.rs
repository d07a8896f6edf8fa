//! IPG API - investment cycle accrual & ledger service
//!
//! Serves the authoritative projection endpoint, the balance/transaction
//! ledger, and the cached market-data feed. Real fund movement happens
//! out of band; this service records it and checks that the books agree.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, time::interval};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ipg_backend::{
    api::{create_router, AppState},
    engine::{CycleSchedule, ProjectorConfig},
    ledger::LedgerStore,
    market::MarketDataCache,
    models::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let ledger = LedgerStore::new(&config.database_path)?;
    info!("📒 Ledger initialized at: {}", config.database_path);

    let schedule = match &config.schedule_path {
        Some(path) => {
            let schedule = CycleSchedule::from_json_file(path)
                .with_context(|| format!("load cycle schedule from {path}"))?;
            info!(
                program_year = schedule.program_year(),
                cycles = schedule.len(),
                "📅 Cycle schedule loaded from {path}"
            );
            schedule
        }
        None => CycleSchedule::program_2026(),
    };

    let state = AppState {
        ledger: ledger.clone(),
        schedule: Arc::new(schedule),
        projector: ProjectorConfig::default(),
        market: Arc::new(MarketDataCache::new(Duration::from_secs(
            config.market_cache_ttl_secs,
        ))),
        http: reqwest::Client::new(),
    };

    // Periodic balance/transaction integrity check. Drift is logged for
    // manual review, never corrected here.
    let reconcile_interval = config.reconcile_interval_secs;
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(reconcile_interval));
        loop {
            ticker.tick().await;
            match ledger.reconcile_all().await {
                Ok(0) => info!("✅ Ledger reconciliation clean"),
                Ok(drifted) => warn!(drifted, "⚠️ Ledger reconciliation found drifting accounts"),
                Err(e) => warn!("Ledger reconciliation failed: {e}"),
            }
        }
    });

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 IPG API listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ipg_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
