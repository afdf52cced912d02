//! Loyalty program accrual computation service.
//!
//! Entry point: parse CLI flags, load configuration, bring up the database
//! pool and schema, construct the Store, the worker-pool engine, and the
//! HTTP edge, run startup recovery, then serve until shutdown.
//!
//! # Architecture
//!
//! - `repository` — durable Store backed by Postgres
//! - `service` — validation, the durable worker pool, status lookups
//! - `server` — HTTP edge and Prometheus metrics
//! - `db` — connection pool bootstrap and schema migrations
//! - `app_config` — environment and CLI configuration

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use repository::PgStore;
use repository::Store;
use service::{Engine, Registrar, StatusService};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error during startup");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = app_config::Cli::parse();
    let cfg = app_config::AppConfig::load()?.apply_cli(&cli);

    info!(run_address = %cfg.run_address, "starting accrual service");

    let pool = db::init_db_pool(&cfg).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let worker_count = cfg.resolved_worker_pool_size();
    info!(worker_count, "starting worker pool");
    let engine = Engine::spawn(store.clone(), worker_count);

    info!("recovering pending orders from the queue");
    engine.recover().await;

    let status = Arc::new(StatusService::new(store.clone()));
    let registrar = Arc::new(Registrar::new(store));

    let server = server::Server::new(cfg.run_address.clone(), engine, status, registrar);
    server.start().await
}
