//! Connection pool bootstrap and schema migration for the accrual engine.
//!
//! Provides `init_db_pool` for creating a Postgres connection pool and
//! auto-applying SQL migrations from the `migrations/` directory.

use anyhow::{Context, Result};
use app_config::AppConfig;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Initializes the database connection pool and runs migrations.
///
/// # Errors
/// Returns an error if the pool cannot be created, the DSN is malformed, or
/// migrations fail to apply. This is meant to be treated as a fatal,
/// unrecoverable init failure by the caller.
pub async fn init_db_pool(cfg: &AppConfig) -> Result<Pool> {
    let pg_config: PgConfig = cfg
        .database_uri
        .parse()
        .context("Failed to parse DATABASE_URI")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(16)
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create database pool")?;

    let max_retries = 5;
    let mut retry_count = 0;
    let mut last_error = None;

    while retry_count < max_retries {
        match pool.get().await {
            Ok(client) => {
                info!(
                    "Successfully connected to database after {} retries",
                    retry_count
                );

                let migrations_paths = ["./migrations", "/app/migrations"];
                let mut migrations_found = false;

                for migrations_dir in migrations_paths {
                    if tokio::fs::metadata(migrations_dir).await.is_ok() {
                        info!("Using migrations directory: {}", migrations_dir);
                        run_migrations(&client, migrations_dir).await?;
                        migrations_found = true;
                        break;
                    }
                }

                if !migrations_found {
                    info!("No migrations directory found. Skipping migrations.");
                }
                return Ok(pool);
            }
            Err(e) => {
                retry_count += 1;
                last_error = Some(e);
                info!(
                    "Failed to connect to database (attempt {}/{}), retrying in 1 second...",
                    retry_count, max_retries
                );
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to get DB connection after {} retries: {:?}",
        max_retries,
        last_error.unwrap()
    ))
}

/// Applies all `.sql` migrations from `migrations_dir`, in filename order.
///
/// Migrations are expected to be idempotent (`CREATE TABLE IF NOT EXISTS`):
/// a no-op against a matching existing schema, but a drifted existing
/// table makes the `CREATE TABLE` statement fail outright rather than
/// silently proceeding.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<()> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .context("Failed to read migrations directory")?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        info!("Applying migration: {}", file_name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read migration file {file_name}"))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("Failed to execute migration {file_name}"))?;
    }
    Ok(())
}
