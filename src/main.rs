use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use referral_ledger::repositories::{LedgerStore, MemoryLedgerStore, PgLedgerStore, TimedStore};
use referral_ledger::{services, settings};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    /// Overrides `http.listen` from the config file.
    #[arg(short, long)]
    listen: Option<String>,
    /// Keep the ledger in memory instead of Postgres. Nothing survives a restart.
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut settings = settings::Settings::new(&args.config)
        .map_err(|e| anyhow::anyhow!("Could not load config file {}: {}", args.config, e))?;
    if let Some(listen) = args.listen {
        settings.http.listen = listen;
    }

    init_logging(&args.log4rs)?;
    log::info!("Starting referral ledger.");

    let store_timeout = Duration::from_millis(settings.ledger.store_timeout_ms);
    let store: Arc<dyn LedgerStore> = if args.memory {
        log::warn!("Using the in-memory store.");
        Arc::new(TimedStore::new(MemoryLedgerStore::new(), store_timeout))
    } else {
        let conn = PgPoolOptions::new()
            .max_connections(settings.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(settings.postgres.acquire_timeout_secs))
            .connect(&settings.postgres.url)
            .await
            .map_err(|e| anyhow::anyhow!("Could not connect to database: {}", e))?;

        sqlx::migrate!("./migrations").run(&conn).await?;
        log::info!("Database migrations applied.");

        Arc::new(TimedStore::new(PgLedgerStore::new(conn), store_timeout))
    };

    services::start_services(store, settings).await?;

    Ok(())
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
