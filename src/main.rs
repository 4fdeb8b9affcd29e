use anyhow::Result;
use mm_dashboard::{
    init_database, run_onboarding_checks, Cli, Config, ExchangeStore, HttpFeedFetcher,
    MetricsPersister, StrategyContext, StrategyFactory, StrategyTuning,
};
use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to file (not terminal, to avoid corrupting the REPL)
    let log_file = File::create("dashboard.log").unwrap_or_else(|_| {
        // Fallback: if we can't create file, just disable file logging
        File::open(if cfg!(windows) { "NUL" } else { "/dev/null" }).unwrap()
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(log_file))
                .with_ansi(false),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Run onboarding checks (validates endpoints and database)
    if let Err(e) = run_onboarding_checks() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    // Load and validate configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    // Initialize database
    let db = init_database(&config.database_path).await?;
    tracing::info!("✓ Database initialized at {}", config.database_path);

    // Wire the dashboard core: shared store, HTTP fetcher, metrics archive
    let store = ExchangeStore::new();
    let fetcher = Arc::new(HttpFeedFetcher::new(&config));
    let persister = MetricsPersister::new(db);

    let factory = StrategyFactory::new(StrategyContext {
        store: store.clone(),
        fetcher,
        persister: persister.clone(),
        tuning: StrategyTuning::from_config(&config),
    });
    tracing::info!("✓ Strategy factory ready (default: {})", config.method);

    // Start the REPL; strategies spawn once a wallet connects
    let mut cli = Cli::new(config, store, persister, factory)?;
    cli.run().await?;

    Ok(())
}
