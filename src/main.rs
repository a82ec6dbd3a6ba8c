use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use seatlock::config::{Backend, Config, ConfigError, ReportFormat};
use seatlock::driver;
use seatlock::store::{InMemoryStore, PostgresStore, ResourceStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seatlock=info")),
        )
        .init();

    let config = Config::from_env()?;
    seatlock::observability::init(config.metrics_port);

    let store: Arc<dyn ResourceStore> = match config.backend {
        Backend::Memory => Arc::new(InMemoryStore::new()),
        Backend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ConfigError::Missing("SEATLOCK_DATABASE_URL"))?;
            let store = PostgresStore::from_url(url)?;
            store.provision().await?;
            Arc::new(store)
        }
    };

    info!("seatlock starting");
    info!("  backend: {:?}", config.backend);
    info!("  flight: {} ({} seats)", config.flight_id, config.seats);
    info!("  passengers: {}", config.passengers);
    info!("  decision latency: {:?}", config.decision_latency);

    let reports = driver::run_all_trials(&config, store).await?;

    match config.report {
        ReportFormat::Text => {
            for report in &reports {
                println!("{}", report.summary());
            }
        }
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    info!("seatlock finished");
    Ok(())
}
