use std::sync::Arc;

use clap::Parser;
use gatehouse_core::ResourceId;
use gatehouse_index::HttpSearchIndex;
use gatehouse_storage::PostgresStore;
use gatehouse_sync::cli::{Cli, Command};
use gatehouse_sync::config::{AppConfig, LogFormat};
use gatehouse_sync::telemetry;
use gatehouse_sync::AuthorizationIndexer;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type Indexer = AuthorizationIndexer<PostgresStore, HttpSearchIndex>;

#[cfg(feature = "telemetry")]
type Provider = opentelemetry_sdk::trace::TracerProvider;
#[cfg(not(feature = "telemetry"))]
type Provider = ();

fn init_logging(config: &AppConfig) -> Option<Provider> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    // OTel layer is typed to bare Registry, so it must be added first.
    // Layer order (bottom to top): Registry → OTel → EnvFilter → fmt
    let registry = tracing_subscriber::registry();

    let otel_provider = telemetry::init_telemetry(config);

    #[cfg(feature = "telemetry")]
    let otel_layer = otel_provider.as_ref().map(telemetry::make_otel_layer);

    #[cfg(feature = "telemetry")]
    let registry = registry.with(otel_layer);

    let registry = registry.with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }

    if otel_provider.is_some() {
        tracing::info!("OpenTelemetry tracing enabled");
    }
    otel_provider
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let otel_provider = init_logging(&config);

    let result = run(cli.command, &config).await;

    if let Some(provider) = otel_provider {
        telemetry::shutdown_telemetry(provider);
    }
    result
}

async fn run(command: Command, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Migrate => run_migrate(config).await,
        Command::ReindexAll => {
            let indexer = connect(config).await?;
            let count = indexer.reindex_all().await?;
            println!("Re-indexed {count} resources");
            report(&indexer);
            Ok(())
        }
        Command::CatchUp => {
            let indexer = connect(config).await?;
            let count = indexer.catch_up().await?;
            println!("Caught up {count} resources");
            report(&indexer);
            Ok(())
        }
        Command::DeleteResource {
            resource,
            with_descendants,
        } => {
            let indexer = connect(config).await?;
            let removed = indexer
                .delete_resource(&ResourceId::new(resource), with_descendants)
                .await?;
            println!("Removed {removed} documents");
            report(&indexer);
            Ok(())
        }
    }
}

async fn run_migrate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("running database migrations");
    let store =
        PostgresStore::connect(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    let index = HttpSearchIndex::new(&config.index.url, config.to_index_options())?;
    index.ensure_index().await?;
    tracing::info!(index = %index.index_name(), "migrations completed successfully");
    Ok(())
}

async fn connect(config: &AppConfig) -> Result<Indexer, Box<dyn std::error::Error>> {
    tracing::info!(
        index_url = %config.index.url,
        index_name = %config.index.name,
        "connecting"
    );

    let store =
        PostgresStore::connect(&config.database.url, config.database.max_connections).await?;
    let index = HttpSearchIndex::new(&config.index.url, config.to_index_options())?;
    index.ensure_index().await?;

    Ok(AuthorizationIndexer::new(Arc::new(store), Arc::new(index))
        .with_browse_permission(config.index.browse_permission.clone())
        .with_bulk_size(config.index.bulk_size))
}

fn report(indexer: &Indexer) {
    tracing::debug!(target: "metrics", "{}", indexer.metrics().render_prometheus());
}
