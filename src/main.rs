use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use music_weather::app::ports::HttpClientPort;
use music_weather::config::{Config, Credentials};
use music_weather::infra::http_client::ReqwestHttp;
use music_weather::infra::lastfm::LastFmTopTracks;
use music_weather::infra::openweather::OpenWeatherCurrent;
use music_weather::infra::soundcharts::SoundchartsCatalog;
use music_weather::logging;
use music_weather::metrics::init_metrics;
use music_weather::pipeline::etl::EtlPipeline;
use music_weather::pipeline::ingestion::batch::BatchIngestor;
use music_weather::pipeline::ingestion::ingest_log::IngestionLog;
use music_weather::pipeline::ingestion::raw_ingestor::RawDataIngestor;
use music_weather::pipeline::ingestion::snapshot_store::RawSnapshotStore;
use music_weather::pipeline::monitor::run_cycles;
use music_weather::pipeline::orchestrator::{BatchMode, EtlHealthReport, EtlOrchestrator};
use music_weather::pipeline::processing::enrich::TrackEnricher;
use music_weather::pipeline::Shutdown;
use music_weather::storage::{SqliteStorage, Storage};

#[derive(Parser)]
#[command(name = "music_weather")]
#[command(about = "Top tracks x weather ingestion and feature ETL")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch tracks and weather for every configured city and store raw snapshots
    Ingest {
        /// Only ingest the first N cities
        #[arg(long)]
        batch_size: Option<usize>,
        /// Cities to ingest (comma-separated), overriding the configuration
        #[arg(long)]
        cities: Option<String>,
    },
    /// Run the ETL over every valid raw snapshot
    Etl {
        /// Stop after the first successfully processed snapshot
        #[arg(long)]
        first_success: bool,
        /// Skip the catalog enrichment phase
        #[arg(long)]
        no_enrich: bool,
    },
    /// Enrich processed tracks from the catalog
    Enrich {
        /// Re-query tracks that are already enriched
        #[arg(long)]
        refresh: bool,
    },
    /// Ingest, then run the ETL
    Run {
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        cities: Option<String>,
        #[arg(long)]
        no_enrich: bool,
    },
    /// Ingest then run the ETL every `interval` seconds until interrupted
    Monitor {
        /// Seconds between the start of one cycle's wait and the next cycle
        #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        cities: Option<String>,
        #[arg(long)]
        no_enrich: bool,
    },
    /// Print ingestion and ETL health as JSON
    Health,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn override_cities(config: &mut Config, cities: Option<String>) -> anyhow::Result<()> {
    if let Some(cities) = cities {
        // same rules as the CITIES variable, COUNTRIES still comes from the environment
        config.apply_overrides(|key| match key {
            "CITIES" => Some(cities.clone()),
            _ => std::env::var(key).ok(),
        })?;
        info!("Override cities via CLI: {}", cities);
    }
    Ok(())
}

fn http_client(config: &Config) -> Arc<dyn HttpClientPort> {
    Arc::new(ReqwestHttp::new(config.http_timeout()))
}

fn build_batch_ingestor(
    config: &Config,
    creds: &Credentials,
    shutdown: &Shutdown,
) -> anyhow::Result<BatchIngestor> {
    let keys = creds.validate_primary()?;
    let http = http_client(config);
    let tracks = Arc::new(LastFmTopTracks::new(
        http.clone(),
        &config.endpoints.lastfm_url,
        keys.lastfm_api_key,
        config.ingestion.track_limit,
    ));
    let weather = Arc::new(OpenWeatherCurrent::new(
        http,
        &config.endpoints.openweather_url,
        keys.openweather_api_key,
    ));
    let snapshots = RawSnapshotStore::open(config.raw_dir())?;
    let log = Arc::new(IngestionLog::open_at_root(config.data_dir())?);
    let ingestor = RawDataIngestor::new(tracks, weather, snapshots, log)
        .with_policies(config.ingestion.track_retry, config.ingestion.weather_retry);
    Ok(
        BatchIngestor::new(ingestor, config.ingestion_delay(), config.reports_dir())
            .with_shutdown(shutdown.clone()),
    )
}

fn build_enricher(
    config: &Config,
    creds: &Credentials,
    storage: Arc<dyn Storage>,
    refresh: bool,
    shutdown: &Shutdown,
) -> anyhow::Result<TrackEnricher> {
    let keys = creds.validate_enrichment()?;
    let catalog = Arc::new(SoundchartsCatalog::new(
        http_client(config),
        &config.endpoints.soundcharts_url,
        keys.app_id,
        keys.api_key,
    ));
    Ok(TrackEnricher::new(catalog, storage)
        .with_policy(config.enrichment.retry)
        .with_pacing(config.catalog_pacing())
        .with_refresh(refresh)
        .with_shutdown(shutdown.clone()))
}

fn build_orchestrator(
    config: &Config,
    creds: &Credentials,
    enrich: bool,
    shutdown: &Shutdown,
) -> anyhow::Result<EtlOrchestrator> {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_at_root(config.data_dir())?);
    let mut pipeline = EtlPipeline::new(storage.clone());
    if enrich && config.enrichment.enabled {
        match build_enricher(config, creds, storage.clone(), false, shutdown) {
            Ok(enricher) => pipeline = pipeline.with_enricher(enricher),
            Err(e) => error!("Enrichment disabled: {}", e),
        }
    }
    Ok(EtlOrchestrator::new(pipeline, storage, config.raw_dir()).with_shutdown(shutdown.clone()))
}

async fn run_ingest(
    config: &Config,
    creds: &Credentials,
    shutdown: &Shutdown,
    batch_size: Option<usize>,
) -> anyhow::Result<()> {
    let batch = build_batch_ingestor(config, creds, shutdown)?;
    let run = batch
        .run_batch(&config.entities, batch_size.or(config.ingestion.batch_size))
        .await
        .context("ingestion batch aborted")?;
    print_json(&run.report)?;
    if let Some(path) = run.report_path {
        println!("Report written to {}", path.display());
    }
    Ok(())
}

async fn run_etl(
    config: &Config,
    creds: &Credentials,
    shutdown: &Shutdown,
    mode: BatchMode,
    enrich: bool,
) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, creds, enrich, shutdown)?;
    let report = orchestrator.run_batch(mode).await?;
    print_json(&report)
}

/// One collection cycle: ingest every entity, then process all snapshots.
async fn run_cycle(
    config: &Config,
    creds: &Credentials,
    shutdown: &Shutdown,
    batch_size: Option<usize>,
    enrich: bool,
) -> anyhow::Result<()> {
    run_ingest(config, creds, shutdown, batch_size).await?;
    if shutdown.is_requested() {
        warn!("Interrupted, skipping ETL");
        return Ok(());
    }
    run_etl(config, creds, shutdown, BatchMode::ProcessAll, enrich).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env_overrides()?;
    let _log_guard = logging::init_logging(&config.logging);
    if let Some(port) = config.metrics.port {
        init_metrics(port);
    }
    let creds = Credentials::from_env();

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the current unit of work");
                shutdown.trigger();
            }
        });
    }

    match cli.command {
        Commands::Ingest { batch_size, cities } => {
            override_cities(&mut config, cities)?;
            run_ingest(&config, &creds, &shutdown, batch_size).await?;
        }
        Commands::Etl {
            first_success,
            no_enrich,
        } => {
            let mode = if first_success {
                BatchMode::FirstSuccess
            } else {
                BatchMode::ProcessAll
            };
            run_etl(&config, &creds, &shutdown, mode, !no_enrich).await?;
        }
        Commands::Enrich { refresh } => {
            let storage: Arc<dyn Storage> =
                Arc::new(SqliteStorage::open_at_root(config.data_dir())?);
            let enricher = build_enricher(&config, &creds, storage, refresh, &shutdown)?;
            print_json(&enricher.enrich_all().await)?;
        }
        Commands::Run {
            batch_size,
            cities,
            no_enrich,
        } => {
            override_cities(&mut config, cities)?;
            run_cycle(&config, &creds, &shutdown, batch_size, !no_enrich).await?;
        }
        Commands::Monitor {
            interval,
            batch_size,
            cities,
            no_enrich,
        } => {
            override_cities(&mut config, cities)?;
            // fail fast on missing keys instead of once per cycle
            creds.validate_primary()?;
            let (config, creds, stop) = (&config, &creds, &shutdown);
            let cycles = run_cycles(Duration::from_secs(interval), stop, move |_| {
                run_cycle(config, creds, stop, batch_size, !no_enrich)
            })
            .await;
            info!(cycles, "Monitoring stopped");
        }
        Commands::Health => {
            let log = IngestionLog::open_at_root(config.data_dir())?;
            let ingestion = log.health()?;
            let recent = log.recent(10)?;
            let etl = match SqliteStorage::open_at_root(config.data_dir()) {
                Ok(storage) => {
                    let storage: Arc<dyn Storage> = Arc::new(storage);
                    let pipeline = EtlPipeline::new(storage.clone());
                    EtlOrchestrator::new(pipeline, storage, config.raw_dir())
                        .health()
                        .await
                }
                Err(e) => EtlHealthReport::Unavailable {
                    error: e.to_string(),
                },
            };
            print_json(&serde_json::json!({
                "ingestion": ingestion,
                "recent_ingestions": recent,
                "etl": etl
            }))?;
        }
    }
    Ok(())
}
