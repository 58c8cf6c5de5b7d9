//! Service entrypoint: parses the command line, installs logging, builds
//! the stores and serves the API.

use anyhow::{Context, Result};
use clap::Parser;
use connectome_http::cache::REFRESH_PERIOD;
use connectome_http::config::ServiceConfig;
use connectome_http::storage::EngineRegistry;
use connectome_http::web::api::cypher::REAP_PERIOD;
use connectome_http::web::{start_server, ServeOptions, ServiceState};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "connectome-http", version, about = "HTTP API for connectome graph databases")]
struct Args {
    /// JSON configuration file
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = 11000)]
    port: u16,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args, config: &ServiceConfig) -> Result<()> {
    let default = if args.verbose {
        "connectome_http=debug,tower_http=debug,info"
    } else {
        "connectome_http=info,tower_http=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(&args.config)?;
    init_logging(&args, &config)?;

    info!(config = %args.config.display(), engine = %config.engine, "starting");
    let state = Arc::new(ServiceState::from_config(&config, EngineRegistry::global()).await?);
    info!(datasets = ?state.stores.dataset_names(), "stores ready");

    state.aggregates.clone().spawn_refresher(REFRESH_PERIOD);
    state
        .transactions
        .clone()
        .spawn_reaper(config.backend_timeout(), REAP_PERIOD);

    let tls = match (&config.ssl_cert, &config.ssl_key) {
        (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
        _ => None,
    };
    start_server(
        state,
        ServeOptions {
            port: args.port,
            static_dir: config.static_dir.clone(),
            tls,
        },
    )
    .await
}
