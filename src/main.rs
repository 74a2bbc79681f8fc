use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::net::{TcpListener, UnixListener};

use pasarela::config::{Config, RoutingInstance};
use pasarela::metadata::cache::MetadataCache;
use pasarela::metadata::fetcher::ClusterTopology;
use pasarela::metadata::session::MySqlSessionFactory;
use pasarela::routing::destination::DestinationSpec;
use pasarela::routing::router::{route_source_for, Router};

#[derive(Parser)]
#[command(name = "pasarela")]
#[command(about = "A stateless TCP connection router for replicated MySQL clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/pasarela.toml")]
        config: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await?,
        Commands::Validate { config } => validate(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

async fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_from_file(&config_path)
        .map_err(|err| format!("failed to load config from {config_path:?}: {err}"))?;

    init_logging(&config);

    info!("starting pasarela v{}", env!("CARGO_PKG_VERSION"));
    info!("configuration loaded from {config_path:?}");

    let instances = config.instances()?;

    let needs_cache = instances
        .iter()
        .any(|i| matches!(i.destinations, DestinationSpec::MetadataCache { .. }));
    let cache = if needs_cache {
        let metadata = config
            .metadata
            .as_ref()
            .ok_or("metadata-cache destinations require a [metadata] section")?;
        let topology = ClusterTopology::new(
            &metadata.user,
            &metadata.password,
            Duration::from_secs(metadata.connect_timeout_sec),
            Arc::new(MySqlSessionFactory),
        );
        let cache = Arc::new(MetadataCache::new(
            metadata.cluster_name.clone(),
            metadata.seeds()?,
            Duration::from_secs(metadata.ttl_sec),
            topology,
        ));
        cache.start();
        Some(cache)
    } else {
        None
    };

    for instance in instances {
        start_instance(&instance, cache.clone()).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

async fn start_instance(
    instance: &RoutingInstance,
    cache: Option<Arc<MetadataCache>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = route_source_for(&instance.destinations, instance.mode, cache)?;
    let router = Arc::new(Router::new(
        instance.name.clone(),
        source,
        Duration::from_secs(instance.connect_timeout as u64),
        Duration::from_secs(instance.client_connect_timeout as u64),
        instance.max_connections as usize,
        instance.max_connect_errors,
        instance.net_buffer_length as usize,
    ));

    if let Some((host, port)) = &instance.bind_address {
        let listener = TcpListener::bind((host.as_str(), *port)).await?;
        info!(
            "routing instance '{}' ({}) listening on {host}:{port} -> {}",
            instance.name, instance.mode, instance.destinations
        );
        tokio::spawn(Arc::clone(&router).run_tcp(listener));
    }

    if let Some(path) = &instance.socket {
        match UnixListener::bind(path) {
            Ok(listener) => {
                info!(
                    "routing instance '{}' ({}) listening on socket {}",
                    instance.name,
                    instance.mode,
                    path.display()
                );
                tokio::spawn(Arc::clone(&router).run_unix(listener));
            }
            Err(err) => {
                warn!("could not bind socket {}: {err}", path.display());
                return Err(err.into());
            }
        }
    }

    Ok(())
}

fn validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("validating configuration file {config_path:?}");

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            let instances = config.instances()?;
            println!("configuration is valid");
            if let Some(metadata) = &config.metadata {
                println!(
                    "  metadata: cluster '{}', {} bootstrap server(s), ttl {}s",
                    metadata.cluster_name,
                    metadata.bootstrap_servers.len(),
                    metadata.ttl_sec
                );
            }
            for instance in &instances {
                let bind = match &instance.bind_address {
                    Some((host, port)) => format!("{host}:{port}"),
                    None => "-".to_string(),
                };
                println!(
                    "  routing '{}': mode {}, bind {}, destinations {}",
                    instance.name, instance.mode, bind, instance.destinations
                );
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("configuration file validation failed:");
            eprintln!("  {err}");
            Err(Box::new(err))
        }
    }
}

fn show_version() {
    println!("pasarela v{}", env!("CARGO_PKG_VERSION"));
    println!("A stateless TCP connection router for replicated MySQL clusters");
    println!();
    println!("Features:");
    println!("  - InnoDB-cluster metadata discovery with node fallback");
    println!("  - read-write / read-only routing from live replication state");
    println!("  - static destination lists with first-reachable selection");
}

fn init_logging(config: &Config) {
    let level = match config.logging.level.as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}
