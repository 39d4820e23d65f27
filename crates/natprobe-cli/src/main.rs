//! natprobe CLI
//!
//! Classifies the local NAT against one or more classic STUN servers.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use console::style;
use natprobe_discovery::socket::bind_udp_socket;
use natprobe_discovery::{
    ClassificationResult, ClassifyError, NatClassifier, TracingObserver, TransactionStats,
    TraversalStrategy,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::{Config, parse_server};
use progress::{ServerProgress, progress_group};

/// natprobe - find out what kind of NAT you are behind
#[derive(Parser)]
#[command(name = "natprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path [default: <config dir>/natprobe/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the NAT against STUN servers
    Classify {
        /// STUN servers as host[:port]; defaults to the configured servers
        servers: Vec<String>,

        /// Local bind address for the classification sockets
        ///
        /// A wildcard address such as 0.0.0.0 never equals a mapped
        /// address, so Open Internet and Symmetric UDP Firewall can only be
        /// reported when a specific interface address is bound.
        #[arg(short, long)]
        bind: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Outcome of probing one server
#[derive(Serialize)]
struct ServerReport {
    server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traversal: Option<TraversalStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ServerReport {
    fn new(server: String, outcome: Result<ClassificationResult, ClassifyError>) -> Self {
        match outcome {
            Ok(result) => Self {
                server,
                traversal: Some(result.traversal_strategy()),
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                server,
                result: None,
                traversal: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `config --init` writes the file, so it must not need one
    let config = match cli.command {
        Commands::Config { init: true } => Config::default(),
        _ => Config::load_or_default(cli.config.as_deref())?,
    };

    // Initialize logging; RUST_LOG wins over the configured level
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Commands::Classify {
            servers,
            bind,
            json,
        } => {
            classify(servers, bind, json, &config).await?;
        }
        Commands::Config { init } => {
            show_config(init, cli.config, &config)?;
        }
    }

    Ok(())
}

/// Classify against every server concurrently
async fn classify(
    servers: Vec<String>,
    bind: Option<String>,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let servers = if servers.is_empty() {
        config.targets.servers.clone()
    } else {
        servers
    };
    if servers.is_empty() {
        anyhow::bail!("No STUN servers given and none configured");
    }

    let targets = servers
        .iter()
        .map(|s| parse_server(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let bind_addr: SocketAddr = match bind {
        Some(bind) => bind
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid bind address: {bind}"))?,
        None => config.parse_bind_addr()?,
    };

    let classifier = Arc::new(NatClassifier::new().with_config(config.transaction_config()));
    let stats = Arc::new(TransactionStats::new());
    let group = progress_group(json);

    tracing::debug!(servers = targets.len(), %bind_addr, "starting classification");

    // One blocking task and one socket per server
    let mut tasks = Vec::with_capacity(targets.len());
    for (host, port) in targets {
        let classifier = classifier.clone();
        let stats = stats.clone();
        let server = format!("{host}:{port}");
        let progress = ServerProgress::new(&group, &server);

        tasks.push(tokio::task::spawn_blocking(move || {
            let outcome = classify_server(&classifier, &host, port, bind_addr, stats);
            progress.finish(&outcome);
            ServerReport::new(server, outcome)
        }));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        reports.push(task.await?);
    }
    group.clear()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
        tracing::debug!(
            sent = stats.sent(),
            send_failures = stats.send_failures(),
            receive_failures = stats.receive_failures(),
            malformed = stats.malformed(),
            unmatched = stats.unmatched(),
            exhausted = stats.exhausted(),
            "transaction statistics"
        );
    }

    if reports.iter().all(|r| r.error.is_some()) {
        anyhow::bail!("Classification failed against every server");
    }

    Ok(())
}

/// Classify against one server from a fresh socket
fn classify_server(
    classifier: &NatClassifier,
    host: &str,
    port: u16,
    bind_addr: SocketAddr,
    stats: Arc<TransactionStats>,
) -> Result<ClassificationResult, ClassifyError> {
    let socket = bind_udp_socket(bind_addr)?;
    classifier.classify_with_observer(host, port, &socket, (TracingObserver, stats))
}

fn print_reports(reports: &[ServerReport]) {
    for report in reports {
        println!("{}", style(&report.server).bold());

        if let Some(error) = &report.error {
            println!("  {} {}", style("Error:").red().bold(), error);
            println!();
            continue;
        }

        if let Some(result) = &report.result {
            println!("  NAT type:        {}", style(result.nat_type()).cyan());
            match result.public_endpoint() {
                Some(endpoint) => println!("  Public endpoint: {endpoint}"),
                None => println!("  Public endpoint: {}", style("none").dim()),
            }

            let strategy = result.traversal_strategy();
            let styled = match strategy {
                TraversalStrategy::Direct => style(strategy).green(),
                TraversalStrategy::HolePunch => style(strategy).yellow(),
                TraversalStrategy::Relay => style(strategy).red(),
            };
            println!("  Traversal:       {styled}");
        }
        println!();
    }
}

/// Print the effective configuration, or write the default file
fn show_config(init: bool, path: Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    if init {
        let path = path.unwrap_or_else(Config::default_path);
        if path.exists() {
            anyhow::bail!("Configuration file already exists: {}", path.display());
        }

        Config::default().save(&path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
