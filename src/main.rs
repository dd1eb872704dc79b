//! Mock HTTP API - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mock_http_api::{MockServer, MockServerConfig, RecordingReporter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-http-api",
    about = "Standalone mock HTTP server - serves YAML-defined expectations and checks they were met",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-http-api.yaml")]
    config: PathBuf,

    /// Address to listen on (overrides settings.listen)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no expectations)");
        MockServerConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} expectations defined)",
            config.expectations.len()
        );
        return Ok(());
    }

    let listen = args
        .listen
        .or(config.settings.listen)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

    let reporter = Arc::new(RecordingReporter::new());
    let server = MockServer::builder()
        .listen(listen)
        .reporter(reporter.clone())
        .record_requests(false)
        .start()
        .await?;
    config.apply(&server)?;

    println!("{}", server.uri());
    info!(
        uri = %server.uri(),
        expectations = config.expectations.len(),
        "Serving mock API, press Ctrl-C to stop and verify"
    );

    tokio::signal::ctrl_c().await?;
    server.close();

    let failures = reporter.take();
    if failures.is_empty() {
        info!("All expectations met");
        return Ok(());
    }

    for failure in &failures {
        error!(%failure, "Expectation failure");
    }
    anyhow::bail!("{} expectation failure(s)", failures.len())
}
