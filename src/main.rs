#![allow(dead_code)]

//! Marasi - an interactive HTTP/HTTPS intercepting proxy with a sandboxed
//! scripting runtime for security testing.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marasi::config::{default_config_dir, Config};
use marasi::proxy::{AppState, ProxyServer};

/// Marasi - an interactive HTTPS intercepting proxy with a sandboxed scripting
/// runtime for security testing.
#[derive(Parser, Debug)]
#[command(name = "marasi")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address the proxy listens on for client connections.
    #[arg(long, default_value = "127.0.0.1:8080", env = "MARASI_LISTEN")]
    listen: String,

    /// Directory holding the root CA, database, and extensions (defaults to
    /// the OS-specific user config directory).
    #[arg(long, env = "MARASI_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// SQLite database file name, relative to `config_dir`.
    #[arg(long, env = "MARASI_DATABASE")]
    database: Option<String>,

    /// Extensions directory name, relative to `config_dir`.
    #[arg(long, env = "MARASI_EXTENSIONS_DIR")]
    extensions_dir: Option<String>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, short = 'v', default_value = "info", env = "MARASI_LOGLEVEL")]
    verbosity: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install default crypto provider"))?;

    init_tracing(&cli.verbosity);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        if let Err(e) = run(cli).await {
            error!(error = %e, "fatal error, shutting down");
            std::process::exit(1);
        }
    });

    Ok(())
}

fn init_tracing(verbosity: &str) {
    let filter = match verbosity.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    info!(config_dir = ?config.config_dir, "bootstrapping marasi");

    let metrics_port = config.metrics.port;
    let state = AppState::bootstrap(config).await?;
    info!(root_fingerprint = %state.ca.root_fingerprint()?, "root CA ready");

    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_port).await {
            error!(error = %e, "metrics server error");
        }
    });

    ProxyServer::new(state).run().await
}

/// Serves Prometheus text-format metrics on `/metrics` (spec.md §C "ambient
/// Prometheus counters/histograms").
async fn run_metrics_server(port: u16) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::{Bytes, Incoming};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| async move {
                let response = if req.uri().path() == "/metrics" {
                    Response::new(Full::new(Bytes::from(marasi::metrics::collect_metrics())))
                } else {
                    Response::builder()
                        .status(404)
                        .body(Full::new(Bytes::from_static(b"not found\n")))
                        .unwrap()
                };
                Ok::<_, Infallible>(response)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %err, "metrics server connection error");
            }
        });
    }
}

/// Loads `config_dir/config.yaml` if present, then applies CLI/env overrides on
/// top (spec.md §A.3/§A.4).
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let candidate = config_dir.join("config.yaml");

    let mut config = if candidate.exists() {
        Config::from_file(&candidate)?
    } else {
        Config::default()
    };

    config.config_dir = config_dir;
    config.listen = cli.listen.clone();
    if let Some(ref database) = cli.database {
        config.database_file = database.clone();
    }
    if let Some(ref extensions_dir) = cli.extensions_dir {
        config.extensions_dir = extensions_dir.clone();
    }
    config.verbosity = cli.verbosity.clone();

    config.validate()?;
    Ok(config)
}
