//! SOCKS4 Proxy CLI
//!
//! Runs a SOCKS4 proxy server until Ctrl-C or SIGTERM, then stops accepting
//! and gives in-flight sessions a bounded grace period to finish.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use socks4_proxy_core::config::{LoggingConfig, ProxyConfig};
use socks4_proxy_core::metrics::ProxyMetrics;
use socks4_proxy_core::network::ProxyListener;
use socks4_proxy_core::ProxyError;

/// SOCKS4 proxy server.
#[derive(Parser, Debug)]
#[command(name = "socks4-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override listen address (`host:port` or `:port`).
    #[arg(long)]
    listen: Option<String>,

    /// Override how long to wait for sessions on shutdown, in milliseconds.
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    setup_tracing(&effective_logging(&config.logging, args.verbose));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen.address(),
        handshake_timeout_ms = config.session.handshake_timeout_ms,
        relay_idle_timeout_ms = config.session.relay_idle_timeout_ms,
        "starting socks4 proxy"
    );

    // Run the async runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run_proxy(config).await })
}

/// File (or defaults), then environment, then command line.
fn load_config(args: &Args) -> anyhow::Result<ProxyConfig> {
    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };

    config.apply_env_overrides()?;

    if let Some(listen) = &args.listen {
        config.listen.address = listen.clone();
    }
    if let Some(ms) = args.shutdown_timeout_ms {
        config.shutdown.grace_period_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

fn effective_logging(logging: &LoggingConfig, verbose: u8) -> LoggingConfig {
    match verbose {
        0 => logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..logging.clone()
        },
    }
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_proxy(config: ProxyConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(ProxyMetrics::new());

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_clone = Arc::clone(&metrics);
        let metrics_addr = config.metrics.address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&metrics_addr, metrics_clone).await {
                tracing::error!(error = %e, "metrics server error");
            }
        });
    }

    let endpoint = config.listen.address();
    let grace = config.shutdown.grace_period();

    let mut listener = ProxyListener::new(config).with_metrics(metrics);
    let local_addr = listener.start(&endpoint).await?;
    info!(address = %local_addr, "proxy started");

    shutdown_signal().await;
    info!(grace_ms = grace.as_millis() as u64, "shutdown signal received, stopping proxy");

    match listener.stop(grace).await {
        Ok(()) => info!("proxy shutdown complete"),
        Err(ProxyError::ShutdownTimeout { in_flight }) => {
            warn!(in_flight, "sessions still running after grace period, exiting anyway");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn start_metrics_server(
    addr: &str,
    metrics: Arc<ProxyMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!(address = %addr, "metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let body = metrics.encode().unwrap_or_default();
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "metrics connection error");
            }
        });
    }
}
