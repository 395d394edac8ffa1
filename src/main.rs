use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidegate::config::{LogFormat, LoggingConfig, Settings};
use slidegate::http::{app_router, HttpServer, RateLimitState};
use slidegate::ratelimit::{Clock, SlidingWindowLimiter, Sweeper, SystemClock};

/// Sliding-window rate limiting in front of a single route prefix.
#[derive(Parser, Debug)]
#[command(name = "slidegate", version, about)]
struct Args {
    /// Path to a YAML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the settings file
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format, overriding the settings file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        settings.server.listen_addr = listen;
    }
    if let Some(format) = args.log_format {
        settings.logging.format = format;
    }

    init_tracing(&settings.logging);

    info!("Starting Slidegate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %settings.server.listen_addr,
        enabled = settings.rate_limit.enabled,
        max_requests = settings.rate_limit.max_requests,
        window_ms = settings.rate_limit.window_ms,
        route_prefix = %settings.rate_limit.route_prefix,
        "Configuration loaded"
    );

    // Initialize the rate limiter
    let limiter = Arc::new(SlidingWindowLimiter::new(
        settings.rate_limit.limiter_config(),
    )?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sweeper = settings.rate_limit.enabled.then(|| {
        Sweeper::spawn(
            limiter.clone(),
            clock.clone(),
            settings.rate_limit.sweep_interval(),
        )
    });

    let state = RateLimitState::new(limiter, clock, &settings.rate_limit.route_prefix);
    let server = HttpServer::new(settings.server.listen_addr, state);

    // Run the server with graceful shutdown on Ctrl+C
    server
        .serve_with_shutdown(app_router(), shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    info!("Slidegate Rate Limiting Service stopped");
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolve on Ctrl+C or SIGTERM. The caller then drains the HTTP server and
/// stops the sweeper.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    info!(
        signal = received,
        "Stopping HTTP server and expiry sweeper"
    );
}
