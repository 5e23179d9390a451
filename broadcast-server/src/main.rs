//! CLI entrypoint: starts the orchestrator's polling task and serves the
//! subscriber WebSocket gateway, or — when invoked with the internal
//! `--worker-child` flag — runs as the process-executor's child instead.
//! Grounded in `original_source/server/main.py`'s argparse surface and
//! `examples/flyingrobots-echo/crates/echo-session-ws-gateway/src/main.rs`'s
//! `clap`/`tracing_subscriber` bootstrap.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use broadcast_server::broadcaster::Broadcaster;
use broadcast_server::decoder_factory::PlaceholderDecoderFactory;
use broadcast_server::orchestrator::Orchestrator;
use broadcast_server::settings::Settings;
use broadcast_server::worker::{run_worker_child, ExecutorMode};

/// The gateway always listens on this port; only the bind host is configurable.
const GATEWAY_PORT: u16 = 8765;

#[derive(Parser, Debug)]
#[command(name = "cs-demo-broadcaster", about = "Tails CS demo files and broadcasts world-state snapshots over WebSocket")]
struct Args {
    /// Directory to watch for `.dem` files.
    #[arg(long, default_value = ".")]
    demo_dir: PathBuf,

    /// Host to bind the WebSocket gateway to (always on port 8765).
    #[arg(long, default_value = "0.0.0.0")]
    bind_host: IpAddr,

    /// Optional JSON config file consulted between env vars and defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decoder execution strategy.
    #[arg(long, value_enum, default_value_t = ExecutorArg::Thread)]
    executor: ExecutorArg,

    /// Disable the msgpack-encoded `position_update` frame, always sending JSON text.
    #[arg(long)]
    no_msgpack: bool,

    /// Internal: run as the process executor's child and exit. Never set this by hand.
    #[arg(long, hide = true)]
    worker_child: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ExecutorArg {
    Inline,
    Thread,
    Process,
}

impl From<ExecutorArg> for ExecutorMode {
    fn from(value: ExecutorArg) -> Self {
        match value {
            ExecutorArg::Inline => ExecutorMode::Inline,
            ExecutorArg::Thread => ExecutorMode::Thread,
            ExecutorArg::Process => ExecutorMode::Process,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if args.worker_child {
        return run_worker_child(Arc::new(PlaceholderDecoderFactory)).await.map_err(Into::into);
    }

    let mut settings = Settings::load(args.demo_dir.clone(), args.bind_host.to_string(), args.config.as_deref());
    if args.no_msgpack {
        settings.msgpack_enabled = false;
    }

    let executor: ExecutorMode = args.executor.into();
    let factory = Arc::new(PlaceholderDecoderFactory);

    let (orchestrator, channels, commands_rx) = Orchestrator::new(settings, factory, executor);
    let poll_task = tokio::spawn(orchestrator.run(commands_rx));

    let broadcaster = Broadcaster::new(channels);
    let app = broadcaster.router();

    let bind_addr = SocketAddr::new(args.bind_host, GATEWAY_PORT);
    tracing::info!(bind = %bind_addr, "starting cs-demo-broadcaster");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poll_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
