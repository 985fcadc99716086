mod collectors;
mod config;
mod error;
mod http;
mod metrics;
mod scheduler;
mod snapshot;
mod store;

use axum::serve;
use clap::Parser;
use collectors::platform::{probe_for, PlatformFamily, PlatformProbe};
use collectors::Assembler;
use config::Config;
use metrics::Metrics;
use scheduler::{spawn_archive, spawn_live, Collector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::SnapshotStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostpulse")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./hostpulse.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Run the sampling loops without the HTTP endpoint.
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.no_http {
        cfg.http_enabled = false;
    }

    let family = PlatformFamily::detect();
    info!(
        ?family,
        listen = %cfg.listen,
        live_interval_secs = cfg.live_interval_secs,
        archive_interval_secs = cfg.archive_interval_secs,
        archive_dir = %cfg.archive_dir.display(),
        services_file = %cfg.services_file.display(),
        "starting hostpulse"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    let probe = probe_for(family);
    let store = Arc::new(SnapshotStore::new(
        cfg.output_dir.clone(),
        cfg.archive_dir.clone(),
        cfg.archive_max_files,
    ));
    let new_collector = |probe: &Arc<dyn PlatformProbe>| {
        Collector::new(
            Box::new(Assembler::new(probe.clone(), cfg.services_file.clone())),
            store.clone(),
            metrics.clone(),
        )
    };

    let (live_tx, live_rx) = watch::channel(None);
    let live = spawn_live(
        new_collector(&probe),
        Duration::from_secs(cfg.live_interval_secs),
        live_tx,
    );
    let archive = spawn_archive(
        new_collector(&probe),
        store.clone(),
        Duration::from_secs(cfg.archive_interval_secs),
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let http_task = if cfg.http_enabled {
        let listen = cfg.listen.clone();
        let app = http::build_router(metrics.clone(), new_collector(&probe), live_rx);
        Some(tokio::spawn(async move {
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        }))
    } else {
        None
    };

    info!(loops = ?[live.name(), archive.name()], "sampling loops running");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);
    for handle in [&live, &archive] {
        if handle.is_finished() {
            error!(task = handle.name(), "loop exited before shutdown");
        }
    }
    live.stop().await;
    archive.stop().await;
    if let Some(task) = http_task {
        let _ = task.await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
