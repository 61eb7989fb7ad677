// Tidepool Linux host: discovery, transport, and pool console daemon.

mod config;
mod console;
mod discovery;
mod transport;

use std::sync::Arc;

use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("tidepool-linux {}", VERSION);
            return Ok(());
        }
    }

    setup_tracing("info");

    let cfg = config::load();
    let keypair = Arc::new(tidepool_core::Keypair::generate());
    let mesh = transport::MeshTransport::new();
    let pool = Arc::new(tokio::sync::Mutex::new(tidepool_core::Pool::new(
        cfg.pool.clone(),
        mesh.clone(),
    )));

    info!(peer = %keypair.peer_id(), pool = %cfg.pool, "starting tidepool");

    let (connect_tx, connect_rx) = tokio::sync::mpsc::unbounded_channel();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let keypair_disc = keypair.clone();
        let name = cfg.pool.clone();
        let disc_port = cfg.discovery_port;
        let transport_port = cfg.transport_port;
        tokio::spawn(async move {
            let _ = discovery::run_discovery(
                keypair_disc,
                name,
                disc_port,
                transport_port,
                connect_tx,
            )
            .await;
        });
        let pool_trans = pool.clone();
        let keypair_trans = keypair.clone();
        let mesh_trans = mesh.clone();
        let tag = transport::pool_tag(&cfg.pool);
        tokio::spawn(async move {
            let _ = transport::run_transport(
                pool_trans,
                keypair_trans,
                mesh_trans,
                tag,
                transport_port,
                connect_rx,
            )
            .await;
        });
        tokio::spawn(console::run_console(pool.clone()));
        shutdown_signal().await
    })?;
    Ok(())
}

/// Initialize the tracing subscriber. Respects RUST_LOG if set. Logs go to
/// stderr so the console keeps stdout.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix). On shutdown, runtime and tasks exit.
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
