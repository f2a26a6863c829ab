use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use shareit::compactor;
use shareit::config::Config;
use shareit::engine::Engine;
use shareit::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    shareit::observability::init(config.metrics_port)?;
    let tls_acceptor = shareit::tls::load_tls_acceptor(&config)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path())?);
    tokio::spawn(compactor::run_compactor(engine.clone(), config.compact_threshold));
    let semaphore = Arc::new(Semaphore::new(config.max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("shareit listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(shareit::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(shareit::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(shareit::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let pw = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(shareit::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == config.max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = config.max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final WAL compaction failed: {e}");
    }
    info!("shareit stopped");
    Ok(())
}
