use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hccl_controller::agent::Agent;
use hccl_controller::config::AgentConfig;
use hccl_controller::server::build_router;
use hccl_controller::store::{FileStore, ObjectStore};
use hccl_controller::types::ClusterEvent;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hccl_controller=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env();
    let shutdown = CancellationToken::new();
    let store = Arc::new(FileStore::new(&config.state_dir));
    let agent = Arc::new(Agent::new_with_shutdown(
        config.clone(),
        store,
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, state_dir = %config.state_dir.display(), "listening");
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(
            axum::serve(listener, build_router(Arc::clone(&agent)))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .into_future(),
        )
    };

    let sweeper = tokio::spawn(run_sweeps(Arc::clone(&agent), shutdown.clone()));
    let events = tokio::spawn(read_events(Arc::clone(&agent), shutdown.clone()));

    wait_for_signal().await;
    info!("Shutting down");
    shutdown.cancel();

    agent.shutdown_all().await;
    for (name, task) in [("sweeper", sweeper), ("event reader", events)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task panicked");
        }
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server panicked"),
    }
    Ok(())
}

/// Feeds newline-delimited JSON events from stdin to the agent.
///
/// Malformed lines are logged and skipped. Events are handled one at a time,
/// in arrival order.
async fn read_events<S: ObjectStore>(agent: Arc<Agent<S>>, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Event source closed");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to read event source");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClusterEvent>(&line) {
            Ok(event) => agent.handle(event).await,
            Err(e) => warn!(error = %e, "Skipping malformed event"),
        }
    }
}

/// Garbage-collects expired job summaries every sweep interval.
async fn run_sweeps<S: ObjectStore>(agent: Arc<Agent<S>>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(agent.config().sweep_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                match agent.sweep(Utc::now()).await {
                    Ok(removed) => debug!(removed, "Sweep finished"),
                    Err(e) => warn!(error = %e, "Sweep failed"),
                }
            }
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
