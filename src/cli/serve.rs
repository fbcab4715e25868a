use anyhow::Result;
use tokio::signal;
use tracing::{debug, error, info, warn};

use super::Services;
use crate::config::AppConfig;
use crate::domain::RuntimeId;
use crate::error::KeeperError;
use crate::events::Topic;
use crate::logging::init_logging;
use crate::orchestrator::ScriptOrchestrator;

pub async fn run(config: AppConfig, start: Vec<RuntimeId>) -> Result<()> {
    init_logging(&config.logging);
    info!(
        "Starting botkeeper (source: {}, engine: {:?})",
        config.source.path.display(),
        config.source.engine_mode
    );

    let services = Services::connect(&config).await?;
    let orchestrator = services.orchestrator.clone();

    let reports = orchestrator
        .events()
        .subscribe(Topic::SystemUpdateReport, |n| {
            info!("Runtime state changed: {:?}", n.runtime_ids);
        });
    let changes = orchestrator
        .events()
        .subscribe(Topic::RuntimeConfigChanged, |n| {
            debug!("Runtime configuration changed: {:?}", n.runtime_ids);
        });

    let report = orchestrator.restore().await?;
    if !report.failed.is_empty() {
        warn!(
            "{} runtime(s) could not be restored: {:?}",
            report.failed.len(),
            report.failed.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );
    }
    let refused = start_requested(&orchestrator, &start).await;
    if !refused.is_empty() {
        warn!(
            "{} requested runtime(s) did not start: {:?}",
            refused.len(),
            refused.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );
    }
    for process in services.supervisor.list_running().await {
        info!(
            "Runtime {} live (pid {:?}, since {})",
            process.id, process.pid, process.started_at
        );
    }

    info!("Supervising. Press Ctrl+C to stop.");
    shutdown_signal().await;
    info!("Received shutdown signal");

    let live = services.supervisor.list_running().await;
    let stopped = stop_keeping_markers(&orchestrator, live.iter().map(|p| p.id)).await;
    info!("Stopped {} of {} runtime(s)", stopped, live.len());

    reports.unsubscribe();
    changes.unsubscribe();
    services.pool.close().await;
    Ok(())
}

/// Start each id in order. Returns the ones that failed.
async fn start_requested(
    orchestrator: &ScriptOrchestrator,
    ids: &[RuntimeId],
) -> Vec<(RuntimeId, KeeperError)> {
    let mut failed = Vec::new();
    for &id in ids {
        if let Err(e) = orchestrator.run(id).await {
            failed.push((id, e));
        }
    }
    failed
}

/// Hard-stop each runtime so its marker survives for the next `serve`.
/// Returns how many stopped cleanly.
async fn stop_keeping_markers(
    orchestrator: &ScriptOrchestrator,
    ids: impl IntoIterator<Item = RuntimeId>,
) -> usize {
    let mut stopped = 0;
    for id in ids {
        match orchestrator.stop(id, false).await {
            Ok(()) => stopped += 1,
            Err(e) => error!("Failed to stop runtime {}: {}", id, e),
        }
    }
    stopped
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
