use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use iptv_sync_core::service::FullSyncReport;
use iptv_sync_core::SyncEngine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tick until `shutdown` fires, running a full sync whenever a provider is
/// due. A sync in flight at shutdown is asked to cancel and awaited.
pub async fn run(engine: Arc<SyncEngine>, tick: Duration, shutdown: CancellationToken) -> Result<()> {
    let mut ticker = tokio::time::interval(tick.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(tick_seconds = tick.as_secs(), "Scheduler started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let due = match engine.due_providers().await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Failed to list due providers");
                continue;
            }
        };
        if due.is_empty() {
            continue;
        }
        info!(due = due.len(), "Providers due, starting full sync");

        let sync = engine.run_full_sync();
        tokio::pin!(sync);
        let report = tokio::select! {
            report = &mut sync => report,
            () = shutdown.cancelled() => {
                info!("Shutdown requested during sync, cancelling");
                if let Err(e) = engine.request_cancel().await {
                    warn!(error = %e, "Failed to request cancellation");
                }
                let report = sync.await;
                log_report(report);
                break;
            }
        };
        log_report(report);
    }

    info!("Scheduler stopped");
    Ok(())
}

fn log_report(report: iptv_sync_core::Result<FullSyncReport>) {
    match report {
        Ok(report) if report.success => info!(
            providers = report.providers_processed,
            channels = report.total_channels,
            "Scheduled sync finished"
        ),
        Ok(report) => warn!(
            status = ?report.status,
            errors = ?report.errors,
            "Scheduled sync finished with errors"
        ),
        Err(e) => error!(error = %e, "Scheduled sync could not start"),
    }
}

/// Token cancelled on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                trigger.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    token
}
