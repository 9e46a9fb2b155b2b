use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use encore_booking::ExpirySweeper;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Runs the expiry sweep on a fixed cadence. Never returns; failures are logged and retried on the next tick.
pub async fn start_expiry_worker(sweeper: Arc<ExpirySweeper>, every: Duration) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Expiry worker started, sweeping every {:?}", every);

    loop {
        tick.tick().await;
        match sweeper.reclaim_expired(Utc::now()).await {
            Ok(report) if report.reclaimed > 0 || report.orphans_reverted > 0 => {
                info!(
                    "Background sweep: reclaimed {} holds, reverted {} orphans",
                    report.reclaimed, report.orphans_reverted
                );
            }
            Ok(report) => debug!("Background sweep: nothing to reclaim ({} skipped)", report.skipped),
            Err(e) => error!("Background sweep error: {}", e),
        }
    }
}
