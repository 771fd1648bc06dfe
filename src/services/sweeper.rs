use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SessionService;

/// Closes expired sessions (marking their absentees) on a fixed interval.
pub fn spawn(interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep_once().await;
        }
    })
}

/// One pass. Failures are logged and retried on the next tick.
pub async fn sweep_once() -> usize {
    let service = match SessionService::new() {
        Ok(service) => service,
        Err(e) => {
            tracing::warn!("Session sweep skipped: {}", e);
            return 0;
        }
    };
    match service.close_expired().await {
        Ok(0) => 0,
        Ok(closed) => {
            tracing::info!("Auto-closed {} expired sessions", closed);
            closed
        }
        Err(e) => {
            tracing::warn!("Session sweep failed: {}", e);
            0
        }
    }
}
