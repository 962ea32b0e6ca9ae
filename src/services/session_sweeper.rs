//! Background removal of abandoned upload sessions.

use crate::services::upload_service::UploadService;
use std::time::Duration;
use tokio::{task::JoinHandle, time};
use tracing::{debug, info, warn};

/// Run [`UploadService::sweep_expired`] every `every`, deleting sessions
/// older than `ttl`. Returns `None` when `every` is zero.
pub fn spawn(service: UploadService, ttl: Duration, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("session expiry sweep disabled");
        return None;
    }
    let ttl = match chrono::Duration::from_std(ttl) {
        Ok(ttl) => ttl,
        Err(err) => {
            warn!("session TTL {:?} out of range, sweep disabled: {}", ttl, err);
            return None;
        }
    };

    Some(tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.sweep_expired(ttl).await {
                Ok(0) => debug!("session sweep found nothing to remove"),
                Ok(removed) => info!(removed, "session sweep finished"),
                Err(err) => warn!(error = %err, "session sweep failed"),
            }
        }
    }))
}
