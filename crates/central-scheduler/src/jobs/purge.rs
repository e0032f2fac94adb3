//! Expired-row purge job.
//!
//! The store has no server-side TTL: reads already skip expired envelopes,
//! and this job reclaims the disk they occupy. Cadence only affects disk
//! usage, never visibility.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use central_storage::Storage;
use central_types::SchedulerSettings;

use crate::{JitterConfig, OverlapPolicy, SchedulerError, SchedulerService, TimeoutConfig};

/// Register the purge job with the scheduler.
pub async fn create_purge_job(
    scheduler: &SchedulerService,
    storage: Arc<Storage>,
    settings: &SchedulerSettings,
) -> Result<(), SchedulerError> {
    scheduler
        .register_job(
            "purge-expired",
            &settings.purge_cron,
            OverlapPolicy::Skip,
            JitterConfig::new(settings.jitter_secs),
            TimeoutConfig::new(settings.job_timeout_secs),
            move || {
                let storage = storage.clone();
                async move { run_purge(storage).await }
            },
        )
        .await?;
    info!("Registered purge job");
    Ok(())
}

/// Delete all expired envelopes.
pub async fn run_purge(storage: Arc<Storage>) -> Result<(), String> {
    let now_millis = Utc::now().timestamp_millis();
    let purged = storage.purge_expired(now_millis).map_err(|e| e.to_string())?;
    info!(purged, "Purge complete");
    Ok(())
}
