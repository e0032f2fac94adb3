//! Rollup sweep job.
//!
//! Each sweep walks every registered agent-rollup and runs the rollup
//! engine for it, children before parents so a group picks up the
//! from-child rows its children forwarded earlier in the same sweep.
//! OverlapPolicy::Skip serializes an agent-rollup with itself across
//! sweeps; that is not needed for correctness, only to avoid redundant
//! work.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use central_aggregate::RollupService;
use central_storage::Storage;
use central_types::SchedulerSettings;

use crate::{JitterConfig, OverlapPolicy, SchedulerError, SchedulerService, TimeoutConfig};

/// Register the rollup sweep with the scheduler.
pub async fn create_rollup_job(
    scheduler: &SchedulerService,
    storage: Arc<Storage>,
    rollup: Arc<RollupService>,
    settings: &SchedulerSettings,
) -> Result<(), SchedulerError> {
    let shutdown = scheduler.shutdown_token();
    scheduler
        .register_job(
            "rollup-sweep",
            &settings.rollup_cron,
            OverlapPolicy::Skip,
            JitterConfig::new(settings.jitter_secs),
            TimeoutConfig::new(settings.job_timeout_secs),
            move || {
                let storage = storage.clone();
                let rollup = rollup.clone();
                let cancel = shutdown.clone();
                async move { run_rollup_sweep(storage, rollup, cancel).await }
            },
        )
        .await?;
    info!("Registered rollup sweep job");
    Ok(())
}

/// One sweep over all registered agent-rollups.
///
/// A failed agent-rollup does not stop the sweep; the failure is reported
/// at the end and its queue rows stay put for the next sweep.
pub async fn run_rollup_sweep(
    storage: Arc<Storage>,
    rollup: Arc<RollupService>,
    cancel: CancellationToken,
) -> Result<(), String> {
    let now_millis = Utc::now().timestamp_millis();
    let mut records = storage
        .list_agent_rollups(now_millis)
        .map_err(|e| e.to_string())?;
    // children before parents
    records.sort_by_key(|r| std::cmp::Reverse(depth(&r.id)));

    let mut buckets = 0usize;
    let mut failed = 0usize;
    for record in records {
        if cancel.is_cancelled() {
            info!("Rollup sweep cancelled");
            break;
        }
        match rollup
            .rollup(
                &record.id,
                record.parent.as_deref(),
                record.is_leaf,
                &cancel,
                now_millis,
            )
            .await
        {
            Ok(n) => buckets += n,
            Err(e) => {
                warn!(agent_rollup = %record.id, error = %e, "Rollup failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} agent rollups failed", failed));
    }
    info!(buckets, "Rollup sweep complete");
    Ok(())
}

fn depth(agent_rollup_id: &str) -> usize {
    agent_rollup_id.matches("::").count()
}
