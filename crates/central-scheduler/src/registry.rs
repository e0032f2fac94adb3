//! Job registry for tracking execution status.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a job execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed with an error message
    Failed(String),
    /// Job was skipped (e.g. due to the overlap policy)
    Skipped(String),
}

/// Status of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub is_running: bool,
}

impl JobStatus {
    fn new(job_name: String, cron_expr: String) -> Self {
        Self {
            job_name,
            cron_expr,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            is_running: false,
        }
    }
}

/// Thread-safe registry of job statuses.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a job. An existing entry with the same name is replaced.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        let mut jobs = self.jobs.write().unwrap();
        jobs.insert(
            job_name.to_string(),
            JobStatus::new(job_name.to_string(), cron_expr.to_string()),
        );
    }

    pub fn record_start(&self, job_name: &str) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(status) = jobs.get_mut(job_name) {
            status.is_running = true;
        }
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(status) = jobs.get_mut(job_name) {
            status.is_running = false;
            status.last_run = Some(Utc::now());
            status.last_duration_ms = Some(duration_ms);
            status.run_count += 1;
            if matches!(result, JobResult::Failed(_)) {
                status.error_count += 1;
            }
            status.last_result = Some(result);
        }
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.jobs.read().unwrap().get(job_name).cloned()
    }

    pub fn get_all_status(&self) -> Vec<JobStatus> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.jobs.read().unwrap().contains_key(job_name)
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.jobs
            .read()
            .unwrap()
            .get(job_name)
            .map(|s| s.is_running)
            .unwrap_or(false)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
