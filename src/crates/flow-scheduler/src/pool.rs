//! The external job-execution dependency the main loop polls once per
//! tick. Kept as a trait object so the loop never depends on a concrete
//! execution backend (local subprocess, batch scheduler, container runner).

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Lost,
}

#[derive(Debug, Clone)]
pub struct JobPollResult {
    pub job_id: String,
    pub outcome: JobOutcome,
    pub event_time: f64,
}

#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub task_id: String,
    pub job_runner_name: String,
    pub platform: String,
}

/// A backend capable of submitting, polling, and killing jobs. All methods
/// are fallible independently per job: a single failure must not stop the
/// pool from reporting on the rest.
#[async_trait]
pub trait ProcessPool: Send + Sync {
    async fn submit(&self, jobs: &[JobSubmission]) -> Vec<Result<String, String>>;
    async fn poll(&self) -> Vec<JobPollResult>;
    async fn kill(&self, job_ids: &[String]) -> Vec<Result<(), String>>;
    /// True once every job this pool knows about has reached a terminal
    /// state and been reported — used by the shutdown sequence to decide
    /// whether "wait for running jobs" can proceed to "flush and exit".
    fn is_quiescent(&self) -> bool;
}

/// An in-memory pool for tests and local experimentation: every submitted
/// job is immediately marked running, with no real execution behind it.
#[derive(Default)]
pub struct NullProcessPool;

#[async_trait]
impl ProcessPool for NullProcessPool {
    async fn submit(&self, jobs: &[JobSubmission]) -> Vec<Result<String, String>> {
        jobs.iter()
            .enumerate()
            .map(|(i, j)| Ok(format!("{}-job-{i}", j.task_id)))
            .collect()
    }

    async fn poll(&self) -> Vec<JobPollResult> {
        Vec::new()
    }

    async fn kill(&self, job_ids: &[String]) -> Vec<Result<(), String>> {
        job_ids.iter().map(|_| Ok(())).collect()
    }

    fn is_quiescent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_pool_acknowledges_every_submission() {
        let pool = NullProcessPool;
        let jobs = vec![JobSubmission {
            task_id: "foo".into(),
            job_runner_name: "background".into(),
            platform: "localhost".into(),
        }];
        let results = pool.submit(&jobs).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert!(pool.is_quiescent());
    }
}
