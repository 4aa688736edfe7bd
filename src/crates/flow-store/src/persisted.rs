//! Reading persisted state on restart. The persistence database itself is
//! out of scope; this module only defines the row shapes the store expects
//! and the derivation rules for turning them into live entities.

use serde::{Deserialize, Serialize};

use crate::entities::{Job, JobState, Prerequisite, Runtime, TaskState};

/// `task_jobs` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub cycle: String,
    pub name: String,
    pub submit_num: u32,
    pub time_submit: Option<String>,
    pub submit_status: Option<i32>,
    pub time_run: Option<String>,
    pub time_run_exit: Option<String>,
    pub run_status: Option<i32>,
    pub job_runner_name: String,
    pub job_id: Option<String>,
    pub platform_name: String,
}

/// `task_states` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateRow {
    pub cycle: String,
    pub name: String,
    pub flow_nums: Vec<u64>,
    pub status: TaskState,
    pub submit_num: u32,
    pub outputs_json: String,
}

/// `task_prerequisites` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteRow {
    pub cycle: String,
    pub name: String,
    pub prereq_cycle: String,
    pub prereq_name: String,
    pub prereq_output: String,
    pub satisfied: bool,
}

impl From<PrerequisiteRow> for Prerequisite {
    fn from(r: PrerequisiteRow) -> Self {
        Prerequisite {
            prereq_cycle: r.prereq_cycle,
            prereq_name: r.prereq_name,
            prereq_output: r.prereq_output,
            satisfied: r.satisfied,
        }
    }
}

/// Derive a historical job's state from its row: if `run_status` is
/// non-null, the job finished (succeeded on 0, failed otherwise); else if
/// `time_run` is set, it's still running; else if `submit_status` is set,
/// it only got as far as submission (succeeded on 0, submit-failed
/// otherwise); otherwise there's nothing to derive.
pub fn derive_job_state(row: &JobRow) -> Option<JobState> {
    if let Some(run_status) = row.run_status {
        return Some(if run_status == 0 {
            JobState::Succeeded
        } else {
            JobState::Failed
        });
    }
    if row.time_run.is_some() {
        return Some(JobState::Running);
    }
    if let Some(submit_status) = row.submit_status {
        return Some(if submit_status == 0 {
            JobState::Submitted
        } else {
            JobState::SubmitFailed
        });
    }
    None
}

/// Build a [`Job`] entity from a persisted row, owned by `task_proxy_id`.
/// Returns `None` when the row carries no derivable state.
pub fn job_from_row(row: &JobRow, task_proxy_id: &str, job_id: &str) -> Option<Job> {
    let state = derive_job_state(row)?;
    Some(Job {
        id: job_id.to_string(),
        submit_num: row.submit_num,
        state,
        task_proxy: task_proxy_id.to_string(),
        submitted_time: row.time_submit.clone(),
        started_time: row.time_run.clone(),
        finished_time: row.time_run_exit.clone(),
        platform: row.platform_name.clone(),
        job_runner_name: row.job_runner_name.clone(),
        job_id_on_runner: row.job_id.clone(),
        execution_time_limit: None,
        log_dir: String::new(),
        runtime: Runtime::default(),
        messages: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_row() -> JobRow {
        JobRow {
            cycle: "1".into(),
            name: "foo".into(),
            submit_num: 1,
            time_submit: Some("t0".into()),
            submit_status: None,
            time_run: None,
            time_run_exit: None,
            run_status: None,
            job_runner_name: "background".into(),
            job_id: None,
            platform_name: "localhost".into(),
        }
    }

    #[test]
    fn run_status_zero_is_succeeded() {
        let mut row = base_row();
        row.run_status = Some(0);
        assert_eq!(derive_job_state(&row), Some(JobState::Succeeded));
    }

    #[test]
    fn run_status_nonzero_is_failed() {
        let mut row = base_row();
        row.run_status = Some(1);
        assert_eq!(derive_job_state(&row), Some(JobState::Failed));
    }

    #[test]
    fn time_run_without_run_status_is_running() {
        let mut row = base_row();
        row.time_run = Some("t1".into());
        assert_eq!(derive_job_state(&row), Some(JobState::Running));
    }

    #[test]
    fn submit_status_zero_is_submitted() {
        let mut row = base_row();
        row.submit_status = Some(0);
        assert_eq!(derive_job_state(&row), Some(JobState::Submitted));
    }

    #[test]
    fn submit_status_nonzero_is_submit_failed() {
        let mut row = base_row();
        row.submit_status = Some(1);
        assert_eq!(derive_job_state(&row), Some(JobState::SubmitFailed));
    }

    #[test]
    fn no_signal_is_skipped() {
        let row = base_row();
        assert_eq!(derive_job_state(&row), None);
    }
}
