//! Failure diagnostics for completed runs.

use crate::remote::{Job, JobStep};
use serde::Serialize;

/// A sub-job that did not succeed, with its failing steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDiagnostic {
    /// Job identifier.
    pub job_id: u64,
    /// Job name.
    pub job_name: String,
    /// Job conclusion.
    pub conclusion: Option<String>,
    /// Steps with a non-success conclusion.
    pub failed_steps: Vec<JobStep>,
}

fn is_failure(conclusion: Option<&str>) -> bool {
    conclusion.is_some_and(|c| c != "success")
}

pub(crate) fn failing_jobs(jobs: Vec<Job>) -> Vec<JobDiagnostic> {
    jobs.into_iter()
        .filter(|job| is_failure(job.conclusion.as_deref()))
        .map(|job| JobDiagnostic {
            job_id: job.id,
            job_name: job.name,
            conclusion: job.conclusion,
            failed_steps: job
                .steps
                .into_iter()
                .filter(|step| is_failure(step.conclusion.as_deref()))
                .collect(),
        })
        .collect()
}
