use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::task::TaskCall;

pub type JobId = Uuid;
pub type WorkerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Started => write!(f, "started"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A state change applied to a job record by a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// queued -> started, owned by `worker`
    Claim { worker: WorkerId },
    /// started -> completed
    Complete { result: String },
    /// started -> failed
    Fail { error: String },
    /// started -> queued, used only when the owning worker is gone
    Requeue,
}

impl Transition {
    pub fn from_status(&self) -> JobStatus {
        match self {
            Transition::Claim { .. } => JobStatus::Queued,
            _ => JobStatus::Started,
        }
    }

    pub fn to_status(&self) -> JobStatus {
        match self {
            Transition::Claim { .. } => JobStatus::Started,
            Transition::Complete { .. } => JobStatus::Completed,
            Transition::Fail { .. } => JobStatus::Failed,
            Transition::Requeue => JobStatus::Queued,
        }
    }
}

/// Precondition of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: JobStatus,
    pub worker: Option<WorkerId>,
}

impl Expected {
    pub fn owned(status: JobStatus, worker: WorkerId) -> Self {
        Self {
            status,
            worker: Some(worker),
        }
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        job.status == self.status && self.worker.map_or(true, |w| job.worker == Some(w))
    }
}

impl From<JobStatus> for Expected {
    fn from(status: JobStatus) -> Self {
        Self {
            status,
            worker: None,
        }
    }
}

/// Conjunctive record filter. Unset fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub id: Option<JobId>,
    pub status: Option<JobStatus>,
    pub worker: Option<WorkerId>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn id(id: JobId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.id.map_or(true, |id| job.id == id)
            && self.status.map_or(true, |s| job.status == s)
            && self.worker.map_or(true, |w| job.worker == Some(w))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub task: String,
    pub params: String,
    pub batch: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub worker: Option<WorkerId>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh queued record for `call` with a newly generated id.
    pub fn queued(call: TaskCall) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            task: call.task,
            params: call.params,
            batch: call.batch,
            result: None,
            error: None,
            worker: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn call(&self) -> TaskCall {
        TaskCall {
            task: self.task.clone(),
            params: self.params.clone(),
            batch: self.batch,
        }
    }

    /// Apply `transition`, rejecting any edge not allowed from the current status.
    pub fn apply(&mut self, transition: Transition) -> Result<()> {
        if self.status != transition.from_status() {
            return Err(PoolError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: transition.to_status(),
            });
        }

        let now = Utc::now();
        self.status = transition.to_status();
        match transition {
            Transition::Claim { worker } => {
                self.worker = Some(worker);
                self.attempts += 1;
                self.started_at = Some(now);
            }
            Transition::Complete { result } => {
                self.result = Some(result);
                self.finished_at = Some(now);
            }
            Transition::Fail { error } => {
                self.error = Some(error);
                self.finished_at = Some(now);
            }
            Transition::Requeue => {
                self.worker = None;
                self.started_at = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::queued(TaskCall {
            task: "square".to_string(),
            params: "3".to_string(),
            batch: false,
        })
    }

    #[test]
    fn queued_record_defaults() {
        let job = record();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.worker.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn claim_then_complete() {
        let mut job = record();
        job.apply(Transition::Claim { worker: 7 }).unwrap();
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.worker, Some(7));
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        job.apply(Transition::Complete {
            result: "9".to_string(),
        })
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("9"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn completed_record_does_not_regress() {
        let mut job = record();
        job.apply(Transition::Claim { worker: 1 }).unwrap();
        job.apply(Transition::Complete {
            result: "9".to_string(),
        })
        .unwrap();

        let err = job.apply(Transition::Requeue).unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Queued,
                ..
            }
        ));
        assert!(job.apply(Transition::Claim { worker: 2 }).is_err());
    }

    #[test]
    fn requeue_clears_owner_and_keeps_attempts() {
        let mut job = record();
        job.apply(Transition::Claim { worker: 3 }).unwrap();
        job.apply(Transition::Requeue).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.worker.is_none());
        assert!(job.started_at.is_none());
        assert_eq!(job.attempts, 1);
    }

    #[test]
    fn filter_and_expected_matching() {
        let mut job = record();
        job.apply(Transition::Claim { worker: 4 }).unwrap();

        assert!(JobFilter::all().matches(&job));
        assert!(JobFilter::status(JobStatus::Started).matches(&job));
        assert!(JobFilter::status(JobStatus::Started)
            .with_worker(4)
            .matches(&job));
        assert!(!JobFilter::status(JobStatus::Started)
            .with_worker(5)
            .matches(&job));
        assert!(!JobFilter::id(Uuid::new_v4()).matches(&job));

        assert!(Expected::from(JobStatus::Started).matches(&job));
        assert!(Expected::owned(JobStatus::Started, 4).matches(&job));
        assert!(!Expected::owned(JobStatus::Started, 5).matches(&job));
        assert!(!Expected::from(JobStatus::Queued).matches(&job));
    }

    #[test]
    fn status_display_and_serde() {
        assert_eq!(JobStatus::Started.to_string(), "started");
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }
}
