//! Conversions between store types and their protobuf messages.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::proto::{
    transition::Kind, Claim, Complete, Fail, JobFilter as ProtoJobFilter,
    JobRecord as ProtoJobRecord, JobStatus as ProtoJobStatus, Requeue,
    Transition as ProtoTransition,
};
use crate::store::{JobFilter, JobRecord, JobStatus, Transition};

pub fn status_to_proto(status: JobStatus) -> ProtoJobStatus {
    match status {
        JobStatus::Queued => ProtoJobStatus::Queued,
        JobStatus::Started => ProtoJobStatus::Started,
        JobStatus::Completed => ProtoJobStatus::Completed,
        JobStatus::Failed => ProtoJobStatus::Failed,
    }
}

pub fn status_from_proto(status: i32) -> Result<JobStatus> {
    match ProtoJobStatus::try_from(status) {
        Ok(ProtoJobStatus::Queued) => Ok(JobStatus::Queued),
        Ok(ProtoJobStatus::Started) => Ok(JobStatus::Started),
        Ok(ProtoJobStatus::Completed) => Ok(JobStatus::Completed),
        Ok(ProtoJobStatus::Failed) => Ok(JobStatus::Failed),
        _ => Err(PoolError::Internal(format!("Unknown job status {}", status))),
    }
}

pub fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| PoolError::Internal(format!("Invalid job ID: {}", id)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PoolError::Internal(format!("Timestamp out of range: {}", ms)))
}

pub fn job_to_proto(job: &JobRecord) -> ProtoJobRecord {
    ProtoJobRecord {
        id: job.id.to_string(),
        status: status_to_proto(job.status) as i32,
        task: job.task.clone(),
        params: job.params.clone(),
        batch: job.batch,
        result: job.result.clone(),
        error: job.error.clone(),
        worker: job.worker,
        attempts: job.attempts,
        created_at_ms: job.created_at.timestamp_millis(),
        started_at_ms: job.started_at.map(|dt| dt.timestamp_millis()),
        finished_at_ms: job.finished_at.map(|dt| dt.timestamp_millis()),
    }
}

pub fn job_from_proto(job: ProtoJobRecord) -> Result<JobRecord> {
    Ok(JobRecord {
        id: parse_id(&job.id)?,
        status: status_from_proto(job.status)?,
        task: job.task,
        params: job.params,
        batch: job.batch,
        result: job.result,
        error: job.error,
        worker: job.worker,
        attempts: job.attempts,
        created_at: from_millis(job.created_at_ms)?,
        started_at: job.started_at_ms.map(from_millis).transpose()?,
        finished_at: job.finished_at_ms.map(from_millis).transpose()?,
    })
}

pub fn filter_to_proto(filter: &JobFilter) -> ProtoJobFilter {
    ProtoJobFilter {
        id: filter.id.map(|id| id.to_string()),
        status: filter.status.map(|s| status_to_proto(s) as i32),
        worker: filter.worker,
    }
}

/// A missing filter message means "match everything".
pub fn filter_from_proto(filter: Option<ProtoJobFilter>) -> Result<JobFilter> {
    let Some(filter) = filter else {
        return Ok(JobFilter::all());
    };
    Ok(JobFilter {
        id: filter.id.as_deref().map(parse_id).transpose()?,
        status: filter.status.map(status_from_proto).transpose()?,
        worker: filter.worker,
    })
}

pub fn transition_to_proto(transition: &Transition) -> ProtoTransition {
    let kind = match transition {
        Transition::Claim { worker } => Kind::Claim(Claim { worker: *worker }),
        Transition::Complete { result } => Kind::Complete(Complete {
            result: result.clone(),
        }),
        Transition::Fail { error } => Kind::Fail(Fail {
            error: error.clone(),
        }),
        Transition::Requeue => Kind::Requeue(Requeue {}),
    };
    ProtoTransition { kind: Some(kind) }
}

pub fn transition_from_proto(transition: Option<ProtoTransition>) -> Result<Transition> {
    match transition.and_then(|t| t.kind) {
        Some(Kind::Claim(claim)) => Ok(Transition::Claim {
            worker: claim.worker,
        }),
        Some(Kind::Complete(complete)) => Ok(Transition::Complete {
            result: complete.result,
        }),
        Some(Kind::Fail(fail)) => Ok(Transition::Fail { error: fail.error }),
        Some(Kind::Requeue(_)) => Ok(Transition::Requeue),
        None => Err(PoolError::Internal("Missing transition".to_string())),
    }
}
