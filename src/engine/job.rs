use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    /// Rows written successfully.
    pub processed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Index of the next row to attempt.
    pub fn cursor(&self) -> usize {
        self.processed + self.failed
    }

    pub fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).round() as u32
    }

    /// Status a job gets once every row has been attempted.
    pub fn final_status(&self) -> JobStatus {
        if self.failed == 0 {
            JobStatus::Completed
        } else if self.processed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadJob {
    pub id: JobId,
    pub file_name: String,
    pub branch_id: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    pub fn new(file_name: &str, branch_id: &str, total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            branch_id: branch_id.to_string(),
            status: JobStatus::Pending,
            progress: Progress::new(total),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            completed_at: None,
        }
    }

    pub fn can_resume(&self) -> bool {
        self.status == JobStatus::Paused
    }
}
