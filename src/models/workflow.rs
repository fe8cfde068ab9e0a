use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of a review through verification and moderation. One state file
/// per review under `data/workflows/`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initiated,
    EmailSent,
    EmailFailed,
    Verified,
    AdminNotified,
    Approved,
    Rejected,
    Expired,
    Error,
}

impl WorkflowStatus {
    /// Terminal workflows are immutable; the cleanup sweep may delete them
    /// once they age past the retention window.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Approved
                | WorkflowStatus::Rejected
                | WorkflowStatus::Expired
                | WorkflowStatus::Error
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub step: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation_notes: Option<String>,
    #[serde(default)]
    pub admin_notified: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub review_id: String,
    pub email: String,
    pub status: WorkflowStatus,
    pub current_step: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(default)]
    pub errors: Vec<StepError>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

impl WorkflowState {
    pub fn new(review_id: &str, email: &str) -> Self {
        let now = Utc::now();
        Self {
            review_id: review_id.to_string(),
            email: email.to_string(),
            status: WorkflowStatus::Initiated,
            current_step: "initiated".to_string(),
            created_at: now,
            updated_at: now,
            attempts: 1,
            errors: Vec::new(),
            metadata: WorkflowMetadata::default(),
        }
    }

    pub fn transition(&mut self, status: WorkflowStatus, step: &str) {
        self.status = status;
        self.current_step = step.to_string();
        self.updated_at = Utc::now();
    }

    pub fn push_error(&mut self, step: &str, message: impl Into<String>) {
        self.errors.push(StepError {
            step: step.to_string(),
            message: message.into(),
            at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }
}
