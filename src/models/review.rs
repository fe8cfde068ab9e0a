use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Moderation state of a review. Each state maps to a directory under
/// `data/reviews/`; a review file lives in exactly one of them.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Verified,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub const ALL: [ReviewStatus; 4] = [
        ReviewStatus::Pending,
        ReviewStatus::Verified,
        ReviewStatus::Approved,
        ReviewStatus::Rejected,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Verified => "verified",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    /// Terminal reviews are never updated in place again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewStatus::Approved | ReviewStatus::Rejected)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub name: String,
    /// Reviewer email. Private: never exposed through the display API.
    pub email: String,
    pub testimonial: String,
    pub rating: u8,
    pub relationship: String,
    pub status: ReviewStatus,
    #[serde(default)]
    pub featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderated_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn from_submission(submission: ReviewSubmission) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: submission.name,
            email: submission.email,
            testimonial: submission.testimonial,
            rating: submission.rating,
            relationship: submission.relationship,
            status: ReviewStatus::Pending,
            featured: submission.featured,
            ip_address: submission.ip_address,
            user_agent: submission.user_agent,
            submitted_at: Utc::now(),
            verified_at: None,
            moderated_at: None,
        }
    }
}

/// Body of `POST /api/reviews/submit`. Request metadata is filled in by the
/// handler, never taken from the client payload.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    pub name: String,
    pub email: String,
    pub testimonial: String,
    pub rating: u8,
    pub relationship: String,
    #[serde(default)]
    pub featured: bool,
    #[serde(skip)]
    pub ip_address: Option<String>,
    #[serde(skip)]
    pub user_agent: Option<String>,
}

impl ReviewSubmission {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err("a valid email is required".into());
        }
        if self.testimonial.trim().is_empty() {
            return Err("testimonial is required".into());
        }
        if !(1..=5).contains(&self.rating) {
            return Err("rating must be between 1 and 5".into());
        }
        Ok(())
    }
}

/// Privacy-filtered projection of an approved review. Recomputed on every
/// read; carries no email, IP address or user agent.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicReview {
    pub id: String,
    pub name: String,
    pub testimonial: String,
    pub rating: u8,
    pub relationship: String,
    pub featured: bool,
    pub submitted_at: DateTime<Utc>,
}

impl From<&Review> for PublicReview {
    fn from(review: &Review) -> Self {
        Self {
            id: review.id.clone(),
            name: review.name.clone(),
            testimonial: review.testimonial.clone(),
            rating: review.rating,
            relationship: review.relationship.clone(),
            featured: review.featured,
            submitted_at: review.submitted_at,
        }
    }
}
