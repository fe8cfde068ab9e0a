use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single-use, time-bound credential proving email ownership for one review
/// submission. Bound to a `(email, review_id)` pair at creation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerificationToken {
    pub token: String,
    pub email: String,
    pub review_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl VerificationToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
