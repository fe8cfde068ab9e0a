use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::email::EmailService;
use crate::error::{StoreError, TokenError, WorkflowError};
use crate::models::review::{Review, ReviewStatus};
use crate::models::workflow::{WorkflowState, WorkflowStatus};
use crate::store::{is_safe_id, read_json, write_json, ReviewStore};
use crate::tokens::TokenService;

/// Drives a review through verification and moderation:
/// `initiated -> email_sent|email_failed -> verified -> admin_notified ->
/// approved|rejected`, with `expired`/`error` reachable from any step.
/// State is persisted as one JSON file per review under `data/workflows/`
/// and rewritten in full after every transition.
pub struct WorkflowManager {
    dir: PathBuf,
    store: Arc<ReviewStore>,
    tokens: Arc<TokenService>,
    email: Arc<EmailService>,
    token_expiry_hours: i64,
    audit: AuditLog,
    lock: Mutex<()>,
}

impl WorkflowManager {
    pub fn new(
        data_dir: &Path,
        store: Arc<ReviewStore>,
        tokens: Arc<TokenService>,
        email: Arc<EmailService>,
        token_expiry_hours: i64,
    ) -> Self {
        Self {
            dir: data_dir.join("workflows"),
            store,
            tokens,
            email,
            token_expiry_hours,
            audit: AuditLog::new(data_dir.join("audit"), "workflows.log"),
            lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn path_for(&self, review_id: &str) -> PathBuf {
        self.dir.join(format!("{review_id}.json"))
    }

    pub async fn load(&self, review_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        if !is_safe_id(review_id) {
            return Ok(None);
        }
        read_json(&self.path_for(review_id)).await
    }

    async fn persist(&self, state: &WorkflowState) -> Result<(), StoreError> {
        write_json(&self.path_for(&state.review_id), state).await
    }

    async fn log_transition(&self, state: &WorkflowState) {
        self.audit
            .append(
                "transition",
                &json!({
                    "reviewId": state.review_id,
                    "status": state.status,
                    "step": state.current_step,
                }),
            )
            .await;
    }

    /// Persists the pending review, creates a verification token and attempts
    /// the verification email. The returned state is `email_sent` or
    /// `email_failed`; a failed send is recorded, not raised, so the
    /// submission itself still succeeds.
    pub async fn initiate_verification(&self, review: Review) -> Result<WorkflowState, WorkflowError> {
        self.store.save(&review).await?;

        let mut state = WorkflowState::new(&review.id, &review.email);
        self.persist(&state).await?;
        self.log_transition(&state).await;

        let token = match self
            .tokens
            .create_verification_token(&review.email, &review.id, self.token_expiry_hours)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                state.push_error("create_token", e.to_string());
                state.transition(WorkflowStatus::Error, "create_token");
                self.persist(&state).await?;
                self.log_transition(&state).await;
                return Err(e.into());
            }
        };
        state.metadata.token = Some(token.clone());

        match self
            .email
            .send_verification_email(&review.email, &review.name, &review.id, &token)
            .await
        {
            Ok(message_id) => {
                state.metadata.verification_message_id = Some(message_id);
                state.transition(WorkflowStatus::EmailSent, "send_verification_email");
            }
            Err(e) => {
                state.push_error("send_verification_email", e.to_string());
                state.transition(WorkflowStatus::EmailFailed, "send_verification_email");
            }
        }
        self.persist(&state).await?;
        self.log_transition(&state).await;
        info!(
            "initiated verification for review {} ({})",
            state.review_id, state.current_step
        );
        Ok(state)
    }

    /// Consumes the token, moves the review `pending -> verified` and then
    /// notifies the admin. The admin notification is best effort: its failure
    /// is recorded on the state but the verification stands.
    pub async fn process_verification(
        &self,
        token: &str,
        email: &str,
    ) -> Result<WorkflowState, WorkflowError> {
        let _guard = self.lock.lock().await;

        let record = match self.tokens.consume_token(token, email).await {
            Ok(record) => record,
            Err(TokenError::Expired) => {
                self.mark_expired(token).await;
                return Err(TokenError::Expired.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = self
            .load(&record.review_id)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound)?;

        let mut review = match self.store.load(&record.review_id).await? {
            Some(review) if review.status == ReviewStatus::Pending => review,
            Some(_) => return Err(WorkflowError::InvalidState(state.status)),
            None => {
                state.push_error("process_verification", "review file missing");
                state.transition(WorkflowStatus::Error, "process_verification");
                self.persist(&state).await?;
                self.log_transition(&state).await;
                return Err(WorkflowError::ReviewNotFound);
            }
        };

        review.verified_at = Some(Utc::now());
        self.store.move_to(&mut review, ReviewStatus::Verified).await?;
        state.transition(WorkflowStatus::Verified, "process_verification");
        self.persist(&state).await?;
        self.log_transition(&state).await;

        match self.email.send_admin_notification(&review).await {
            Ok(_) => {
                state.metadata.admin_notified = true;
                state.transition(WorkflowStatus::AdminNotified, "send_admin_notification");
            }
            Err(e) => {
                warn!(
                    "admin notification for review {} failed: {e}",
                    state.review_id
                );
                state.push_error("send_admin_notification", e.to_string());
            }
        }
        self.persist(&state).await?;
        self.log_transition(&state).await;
        info!("review {} verified", state.review_id);
        Ok(state)
    }

    // A consume that failed with Expired still has a readable record; use it
    // to park the workflow in the expired state.
    async fn mark_expired(&self, token: &str) {
        let Some(record) = self.tokens.peek_token(token).await else {
            return;
        };
        match self.load(&record.review_id).await {
            Ok(Some(mut state)) if !state.status.is_terminal() => {
                state.push_error("process_verification", "verification token expired");
                state.transition(WorkflowStatus::Expired, "process_verification");
                if let Err(e) = self.persist(&state).await {
                    warn!("failed to persist expired workflow {}: {e}", state.review_id);
                    return;
                }
                self.log_transition(&state).await;
            }
            Ok(_) => {}
            Err(e) => warn!("failed to load workflow for expired token: {e}"),
        }
    }

    /// Terminal transition. Approval moves the review to `approved` and sends
    /// the approval email; rejection moves it to `rejected`. Either way the
    /// workflow is immutable afterwards except for cleanup deletion.
    pub async fn process_approval(
        &self,
        review_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<WorkflowState, WorkflowError> {
        let _guard = self.lock.lock().await;

        let mut state = self
            .load(review_id)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound)?;
        if !matches!(
            state.status,
            WorkflowStatus::Verified | WorkflowStatus::AdminNotified
        ) {
            return Err(WorkflowError::InvalidState(state.status));
        }

        let mut review = self
            .store
            .load(review_id)
            .await?
            .ok_or(WorkflowError::ReviewNotFound)?;
        review.moderated_at = Some(Utc::now());
        let target = if approved {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Rejected
        };
        self.store.move_to(&mut review, target).await?;

        state.metadata.moderation_notes = notes;
        if approved {
            match self.email.send_approval_email(&review.email, &review.name).await {
                Ok(message_id) => state.metadata.approval_message_id = Some(message_id),
                Err(e) => {
                    // the approval stands even if the notification fails
                    warn!("approval email for review {review_id} failed: {e}");
                    state.push_error("send_approval_email", e.to_string());
                }
            }
            state.transition(WorkflowStatus::Approved, "process_approval");
        } else {
            state.transition(WorkflowStatus::Rejected, "process_approval");
        }
        self.persist(&state).await?;
        self.log_transition(&state).await;
        info!(
            "review {review_id} {}",
            if approved { "approved" } else { "rejected" }
        );
        Ok(state)
    }

    /// Deletes workflow files in terminal states older than `max_age`.
    /// Corrupted files are deleted unconditionally. Returns the number of
    /// files removed.
    pub async fn cleanup_old_workflows(&self, max_age: Duration) -> Result<u32, WorkflowError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0u32;

        let mut entries = fs::read_dir(&self.dir).await.map_err(StoreError::from)?;
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::from)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<WorkflowState>(&path).await? {
                Some(state) => {
                    if state.status.is_terminal() && state.updated_at < cutoff {
                        fs::remove_file(&path).await.map_err(StoreError::from)?;
                        removed += 1;
                    }
                }
                None => {
                    fs::remove_file(&path).await.map_err(StoreError::from)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("cleanup removed {removed} workflow files");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::email::{EmailTransport, MemoryTransport, OutgoingEmail};
    use crate::error::EmailError;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FailingTransport;

    #[async_trait]
    impl EmailTransport for FailingTransport {
        async fn send(&self, _email: &OutgoingEmail) -> Result<String, EmailError> {
            Err(EmailError::Transport("connection refused".into()))
        }
    }

    fn sample_review() -> Review {
        Review {
            id: "r1".into(),
            name: "Alice".into(),
            email: "a@b.com".into(),
            testimonial: "Great work".into(),
            rating: 5,
            relationship: "colleague".into(),
            status: ReviewStatus::Pending,
            featured: false,
            ip_address: None,
            user_agent: None,
            submitted_at: Utc::now(),
            verified_at: None,
            moderated_at: None,
        }
    }

    async fn manager_with(
        dir: &tempfile::TempDir,
        transport: Arc<dyn EmailTransport>,
        token_expiry_hours: i64,
    ) -> WorkflowManager {
        let config = Config::with_data_dir(dir.path());
        let store = Arc::new(ReviewStore::new(dir.path()));
        store.init().await.unwrap();
        let tokens = Arc::new(TokenService::new(dir.path()));
        tokens.init().await.unwrap();
        let email = Arc::new(EmailService::new(&config, transport).await.unwrap());
        let manager = WorkflowManager::new(dir.path(), store, tokens, email, token_expiry_hours);
        manager.init().await.unwrap();
        manager
    }

    fn logged_statuses(dir: &tempfile::TempDir) -> Vec<String> {
        let raw = std::fs::read_to_string(dir.path().join("audit/workflows.log")).unwrap();
        raw.lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["details"]["status"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn verification_transitions_in_order() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport.clone(), 24).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::EmailSent);
        let persisted = manager.load("r1").await.unwrap().unwrap();
        assert_eq!(persisted.status, WorkflowStatus::EmailSent);

        let token = persisted.metadata.token.clone().unwrap();
        let state = manager.process_verification(&token, "a@b.com").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::AdminNotified);
        assert!(state.metadata.admin_notified);

        // the persisted trail must pass through email_sent then verified
        let statuses = logged_statuses(&dir);
        assert_eq!(
            statuses,
            vec!["initiated", "email_sent", "verified", "admin_notified"]
        );

        // review moved to the verified directory
        let verified = manager.store.list(ReviewStatus::Verified).await.unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].id, "r1");

        // two emails: verification + admin notification
        assert_eq!(transport.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_send_marks_email_failed() {
        let dir = tempdir().unwrap();
        let manager = manager_with(&dir, Arc::new(FailingTransport), 24).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::EmailFailed);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].step, "send_verification_email");

        let persisted = manager.load("r1").await.unwrap().unwrap();
        assert_eq!(persisted.status, WorkflowStatus::EmailFailed);
    }

    #[tokio::test]
    async fn token_is_single_use_across_verification() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport, 24).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        let token = state.metadata.token.unwrap();

        manager.process_verification(&token, "a@b.com").await.unwrap();
        let err = manager
            .process_verification(&token, "a@b.com")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Token(TokenError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn mismatched_email_is_rejected_without_burning_the_token() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport, 24).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        let token = state.metadata.token.unwrap();

        let err = manager
            .process_verification(&token, "other@b.com")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Token(TokenError::EmailMismatch)
        ));

        // the legitimate click still verifies afterwards
        let state = manager.process_verification(&token, "a@b.com").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::AdminNotified);
    }

    #[tokio::test]
    async fn expired_token_parks_workflow_as_expired() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport, 0).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        let token = state.metadata.token.unwrap();

        let err = manager
            .process_verification(&token, "a@b.com")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Token(TokenError::Expired)));

        let persisted = manager.load("r1").await.unwrap().unwrap();
        assert_eq!(persisted.status, WorkflowStatus::Expired);
    }

    #[tokio::test]
    async fn approval_is_terminal() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport.clone(), 24).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        let token = state.metadata.token.unwrap();
        manager.process_verification(&token, "a@b.com").await.unwrap();

        let state = manager
            .process_approval("r1", true, Some("looks genuine".into()))
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Approved);
        assert!(state.metadata.approval_message_id.is_some());
        assert_eq!(state.metadata.moderation_notes.as_deref(), Some("looks genuine"));

        let approved = manager.store.list(ReviewStatus::Approved).await.unwrap();
        assert_eq!(approved.len(), 1);

        // a second moderation attempt must fail
        let err = manager.process_approval("r1", false, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn rejection_moves_review_and_sends_no_email() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport.clone(), 24).await;

        let state = manager.initiate_verification(sample_review()).await.unwrap();
        let token = state.metadata.token.unwrap();
        manager.process_verification(&token, "a@b.com").await.unwrap();

        let sends_before = transport.sent().await.len();
        let state = manager.process_approval("r1", false, None).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Rejected);
        assert_eq!(transport.sent().await.len(), sends_before);

        let rejected = manager.store.list(ReviewStatus::Rejected).await.unwrap();
        assert_eq!(rejected.len(), 1);
    }

    #[tokio::test]
    async fn approval_requires_prior_verification() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport, 24).await;

        manager.initiate_verification(sample_review()).await.unwrap();
        let err = manager.process_approval("r1", true, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidState(_)));
    }

    #[tokio::test]
    async fn cleanup_removes_old_terminal_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::default());
        let manager = manager_with(&dir, transport, 24).await;

        // old terminal workflow
        let mut old = WorkflowState::new("old-1", "a@b.com");
        old.transition(WorkflowStatus::Approved, "process_approval");
        old.updated_at = Utc::now() - Duration::days(45);
        write_json(&manager.path_for("old-1"), &old).await.unwrap();

        // recent non-terminal workflow
        let fresh = WorkflowState::new("fresh-1", "c@d.com");
        write_json(&manager.path_for("fresh-1"), &fresh).await.unwrap();

        // corrupt file
        std::fs::write(dir.path().join("workflows/garbage.json"), "{oops").unwrap();

        let removed = manager
            .cleanup_old_workflows(Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(manager.load("old-1").await.unwrap().is_none());
        assert!(manager.load("fresh-1").await.unwrap().is_some());
    }
}
