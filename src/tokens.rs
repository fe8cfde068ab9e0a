use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{StoreError, TokenError};
use crate::models::token::VerificationToken;
use crate::store::{read_json, write_json};

const TOKEN_LEN: usize = 48;

/// Issues and consumes single-use verification tokens. Tokens are persisted
/// one file per token under `data/tokens/`; a mutex serializes lookups and
/// mutations so a token can be consumed exactly once.
pub struct TokenService {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl TokenService {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("tokens"),
            lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn path_for(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{token}.json"))
    }

    /// Generates a cryptographically random token bound to `(email,
    /// review_id)` and valid for `expiry_hours` from now.
    pub async fn create_verification_token(
        &self,
        email: &str,
        review_id: &str,
        expiry_hours: i64,
    ) -> Result<String, TokenError> {
        let token: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let now = Utc::now();
        let record = VerificationToken {
            token: token.clone(),
            email: email.to_string(),
            review_id: review_id.to_string(),
            created_at: now,
            expires_at: now + Duration::hours(expiry_hours),
            used: false,
        };
        let _guard = self.lock.lock().await;
        write_json(&self.path_for(&token), &record).await?;
        Ok(token)
    }

    /// Checks a token without consuming it. Fails with `Invalid` for unknown
    /// tokens, `Expired` past the deadline and `AlreadyUsed` after a
    /// successful consume, in that order.
    pub async fn validate_token(&self, token: &str) -> Result<VerificationToken, TokenError> {
        let _guard = self.lock.lock().await;
        self.lookup(token).await
    }

    pub async fn mark_token_as_used(&self, token: &str) -> Result<(), TokenError> {
        let _guard = self.lock.lock().await;
        self.mark(token).await
    }

    /// Validate, check the claimed email against the binding, and mark used,
    /// all under one lock: the winner of two concurrent consumes gets the
    /// binding, the loser gets `ALREADY_USED`. A mismatched email fails
    /// before the mark, so the token stays valid for the rightful owner.
    pub async fn consume_token(
        &self,
        token: &str,
        email: &str,
    ) -> Result<VerificationToken, TokenError> {
        let _guard = self.lock.lock().await;
        let record = self.lookup(token).await?;
        if !record.email.eq_ignore_ascii_case(email) {
            return Err(TokenError::EmailMismatch);
        }
        self.mark(token).await?;
        Ok(record)
    }

    /// Reads the raw token record regardless of validity. Used to recover the
    /// review binding of an expired token.
    pub async fn peek_token(&self, token: &str) -> Option<VerificationToken> {
        if !is_token_shaped(token) {
            return None;
        }
        read_json(&self.path_for(token)).await.ok().flatten()
    }

    async fn lookup(&self, token: &str) -> Result<VerificationToken, TokenError> {
        if !is_token_shaped(token) {
            return Err(TokenError::Invalid);
        }
        let record: VerificationToken = read_json(&self.path_for(token))
            .await?
            .ok_or(TokenError::Invalid)?;
        if record.is_expired() {
            return Err(TokenError::Expired);
        }
        if record.used {
            return Err(TokenError::AlreadyUsed);
        }
        Ok(record)
    }

    async fn mark(&self, token: &str) -> Result<(), TokenError> {
        if !is_token_shaped(token) {
            return Err(TokenError::Invalid);
        }
        let path = self.path_for(token);
        let mut record: VerificationToken =
            read_json(&path).await?.ok_or(TokenError::Invalid)?;
        record.used = true;
        write_json(&path, &record).await?;
        Ok(())
    }
}

// Tokens are generated alphanumeric, so anything else cannot be one of ours
// and must not touch the filesystem.
fn is_token_shaped(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric())
}
