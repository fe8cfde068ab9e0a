use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::EmailError;
use crate::models::review::Review;
use crate::store::{read_json, write_json};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Delivery backend. The production implementation talks to Resend; the
/// in-memory one records mail for local runs and tests.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Delivers one message and returns the provider message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError>;
}

pub struct ResendTransport {
    client: reqwest::Client,
    api_key: String,
}

impl ResendTransport {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

#[async_trait]
impl EmailTransport for ResendTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError> {
        let payload = json!({
            "from": email.from,
            "to": [email.to],
            "reply_to": email.reply_to,
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
        });
        let response = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Transport(format!(
                "resend returned {status}: {body}"
            )));
        }
        let parsed: ResendResponse = response
            .json()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(parsed.id)
    }
}

/// Records mail instead of delivering it. Used when no `RESEND_API_KEY` is
/// configured, and by tests to inspect what would have been sent.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl MemoryTransport {
    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailTransport for MemoryTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError> {
        let mut sent = self.sent.lock().await;
        sent.push(email.clone());
        Ok(format!("mem-{}", sent.len()))
    }
}

/// Daily and monthly send counters, persisted to `data/email-counts.json`
/// and reset on date rollover.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EmailCounts {
    pub date: String,
    pub month: String,
    pub daily_sent: u32,
    pub monthly_sent: u32,
}

impl EmailCounts {
    fn for_instant(now: DateTime<Utc>) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            month: now.format("%Y-%m").to_string(),
            daily_sent: 0,
            monthly_sent: 0,
        }
    }

    fn rollover(&mut self, now: DateTime<Utc>) {
        let date = now.format("%Y-%m-%d").to_string();
        let month = now.format("%Y-%m").to_string();
        if self.month != month {
            self.month = month;
            self.monthly_sent = 0;
        }
        if self.date != date {
            self.date = date;
            self.daily_sent = 0;
        }
    }
}

/// Renders and sends the three workflow emails, enforcing the daily and
/// monthly send limits. Constructed once in `main` and shared by `Arc`; the
/// counter mutex is held across a send, so limit checks are not advisory.
pub struct EmailService {
    transport: Arc<dyn EmailTransport>,
    from: String,
    reply_to: String,
    admin_email: String,
    site_url: String,
    daily_limit: u32,
    monthly_limit: u32,
    token_expiry_hours: i64,
    counts_path: PathBuf,
    counts: Mutex<EmailCounts>,
    audit: AuditLog,
    error_log: AuditLog,
}

impl EmailService {
    pub async fn new(
        config: &Config,
        transport: Arc<dyn EmailTransport>,
    ) -> Result<Self, EmailError> {
        let audit_dir = config.data_dir.join("audit");
        tokio::fs::create_dir_all(&audit_dir)
            .await
            .map_err(crate::error::StoreError::from)?;

        let counts_path = config.data_dir.join("email-counts.json");
        let counts = read_json::<EmailCounts>(&counts_path)
            .await?
            .unwrap_or_else(|| EmailCounts::for_instant(Utc::now()));

        Ok(Self {
            transport,
            from: config.from_email.clone(),
            reply_to: config.reply_to_email.clone(),
            admin_email: config.admin_email.clone(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            daily_limit: config.daily_limit,
            monthly_limit: config.monthly_limit,
            token_expiry_hours: config.token_expiry_hours,
            counts_path,
            counts: Mutex::new(counts),
            audit: AuditLog::new(&audit_dir, "emails.log"),
            error_log: AuditLog::new(&audit_dir, "email-errors.log"),
        })
    }

    pub fn verification_link(&self, token: &str, email: &str) -> String {
        format!(
            "{}/api/reviews/verify?token={}&email={}",
            self.site_url,
            token,
            urlencoding::encode(email)
        )
    }

    pub async fn send_verification_email(
        &self,
        to: &str,
        name: &str,
        review_id: &str,
        token: &str,
    ) -> Result<String, EmailError> {
        let link = self.verification_link(token, to);
        let safe_name = escape_html(name);
        let subject = "Please confirm your review".to_string();
        let text = format!(
            "Hi {name},\n\n\
             Thanks for submitting a review. Please confirm your email address \
             by opening the link below:\n\n{link}\n\n\
             The link expires in {hours} hours. If you did not submit a review, \
             you can ignore this email.\n",
            hours = self.token_expiry_hours,
        );
        let html = format!(
            "<p>Hi {safe_name},</p>\
             <p>Thanks for submitting a review. Please confirm your email address:</p>\
             <p><a href=\"{link}\">Confirm your review</a></p>\
             <p>The link expires in {hours} hours. If you did not submit a review, \
             you can ignore this email.</p>",
            hours = self.token_expiry_hours,
        );
        self.dispatch(
            "verification",
            review_id,
            OutgoingEmail {
                from: self.from.clone(),
                to: to.to_string(),
                reply_to: self.reply_to.clone(),
                subject,
                html,
                text,
            },
        )
        .await
    }

    pub async fn send_approval_email(&self, to: &str, name: &str) -> Result<String, EmailError> {
        let safe_name = escape_html(name);
        let subject = "Your review is now live".to_string();
        let text = format!(
            "Hi {name},\n\nYour review has been approved and is now published. \
             Thank you for taking the time to write it.\n"
        );
        let html = format!(
            "<p>Hi {safe_name},</p>\
             <p>Your review has been approved and is now published. \
             Thank you for taking the time to write it.</p>"
        );
        self.dispatch(
            "approval",
            "",
            OutgoingEmail {
                from: self.from.clone(),
                to: to.to_string(),
                reply_to: self.reply_to.clone(),
                subject,
                html,
                text,
            },
        )
        .await
    }

    pub async fn send_admin_notification(&self, review: &Review) -> Result<String, EmailError> {
        let subject = format!("New verified review from {}", review.name);
        let text = format!(
            "A review was verified and is waiting for moderation.\n\n\
             Review ID: {id}\nName: {name}\nEmail: {email}\nRelationship: {rel}\n\
             Rating: {rating}/5\n\n{testimonial}\n",
            id = review.id,
            name = review.name,
            email = review.email,
            rel = review.relationship,
            rating = review.rating,
            testimonial = review.testimonial,
        );
        let html = format!(
            "<p>A review was verified and is waiting for moderation.</p>\
             <ul><li>Review ID: {id}</li><li>Name: {name}</li>\
             <li>Email: {email}</li><li>Relationship: {rel}</li>\
             <li>Rating: {rating}/5</li></ul><blockquote>{testimonial}</blockquote>",
            id = escape_html(&review.id),
            name = escape_html(&review.name),
            email = escape_html(&review.email),
            rel = escape_html(&review.relationship),
            rating = review.rating,
            testimonial = escape_html(&review.testimonial),
        );
        self.dispatch(
            "admin_notification",
            &review.id,
            OutgoingEmail {
                from: self.from.clone(),
                to: self.admin_email.clone(),
                reply_to: self.reply_to.clone(),
                subject,
                html,
                text,
            },
        )
        .await
    }

    /// Checks limits, sends, then updates and persists the counters, all
    /// under the counter lock.
    async fn dispatch(
        &self,
        kind: &str,
        review_id: &str,
        email: OutgoingEmail,
    ) -> Result<String, EmailError> {
        let mut counts = self.counts.lock().await;
        counts.rollover(Utc::now());

        if counts.daily_sent >= self.daily_limit {
            let err = EmailError::DailyLimitExceeded;
            self.log_failure(kind, review_id, &email, &err).await;
            return Err(err);
        }
        if counts.monthly_sent >= self.monthly_limit {
            let err = EmailError::MonthlyLimitExceeded;
            self.log_failure(kind, review_id, &email, &err).await;
            return Err(err);
        }

        match self.transport.send(&email).await {
            Ok(message_id) => {
                counts.daily_sent += 1;
                counts.monthly_sent += 1;
                if let Err(e) = write_json(&self.counts_path, &*counts).await {
                    warn!("failed to persist email counts: {e}");
                }
                self.audit
                    .append(
                        "sent",
                        &json!({
                            "kind": kind,
                            "reviewId": review_id,
                            "to": email.to,
                            "subject": email.subject,
                            "messageId": message_id,
                        }),
                    )
                    .await;
                info!("sent {kind} email to {} ({message_id})", email.to);
                Ok(message_id)
            }
            Err(e) => {
                self.log_failure(kind, review_id, &email, &e).await;
                Err(e)
            }
        }
    }

    async fn log_failure(
        &self,
        kind: &str,
        review_id: &str,
        email: &OutgoingEmail,
        err: &EmailError,
    ) {
        error!("failed to send {kind} email to {}: {err}", email.to);
        self.error_log
            .append(
                "send_failed",
                &json!({
                    "kind": kind,
                    "reviewId": review_id,
                    "to": email.to,
                    "error": err.to_string(),
                }),
            )
            .await;
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
