use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Append-only newline-delimited JSON log under `data/audit/`. Appends are
/// best effort: a failed audit write is logged and never propagated, so it
/// cannot fail the operation being audited.
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(audit_dir: impl Into<PathBuf>, file_name: &str) -> Self {
        Self {
            path: audit_dir.into().join(file_name),
            lock: Mutex::new(()),
        }
    }

    pub async fn append<T: Serialize>(&self, event: &str, details: &T) {
        let entry = json!({
            "at": Utc::now(),
            "event": event,
            "details": details,
        });
        let mut line = entry.to_string();
        line.push('\n');

        let _guard = self.lock.lock().await;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;
        match file {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!("failed to append audit line to {}: {e}", self.path.display());
                } else if let Err(e) = file.flush().await {
                    // the write buffers; without the flush the line can vanish
                    warn!("failed to flush audit line to {}: {e}", self.path.display());
                }
            }
            Err(e) => warn!("failed to open audit log {}: {e}", self.path.display()),
        }
    }
}
