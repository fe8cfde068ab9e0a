use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::models::review::{Review, ReviewStatus};

/// Writes `value` as JSON through a temp file + rename so a reader never
/// observes a half-written document.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &body).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Reads a JSON document. A missing file is `None`; a corrupt file is logged
/// and treated as absent rather than fatal.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("discarding corrupt JSON at {}: {e}", path.display());
            Ok(None)
        }
    }
}

/// Identifiers become file names, so anything outside [A-Za-z0-9-] is refused.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Review persistence: one JSON file per review under
/// `data/reviews/<status>/<id>.json`. A mutex serializes writers; combined
/// with the rename-based writes this keeps concurrent requests from losing
/// updates to the same review.
pub struct ReviewStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ReviewStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("reviews"),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        for status in ReviewStatus::ALL {
            fs::create_dir_all(self.root.join(status.dir_name())).await?;
        }
        Ok(())
    }

    fn path_for(&self, status: ReviewStatus, id: &str) -> PathBuf {
        self.root.join(status.dir_name()).join(format!("{id}.json"))
    }

    pub async fn save(&self, review: &Review) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.path_for(review.status, &review.id), review).await
    }

    /// Looks a review up by id across all status directories.
    pub async fn load(&self, id: &str) -> Result<Option<Review>, StoreError> {
        if !is_safe_id(id) {
            return Ok(None);
        }
        for status in ReviewStatus::ALL {
            if let Some(review) = read_json::<Review>(&self.path_for(status, id)).await? {
                return Ok(Some(review));
            }
        }
        Ok(None)
    }

    /// Moves a review between status directories: write to the target first,
    /// then remove the source file.
    pub async fn move_to(&self, review: &mut Review, status: ReviewStatus) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let old_path = self.path_for(review.status, &review.id);
        review.status = status;
        let new_path = self.path_for(status, &review.id);
        write_json(&new_path, review).await?;
        if old_path != new_path {
            if let Err(e) = fs::remove_file(&old_path).await {
                if e.kind() != ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    pub async fn list(&self, status: ReviewStatus) -> Result<Vec<Review>, StoreError> {
        let dir = self.root.join(status.dir_name());
        let mut entries = fs::read_dir(&dir).await?;
        let mut reviews = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(review) = read_json::<Review>(&path).await? {
                reviews.push(review);
            }
        }
        Ok(reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::review::ReviewSubmission;
    use tempfile::tempdir;

    fn submission(name: &str, rating: u8) -> ReviewSubmission {
        ReviewSubmission {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            testimonial: "Great to work with".into(),
            rating,
            relationship: "colleague".into(),
            featured: false,
            ip_address: None,
            user_agent: None,
        }
    }

    async fn store(dir: &tempfile::TempDir) -> ReviewStore {
        let store = ReviewStore::new(dir.path());
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        let review = Review::from_submission(submission("Alice", 5));
        store.save(&review).await.unwrap();

        let loaded = store.load(&review.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, review.id);
        assert_eq!(loaded.status, ReviewStatus::Pending);
    }

    #[tokio::test]
    async fn move_to_changes_directory() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        let mut review = Review::from_submission(submission("Alice", 5));
        store.save(&review).await.unwrap();

        store.move_to(&mut review, ReviewStatus::Verified).await.unwrap();
        assert_eq!(review.status, ReviewStatus::Verified);

        let pending = store.list(ReviewStatus::Pending).await.unwrap();
        assert!(pending.is_empty());
        let verified = store.list(ReviewStatus::Verified).await.unwrap();
        assert_eq!(verified.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        let review = Review::from_submission(submission("Alice", 5));
        store.save(&review).await.unwrap();

        std::fs::write(
            dir.path().join("reviews/pending/broken.json"),
            "{not json at all",
        )
        .unwrap();

        let pending = store.list(ReviewStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(store.load("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unsafe_ids_never_resolve() {
        let dir = tempdir().unwrap();
        let store = store(&dir).await;
        assert!(store.load("../../etc/passwd").await.unwrap().is_none());
        assert!(store.load("").await.unwrap().is_none());
    }
}
