//! Offline change queue
//!
//! Edits made while offline exist only locally until re-submitted via
//! Upload. Each queued change is persisted as one JSON file under the queue
//! directory, named so a lexicographic sort restores submission order across
//! restarts.

use grid_common::batch::{SyncUploadRequest, UploadChange};
use grid_common::Result;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

/// Manages pending changes when offline
pub struct OfflineQueue {
    queued: VecDeque<UploadChange>,
    queue_dir: PathBuf,
    seq: u64,
}

impl OfflineQueue {
    pub fn new(queue_dir: PathBuf) -> Self {
        Self {
            queued: VecDeque::new(),
            queue_dir,
            seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Append a change and persist it to disk
    pub fn enqueue(&mut self, change: UploadChange) -> Result<()> {
        fs::create_dir_all(&self.queue_dir)?;
        let file_path = self.queue_dir.join(format!(
            "change_{:020}_{:06}.json",
            change.client_timestamp, self.seq
        ));
        self.seq += 1;
        fs::write(&file_path, serde_json::to_vec_pretty(&change)?)?;

        tracing::debug!(change = %change.id, path = ?file_path, "queued offline change");
        self.queued.push_back(change);
        Ok(())
    }

    /// Reload queued changes persisted by an earlier session.
    /// Returns the number of changes loaded.
    pub fn load_from_disk(&mut self) -> Result<usize> {
        if !self.queue_dir.exists() {
            return Ok(0);
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.queue_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        files.sort();

        let mut loaded = 0;
        for path in files {
            let change: UploadChange = serde_json::from_slice(&fs::read(&path)?)?;
            self.queued.push_back(change);
            loaded += 1;
        }
        self.seq += loaded as u64;

        if loaded > 0 {
            tracing::info!(count = loaded, "loaded pending offline changes from disk");
        }
        Ok(loaded)
    }

    /// Package everything queued into an Upload request and clear the queue,
    /// including its on-disk copy. Returns `None` when nothing is queued.
    pub fn drain_into_request(
        &mut self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<SyncUploadRequest>> {
        if self.queued.is_empty() {
            return Ok(None);
        }

        let changes: Vec<UploadChange> = self.queued.drain(..).collect();
        self.clear_disk()?;
        tracing::info!(count = changes.len(), "drained offline queue for upload");

        Ok(Some(SyncUploadRequest {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            changes,
        }))
    }

    /// Drop all queued changes, in memory and on disk
    pub fn clear(&mut self) -> Result<()> {
        self.queued.clear();
        self.clear_disk()
    }

    fn clear_disk(&self) -> Result<()> {
        if self.queue_dir.exists() {
            fs::remove_dir_all(&self.queue_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_common::ChangeOperation;
    use serde_json::json;

    fn change(id: &str, ts: i64) -> UploadChange {
        UploadChange {
            id: id.to_string(),
            table_id: "t".to_string(),
            row_id: "r1".to_string(),
            column: Some("total".to_string()),
            operation: ChangeOperation::Update,
            old_value: Some(json!(10)),
            new_value: Some(json!(12)),
            base_version: 1,
            client_timestamp: ts,
            checksum: None,
        }
    }

    #[test]
    fn test_enqueue_and_drain() {
        let temp = tempfile::tempdir().unwrap();
        let mut queue = OfflineQueue::new(temp.path().join("offline"));

        queue.enqueue(change("c1", 100)).unwrap();
        queue.enqueue(change("c2", 200)).unwrap();
        assert_eq!(queue.len(), 2);

        let request = queue.drain_into_request("user_a", "dev_1").unwrap().unwrap();
        assert_eq!(request.user_id, "user_a");
        assert_eq!(request.changes.len(), 2);
        assert_eq!(request.changes[0].id, "c1");
        assert!(queue.is_empty());

        // nothing left on disk either
        assert!(queue.drain_into_request("user_a", "dev_1").unwrap().is_none());
    }

    #[test]
    fn test_reload_preserves_submission_order() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("offline");

        {
            let mut queue = OfflineQueue::new(dir.clone());
            queue.enqueue(change("c1", 100)).unwrap();
            queue.enqueue(change("c2", 100)).unwrap(); // same timestamp
            queue.enqueue(change("c3", 300)).unwrap();
        }

        let mut reloaded = OfflineQueue::new(dir);
        assert_eq!(reloaded.load_from_disk().unwrap(), 3);
        let request = reloaded.drain_into_request("u", "d").unwrap().unwrap();
        let ids: Vec<&str> = request.changes.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
    }

    #[test]
    fn test_load_from_missing_dir_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let mut queue = OfflineQueue::new(temp.path().join("never_created"));
        assert_eq!(queue.load_from_disk().unwrap(), 0);
    }
}
