//! In-memory dedup backend
//!
//! Claims live in a process-local map with the same expiry semantics as the
//! Redis backend (event timestamp + TTL). Suitable for local development,
//! single-process deployments, and tests; claims do not survive a restart.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use crate::utils::tsid::Tsid;

use super::backend::{ClaimOutcome, DedupBackend, DedupEntry, dedup_key, expires_at_millis};
use super::error::DedupError;

/// In-memory dedup backend
#[derive(Default)]
pub struct MemoryDedupStore {
    entries: Mutex<HashMap<String, DedupEntry>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries while holding the lock.
    fn purge_expired(entries: &mut HashMap<String, DedupEntry>) {
        let now = Utc::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Look up a live entry (test/diagnostic helper).
    #[allow(dead_code)]
    pub fn get(&self, project_id: Tsid, event_id: Tsid) -> Option<DedupEntry> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries);
        entries.get(&dedup_key(project_id, event_id)).cloned()
    }
}

#[async_trait]
impl DedupBackend for MemoryDedupStore {
    async fn claim(
        &self,
        project_id: Tsid,
        batch_id: Tsid,
        ids: &[Tsid],
        ttl: Duration,
    ) -> Result<ClaimOutcome, DedupError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries);

        let mut outcome = ClaimOutcome::default();
        for id in ids {
            let key = dedup_key(project_id, *id);
            if entries.contains_key(&key) {
                outcome.duplicates.push(*id);
                continue;
            }
            let expires_at = Utc
                .timestamp_millis_opt(expires_at_millis(*id, ttl))
                .single()
                .unwrap_or_default();
            entries.insert(
                key,
                DedupEntry {
                    event_id: *id,
                    batch_id,
                    project_id,
                    first_seen_at: Utc::now(),
                    expires_at,
                },
            );
            outcome.claimed.push(*id);
        }
        Ok(outcome)
    }

    async fn release(&self, project_id: Tsid, ids: &[Tsid]) -> Result<(), DedupError> {
        let mut entries = self.entries.lock();
        for id in ids {
            entries.remove(&dedup_key(project_id, *id));
        }
        Ok(())
    }

    async fn exists(&self, project_id: Tsid, id: Tsid) -> Result<bool, DedupError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries);
        Ok(entries.contains_key(&dedup_key(project_id, id)))
    }

    async fn count_by_project(&self, project_id: Tsid) -> Result<u64, DedupError> {
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries);
        Ok(entries
            .values()
            .filter(|entry| entry.project_id == project_id)
            .count() as u64)
    }

    async fn health_check(&self) -> Result<(), DedupError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60 * 60);

    #[tokio::test]
    async fn test_claim_partitions_ids() {
        let store = MemoryDedupStore::new();
        let project = Tsid::generate();
        let ids = [Tsid::generate(), Tsid::generate()];

        let outcome = store
            .claim(project, Tsid::generate(), &ids, TTL)
            .await
            .unwrap();
        assert_eq!(outcome.claimed.len() + outcome.duplicates.len(), ids.len());
        assert_eq!(outcome.claimed, ids.to_vec());
        assert!(outcome.duplicates.is_empty());
    }

    #[tokio::test]
    async fn test_second_claim_is_duplicate() {
        let store = MemoryDedupStore::new();
        let project = Tsid::generate();
        let ids = [Tsid::generate(), Tsid::generate()];

        store
            .claim(project, Tsid::generate(), &ids, TTL)
            .await
            .unwrap();
        let second = store
            .claim(project, Tsid::generate(), &ids, TTL)
            .await
            .unwrap();
        assert!(second.claimed.is_empty());
        assert_eq!(second.duplicates, ids.to_vec());
    }

    #[tokio::test]
    async fn test_release_then_reclaim() {
        let store = MemoryDedupStore::new();
        let project = Tsid::generate();
        let id = Tsid::generate();

        store
            .claim(project, Tsid::generate(), &[id], TTL)
            .await
            .unwrap();
        store.release(project, &[id]).await.unwrap();

        let again = store
            .claim(project, Tsid::generate(), &[id], TTL)
            .await
            .unwrap();
        assert_eq!(again.claimed, vec![id]);
    }

    #[tokio::test]
    async fn test_in_batch_self_duplicate() {
        let store = MemoryDedupStore::new();
        let project = Tsid::generate();
        let id = Tsid::generate();

        let outcome = store
            .claim(project, Tsid::generate(), &[id, id, id], TTL)
            .await
            .unwrap();
        assert_eq!(outcome.claimed, vec![id]);
        assert_eq!(outcome.duplicates, vec![id, id]);
    }

    #[tokio::test]
    async fn test_claims_scoped_by_project() {
        let store = MemoryDedupStore::new();
        let id = Tsid::generate();
        let project_a = Tsid::generate();
        let project_b = Tsid::generate();

        store
            .claim(project_a, Tsid::generate(), &[id], TTL)
            .await
            .unwrap();
        let other = store
            .claim(project_b, Tsid::generate(), &[id], TTL)
            .await
            .unwrap();
        assert_eq!(other.claimed, vec![id]);

        assert_eq!(store.count_by_project(project_a).await.unwrap(), 1);
        assert_eq!(store.count_by_project(project_b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_claims_are_reclaimed() {
        let store = MemoryDedupStore::new();
        let project = Tsid::generate();
        let id = Tsid::generate();

        // TTL of zero expires immediately (expiry = event time)
        store
            .claim(project, Tsid::generate(), &[id], Duration::ZERO)
            .await
            .unwrap();
        assert!(!store.exists(project, id).await.unwrap());

        let again = store
            .claim(project, Tsid::generate(), &[id], TTL)
            .await
            .unwrap();
        assert_eq!(again.claimed, vec![id]);
    }

    #[tokio::test]
    async fn test_exists_and_entry_metadata() {
        let store = MemoryDedupStore::new();
        let project = Tsid::generate();
        let batch = Tsid::generate();
        let id = Tsid::generate();

        store.claim(project, batch, &[id], TTL).await.unwrap();
        assert!(store.exists(project, id).await.unwrap());

        let entry = store.get(project, id).unwrap();
        assert_eq!(entry.batch_id, batch);
        assert_eq!(
            entry.expires_at.timestamp_millis(),
            id.timestamp_millis() + TTL.as_millis() as i64
        );
    }
}
