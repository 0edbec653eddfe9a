use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    table::{QueueTable, SendLogTable},
    r#trait::{QueueStore, SendLog},
    types::{
        ClaimToken, JobDraft, JobFilter, JobId, QueueJob, QueueStats, SendLogEntry, SendLogFilter,
    },
};

/// In-memory queue and send log
///
/// Both tables sit behind a mutex, which is all the atomicity `claim_batch`
/// needs within a single process. Clones share the same tables. Nothing
/// survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    queue: Arc<Mutex<QueueTable>>,
    log: Arc<Mutex<SendLogTable>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs in any status
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue_all(
        &self,
        drafts: Vec<JobDraft>,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<JobId>> {
        self.queue.lock().insert_all(drafts, now)
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> crate::Result<Vec<QueueJob>> {
        Ok(self.queue.lock().claim(limit, now))
    }

    async fn mark_sent(
        &self,
        id: &JobId,
        token: &ClaimToken,
        sent_at: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        self.queue.lock().mark_sent(id, token, sent_at)
    }

    async fn mark_retry(
        &self,
        id: &JobId,
        token: &ClaimToken,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        self.queue
            .lock()
            .mark_retry(id, token, next_attempt_at, error, now)
    }

    async fn mark_failed(
        &self,
        id: &JobId,
        token: &ClaimToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        self.queue.lock().mark_failed(id, token, error, now)
    }

    async fn release(
        &self,
        id: &JobId,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        self.queue.lock().release(id, token, now)
    }

    async fn reclaim_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize> {
        Ok(self.queue.lock().reclaim_stale(older_than, now))
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        Ok(self.queue.lock().purge_terminal(cutoff).len())
    }

    async fn cancel(&self, id: &JobId, now: DateTime<Utc>) -> crate::Result<bool> {
        Ok(self.queue.lock().cancel(id, now))
    }

    async fn get(&self, id: &JobId) -> crate::Result<Option<QueueJob>> {
        Ok(self.queue.lock().get(id))
    }

    async fn list(&self, filter: &JobFilter) -> crate::Result<Vec<QueueJob>> {
        Ok(self.queue.lock().list(filter))
    }

    async fn stats(&self) -> crate::Result<QueueStats> {
        Ok(self.queue.lock().stats())
    }
}

#[async_trait]
impl SendLog for MemoryStore {
    async fn record(&self, entry: SendLogEntry) -> crate::Result<()> {
        self.log.lock().record(entry);
        Ok(())
    }

    async fn query(&self, filter: &SendLogFilter) -> crate::Result<Vec<SendLogEntry>> {
        Ok(self.log.lock().query(filter))
    }

    async fn count(&self, filter: &SendLogFilter) -> crate::Result<usize> {
        Ok(self.log.lock().count(filter))
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        Ok(self.log.lock().purge_older_than(cutoff))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::types::JobStatus;

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let id = store
            .enqueue(JobDraft::new("a@example.com", "Hi", "Body"), now)
            .await
            .expect("Failed to enqueue");
        assert_eq!(store.len(), 1);

        let claimed = store.claim_batch(10, now).await.expect("Failed to claim");
        assert_eq!(claimed.len(), 1);
        let token = claimed[0].claim_token.expect("Claimed job has a token");

        store
            .mark_sent(&id, &token, now)
            .await
            .expect("Failed to mark sent");
        let job = store.get(&id).await.expect("Failed to get").expect("Job exists");
        assert_eq!(job.status, JobStatus::Sent);

        store
            .record(SendLogEntry::sent(&job, now))
            .await
            .expect("Failed to record");
        assert_eq!(
            store
                .count(&SendLogFilter::default())
                .await
                .expect("Failed to count"),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let drafts = (0..200)
            .map(|i| JobDraft::new(format!("r{i}@example.com"), "Hi", "Body"))
            .collect();
        store.enqueue_all(drafts, now).await.expect("Failed to enqueue");

        let claimers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut claimed = Vec::new();
                    loop {
                        let batch = store.claim_batch(7, now).await.expect("Failed to claim");
                        if batch.is_empty() {
                            break claimed;
                        }
                        claimed.extend(batch.into_iter().map(|job| job.id));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for claimer in claimers {
            for id in claimer.await.expect("Claimer panicked") {
                assert!(seen.insert(id), "Job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 200);
    }
}
