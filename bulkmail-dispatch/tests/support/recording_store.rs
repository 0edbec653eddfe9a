//! Queue store wrapper that records the size of every claimed batch

use std::sync::Arc;

use async_trait::async_trait;
use bulkmail_queue::{
    ClaimToken, JobDraft, JobFilter, JobId, MemoryStore, QueueJob, QueueStats, QueueStore,
    Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: Arc<MemoryStore>,
    claims: Mutex<Vec<(usize, usize)>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            claims: Mutex::new(Vec::new()),
        }
    }

    /// `(limit, claimed)` for every call to `claim_batch`
    pub fn claims(&self) -> Vec<(usize, usize)> {
        self.claims.lock().clone()
    }

    /// Sizes of the non-empty batches
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.claims
            .lock()
            .iter()
            .map(|(_, claimed)| *claimed)
            .filter(|claimed| *claimed > 0)
            .collect()
    }
}

#[async_trait]
impl QueueStore for RecordingStore {
    async fn enqueue_all(&self, drafts: Vec<JobDraft>, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        self.inner.enqueue_all(drafts, now).await
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<QueueJob>> {
        let batch = self.inner.claim_batch(limit, now).await?;
        self.claims.lock().push((limit, batch.len()));
        Ok(batch)
    }

    async fn mark_sent(
        &self,
        id: &JobId,
        token: &ClaimToken,
        sent_at: DateTime<Utc>,
    ) -> Result<QueueJob> {
        self.inner.mark_sent(id, token, sent_at).await
    }

    async fn mark_retry(
        &self,
        id: &JobId,
        token: &ClaimToken,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueJob> {
        self.inner
            .mark_retry(id, token, next_attempt_at, error, now)
            .await
    }

    async fn mark_failed(
        &self,
        id: &JobId,
        token: &ClaimToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueJob> {
        self.inner.mark_failed(id, token, error, now).await
    }

    async fn release(&self, id: &JobId, token: &ClaimToken, now: DateTime<Utc>) -> Result<QueueJob> {
        self.inner.release(id, token, now).await
    }

    async fn reclaim_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.inner.reclaim_stale_processing(older_than, now).await
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.purge_terminal_older_than(cutoff).await
    }

    async fn cancel(&self, id: &JobId, now: DateTime<Utc>) -> Result<bool> {
        self.inner.cancel(id, now).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<QueueJob>> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<QueueJob>> {
        self.inner.list(filter).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.inner.stats().await
    }
}
