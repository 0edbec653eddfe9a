use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    ClaimToken, JobDraft, JobFilter, JobId, QueueJob, QueueStats, SendLogEntry, SendLogFilter,
};

/// Durable storage for queued jobs.
///
/// Every operation is a single atomic step against the store. In particular
/// `claim_batch` selects and transitions jobs in one critical section, so two
/// dispatch cycles racing on the same pending set never both receive a job.
///
/// Times are always supplied by the caller; stores never read a clock.
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Validate and insert a single job
    ///
    /// # Errors
    /// `QueueError::Validation` if the draft is malformed
    async fn enqueue(&self, draft: JobDraft, now: DateTime<Utc>) -> crate::Result<JobId> {
        let mut ids = self.enqueue_all(vec![draft], now).await?;
        ids.pop()
            .ok_or_else(|| crate::QueueError::Internal("Enqueue returned no id".to_string()))
    }

    /// Validate and insert a batch of jobs. Nothing is inserted unless every
    /// draft is valid.
    async fn enqueue_all(&self, drafts: Vec<JobDraft>, now: DateTime<Utc>)
    -> crate::Result<Vec<JobId>>;

    /// Claim up to `limit` pending jobs due at `now`, ordered by priority,
    /// then schedule, then id
    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> crate::Result<Vec<QueueJob>>;

    async fn mark_sent(
        &self,
        id: &JobId,
        token: &ClaimToken,
        sent_at: DateTime<Utc>,
    ) -> crate::Result<QueueJob>;

    async fn mark_retry(
        &self,
        id: &JobId,
        token: &ClaimToken,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob>;

    async fn mark_failed(
        &self,
        id: &JobId,
        token: &ClaimToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob>;

    /// Return a claimed job to `pending` unsent, e.g. when a cycle runs out
    /// of time mid-batch. Attempts are not consumed.
    async fn release(
        &self,
        id: &JobId,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob>;

    /// Return jobs claimed at or before `older_than` to `pending`
    async fn reclaim_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize>;

    /// Delete `sent`, `failed` and `cancelled` jobs last updated before `cutoff`
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> crate::Result<usize>;

    /// Cancel a pending job, returning whether it was cancelled
    async fn cancel(&self, id: &JobId, now: DateTime<Utc>) -> crate::Result<bool>;

    async fn get(&self, id: &JobId) -> crate::Result<Option<QueueJob>>;

    async fn list(&self, filter: &JobFilter) -> crate::Result<Vec<QueueJob>>;

    async fn stats(&self) -> crate::Result<QueueStats>;
}

/// Append-only record of terminal send attempts
#[async_trait]
pub trait SendLog: Send + Sync + std::fmt::Debug {
    async fn record(&self, entry: SendLogEntry) -> crate::Result<()>;

    async fn query(&self, filter: &SendLogFilter) -> crate::Result<Vec<SendLogEntry>>;

    async fn count(&self, filter: &SendLogFilter) -> crate::Result<usize>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> crate::Result<usize>;
}
