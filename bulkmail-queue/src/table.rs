//! In-memory tables shared by every backend.
//!
//! Backends only decide where a table lives and how access to it is
//! serialised. The transitions themselves are implemented once, here, and
//! always run while the backend holds its exclusive lock, which is what makes
//! `claim` a single atomic claim-if-pending.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{QueueError, Result, ValidationError},
    types::{
        ClaimToken, JobDraft, JobFilter, JobId, JobStatus, QueueJob, QueueStats, SendLogEntry,
        SendLogFilter,
    },
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueTable {
    jobs: BTreeMap<JobId, QueueJob>,
}

fn validate_header(name: &str, value: &str) -> std::result::Result<(), ValidationError> {
    let name_ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':');
    let value_ok = !value.contains(['\r', '\n']);

    if name_ok && value_ok {
        Ok(())
    } else {
        Err(ValidationError::Header(name.to_string()))
    }
}

fn build_job(draft: JobDraft, now: DateTime<Utc>) -> std::result::Result<QueueJob, ValidationError> {
    let recipient_email = bulkmail_common::validate_recipient(&draft.recipient_email)?;

    if draft.max_attempts == 0 {
        return Err(ValidationError::MaxAttempts);
    }

    for (name, value) in &draft.headers {
        validate_header(name, value)?;
    }

    Ok(QueueJob {
        id: JobId::generate(),
        recipient_email,
        subscriber_id: draft.subscriber_id,
        subject: draft.subject,
        message: draft.message,
        headers: draft.headers,
        template_type: draft.template_type,
        campaign_type: draft.campaign_type,
        status: JobStatus::Pending,
        priority: draft.priority,
        attempts: 0,
        max_attempts: draft.max_attempts,
        error_message: None,
        scheduled_for: draft.scheduled_for.unwrap_or(now),
        sent_at: None,
        created_at: now,
        updated_at: now,
        claimed_at: None,
        claim_token: None,
    })
}

impl QueueTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Insert a batch of drafts. Either every draft is valid and inserted, or
    /// none are.
    pub fn insert_all(&mut self, drafts: Vec<JobDraft>, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let jobs = drafts
            .into_iter()
            .map(|draft| build_job(draft, now))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(jobs
            .into_iter()
            .map(|job| {
                let id = job.id;
                self.jobs.insert(id, job);
                id
            })
            .collect())
    }

    /// Move up to `limit` eligible jobs to `processing`, in dispatch order
    pub fn claim(&mut self, limit: usize, now: DateTime<Utc>) -> Vec<QueueJob> {
        if limit == 0 {
            return Vec::new();
        }

        let mut eligible: Vec<(i32, DateTime<Utc>, JobId)> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.scheduled_for <= now)
            .map(|job| (job.priority, job.scheduled_for, job.id))
            .collect();
        eligible.sort_unstable();
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, _, id) in eligible {
            if let Some(job) = self.jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.claimed_at = Some(now);
                job.claim_token = Some(ClaimToken::generate());
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }

        claimed
    }

    fn held(&mut self, id: &JobId, token: &ClaimToken) -> Result<&mut QueueJob> {
        let job = self.jobs.get_mut(id).ok_or(QueueError::NotFound(*id))?;
        if job.held_by(token) {
            Ok(job)
        } else {
            Err(QueueError::StaleJob(*id))
        }
    }

    pub fn mark_sent(
        &mut self,
        id: &JobId,
        token: &ClaimToken,
        sent_at: DateTime<Utc>,
    ) -> Result<QueueJob> {
        let job = self.held(id, token)?;
        job.status = JobStatus::Sent;
        job.sent_at = Some(sent_at);
        job.error_message = None;
        job.updated_at = sent_at;
        job.release_claim();
        Ok(job.clone())
    }

    /// Return a failed job to `pending`, consuming one attempt.
    ///
    /// The job is never rescheduled earlier than it already was.
    pub fn mark_retry(
        &mut self,
        id: &JobId,
        token: &ClaimToken,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueJob> {
        let job = self.held(id, token)?;
        if job.attempts_exhausted() {
            return Err(QueueError::AttemptsExhausted(*id));
        }

        job.status = JobStatus::Pending;
        job.attempts += 1;
        job.scheduled_for = job.scheduled_for.max(next_attempt_at);
        job.error_message = Some(error.to_string());
        job.updated_at = now;
        job.release_claim();
        Ok(job.clone())
    }

    /// Terminal failure. The failing attempt is counted, but never beyond
    /// `max_attempts`.
    pub fn mark_failed(
        &mut self,
        id: &JobId,
        token: &ClaimToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueJob> {
        let job = self.held(id, token)?;
        job.status = JobStatus::Failed;
        job.attempts = job.attempts.saturating_add(1).min(job.max_attempts);
        job.error_message = Some(error.to_string());
        job.updated_at = now;
        job.release_claim();
        Ok(job.clone())
    }

    /// Hand a claimed job back to `pending` without sending it. Attempts and
    /// schedule are left as they were.
    pub fn release(
        &mut self,
        id: &JobId,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<QueueJob> {
        let job = self.held(id, token)?;
        job.status = JobStatus::Pending;
        job.updated_at = now;
        job.release_claim();
        Ok(job.clone())
    }

    /// Return jobs claimed at or before `older_than` to `pending`
    pub fn reclaim_stale(&mut self, older_than: DateTime<Utc>, now: DateTime<Utc>) -> usize {
        let mut reclaimed = 0;

        for job in self.jobs.values_mut().filter(|job| {
            job.status == JobStatus::Processing
                && job.claimed_at.is_none_or(|claimed| claimed <= older_than)
        }) {
            job.status = JobStatus::Pending;
            job.updated_at = now;
            job.release_claim();
            reclaimed += 1;
        }

        reclaimed
    }

    /// Remove terminal jobs whose last transition is older than `cutoff`,
    /// returning their ids
    pub fn purge_terminal(&mut self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        let purged: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.status.is_terminal() && job.updated_at < cutoff)
            .map(|job| job.id)
            .collect();

        for id in &purged {
            self.jobs.remove(id);
        }

        purged
    }

    /// Cancel a pending job. Anything else, including an unknown id, is left
    /// alone and reported as `false`.
    pub fn cancel(&mut self, id: &JobId, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.updated_at = now;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<QueueJob> {
        self.jobs.get(id).cloned()
    }

    pub(crate) fn get_mut(&mut self, id: &JobId) -> Option<&mut QueueJob> {
        self.jobs.get_mut(id)
    }

    /// Jobs matching `filter`, oldest first
    #[must_use]
    pub fn list(&self, filter: &JobFilter) -> Vec<QueueJob> {
        self.jobs
            .values()
            .filter(|job| filter.matches(job))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.jobs
            .values()
            .fold(QueueStats::default(), |mut stats, job| {
                stats.record(job.status);
                stats
            })
    }
}

/// Append-only log of terminal send attempts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendLogTable {
    entries: Vec<SendLogEntry>,
}

impl SendLogTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, entry: SendLogEntry) {
        self.entries.push(entry);
    }

    /// Matching entries in the order they were recorded
    #[must_use]
    pub fn query(&self, filter: &SendLogFilter) -> Vec<SendLogEntry> {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn count(&self, filter: &SendLogFilter) -> usize {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .count()
    }

    pub fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.recorded_at >= cutoff);
        before - self.entries.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::ValidationError, types::SendOutcome};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn draft(email: &str) -> JobDraft {
        JobDraft::new(email, "Subject", "<p>Body</p>")
    }

    fn insert(table: &mut QueueTable, draft: JobDraft) -> JobId {
        table.insert_all(vec![draft], epoch()).unwrap()[0]
    }

    #[test]
    fn test_insert_defaults() {
        let mut table = QueueTable::default();
        let id = insert(&mut table, draft("Reader@Example.com"));
        let job = table.get(&id).unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.scheduled_for, epoch());
        assert_eq!(job.recipient_email, "Reader@example.com");
        assert!(job.sent_at.is_none());
        assert!(job.claim_token.is_none());
    }

    #[test]
    fn test_insert_is_all_or_nothing() {
        let mut table = QueueTable::default();
        let result = table.insert_all(
            vec![draft("good@example.com"), draft("not an address")],
            epoch(),
        );

        assert!(matches!(result, Err(QueueError::Validation(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_rejects_bad_fields() {
        let mut table = QueueTable::default();

        let mut zero = draft("a@example.com");
        zero.max_attempts = 0;
        assert!(matches!(
            table.insert_all(vec![zero], epoch()),
            Err(QueueError::Validation(ValidationError::MaxAttempts))
        ));

        let mut header = draft("a@example.com");
        header
            .headers
            .insert("X-Campaign".into(), "spring\r\nBcc: everyone@example.com".into());
        assert!(matches!(
            table.insert_all(vec![header], epoch()),
            Err(QueueError::Validation(ValidationError::Header(_)))
        ));
    }

    #[test]
    fn test_claim_order_and_eligibility() {
        let mut table = QueueTable::default();

        let mut late = draft("late@example.com");
        late.scheduled_for = Some(epoch() + Duration::hours(1));
        let late = insert(&mut table, late);

        let mut urgent = draft("urgent@example.com");
        urgent.priority = -1;
        urgent.scheduled_for = Some(epoch() - Duration::minutes(1));
        let urgent = insert(&mut table, urgent);

        let mut older = draft("older@example.com");
        older.scheduled_for = Some(epoch() - Duration::minutes(10));
        let older = insert(&mut table, older);

        let first = insert(&mut table, draft("first@example.com"));
        let second = insert(&mut table, draft("second@example.com"));

        let claimed: Vec<_> = table.claim(10, epoch()).iter().map(|job| job.id).collect();
        assert_eq!(claimed, vec![urgent, older, first, second]);
        assert!(!claimed.contains(&late));

        let job = table.get(&urgent).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.claim_token.is_some());
        assert_eq!(job.claimed_at, Some(epoch()));

        assert!(table.claim(10, epoch()).is_empty());
        assert_eq!(table.claim(10, epoch() + Duration::hours(1)).len(), 1);
    }

    #[test]
    fn test_claim_respects_limit() {
        let mut table = QueueTable::default();
        table
            .insert_all(
                (0..5).map(|i| draft(&format!("r{i}@example.com"))).collect(),
                epoch(),
            )
            .unwrap();

        assert!(table.claim(0, epoch()).is_empty());
        assert_eq!(table.claim(2, epoch()).len(), 2);
        assert_eq!(table.stats().processing, 2);
        assert_eq!(table.stats().pending, 3);
    }

    #[test]
    fn test_transitions_require_current_claim() {
        let mut table = QueueTable::default();
        let id = insert(&mut table, draft("a@example.com"));
        let job = table.claim(1, epoch()).remove(0);
        let token = job.claim_token.unwrap();

        assert!(matches!(
            table.mark_sent(&id, &ClaimToken::generate(), epoch()),
            Err(QueueError::StaleJob(_))
        ));

        let sent = table.mark_sent(&id, &token, epoch()).unwrap();
        assert_eq!(sent.status, JobStatus::Sent);
        assert_eq!(sent.sent_at, Some(epoch()));
        assert!(sent.claim_token.is_none());

        assert!(matches!(
            table.mark_failed(&id, &token, "late", epoch()),
            Err(QueueError::StaleJob(_))
        ));
        assert!(matches!(
            table.mark_sent(&JobId::generate(), &token, epoch()),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn test_retry_consumes_attempts_and_never_moves_earlier() {
        let mut table = QueueTable::default();
        let mut scheduled = draft("a@example.com");
        scheduled.scheduled_for = Some(epoch() + Duration::hours(2));
        scheduled.max_attempts = 1;
        let id = insert(&mut table, scheduled);

        let later = epoch() + Duration::hours(2);
        let token = table.claim(1, later).remove(0).claim_token.unwrap();
        let retried = table
            .mark_retry(&id, &token, epoch(), "timeout", later)
            .unwrap();
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.scheduled_for, later);
        assert_eq!(retried.error_message.as_deref(), Some("timeout"));

        let token = table.claim(1, later).remove(0).claim_token.unwrap();
        assert!(matches!(
            table.mark_retry(&id, &token, later, "timeout", later),
            Err(QueueError::AttemptsExhausted(_))
        ));

        let failed = table.mark_failed(&id, &token, "timeout", later).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert!(failed.sent_at.is_none());
    }

    #[test]
    fn test_reclaim_stale_processing() {
        let mut table = QueueTable::default();
        let id = insert(&mut table, draft("a@example.com"));
        let stale_token = table.claim(1, epoch()).remove(0).claim_token.unwrap();

        let later = epoch() + Duration::minutes(15);
        assert_eq!(table.reclaim_stale(epoch() - Duration::seconds(1), later), 0);
        assert_eq!(table.get(&id).unwrap().updated_at, epoch());
        assert_eq!(table.reclaim_stale(epoch(), later), 1);

        let job = table.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.claimed_at.is_none());
        assert_eq!(job.updated_at, later);

        let fresh = table.claim(1, epoch()).remove(0).claim_token.unwrap();
        assert_ne!(fresh, stale_token);
        assert!(matches!(
            table.mark_sent(&id, &stale_token, epoch()),
            Err(QueueError::StaleJob(_))
        ));
        assert!(table.mark_sent(&id, &fresh, epoch()).is_ok());
    }

    #[test]
    fn test_release_returns_job_unsent() {
        let mut table = QueueTable::default();
        let mut scheduled = draft("a@example.com");
        scheduled.scheduled_for = Some(epoch() - Duration::minutes(3));
        let id = insert(&mut table, scheduled);
        let token = table.claim(1, epoch()).remove(0).claim_token.unwrap();

        assert!(matches!(
            table.release(&id, &ClaimToken::generate(), epoch()),
            Err(QueueError::StaleJob(_))
        ));

        let later = epoch() + Duration::minutes(10);
        let released = table.release(&id, &token, later).unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert_eq!(released.attempts, 0);
        assert_eq!(released.scheduled_for, epoch() - Duration::minutes(3));
        assert_eq!(released.updated_at, later);
        assert!(released.claim_token.is_none());
        assert!(released.claimed_at.is_none());

        assert!(matches!(
            table.mark_sent(&id, &token, later),
            Err(QueueError::StaleJob(_))
        ));
        assert_eq!(table.claim(1, later).len(), 1);
    }

    #[test]
    fn test_cancel_only_pending() {
        let mut table = QueueTable::default();
        let pending = insert(&mut table, draft("a@example.com"));
        assert!(table.cancel(&pending, epoch()));
        assert!(!table.cancel(&pending, epoch()));
        assert!(!table.cancel(&JobId::generate(), epoch()));

        let claimed = insert(&mut table, draft("b@example.com"));
        table.claim(1, epoch());
        assert!(!table.cancel(&claimed, epoch()));

        assert!(table.claim(10, epoch()).is_empty());
    }

    #[test]
    fn test_purge_terminal_is_idempotent() {
        let mut table = QueueTable::default();
        let old = insert(&mut table, draft("old@example.com"));
        let token = table.claim(1, epoch()).remove(0).claim_token.unwrap();
        table.mark_sent(&old, &token, epoch()).unwrap();

        let cancelled = insert(&mut table, draft("cancelled@example.com"));
        table.cancel(&cancelled, epoch() + Duration::days(40));
        insert(&mut table, draft("pending@example.com"));

        let cutoff = epoch() + Duration::days(30);
        assert_eq!(table.purge_terminal(cutoff), vec![old]);
        assert!(table.purge_terminal(cutoff).is_empty());
        assert_eq!(table.len(), 2);
        assert!(table.get(&old).is_none());
    }

    #[test]
    fn test_send_log_query_and_purge() {
        let mut queue = QueueTable::default();
        let id = insert(&mut queue, draft("a@example.com"));
        let job = queue.get(&id).unwrap();

        let mut log = SendLogTable::default();
        log.record(SendLogEntry::sent(&job, epoch()));
        log.record(SendLogEntry::failed(&job, "bounced", epoch() + Duration::days(1)));
        log.record(SendLogEntry::sent(&job, epoch() + Duration::days(100)));

        let failures = log.query(&SendLogFilter {
            outcome: Some(SendOutcome::Failed),
            ..SendLogFilter::default()
        });
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.as_deref(), Some("bounced"));

        let window = SendLogFilter {
            since: Some(epoch()),
            until: Some(epoch() + Duration::days(1)),
            ..SendLogFilter::default()
        };
        assert_eq!(log.count(&window), 1);

        let limited = SendLogFilter {
            limit: Some(2),
            ..SendLogFilter::default()
        };
        assert_eq!(log.query(&limited).len(), 2);

        assert_eq!(log.purge_older_than(epoch() + Duration::days(10)), 2);
        assert_eq!(log.purge_older_than(epoch() + Duration::days(10)), 0);
        assert_eq!(log.len(), 1);
    }
}
