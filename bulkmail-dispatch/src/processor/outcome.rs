//! Sending a claimed job and recording what happened to it

use bulkmail_common::audit;
use bulkmail_queue::{ClaimToken, QueueError, QueueJob, SendLogEntry};
use chrono::{DateTime, Utc};

use super::Dispatcher;
use crate::{
    error::{DispatchError, TransportError},
    policy::RetryDecision,
    transport::OutboundEmail,
    types::DispatchSummary,
};

/// Where a job ended up after one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Retried,
    Failed,
}

impl Dispatcher {
    /// Send one claimed job and apply the result to the queue and send log.
    ///
    /// Job-level store errors (the claim went stale, the job vanished) are
    /// logged and skipped. Anything else aborts the cycle.
    pub(super) async fn dispatch_job(
        &self,
        job: QueueJob,
        summary: &mut DispatchSummary,
    ) -> Result<(), DispatchError> {
        let Some(token) = job.claim_token else {
            tracing::warn!(job_id = %job.id, "Claimed job carries no claim token, skipping");
            return Ok(());
        };

        let timeout = self.config.send_timeout();
        let result = tokio::time::timeout(timeout, self.transport.send(&OutboundEmail::from_job(&job)))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::transient(format!(
                    "No response from transport after {timeout:?}"
                )))
            });

        let delay = self.config.send_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let now = self.clock.now();
        let applied = match result {
            Ok(()) => self.record_success(&job, &token, now).await,
            Err(error) => self.record_failure(&job, &token, &error, now).await,
        };

        match applied {
            Ok(Outcome::Sent) => summary.sent_count += 1,
            Ok(Outcome::Retried) => summary.retried_count += 1,
            Ok(Outcome::Failed) => summary.failed_count += 1,
            Err(e) if e.is_job_level() => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "Outcome not recorded, job no longer held by this cycle"
                );
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    async fn record_success(
        &self,
        job: &QueueJob,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> Result<Outcome, QueueError> {
        let sent = self.queue.mark_sent(&job.id, token, now).await?;
        self.log.record(SendLogEntry::sent(&sent, now)).await?;

        audit::log_send_succeeded(
            &sent.id.to_string(),
            &sent.recipient_email,
            sent.attempts + 1,
            &sent.campaign_type,
        );
        Ok(Outcome::Sent)
    }

    async fn record_failure(
        &self,
        job: &QueueJob,
        token: &ClaimToken,
        error: &TransportError,
        now: DateTime<Utc>,
    ) -> Result<Outcome, QueueError> {
        let reason = error.to_string();

        match self.config.retry.decide(job, error, now) {
            RetryDecision::Retry { at } => {
                let retried = self
                    .queue
                    .mark_retry(&job.id, token, at, &reason, now)
                    .await?;

                audit::log_send_retried(
                    &retried.id.to_string(),
                    &retried.recipient_email,
                    retried.attempts,
                    &retried.scheduled_for.to_rfc3339(),
                    &reason,
                );
                Ok(Outcome::Retried)
            }
            RetryDecision::Fail => {
                let failed = self.queue.mark_failed(&job.id, token, &reason, now).await?;
                self.log
                    .record(SendLogEntry::failed(&failed, &reason, now))
                    .await?;

                audit::log_send_failed(
                    &failed.id.to_string(),
                    &failed.recipient_email,
                    failed.attempts,
                    &reason,
                    error.is_permanent(),
                );
                Ok(Outcome::Failed)
            }
        }
    }
}
