//! One dispatch cycle: reclaim, then claim and send batches until the queue
//! drains or a limit is hit.

use bulkmail_common::{Tier, internal};
use bulkmail_queue::{QueueJob, SendLogFilter, SendOutcome};
use chrono::{DateTime, Utc};

use super::Dispatcher;
use crate::{
    error::DispatchError,
    guard::ExecutionGuard,
    policy::rate_limit::utc_day,
    types::{DispatchSummary, StopReason},
};

impl Dispatcher {
    /// Run one dispatch cycle.
    ///
    /// 1. Return jobs orphaned in `processing` by a crashed cycle to `pending`
    /// 2. Up to `max_iterations` times: stop if the execution guard has
    ///    expired or the daily cap is used up, otherwise claim a batch sized
    ///    for the current tier and send it job by job
    ///
    /// The guard is also checked after every send. Once it expires, the jobs
    /// left in the batch are released back to `pending` unsent, so no claim
    /// is held longer than the budget plus one send.
    ///
    /// Per-job failures are recorded and never abort the cycle.
    ///
    /// # Errors
    /// Returns an error if the queue or send log fails
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn run_dispatch_cycle(&self) -> Result<DispatchSummary, DispatchError> {
        let guard = ExecutionGuard::start(self.config.max_execution());
        let tier = self.tier.tier();
        let mut summary = DispatchSummary::default();

        let now = self.clock.now();
        let stale_before = now
            .checked_sub_signed(self.config.stale_timeout())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        summary.reclaimed = self
            .queue
            .reclaim_stale_processing(stale_before, now)
            .await?;
        if summary.reclaimed > 0 {
            tracing::warn!(
                reclaimed = summary.reclaimed,
                "Returned jobs orphaned in processing to pending"
            );
        }

        summary.stopped = StopReason::IterationLimit;
        for _ in 0..self.config.max_iterations {
            if guard.exhausted() {
                summary.stopped = StopReason::TimeBudget;
                break;
            }

            let Some(limit) = self.batch_limit(tier).await? else {
                summary.stopped = StopReason::DailyCap;
                break;
            };

            let batch = self.queue.claim_batch(limit, self.clock.now()).await?;
            if batch.is_empty() {
                summary.stopped = StopReason::Drained;
                break;
            }
            summary.batches += 1;

            tracing::debug!(
                batch = summary.batches,
                size = batch.len(),
                limit,
                "Claimed batch"
            );

            let mut jobs = batch.into_iter();
            for job in jobs.by_ref() {
                self.dispatch_job(job, &mut summary).await?;
                if guard.exhausted() {
                    break;
                }
            }
            summary.released += self.release_unsent(jobs).await?;
        }

        summary.remaining_count = self.queue.stats().await?.pending;

        internal!(
            level = DEBUG,
            "Dispatch cycle finished after {} batches in {:?} ({})",
            summary.batches,
            guard.elapsed(),
            summary.stopped
        );

        Ok(summary)
    }

    /// Hand claimed jobs this cycle will not get to back to `pending`
    async fn release_unsent(
        &self,
        jobs: impl Iterator<Item = QueueJob> + Send,
    ) -> Result<usize, DispatchError> {
        let mut released = 0;

        for job in jobs {
            let Some(token) = job.claim_token else {
                continue;
            };

            match self.queue.release(&job.id, &token, self.clock.now()).await {
                Ok(_) => released += 1,
                Err(e) if e.is_job_level() => {
                    tracing::warn!(job_id = %job.id, error = %e, "Could not release unsent job");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if released > 0 {
            tracing::info!(released, "Time budget spent, released unsent jobs");
        }

        Ok(released)
    }

    /// Size of the next batch for `tier`, or `None` when today's cap is spent
    async fn batch_limit(&self, tier: Tier) -> Result<Option<usize>, DispatchError> {
        let limits = &self.config.rate_limits;
        if !limits.has_daily_cap(tier) {
            return Ok(limits.next_batch_limit(tier, 0));
        }

        let (since, until) = utc_day(self.clock.now());
        let sent_today = self
            .log
            .count(&SendLogFilter {
                since: Some(since),
                until: Some(until),
                outcome: Some(SendOutcome::Sent),
                ..SendLogFilter::default()
            })
            .await?;

        Ok(limits.next_batch_limit(tier, sent_today))
    }
}
