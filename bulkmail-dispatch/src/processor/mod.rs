//! Dispatch orchestration

mod cycle;
mod outcome;
mod sweep;

use std::{sync::Arc, time::Duration};

use bulkmail_common::{Clock, Signal, SystemClock, TierProvider, audit, internal};
use bulkmail_queue::{
    JobFilter, JobId, QueueJob, QueueStats, QueueStore, SendLog, SendLogEntry, SendLogFilter,
    Stores,
};

use crate::{
    config::DispatchConfig,
    error::DispatchError,
    transport::MailTransport,
    types::{Campaign, SweepSummary},
};

/// The queue engine: enqueues campaigns, runs dispatch cycles, sweeps old
/// rows and answers operator queries.
///
/// Cloning is cheap; clones share the same stores and transport.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
    queue: Arc<dyn QueueStore>,
    log: Arc<dyn SendLog>,
    transport: Arc<dyn MailTransport>,
    tier: Arc<dyn TierProvider>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        stores: Stores,
        transport: Arc<dyn MailTransport>,
        tier: Arc<dyn TierProvider>,
    ) -> Self {
        Self {
            config,
            queue: stores.queue,
            log: stores.log,
            transport,
            tier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the system clock, e.g. with a `ManualClock` in tests
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Create one pending job per campaign recipient.
    ///
    /// The whole campaign is rejected if any recipient is invalid.
    ///
    /// # Errors
    /// A validation error for malformed input, or a store error
    #[tracing::instrument(level = "debug", skip_all, fields(recipients = campaign.recipients.len()))]
    pub async fn enqueue_campaign(&self, campaign: Campaign) -> Result<Vec<JobId>, DispatchError> {
        if campaign.recipients.is_empty() {
            return Ok(Vec::new());
        }

        let campaign_type = campaign.campaign_type.clone();
        let ids = self
            .queue
            .enqueue_all(campaign.into_drafts(), self.clock.now())
            .await?;

        internal!(
            level = INFO,
            "Enqueued {} jobs for campaign '{}'",
            ids.len(),
            campaign_type
        );
        Ok(ids)
    }

    /// Send log entries matching `filter`, oldest first
    ///
    /// # Errors
    /// Returns an error if the send log cannot be read
    pub async fn get_send_log(
        &self,
        filter: &SendLogFilter,
    ) -> Result<Vec<SendLogEntry>, DispatchError> {
        Ok(self.log.query(filter).await?)
    }

    /// Cancel a job that has not been claimed yet.
    ///
    /// Returns `false` if the job does not exist or is no longer `pending`.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be updated
    pub async fn cancel_job(&self, id: &JobId) -> Result<bool, DispatchError> {
        let cancelled = self.queue.cancel(id, self.clock.now()).await?;
        if cancelled {
            audit::log_job_cancelled(&id.to_string());
        } else {
            tracing::debug!(job_id = %id, "Job not cancelled, it is not pending");
        }
        Ok(cancelled)
    }

    /// # Errors
    /// Returns an error if the queue cannot be read
    pub async fn stats(&self) -> Result<QueueStats, DispatchError> {
        Ok(self.queue.stats().await?)
    }

    /// # Errors
    /// Returns an error if the queue cannot be read
    pub async fn jobs(&self, filter: &JobFilter) -> Result<Vec<QueueJob>, DispatchError> {
        Ok(self.queue.list(filter).await?)
    }

    /// # Errors
    /// Returns an error if the queue cannot be read
    pub async fn job(&self, id: &JobId) -> Result<Option<QueueJob>, DispatchError> {
        Ok(self.queue.get(id).await?)
    }

    /// Run dispatch cycles and sweeps on their intervals until shutdown.
    ///
    /// `Signal::SendNow` runs a cycle immediately. A cycle in progress when
    /// shutdown arrives is finished first; cycles are bounded by the
    /// execution-time guard.
    ///
    /// # Errors
    /// Returns an error if the configured intervals are zero
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        if self.config.dispatch_interval_secs == 0 || self.config.sweep_interval_secs == 0 {
            return Err(DispatchError::Configuration(
                "Dispatch and sweep intervals must be greater than zero".to_string(),
            ));
        }

        internal!(
            level = INFO,
            "Dispatcher starting, tier {} with batches of {}",
            self.tier.tier(),
            self.config.rate_limits.batch_size(self.tier.tier())
        );

        let mut dispatch_timer =
            tokio::time::interval(Duration::from_secs(self.config.dispatch_interval_secs));
        let mut sweep_timer =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        dispatch_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip the first tick to avoid immediate execution
        dispatch_timer.tick().await;
        sweep_timer.tick().await;

        loop {
            tokio::select! {
                _ = dispatch_timer.tick() => self.dispatch_logged().await,
                _ = sweep_timer.tick() => {
                    match self.sweep().await {
                        Ok(summary) => tracing::debug!(?summary, "Sweep complete"),
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::SendNow) => {
                            internal!(level = INFO, "Send Now requested");
                            self.dispatch_logged().await;
                            dispatch_timer.reset();
                        }
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Dispatcher received shutdown signal");
                            break;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Dispatcher missed signals");
                        }
                        Err(e) => {
                            tracing::error!("Dispatcher shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        internal!(level = INFO, "Dispatcher shutdown complete");
        Ok(())
    }

    async fn dispatch_logged(&self) {
        match self.run_dispatch_cycle().await {
            Ok(summary) if summary.sent_count + summary.failed_count + summary.retried_count > 0 => {
                tracing::info!(
                    sent = summary.sent_count,
                    failed = summary.failed_count,
                    retried = summary.retried_count,
                    remaining = summary.remaining_count,
                    stopped = %summary.stopped,
                    "Dispatch cycle complete"
                );
            }
            Ok(summary) => {
                tracing::debug!(remaining = summary.remaining_count, "Dispatch cycle found nothing to send");
            }
            Err(e) => tracing::error!(error = %e, "Dispatch cycle failed"),
        }
    }

    /// Purge terminal jobs and send log entries past their retention window
    ///
    /// # Errors
    /// Returns an error if either store cannot be updated
    pub async fn sweep(&self) -> Result<SweepSummary, DispatchError> {
        sweep::sweep(self).await
    }
}
