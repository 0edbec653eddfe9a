//! Retention sweep over the queue and the send log

use bulkmail_common::internal;
use chrono::{DateTime, Utc};

use super::Dispatcher;
use crate::{error::DispatchError, types::SweepSummary};

/// Delete terminal jobs and send log entries older than their retention
/// windows. Only rows that are already final are touched, so a sweep is safe
/// to run while a dispatch cycle is in progress, and running it twice in a
/// row removes nothing the second time.
#[tracing::instrument(level = "debug", skip_all, ret, err)]
pub(super) async fn sweep(dispatcher: &Dispatcher) -> Result<SweepSummary, DispatchError> {
    let now = dispatcher.clock.now();
    let config = &dispatcher.config;

    let queue_cutoff = now
        .checked_sub_signed(config.queue_retention())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let log_cutoff = now
        .checked_sub_signed(config.log_retention())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let summary = SweepSummary {
        jobs_purged: dispatcher
            .queue
            .purge_terminal_older_than(queue_cutoff)
            .await?,
        log_entries_purged: dispatcher.log.purge_older_than(log_cutoff).await?,
    };

    if summary.jobs_purged + summary.log_entries_purged > 0 {
        internal!(
            level = INFO,
            "Swept {} jobs finished before {} and {} log entries recorded before {}",
            summary.jobs_purged,
            queue_cutoff,
            summary.log_entries_purged,
            log_cutoff
        );
    }

    Ok(summary)
}
