use std::{collections::BTreeMap, fmt};

use bulkmail_queue::{DEFAULT_MAX_ATTEMPTS, JobDraft};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub subscriber_id: Option<u64>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            subscriber_id: None,
        }
    }

    #[must_use]
    pub const fn with_subscriber(mut self, subscriber_id: u64) -> Self {
        self.subscriber_id = Some(subscriber_id);
        self
    }
}

/// One rendered email addressed to many recipients.
///
/// Enqueueing a campaign creates one job per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub recipients: Vec<Recipient>,
    pub subject: String,
    /// Rendered HTML body
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub campaign_type: String,
    #[serde(default)]
    pub template_type: String,
    #[serde(default)]
    pub priority: i32,
    /// Defaults to 3
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Send no earlier than this; defaults to the time of enqueue
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(
        recipients: Vec<Recipient>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body: body.into(),
            headers: BTreeMap::new(),
            campaign_type: String::new(),
            template_type: String::new(),
            priority: 0,
            max_attempts: None,
            scheduled_for: None,
        }
    }

    pub(crate) fn into_drafts(self) -> Vec<JobDraft> {
        let Self {
            recipients,
            subject,
            body,
            headers,
            campaign_type,
            template_type,
            priority,
            max_attempts,
            scheduled_for,
        } = self;

        recipients
            .into_iter()
            .map(|recipient| JobDraft {
                recipient_email: recipient.email,
                subscriber_id: recipient.subscriber_id,
                subject: subject.clone(),
                message: body.clone(),
                headers: headers.clone(),
                template_type: template_type.clone(),
                campaign_type: campaign_type.clone(),
                priority,
                max_attempts: max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                scheduled_for,
            })
            .collect()
    }
}

/// Why a dispatch cycle stopped claiming batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// No eligible job was left to claim
    #[default]
    Drained,
    /// The execution-time budget ran out
    TimeBudget,
    /// The per-cycle batch ceiling was reached
    IterationLimit,
    /// The tier's daily cap is used up
    DailyCap,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Drained => "queue drained",
            Self::TimeBudget => "time budget exhausted",
            Self::IterationLimit => "iteration limit reached",
            Self::DailyCap => "daily cap reached",
        })
    }
}

/// Result of one `run_dispatch_cycle`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub sent_count: usize,
    /// Jobs that became terminally `failed` during the cycle
    pub failed_count: usize,
    /// Failed sends rescheduled for a later attempt
    pub retried_count: usize,
    /// Jobs still `pending` once the cycle finished
    pub remaining_count: usize,
    /// Non-empty batches claimed
    pub batches: usize,
    /// Stale `processing` jobs returned to `pending` at cycle start
    pub reclaimed: usize,
    /// Claimed jobs handed back to `pending` unsent when time ran out
    pub released: usize,
    pub stopped: StopReason,
}

/// Result of one cleanup sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub jobs_purged: usize,
    pub log_entries_purged: usize,
}
