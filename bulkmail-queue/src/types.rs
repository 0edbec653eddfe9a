use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            id: ulid::Ulid,
        }

        impl $name {
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self { id }
            }

            /// Generate a new id, strictly greater than any generated before
            /// it in this process
            #[must_use]
            pub fn generate() -> Self {
                static GENERATOR: parking_lot::Mutex<ulid::Generator> =
                    parking_lot::Mutex::new(ulid::Generator::new());

                let id = GENERATOR
                    .lock()
                    .generate()
                    .unwrap_or_else(|_| ulid::Ulid::new());
                Self { id }
            }

            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.id
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.id)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s.trim()).map(Self::new)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.id.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
                Ok(Self { id })
            }
        }
    };
}

ulid_id!(
    /// Identifier for a queued job
    ///
    /// ULIDs sort by creation time, which gives `claim_batch` its final,
    /// deterministic tie-break.
    JobId
);

ulid_id!(
    /// Issued every time a job is claimed.
    ///
    /// State transitions out of `processing` must present the token of the
    /// claim they belong to, so a cycle whose claim was reclaimed after a
    /// crash cannot overwrite the outcome of a newer claim.
    ClaimToken
);

ulid_id!(
    /// Identifier for a send log entry
    LogEntryId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Sent,
        Self::Failed,
        Self::Cancelled,
    ];

    /// `sent`, `failed` and `cancelled` admit no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown job status '{s}'"))
    }
}

/// One per-recipient email send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub recipient_email: String,
    /// Weak reference to the subscriber; `None` for ad hoc sends such as tests
    pub subscriber_id: Option<u64>,
    pub subject: String,
    pub message: String,
    pub headers: BTreeMap<String, String>,
    pub template_type: String,
    pub campaign_type: String,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last state change. Terminal jobs are retained relative to this.
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_token: Option<ClaimToken>,
}

impl QueueJob {
    #[must_use]
    pub const fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub(crate) fn held_by(&self, token: &ClaimToken) -> bool {
        self.status == JobStatus::Processing && self.claim_token.as_ref() == Some(token)
    }

    pub(crate) fn release_claim(&mut self) {
        self.claimed_at = None;
        self.claim_token = None;
    }
}

/// Everything needed to create a job; the store fills in the rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDraft {
    pub recipient_email: String,
    #[serde(default)]
    pub subscriber_id: Option<u64>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub template_type: String,
    #[serde(default)]
    pub campaign_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Defaults to the enqueue time
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl JobDraft {
    #[must_use]
    pub fn new(
        recipient_email: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_email: recipient_email.into(),
            subscriber_id: None,
            subject: subject.into(),
            message: message.into(),
            headers: BTreeMap::new(),
            template_type: String::new(),
            campaign_type: String::new(),
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            scheduled_for: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendOutcome {
    Sent,
    Failed,
}

impl SendOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown send outcome '{other}'")),
        }
    }
}

/// Immutable record of a terminal send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogEntry {
    pub id: LogEntryId,
    pub job_id: JobId,
    pub recipient_email: String,
    pub subscriber_id: Option<u64>,
    pub campaign_type: String,
    pub outcome: SendOutcome,
    pub error: Option<String>,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl SendLogEntry {
    #[must_use]
    pub fn sent(job: &QueueJob, recorded_at: DateTime<Utc>) -> Self {
        Self::from_job(job, SendOutcome::Sent, None, recorded_at)
    }

    #[must_use]
    pub fn failed(job: &QueueJob, error: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self::from_job(job, SendOutcome::Failed, Some(error.into()), recorded_at)
    }

    fn from_job(
        job: &QueueJob,
        outcome: SendOutcome,
        error: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogEntryId::generate(),
            job_id: job.id,
            recipient_email: job.recipient_email.clone(),
            subscriber_id: job.subscriber_id,
            campaign_type: job.campaign_type.clone(),
            outcome,
            error,
            attempts: job.attempts,
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub campaign_type: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    #[must_use]
    pub fn matches(&self, job: &QueueJob) -> bool {
        self.status.is_none_or(|status| job.status == status)
            && self
                .campaign_type
                .as_ref()
                .is_none_or(|campaign| &job.campaign_type == campaign)
    }
}

/// Selects send log entries; `since` is inclusive and `until` exclusive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLogFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub outcome: Option<SendOutcome>,
    pub job_id: Option<JobId>,
    pub campaign_type: Option<String>,
    pub limit: Option<usize>,
}

impl SendLogFilter {
    #[must_use]
    pub fn matches(&self, entry: &SendLogEntry) -> bool {
        self.since.is_none_or(|since| entry.recorded_at >= since)
            && self.until.is_none_or(|until| entry.recorded_at < until)
            && self.outcome.is_none_or(|outcome| entry.outcome == outcome)
            && self.job_id.is_none_or(|job_id| entry.job_id == job_id)
            && self
                .campaign_type
                .as_ref()
                .is_none_or(|campaign| &entry.campaign_type == campaign)
    }
}

/// Job counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub(crate) const fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Sent => self.sent += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.processing + self.sent + self.failed + self.cancelled
    }
}
