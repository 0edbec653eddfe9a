use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use bulkmail_common::internal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::{QueueError, SerializationError, ValidationError},
    table::QueueTable,
    r#trait::{QueueStore, SendLog},
    types::{
        ClaimToken, JobDraft, JobFilter, JobId, QueueJob, QueueStats, SendLogEntry, SendLogFilter,
    },
};

const QUEUE_INDEX: &str = "queue.index";
const QUEUE_LOCK: &str = "queue.lock";
const SEND_LOG: &str = "send_log.bin";
const SEND_LOG_LOCK: &str = "send_log.lock";
const BODIES: &str = "bodies";
const TEMP_PREFIX: &str = ".tmp_";

/// Send log records are prefixed with their length as a little-endian `u32`
const FRAME_HEADER: usize = 4;

/// File-backed queue and send log
///
/// Layout of the store directory:
/// - `queue.index`: bincode snapshot of every job's state, without its
///   message content
/// - `bodies/{job_id}.bin`: subject, body and headers of one job, written
///   once at enqueue and removed when the job is purged
/// - `send_log.bin`: one length-prefixed bincode record per entry, appended
///
/// Queue operations take an advisory lock on `queue.lock` (shared for reads,
/// exclusive for writes), load the index, apply the operation and, for
/// writes, save the index back before releasing the lock. A state transition
/// rewrites the index only, so its cost does not depend on the size of the
/// messages queued. Because the lock is held by the OS, `claim_batch` stays
/// atomic even when several dispatcher processes share one directory.
///
/// # Atomicity
/// The index and body files are written to a temporary file, synced, then
/// renamed into place, so a crash mid-write leaves the previous state intact.
/// An append to the send log cut short by a crash leaves a partial record at
/// the end of the file, which is ignored when reading and truncated by
/// [`FileStore::init`].
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl Default for FileStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/bulkmail"),
        }
    }
}

/// Message content of one job. Never rewritten once enqueued.
#[derive(Debug, Default, Serialize, Deserialize)]
struct JobBody {
    subject: String,
    message: String,
    headers: BTreeMap<String, String>,
}

impl JobBody {
    /// Move the content out of `job`, leaving the state the index keeps
    fn take(job: &mut QueueJob) -> Self {
        Self {
            subject: std::mem::take(&mut job.subject),
            message: std::mem::take(&mut job.message),
            headers: std::mem::take(&mut job.headers),
        }
    }

    fn restore(self, job: &mut QueueJob) {
        job.subject = self.subject;
        job.message = self.message;
        job.headers = self.headers;
    }
}

/// The `bodies/` directory
#[derive(Debug)]
struct Bodies {
    dir: PathBuf,
}

impl Bodies {
    fn new(store: &Path) -> Self {
        Self {
            dir: store.join(BODIES),
        }
    }

    fn file_name(id: &JobId) -> String {
        format!("{id}.bin")
    }

    fn write(&self, id: &JobId, body: &JobBody) -> crate::Result<()> {
        write_atomic(&self.dir, &Self::file_name(id), &encode(body)?)
    }

    /// Fill in the message content of a job read from the index
    fn attach(&self, mut job: QueueJob) -> crate::Result<QueueJob> {
        let path = self.dir.join(Self::file_name(&job.id));
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(QueueError::Internal(format!(
                    "Message content for job {} is missing from {}",
                    job.id,
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        decode::<JobBody>(&bytes, &path)?.restore(&mut job);
        Ok(job)
    }

    fn attach_all(&self, jobs: Vec<QueueJob>) -> crate::Result<Vec<QueueJob>> {
        jobs.into_iter().map(|job| self.attach(job)).collect()
    }

    fn remove(&self, id: &JobId) -> crate::Result<()> {
        match std::fs::remove_file(self.dir.join(Self::file_name(id))) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Remove bodies left half-written by a crashed enqueue
    fn remove_temp_files(&self) -> crate::Result<usize> {
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

impl FileStore {
    /// Validate a store path
    ///
    /// Rejects relative paths, `..` components and system directories.
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::InvalidConfiguration(format!(
                "Store path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(ValidationError::InvalidConfiguration(format!(
                "Store path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::InvalidConfiguration(format!(
                "Store path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileStoreBuilder {
        FileStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the store directory if it does not exist, then clear what a
    /// crash may have left behind: half-written bodies and a partial send log
    /// record
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If the path exists but is not a directory
    /// - If the send log cannot be read or truncated
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising store at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("Expected {} to be a Directory, but it is not", self.path.display()),
            )
            .into());
        }

        std::fs::create_dir_all(self.path.join(BODIES))?;

        {
            let _lock = lock(&self.path, QUEUE_LOCK, true)?;
            let removed = Bodies::new(&self.path).remove_temp_files()?;
            if removed > 0 {
                internal!(
                    level = INFO,
                    "Cleaned up {removed} incomplete message files from store"
                );
            }
        }

        self.repair_send_log()
    }

    /// Truncate a partial record left at the end of the send log
    fn repair_send_log(&self) -> crate::Result<()> {
        let _lock = lock(&self.path, SEND_LOG_LOCK, true)?;
        let path = self.path.join(SEND_LOG);

        let Some(bytes) = read_optional(&path)? else {
            return Ok(());
        };

        let (_, valid) = decode_log(&bytes, &path)?;
        if valid < bytes.len() {
            internal!(
                level = WARN,
                "Truncating {} bytes of an incomplete record from {}",
                bytes.len() - valid,
                path.display()
            );

            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid as u64)?;
            file.sync_all()?;
        }

        Ok(())
    }

    async fn blocking<R, F>(&self, operation: F) -> crate::Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Path) -> crate::Result<R> + Send + 'static,
    {
        let dir = self.path.clone();
        tokio::task::spawn_blocking(move || operation(&dir)).await?
    }

    /// Run `operation` against the queue index, holding its lock for the
    /// whole load/apply/save sequence
    async fn queue<R, F>(&self, write: bool, operation: F) -> crate::Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut QueueTable, &Bodies) -> crate::Result<R> + Send + 'static,
    {
        self.blocking(move |dir| {
            let _lock = lock(dir, QUEUE_LOCK, write)?;

            let index = dir.join(QUEUE_INDEX);
            let mut table = match read_optional(&index)? {
                Some(bytes) => decode(&bytes, &index)?,
                None => QueueTable::default(),
            };

            let result = operation(&mut table, &Bodies::new(dir))?;

            if write {
                write_atomic(dir, QUEUE_INDEX, &encode(&table)?)?;
            }

            Ok(result)
        })
        .await
    }

    /// Every send log entry, read under a shared lock
    async fn log_entries(&self) -> crate::Result<Vec<SendLogEntry>> {
        self.blocking(|dir| {
            let _lock = lock(dir, SEND_LOG_LOCK, false)?;
            read_log(&dir.join(SEND_LOG))
        })
        .await
    }
}

/// Open `{dir}/{name}` and take an advisory lock on it, released on drop
fn lock(dir: &Path, name: &str, exclusive: bool) -> crate::Result<File> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(name))?;

    if exclusive {
        lock.lock()?;
    } else {
        lock.lock_shared()?;
    }

    Ok(lock)
}

fn read_optional(path: &Path) -> crate::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn encode<T: Serialize>(value: &T) -> crate::Result<Vec<u8>> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(SerializationError::from)?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> crate::Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(SerializationError::from)?;

    if read == bytes.len() {
        Ok(value)
    } else {
        Err(SerializationError::Corrupted(path.display().to_string(), bytes.len() - read).into())
    }
}

fn write_atomic(dir: &Path, file: &str, bytes: &[u8]) -> crate::Result<()> {
    let temp_path = dir.join(format!("{TEMP_PREFIX}{file}"));
    let mut temp = File::create(&temp_path)?;
    temp.write_all(bytes)?;
    temp.sync_all()?;

    std::fs::rename(&temp_path, dir.join(file))?;
    Ok(())
}

/// One send log record: length prefix, then the encoded entry
fn frame(entry: &SendLogEntry) -> crate::Result<Vec<u8>> {
    let payload = encode(entry)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| SerializationError::Oversized(payload.len()))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode every complete record, returning the entries and the length of the
/// prefix they occupy. Anything after that is a partial record.
fn decode_log(bytes: &[u8], path: &Path) -> crate::Result<(Vec<SendLogEntry>, usize)> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while let Some(header) = bytes
        .get(offset..)
        .and_then(|rest| rest.first_chunk::<FRAME_HEADER>())
    {
        let start = offset + FRAME_HEADER;
        let end = start + u32::from_le_bytes(*header) as usize;
        let Some(record) = bytes.get(start..end) else {
            break;
        };

        entries.push(decode(record, path)?);
        offset = end;
    }

    Ok((entries, offset))
}

fn read_log(path: &Path) -> crate::Result<Vec<SendLogEntry>> {
    match read_optional(path)? {
        Some(bytes) => Ok(decode_log(&bytes, path)?.0),
        None => Ok(Vec::new()),
    }
}

/// Builder for `FileStore`
#[derive(Debug, Default)]
pub struct FileStoreBuilder {
    path: PathBuf,
}

impl FileStoreBuilder {
    /// Set the store directory path
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// # Errors
    /// Returns an error if the path is relative, contains `..` or points at a
    /// system directory
    pub fn build(self) -> crate::Result<FileStore> {
        FileStore::validate_path(&self.path)?;
        Ok(FileStore { path: self.path })
    }
}

#[async_trait]
impl QueueStore for FileStore {
    async fn enqueue_all(
        &self,
        drafts: Vec<JobDraft>,
        now: DateTime<Utc>,
    ) -> crate::Result<Vec<JobId>> {
        self.queue(true, move |table, bodies| {
            let ids = table.insert_all(drafts, now)?;

            for id in &ids {
                if let Some(job) = table.get_mut(id) {
                    bodies.write(id, &JobBody::take(job))?;
                }
            }

            Ok(ids)
        })
        .await
    }

    async fn claim_batch(&self, limit: usize, now: DateTime<Utc>) -> crate::Result<Vec<QueueJob>> {
        self.queue(true, move |table, bodies| {
            bodies.attach_all(table.claim(limit, now))
        })
        .await
    }

    async fn mark_sent(
        &self,
        id: &JobId,
        token: &ClaimToken,
        sent_at: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        let (id, token) = (*id, *token);
        self.queue(true, move |table, bodies| {
            bodies.attach(table.mark_sent(&id, &token, sent_at)?)
        })
        .await
    }

    async fn mark_retry(
        &self,
        id: &JobId,
        token: &ClaimToken,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        let (id, token, error) = (*id, *token, error.to_string());
        self.queue(true, move |table, bodies| {
            bodies.attach(table.mark_retry(&id, &token, next_attempt_at, &error, now)?)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &JobId,
        token: &ClaimToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        let (id, token, error) = (*id, *token, error.to_string());
        self.queue(true, move |table, bodies| {
            bodies.attach(table.mark_failed(&id, &token, &error, now)?)
        })
        .await
    }

    async fn release(
        &self,
        id: &JobId,
        token: &ClaimToken,
        now: DateTime<Utc>,
    ) -> crate::Result<QueueJob> {
        let (id, token) = (*id, *token);
        self.queue(true, move |table, bodies| {
            bodies.attach(table.release(&id, &token, now)?)
        })
        .await
    }

    async fn reclaim_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> crate::Result<usize> {
        self.queue(true, move |table, _| Ok(table.reclaim_stale(older_than, now)))
            .await
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        let purged = self
            .queue(true, move |table, _| Ok(table.purge_terminal(cutoff)))
            .await?;
        let count = purged.len();

        // Purged jobs are gone from the index, so nothing reads these any more
        self.blocking(move |dir| {
            let bodies = Bodies::new(dir);
            purged.iter().try_for_each(|id| bodies.remove(id))
        })
        .await?;

        Ok(count)
    }

    async fn cancel(&self, id: &JobId, now: DateTime<Utc>) -> crate::Result<bool> {
        let id = *id;
        self.queue(true, move |table, _| Ok(table.cancel(&id, now)))
            .await
    }

    async fn get(&self, id: &JobId) -> crate::Result<Option<QueueJob>> {
        let id = *id;
        self.queue(false, move |table, bodies| {
            table.get(&id).map(|job| bodies.attach(job)).transpose()
        })
        .await
    }

    async fn list(&self, filter: &JobFilter) -> crate::Result<Vec<QueueJob>> {
        let filter = filter.clone();
        self.queue(false, move |table, bodies| {
            bodies.attach_all(table.list(&filter))
        })
        .await
    }

    async fn stats(&self) -> crate::Result<QueueStats> {
        self.queue(false, |table, _| Ok(table.stats())).await
    }
}

#[async_trait]
impl SendLog for FileStore {
    async fn record(&self, entry: SendLogEntry) -> crate::Result<()> {
        self.blocking(move |dir| {
            let frame = frame(&entry)?;

            let _lock = lock(dir, SEND_LOG_LOCK, true)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(SEND_LOG))?;
            file.write_all(&frame)?;
            file.sync_data()?;

            Ok(())
        })
        .await
    }

    async fn query(&self, filter: &SendLogFilter) -> crate::Result<Vec<SendLogEntry>> {
        let entries = self.log_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn count(&self, filter: &SendLogFilter) -> crate::Result<usize> {
        let entries = self.log_entries().await?;
        Ok(entries.iter().filter(|entry| filter.matches(entry)).count())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> crate::Result<usize> {
        self.blocking(move |dir| {
            let _lock = lock(dir, SEND_LOG_LOCK, true)?;

            let mut entries = read_log(&dir.join(SEND_LOG))?;
            let before = entries.len();
            entries.retain(|entry| entry.recorded_at >= cutoff);
            let purged = before - entries.len();

            if purged > 0 {
                let mut bytes = Vec::new();
                for entry in &entries {
                    bytes.extend(frame(entry)?);
                }
                write_atomic(dir, SEND_LOG, &bytes)?;
            }

            Ok(purged)
        })
        .await
    }
}
