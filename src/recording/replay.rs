//! Terminal-cast recording of everything the target prints.
//!
//! The recorder writes `<replay_dir>/<date>/<session id>.cast` lazily: nothing
//! touches the disk until the first non-empty chunk. On [`ReplayRecorder::end`]
//! the file is gzip-compressed, the raw file removed, and the archive uploaded
//! with bounded retries, then to the fallback backend once. The archive is
//! deleted afterwards whether or not any upload succeeded.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::types::{CastEnv, CastHeader};
use crate::error_handling::types::ReplayError;
use crate::storage::storage_trait::{ReplayStorage, NULL_STORAGE_TYPE};

pub const CAST_VERSION: u32 = 2;

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub replay_dir: PathBuf,
    pub width: u16,
    pub height: u16,
    pub term: String,
    pub shell: String,
    pub title: String,
    pub upload_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            replay_dir: std::env::temp_dir().join("gangway-replays"),
            width: 80,
            height: 24,
            term: "xterm".to_string(),
            shell: "/bin/bash".to_string(),
            title: String::new(),
            upload_retries: 3,
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

/// What [`ReplayRecorder::end`] did with the recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The primary storage is the null backend.
    Disabled,
    /// Nothing was ever written; no artifact existed.
    Empty,
    /// Uploaded through the backend with this type name.
    Uploaded(String),
    /// Every attempt failed; the artifact was discarded.
    Failed,
    /// `end` already ran.
    AlreadyEnded,
}

struct CastFile {
    writer: BufWriter<File>,
}

pub struct ReplayRecorder {
    session_id: Uuid,
    opts: ReplayOptions,
    storage: Arc<dyn ReplayStorage>,
    fallback: Option<Arc<dyn ReplayStorage>>,
    created: DateTime<Utc>,
    started: Instant,
    path: PathBuf,
    target: String,
    file: Option<CastFile>,
    carry: Vec<u8>,
    failed: bool,
    ended: bool,
}

impl ReplayRecorder {
    pub fn new(
        session_id: Uuid,
        opts: ReplayOptions,
        storage: Arc<dyn ReplayStorage>,
        fallback: Option<Arc<dyn ReplayStorage>>,
    ) -> Self {
        let created = Utc::now();
        let date = created.format("%Y-%m-%d").to_string();
        let path = opts
            .replay_dir
            .join(&date)
            .join(format!("{}.cast", session_id));
        let target = format!("{}/{}.cast.gz", date, session_id);
        Self {
            session_id,
            opts,
            storage,
            fallback,
            created,
            started: Instant::now(),
            path,
            target,
            file: None,
            carry: Vec::new(),
            failed: false,
            ended: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.storage.type_name() != NULL_STORAGE_TYPE
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote name the archive is uploaded under.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Appends one output row. After the first write error the recording is
    /// abandoned and later calls are no-ops.
    pub fn record(&mut self, data: &[u8]) -> Result<(), ReplayError> {
        if self.ended || self.failed || data.is_empty() || !self.is_enabled() {
            return Ok(());
        }
        let result = self.write_row(data);
        if let Err(ref e) = result {
            error!("[{}] replay recording abandoned: {}", self.session_id, e);
            self.failed = true;
        }
        result
    }

    fn write_row(&mut self, data: &[u8]) -> Result<(), ReplayError> {
        self.carry.extend_from_slice(data);
        let text = take_utf8(&mut self.carry);
        if text.is_empty() {
            return Ok(());
        }
        if self.file.is_none() {
            self.file = Some(self.open()?);
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let row = serde_json::to_string(&(elapsed, "o", text))?;
        if let Some(cast) = self.file.as_mut() {
            cast.writer.write_all(row.as_bytes())?;
            cast.writer.write_all(b"\n")?;
        }
        trace!("[{}] replay row at {:.3}s", self.session_id, elapsed);
        Ok(())
    }

    fn open(&self) -> Result<CastFile, ReplayError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);
        let header = CastHeader {
            version: CAST_VERSION,
            width: self.opts.width,
            height: self.opts.height,
            timestamp: self.created.timestamp(),
            title: self.opts.title.clone(),
            env: CastEnv {
                shell: self.opts.shell.clone(),
                term: self.opts.term.clone(),
            },
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;
        debug!("[{}] replay file opened at {}", self.session_id, self.path.display());
        Ok(CastFile { writer })
    }

    /// Finishes the recording and ships it. Safe to call more than once; only
    /// the first call does anything.
    pub async fn end(&mut self) -> ReplayOutcome {
        if self.ended {
            return ReplayOutcome::AlreadyEnded;
        }
        self.ended = true;
        if !self.is_enabled() {
            return ReplayOutcome::Disabled;
        }
        let Some(mut cast) = self.file.take() else {
            debug!("[{}] replay empty, nothing to upload", self.session_id);
            return ReplayOutcome::Empty;
        };
        if let Err(e) = cast.writer.flush() {
            warn!("[{}] replay flush failed: {}", self.session_id, e);
        }
        drop(cast);

        let raw = self.path.clone();
        let gz = gz_path(&raw);
        let compressed = {
            let (raw, gz) = (raw.clone(), gz.clone());
            tokio::task::spawn_blocking(move || compress(&raw, &gz)).await
        };
        remove_quietly(&raw);
        match compressed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("[{}] replay compression failed: {}", self.session_id, e);
                remove_quietly(&gz);
                return ReplayOutcome::Failed;
            }
            Err(e) => {
                error!("[{}] replay compression task failed: {}", self.session_id, e);
                remove_quietly(&gz);
                return ReplayOutcome::Failed;
            }
        }

        let outcome = self.upload(&gz).await;
        remove_quietly(&gz);
        outcome
    }

    async fn upload(&self, gz: &Path) -> ReplayOutcome {
        let attempts = self.opts.upload_retries.max(1);
        for attempt in 1..=attempts {
            match self.upload_once(&self.storage, gz).await {
                Ok(()) => {
                    info!("[{}] replay uploaded as {}", self.session_id, self.target);
                    return ReplayOutcome::Uploaded(self.storage.type_name().to_string());
                }
                Err(e) => {
                    warn!(
                        "[{}] replay upload attempt {}/{} failed: {}",
                        self.session_id, attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.opts.retry_backoff).await;
                    }
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            if fallback.type_name() != self.storage.type_name() {
                match self.upload_once(fallback, gz).await {
                    Ok(()) => {
                        info!(
                            "[{}] replay uploaded through {} fallback",
                            self.session_id,
                            fallback.type_name()
                        );
                        return ReplayOutcome::Uploaded(fallback.type_name().to_string());
                    }
                    Err(e) => warn!("[{}] replay fallback upload failed: {}", self.session_id, e),
                }
            }
        }
        error!("[{}] replay {} dropped after failed uploads", self.session_id, self.target);
        ReplayOutcome::Failed
    }

    async fn upload_once(&self, storage: &Arc<dyn ReplayStorage>, gz: &Path) -> Result<(), ReplayError> {
        let storage = Arc::clone(storage);
        let path = gz.to_path_buf();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || storage.upload(&path, &target))
            .await
            .map_err(|e| ReplayError::IoError(io::Error::new(io::ErrorKind::Other, e)))?
            .map_err(ReplayError::StorageError)
    }
}

fn gz_path(raw: &Path) -> PathBuf {
    let mut name = raw.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

fn compress(raw: &Path, gz: &Path) -> io::Result<()> {
    let mut input = File::open(raw)?;
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(gz)?), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Drains the longest decodable prefix of `buf`. An incomplete trailing
/// sequence stays in `buf`; invalid bytes become U+FFFD.
fn take_utf8(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut rest: &[u8] = buf;
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.push_str(s);
                rest = &[];
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(n) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[n..];
                    }
                    None => {
                        rest = after;
                        break;
                    }
                }
            }
        }
    }
    let carry = rest.to_vec();
    *buf = carry;
    out
}
