use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use log::{debug, error, info};

use crate::error_handling::types::StorageError;
use crate::recording::types::CommandRecord;
use crate::storage::storage_trait::{CommandStorage, ReplayStorage};

/// Filesystem backend.
///
/// Layout under `base_path`:
/// - `<date>/<session id>.cast.gz` for uploaded replays (the target name decides the path)
/// - `commands/<date>.jsonl` with one JSON object per saved command
pub struct FileStorage {
    base_path: PathBuf,
    // serialises appends to the daily command file
    commands_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let commands_dir = base_path.join("commands");

        fs::create_dir_all(&commands_dir).map_err(|e| { error!("Failed to create commands dir {}: {}", commands_dir.display(), e); StorageError::WriteFailed })?;
        info!("FileStorage initialized at {}", base_path.display());

        Ok(Self {
            base_path,
            commands_lock: Mutex::new(()),
        })
    }

    /// Construct FileStorage using env var GANGWAY_FILE_STORAGE_DIR if set, otherwise current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("GANGWAY_FILE_STORAGE_DIR") {
            info!("Using FileStorage from GANGWAY_FILE_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| { error!("Failed to get current dir: {}", e); StorageError::ReadFailed })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn commands_file_for(&self, date: NaiveDate) -> PathBuf {
        self.base_path.join("commands").join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn resolve_target(&self, target: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(target);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if target.is_empty() || escapes {
            error!("Refusing upload target outside storage root: {:?}", target);
            return Err(StorageError::UploadFailed(format!("invalid target {:?}", target)));
        }
        Ok(self.base_path.join(relative))
    }

    /// Reads back the commands saved on `date`.
    pub fn load_commands(&self, date: NaiveDate) -> Result<Vec<CommandRecord>, StorageError> {
        let path = self.commands_file_for(date);
        let file = File::open(&path).map_err(|e| { error!("Failed to open {}: {}", path.display(), e); StorageError::ReadFailed })?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| { error!("Read failed {}: {}", path.display(), e); StorageError::ReadFailed })?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| { error!("Invalid command line in {}: {}", path.display(), e); StorageError::ReadFailed })?;
            records.push(record);
        }
        debug!("Loaded {} command(s) from {}", records.len(), path.display());
        Ok(records)
    }
}

impl ReplayStorage for FileStorage {
    fn upload(&self, local_path: &Path, target: &str) -> Result<(), StorageError> {
        let dest = self.resolve_target(target)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| { error!("Failed to create dir {}: {}", parent.display(), e); StorageError::WriteFailed })?;
        }
        let bytes = fs::copy(local_path, &dest).map_err(|e| {
            error!("Failed to copy {} to {}: {}", local_path.display(), dest.display(), e);
            StorageError::UploadFailed(e.to_string())
        })?;
        info!("Stored replay {} ({} bytes) at {}", target, bytes, dest.display());
        Ok(())
    }

    fn type_name(&self) -> &str {
        "file"
    }
}

impl CommandStorage for FileStorage {
    fn bulk_save(&self, commands: &[CommandRecord]) -> Result<(), StorageError> {
        if commands.is_empty() {
            return Ok(());
        }
        let mut out = Vec::new();
        for cmd in commands {
            serde_json::to_writer(&mut out, cmd).map_err(|e| { error!("Failed to encode command: {}", e); StorageError::WriteFailed })?;
            out.push(b'\n');
        }

        let path = self.commands_file_for(Utc::now().date_naive());
        let _guard = self.commands_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut f = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| { error!("Open append failed {}: {}", path.display(), e); StorageError::WriteFailed })?;
        f.write_all(&out).map_err(|e| { error!("Write failed {}: {}", path.display(), e); StorageError::WriteFailed })?;
        debug!("Appended {} command(s) to {}", commands.len(), path.display());
        Ok(())
    }

    fn type_name(&self) -> &str {
        "file"
    }
}
