//! Storage Traits
//!
//! The recorders only talk to these two contracts. Both are synchronous and are
//! called from blocking tasks, so implementations are free to do plain file or
//! network IO.
//!
//! `type_name()` identifies the backend kind. A backend named
//! [`NULL_STORAGE_TYPE`] disables the recorder using it, and a fallback backend
//! is only tried when its type name differs from the primary's.

use std::path::Path;

use crate::error_handling::types::StorageError;
use crate::recording::types::CommandRecord;

pub const NULL_STORAGE_TYPE: &str = "null";

/// Destination for finished replay files.
pub trait ReplayStorage: Send + Sync {
    /// Stores the file at `local_path` under the relative `target` name
    /// (`<date>/<session id>.cast.gz`). The local file is owned by the caller.
    fn upload(&self, local_path: &Path, target: &str) -> Result<(), StorageError>;

    fn type_name(&self) -> &str;
}

/// Destination for audited commands.
pub trait CommandStorage: Send + Sync {
    /// Saves a whole batch; on error the caller retries the same batch.
    fn bulk_save(&self, commands: &[CommandRecord]) -> Result<(), StorageError>;

    fn type_name(&self) -> &str;
}
