use std::path::Path;

use log::trace;

use super::storage_trait::{CommandStorage, ReplayStorage, NULL_STORAGE_TYPE};
use crate::error_handling::types::StorageError;
use crate::recording::types::CommandRecord;

/// Accepts everything and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStorage;

impl ReplayStorage for NullStorage {
    fn upload(&self, local_path: &Path, target: &str) -> Result<(), StorageError> {
        trace!("null storage: discarding {} ({})", local_path.display(), target);
        Ok(())
    }

    fn type_name(&self) -> &str {
        NULL_STORAGE_TYPE
    }
}

impl CommandStorage for NullStorage {
    fn bulk_save(&self, commands: &[CommandRecord]) -> Result<(), StorageError> {
        trace!("null storage: discarding {} command(s)", commands.len());
        Ok(())
    }

    fn type_name(&self) -> &str {
        NULL_STORAGE_TYPE
    }
}
