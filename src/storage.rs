//! Storage subsystem
//!
//! Backends that receive finished session artifacts.
//!
//! Components:
//! - `storage_trait`: `ReplayStorage` (compressed cast uploads) and `CommandStorage`
//!   (batched command records).
//! - `file_storage`: filesystem-backed implementation of both.
//! - `null_storage`: no-op backend; its `"null"` type name turns the matching recorder off.

pub mod file_storage;
pub mod null_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use null_storage::NullStorage;
pub use storage_trait::{CommandStorage, ReplayStorage, NULL_STORAGE_TYPE};
