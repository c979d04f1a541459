//! Session recording.
//!
//! - `replay`: cast file of the target's output, compressed and uploaded at the end.
//! - `command`: batched persistence of audited commands.
//! - `types`: records shared with the storages.

pub mod command;
pub mod replay;
pub mod types;

pub use command::{CommandRecorder, CommandRecorderOptions, LogNotifier, RiskNotifier};
pub use replay::{ReplayOptions, ReplayOutcome, ReplayRecorder};
pub use types::{CommandRecord, RiskLevel, SessionLabels};
