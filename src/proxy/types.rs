use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::recording::types::RiskLevel;
use crate::zmodem::ZFileEvent;

/// Capacity of every byte-chunk channel in and out of a parser.
pub const PARSER_CHANNEL_SIZE: usize = 32;

/// A command and the output it produced, settled at a command boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub input: String,
    pub output: String,
    pub risk: RiskLevel,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Per-session knobs shared by every parser variant.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    pub session_id: Uuid,
    /// Maximum characters kept of a recorded command.
    pub input_limit: usize,
    /// Maximum characters kept of a recorded command's output.
    pub output_limit: usize,
    pub buffer_capacity: usize,
}

impl ParserOptions {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            input_limit: 128,
            output_limit: 1024,
            buffer_capacity: crate::terminal::ring_buffer::DEFAULT_CAPACITY,
        }
    }
}

/// Audit sink for files moved over ZMODEM. Called exactly once per file.
pub trait TransferAuditor: Send + Sync {
    fn on_transfer(&self, session_id: Uuid, event: &ZFileEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditor;

impl TransferAuditor for LogAuditor {
    fn on_transfer(&self, session_id: Uuid, event: &ZFileEvent) {
        info!(
            "[{}] file {:?} {:?}: {} bytes declared, {} transferred, success={}",
            session_id, event.kind, event.filename, event.size, event.transferred, event.success
        );
    }
}

/// Byte chunks a handler wants delivered after processing one input chunk.
#[derive(Debug, Default)]
pub struct Emitted {
    pub to_server: Vec<Vec<u8>>,
    pub to_user: Vec<Vec<u8>>,
    pub records: Vec<ParsedCommand>,
}

pub(crate) fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
