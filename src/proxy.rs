//! Protocol parsers sitting between the user and the target.
//!
//! Every variant implements [`ParseEngine`]: raw chunks in from both sides,
//! cleaned chunks out, plus a stream of settled commands. The variant is picked
//! once per session from the target protocol.

pub mod boundary;
pub mod database;
pub mod engine;
pub mod fullscreen;
pub mod terminal;
pub mod types;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use boundary::{CommandBoundary, StreamMode};
pub use database::DatabaseParser;
pub use engine::{ParseEngine, ParserEngine, StreamHandler};
pub use terminal::TerminalParser;
pub use types::{LogAuditor, ParsedCommand, ParserOptions, TransferAuditor};

use crate::configuration::types::Protocol;
use crate::filter::FilterEngine;

/// Builds the parser variant for `protocol`.
pub fn new_parser(
    protocol: Protocol,
    opts: &ParserOptions,
    filter: Arc<FilterEngine>,
    auditor: Arc<dyn TransferAuditor>,
) -> Box<dyn ParseEngine> {
    let need_record = Arc::new(AtomicBool::new(true));
    if protocol.is_database() {
        Box::new(ParserEngine::new(
            opts.session_id,
            DatabaseParser::new(opts, filter),
            need_record,
        ))
    } else {
        let handler = TerminalParser::new(opts, filter, auditor, need_record.clone());
        Box::new(ParserEngine::new(opts.session_id, handler, need_record))
    }
}
