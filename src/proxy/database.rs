use std::sync::Arc;

use super::boundary::CommandBoundary;
use super::engine::StreamHandler;
use super::types::{Emitted, ParserOptions};
use crate::filter::FilterEngine;

/// Database client sessions (MySQL, PostgreSQL and friends).
///
/// Same command boundary and filtering as terminal sessions, without transfer
/// or full-screen detection; the replay is always recorded.
pub struct DatabaseParser {
    boundary: CommandBoundary,
}

impl DatabaseParser {
    pub fn new(opts: &ParserOptions, filter: Arc<FilterEngine>) -> Self {
        Self {
            boundary: CommandBoundary::new(opts, filter),
        }
    }
}

impl StreamHandler for DatabaseParser {
    fn on_user_input(&mut self, data: &[u8], out: &mut Emitted) {
        self.boundary.on_user_input(data, out);
    }

    fn on_server_output(&mut self, data: &[u8], out: &mut Emitted) {
        self.boundary.on_server_output(data, out);
    }

    fn finish(&mut self, out: &mut Emitted) {
        self.boundary.finish(out);
    }

    fn close(&mut self) {}
}
