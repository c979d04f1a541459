//! Command boundary state machine shared by every parser variant.
//!
//! The user's Enter key commits the command echoed so far; the first keystroke
//! after that settles the previous command's output. Target bytes are routed to
//! the command-echo parser while the user types and to the output parser
//! otherwise. Overlay modes (full-screen programs, file transfers) pass bytes
//! through without attributing them to any command.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use uuid::Uuid;

use super::types::{truncate_chars, Emitted, ParsedCommand, ParserOptions};
use crate::filter::FilterEngine;
use crate::recording::types::RiskLevel;
use crate::terminal::{CommandParser, ParserKind};

/// Line-kill followed by a carriage return, sent to the target in place of a
/// denied command's Enter.
pub const DENY_TO_TARGET: [u8; 2] = [0x15, b'\r'];

const CR: u8 = b'\r';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// The user is typing; target bytes are the echo of the command line.
    Inputting,
    /// A command was submitted; target bytes are its output.
    Idle,
    /// A full-screen program owns the terminal.
    FullScreen,
    /// A ZMODEM transfer is in progress.
    FileTransfer,
}

impl StreamMode {
    pub fn is_overlay(self) -> bool {
        matches!(self, StreamMode::FullScreen | StreamMode::FileTransfer)
    }
}

#[derive(Debug)]
struct PendingCommand {
    input: String,
    risk: RiskLevel,
    timestamp: DateTime<Utc>,
}

pub fn warn_text(text: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", text)
}

pub struct CommandBoundary {
    session_id: Uuid,
    mode: StreamMode,
    input: CommandParser,
    output: CommandParser,
    filter: Arc<FilterEngine>,
    pending: Option<PendingCommand>,
    input_limit: usize,
    output_limit: usize,
}

impl CommandBoundary {
    pub fn new(opts: &ParserOptions, filter: Arc<FilterEngine>) -> Self {
        let label = opts.session_id.to_string();
        Self {
            session_id: opts.session_id,
            mode: StreamMode::Idle,
            input: CommandParser::new(ParserKind::Command, opts.buffer_capacity, label.clone()),
            output: CommandParser::new(ParserKind::Output, opts.buffer_capacity, label),
            filter,
            pending: None,
            input_limit: opts.input_limit,
            output_limit: opts.output_limit,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Enters a pass-through mode. Output gathered so far stays attributed to
    /// the pending command.
    pub fn enter_overlay(&mut self, mode: StreamMode) {
        if mode.is_overlay() && self.mode != mode {
            debug!("[{}] stream mode {:?} -> {:?}", self.session_id, self.mode, mode);
            self.mode = mode;
        }
    }

    /// Leaves a pass-through mode; the next keystroke settles any pending command.
    pub fn leave_overlay(&mut self, mode: StreamMode) {
        if self.mode == mode {
            debug!("[{}] stream mode {:?} -> Idle", self.session_id, self.mode);
            self.mode = StreamMode::Idle;
        }
    }

    pub fn on_user_input(&mut self, data: &[u8], out: &mut Emitted) {
        if self.mode.is_overlay() {
            out.to_server.push(data.to_vec());
            return;
        }

        if !data.contains(&CR) {
            if self.mode == StreamMode::Idle {
                self.settle_output(out);
                self.mode = StreamMode::Inputting;
            }
            out.to_server.push(data.to_vec());
            return;
        }

        // consecutive Enter: the previous command never saw a keystroke
        if self.mode == StreamMode::Idle {
            self.settle_output(out);
        }
        self.mode = StreamMode::Idle;

        let command = self.parse_command();
        if command.is_empty() {
            out.to_server.push(data.to_vec());
            return;
        }

        let verdict = self.filter.check(&command);
        if verdict.is_denied() {
            info!(
                "[{}] command {:?} denied (matched {:?})",
                self.session_id, command, verdict.fragment
            );
            let message = warn_text(&format!("Command `{}` is forbidden", command));
            out.to_server.push(DENY_TO_TARGET.to_vec());
            out.to_user.push(format!("\r\n{}", message).into_bytes());
            out.records.push(self.record(command, message, RiskLevel::Danger, Utc::now()));
            return;
        }

        trace!("[{}] command committed: {:?}", self.session_id, command);
        self.pending = Some(PendingCommand {
            input: command,
            risk: verdict.risk,
            timestamp: Utc::now(),
        });
        out.to_server.push(data.to_vec());
    }

    /// Attributes target bytes to the buffer matching the current mode. The
    /// bytes themselves always go back to the user unchanged.
    pub fn on_server_output(&mut self, data: &[u8], out: &mut Emitted) {
        match self.mode {
            StreamMode::Inputting => self.input.write(data),
            StreamMode::Idle => self.output.write(data),
            StreamMode::FullScreen | StreamMode::FileTransfer => {}
        }
        out.to_user.push(data.to_vec());
    }

    /// Session-end commit of whatever is still open.
    pub fn finish(&mut self, out: &mut Emitted) {
        match self.mode {
            StreamMode::Inputting => {
                let command = self.parse_command();
                if !command.is_empty() {
                    let risk = self.filter.check(&command).risk;
                    out.records.push(self.record(command, String::new(), risk, Utc::now()));
                }
            }
            _ => self.settle_output(out),
        }
    }

    fn parse_command(&mut self) -> String {
        self.input.set_prompt(self.output.prompt().map(str::to_string));
        let lines = self.input.parse();
        lines.join(" ").trim().to_string()
    }

    /// Parses buffered output (refreshing the learned prompt) and records the
    /// pending command with it, if there is one.
    fn settle_output(&mut self, out: &mut Emitted) {
        let lines = self.output.parse();
        if let Some(pending) = self.pending.take() {
            let output = lines.join("\n");
            out.records.push(self.record(pending.input, output, pending.risk, pending.timestamp));
        }
    }

    fn record(&self, input: String, output: String, risk: RiskLevel, timestamp: DateTime<Utc>) -> ParsedCommand {
        ParsedCommand {
            input: truncate_chars(&input, self.input_limit),
            output: truncate_chars(&output, self.output_limit),
            risk,
            session_id: self.session_id,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterRule, RuleAction};

    fn boundary(rules: Vec<FilterRule>) -> CommandBoundary {
        CommandBoundary::new(
            &ParserOptions::new(Uuid::new_v4()),
            Arc::new(FilterEngine::new(rules).unwrap()),
        )
    }

    /// Types `cmd` one key at a time with the target echoing it, then Enter.
    fn type_command(b: &mut CommandBoundary, cmd: &str, out: &mut Emitted) {
        for ch in cmd.bytes() {
            b.on_user_input(&[ch], out);
            b.on_server_output(&[ch], out);
        }
        b.on_user_input(b"\r", out);
    }

    #[test]
    fn command_and_output_are_recorded_on_next_keystroke() {
        let mut b = boundary(vec![]);
        let mut out = Emitted::default();
        b.on_server_output(b"Welcome\r\n[root@web ~]# ", &mut out);

        type_command(&mut b, "ls", &mut out);
        assert_eq!(b.mode(), StreamMode::Idle);
        b.on_server_output(b"\r\nbin  etc\r\n[root@web ~]# ", &mut out);
        assert!(out.records.is_empty());

        b.on_user_input(b"p", &mut out);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].input, "ls");
        assert_eq!(out.records[0].output, "bin  etc");
        assert_eq!(out.records[0].risk, RiskLevel::Normal);
        assert_eq!(b.mode(), StreamMode::Inputting);
    }

    #[test]
    fn denied_command_is_rewritten_and_recorded() {
        let mut b = boundary(vec![
            FilterRule::exact(1, "rm -rf /", RuleAction::Deny),
            FilterRule::regex(2, ".*", RuleAction::Allow),
        ]);
        let mut out = Emitted::default();
        b.on_server_output(b"$ ", &mut out);
        type_command(&mut b, "rm -rf /", &mut out);

        assert_eq!(out.to_server.last().unwrap(), &DENY_TO_TARGET.to_vec());
        let notice = String::from_utf8(out.to_user.last().unwrap().clone()).unwrap();
        assert_eq!(notice, "\r\n\x1b[33mCommand `rm -rf /` is forbidden\x1b[0m");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].input, "rm -rf /");
        assert_eq!(out.records[0].risk, RiskLevel::Danger);

        // nothing pending: the next keystroke records nothing more
        b.on_user_input(b"l", &mut out);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn consecutive_enters_settle_previous_command() {
        let mut b = boundary(vec![]);
        let mut out = Emitted::default();
        b.on_server_output(b"$ ", &mut out);
        type_command(&mut b, "date", &mut out);
        b.on_server_output(b"\r\nMon Jan 1\r\n$ ", &mut out);
        b.on_user_input(b"\r", &mut out);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].output, "Mon Jan 1");
    }

    #[test]
    fn overlay_passes_bytes_through_unattributed() {
        let mut b = boundary(vec![FilterRule::regex(1, "secret", RuleAction::Deny)]);
        let mut out = Emitted::default();
        b.on_server_output(b"$ ", &mut out);
        type_command(&mut b, "vim notes", &mut out);

        b.enter_overlay(StreamMode::FullScreen);
        b.on_server_output(b"~\r\n~\r\n", &mut out);
        // typing inside the editor is neither filtered nor a boundary
        b.on_user_input(b"isecret\r", &mut out);
        assert_eq!(out.to_server.last().unwrap(), b"isecret\r");
        assert!(out.records.is_empty());

        b.leave_overlay(StreamMode::FullScreen);
        b.on_server_output(b"$ ", &mut out);
        b.on_user_input(b"l", &mut out);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].input, "vim notes");
    }

    #[test]
    fn limits_truncate_recorded_text() {
        let mut opts = ParserOptions::new(Uuid::new_v4());
        opts.input_limit = 4;
        opts.output_limit = 3;
        let mut b = CommandBoundary::new(&opts, Arc::new(FilterEngine::default()));
        let mut out = Emitted::default();
        b.on_server_output(b"$ ", &mut out);
        type_command(&mut b, "echo hello", &mut out);
        b.on_server_output(b"\r\nhello\r\n$ ", &mut out);
        b.finish(&mut out);
        assert_eq!(out.records[0].input, "echo");
        assert_eq!(out.records[0].output, "hel");
    }

    #[test]
    fn finish_commits_partial_input() {
        let mut b = boundary(vec![]);
        let mut out = Emitted::default();
        b.on_server_output(b"$ ", &mut out);
        b.on_user_input(b"w", &mut out);
        b.on_server_output(b"who", &mut out);
        b.finish(&mut out);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].input, "who");
        assert_eq!(out.records[0].output, "");
    }
}
