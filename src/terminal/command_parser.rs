use log::{trace, warn};

use super::ring_buffer::RingTextBuffer;
use super::screen;

/// Which side of a command a parser accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Echo of the line the user is typing.
    Command,
    /// Everything the target prints after a command was submitted.
    Output,
}

/// Stateful accumulator that turns buffered terminal bytes into logical lines.
///
/// Bytes go into a bounded [`RingTextBuffer`]; [`parse`](Self::parse) replays
/// them through the screen emulator, strips the prompt and resets the buffer.
///
/// An [`Output`](ParserKind::Output) parser treats the last line it produced as
/// the prompt: learned on the first parse, refreshed on every later one, and
/// never returned as output. A [`Command`](ParserKind::Command) parser only
/// strips the prompt it was given through [`set_prompt`](Self::set_prompt).
#[derive(Debug)]
pub struct CommandParser {
    kind: ParserKind,
    buf: RingTextBuffer,
    prompt: Option<String>,
    label: String,
}

impl CommandParser {
    pub fn new(kind: ParserKind, capacity: usize, label: impl Into<String>) -> Self {
        Self {
            kind,
            buf: RingTextBuffer::new(capacity),
            prompt: None,
            label: label.into(),
        }
    }

    pub fn kind(&self) -> ParserKind {
        self.kind
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.write(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn set_prompt(&mut self, prompt: Option<String>) {
        self.prompt = prompt.filter(|p| !p.trim().is_empty());
    }

    /// Replays the buffer and returns its non-empty lines with the prompt removed.
    ///
    /// The buffer is reset whether or not the emulator succeeded; a malformed
    /// stream yields no lines for this cycle.
    pub fn parse(&mut self) -> Vec<String> {
        let data = self.buf.to_vec();
        self.buf.reset();
        let mut lines = match screen::parse_lines(&data) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("[{}] terminal parse failed, dropping {} byte(s): {}", self.label, data.len(), e);
                return Vec::new();
            }
        };
        lines.retain(|l| !l.trim().is_empty());

        if self.kind == ParserKind::Output {
            if let Some(last) = lines.pop() {
                trace!("[{}] prompt learned: {:?}", self.label, last);
                self.prompt = Some(last);
            }
        }

        lines
            .into_iter()
            .filter_map(|line| self.strip_prompt(line))
            .collect()
    }

    fn strip_prompt(&self, line: String) -> Option<String> {
        // learned prompts are right-trimmed, so compare without trailing blanks
        let stripped = match self.prompt.as_deref().map(str::trim_end) {
            Some(prompt) if !prompt.is_empty() => match line.strip_prefix(prompt) {
                Some(rest) => rest.trim_start().to_string(),
                None => line,
            },
            _ => line,
        };
        if stripped.trim().is_empty() {
            None
        } else {
            Some(stripped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::ring_buffer::DEFAULT_CAPACITY;

    fn command_parser() -> CommandParser {
        CommandParser::new(ParserKind::Command, DEFAULT_CAPACITY, "test")
    }

    #[test]
    fn one_carriage_return_yields_one_line() {
        for cmd in ["ls -la", "echo 'hello world'", "cd /var/log && tail -n 20 syslog"] {
            let mut parser = command_parser();
            parser.write(cmd.as_bytes());
            parser.write(b"\r");
            assert_eq!(parser.parse(), vec![cmd.to_string()]);
        }
    }

    #[test]
    fn parse_resets_the_buffer() {
        let mut parser = command_parser();
        parser.write(b"whoami\r");
        assert_eq!(parser.parse().len(), 1);
        assert!(parser.is_empty());
        assert!(parser.parse().is_empty());
    }

    #[test]
    fn given_prompt_is_stripped_and_prompt_only_lines_dropped() {
        let mut parser = command_parser();
        parser.set_prompt(Some("[root@web ~]# ".to_string()));
        // readline redraw after Ctrl-L puts the prompt back into the echo
        parser.write(b"\x1b[H\x1b[2J[root@web ~]# uptime\r");
        assert_eq!(parser.parse(), vec!["uptime"]);

        parser.write(b"[root@web ~]# \r");
        assert!(parser.parse().is_empty());
    }

    #[test]
    fn output_parser_learns_and_refreshes_prompt() {
        let mut parser = CommandParser::new(ParserKind::Output, DEFAULT_CAPACITY, "test");
        parser.write(b"Last login: today\r\n[root@web ~]# ");
        assert_eq!(parser.parse(), vec!["Last login: today"]);
        assert_eq!(parser.prompt(), Some("[root@web ~]#"));

        parser.write(b"\r\nfile-a\r\nfile-b\r\n[root@web tmp]# ");
        assert_eq!(parser.parse(), vec!["file-a", "file-b"]);
        assert_eq!(parser.prompt(), Some("[root@web tmp]#"));
    }

    #[test]
    fn malformed_stream_yields_no_lines() {
        let mut parser = command_parser();
        parser.write(b"ls");
        for _ in 0..3 {
            parser.write(b"\x1b[65535C");
        }
        parser.write(b"x\r");
        assert!(parser.parse().is_empty());
        assert!(parser.is_empty());
    }
}
