//! Minimal terminal-screen emulator.
//!
//! Replays a raw, escape-laden byte stream onto a grid of character rows so the
//! final visual lines can be recovered: cursor motion, erase-in-line,
//! backspace-overwrite and carriage returns are applied as the terminal would
//! apply them instead of being kept as printable bytes. SGR, OSC and private
//! mode sequences are consumed and ignored.
//!
//! Faults are reported through [`ScreenError`]; once a fault is raised the rest
//! of the input is ignored and [`Screen::feed`] returns the error.

use vte::{Params, Parser, Perform};

use crate::error_handling::types::ScreenError;

/// Upper bound on rows the emulator will materialise.
pub const MAX_ROWS: usize = 100 * 1024;
/// Upper bound on the cursor column.
pub const MAX_COLUMNS: usize = 4096;
/// Upper bound on the cells one screen may ever allocate. Cursor jumps pad
/// rows with blanks, so this is what keeps memory proportional to the input.
pub const MAX_CELLS: usize = 1024 * 1024;

const TAB_WIDTH: usize = 8;

#[derive(Debug, Default)]
struct Grid {
    rows: Vec<Vec<char>>,
    row: usize,
    col: usize,
    // cells allocated so far, never decremented
    cells: usize,
    fault: Option<ScreenError>,
}

impl Grid {
    fn fail(&mut self, err: ScreenError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    fn move_to_row(&mut self, row: usize) {
        if row >= MAX_ROWS {
            self.fail(ScreenError::TooManyRows(MAX_ROWS));
            return;
        }
        self.row = row;
    }

    fn move_to_col(&mut self, col: usize) {
        if col > MAX_COLUMNS {
            self.fail(ScreenError::CursorOutOfRange(MAX_COLUMNS));
            return;
        }
        self.col = col;
    }

    fn charge(&mut self, n: usize) -> bool {
        if self.cells + n > MAX_CELLS {
            self.fail(ScreenError::TooManyCells(MAX_CELLS));
            return false;
        }
        self.cells += n;
        true
    }

    fn line_len(&self) -> usize {
        self.rows.get(self.row).map_or(0, Vec::len)
    }

    fn line_mut(&mut self) -> &mut Vec<char> {
        if self.rows.len() <= self.row {
            self.rows.resize_with(self.row + 1, Vec::new);
        }
        &mut self.rows[self.row]
    }

    fn put_char(&mut self, c: char) {
        let col = self.col;
        let len = self.line_len();
        if col >= len && !self.charge(col + 1 - len) {
            return;
        }
        let line = self.line_mut();
        if col < line.len() {
            line[col] = c;
        } else {
            line.resize(col, ' ');
            line.push(c);
        }
        self.move_to_col(col + 1);
    }

    fn erase_in_line(&mut self, mode: usize) {
        let col = self.col;
        let line = self.line_mut();
        match mode {
            0 => line.truncate(col),
            1 => {
                let end = (col + 1).min(line.len());
                line[..end].iter_mut().for_each(|c| *c = ' ');
            }
            _ => line.clear(),
        }
    }

    fn erase_in_display(&mut self, mode: usize) {
        match mode {
            0 => {
                self.erase_in_line(0);
                self.rows.truncate(self.row + 1);
            }
            1 => {
                let upto = self.row.min(self.rows.len());
                self.rows[..upto].iter_mut().for_each(Vec::clear);
                self.erase_in_line(1);
            }
            _ => self.rows.clear(),
        }
    }

    fn delete_chars(&mut self, n: usize) {
        let col = self.col;
        let line = self.line_mut();
        if col < line.len() {
            let end = (col + n).min(line.len());
            line.drain(col..end);
        }
    }

    fn insert_blanks(&mut self, n: usize) {
        let col = self.col;
        let n = n.min(MAX_COLUMNS);
        if col >= self.line_len() || !self.charge(n) {
            return;
        }
        let line = self.line_mut();
        line.splice(col..col, std::iter::repeat(' ').take(n));
    }

    fn erase_chars(&mut self, n: usize) {
        let col = self.col;
        let line = self.line_mut();
        let end = (col + n).min(line.len());
        if col < end {
            line[col..end].iter_mut().for_each(|c| *c = ' ');
        }
    }
}

/// Numeric CSI argument at `idx`, with `default` for missing or zero values.
fn arg(params: &Params, idx: usize, default: usize) -> usize {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first().copied())
        .map(|v| v as usize)
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

/// Raw CSI selector at `idx` where zero is meaningful (erase modes).
fn selector(params: &Params, idx: usize) -> usize {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first().copied())
        .map(|v| v as usize)
        .unwrap_or(0)
}

impl Perform for Grid {
    fn print(&mut self, c: char) {
        if self.fault.is_some() {
            return;
        }
        self.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        if self.fault.is_some() {
            return;
        }
        match byte {
            b'\r' => self.col = 0,
            b'\n' => {
                self.move_to_row(self.row + 1);
                self.col = 0;
            }
            0x08 => self.col = self.col.saturating_sub(1),
            b'\t' => self.move_to_col((self.col / TAB_WIDTH + 1) * TAB_WIDTH),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if self.fault.is_some() {
            return;
        }
        if ignore {
            self.fail(ScreenError::MalformedSequence(action));
            return;
        }
        // private modes (`ESC[?25l` and friends) never touch the text
        if !intermediates.is_empty() {
            return;
        }
        match action {
            'A' => self.row = self.row.saturating_sub(arg(params, 0, 1)),
            'B' => self.move_to_row(self.row + arg(params, 0, 1)),
            'C' => self.move_to_col(self.col + arg(params, 0, 1)),
            'D' => self.col = self.col.saturating_sub(arg(params, 0, 1)),
            'G' => self.move_to_col(arg(params, 0, 1) - 1),
            'H' | 'f' => {
                self.move_to_row(arg(params, 0, 1) - 1);
                self.move_to_col(arg(params, 1, 1) - 1);
            }
            'K' => self.erase_in_line(selector(params, 0)),
            'J' => self.erase_in_display(selector(params, 0)),
            'P' => self.delete_chars(arg(params, 0, 1)),
            '@' => self.insert_blanks(arg(params, 0, 1)),
            'X' => self.erase_chars(arg(params, 0, 1)),
            _ => {}
        }
    }
}

/// A screen being fed incrementally.
pub struct Screen {
    parser: Parser,
    grid: Grid,
}

impl Screen {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            grid: Grid::default(),
        }
    }

    /// Applies `data` to the screen.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ScreenError> {
        for &byte in data {
            if self.grid.fault.is_some() {
                break;
            }
            self.parser.advance(&mut self.grid, byte);
        }
        match &self.grid.fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Visual lines currently on screen, right-trimmed; blank rows are kept.
    pub fn lines(&self) -> Vec<String> {
        self.grid
            .rows
            .iter()
            .map(|row| row.iter().collect::<String>().trim_end().to_string())
            .collect()
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays `data` on a fresh screen and returns its visual lines.
pub fn parse_lines(data: &[u8]) -> Result<Vec<String>, ScreenError> {
    let mut screen = Screen::new();
    screen.feed(data)?;
    Ok(screen.lines())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_empty(data: &[u8]) -> Vec<String> {
        parse_lines(data)
            .unwrap()
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect()
    }

    #[test]
    fn plain_lines_are_split_on_newlines() {
        assert_eq!(non_empty(b"hello\r\nworld\r\n"), vec!["hello", "world"]);
    }

    #[test]
    fn colors_are_stripped() {
        assert_eq!(non_empty(b"\x1b[01;34mbin\x1b[0m  etc"), vec!["bin  etc"]);
    }

    #[test]
    fn backspace_then_overwrite() {
        // what bash echoes for "lx<BS>s"
        assert_eq!(non_empty(b"lx\x08 \x08s"), vec!["ls"]);
    }

    #[test]
    fn carriage_return_overwrites_the_line() {
        assert_eq!(non_empty(b"loading....\rDone!\x1b[K"), vec!["Done!"]);
    }

    #[test]
    fn erase_to_end_of_line_after_cursor_left() {
        assert_eq!(non_empty(b"cat /etc/passwd\x1b[6D\x1b[Kgroup"), vec!["cat /etc/group"]);
    }

    #[test]
    fn insert_and_delete_characters() {
        // cursor back into the word, delete one char, insert one blank and fill it
        assert_eq!(non_empty(b"lss -l\x1b[5D\x1b[P"), vec!["ls -l"]);
        assert_eq!(non_empty(b"l -l\x1b[3D\x1b[@s"), vec!["ls -l"]);
    }

    #[test]
    fn clear_screen_drops_previous_rows() {
        assert_eq!(non_empty(b"old\r\nstuff\x1b[H\x1b[2Jnew"), vec!["new"]);
    }

    #[test]
    fn private_modes_are_ignored() {
        assert_eq!(non_empty(b"\x1b[?2004hls\x1b[?2004l"), vec!["ls"]);
    }

    #[test]
    fn tabs_move_to_next_stop() {
        assert_eq!(non_empty(b"a\tb"), vec!["a       b"]);
    }

    #[test]
    fn runaway_cursor_is_a_fault_not_a_panic() {
        let mut data = Vec::new();
        for _ in 0..3 {
            data.extend_from_slice(b"\x1b[65535C");
        }
        data.push(b'x');
        assert_eq!(
            parse_lines(&data),
            Err(ScreenError::CursorOutOfRange(MAX_COLUMNS))
        );
    }

    #[test]
    fn runaway_rows_are_a_fault() {
        let mut data = Vec::new();
        for _ in 0..2 {
            data.extend_from_slice(b"\x1b[65535B");
        }
        assert_eq!(parse_lines(&data), Err(ScreenError::TooManyRows(MAX_ROWS)));
    }

    #[test]
    fn padded_rows_are_bounded_by_the_cell_budget() {
        // each line jumps to the last column: a few bytes in, a full row out
        let line = format!("\x1b[{}Gx\n", MAX_COLUMNS);
        let data = line.repeat(MAX_CELLS / MAX_COLUMNS + 2).into_bytes();
        assert!(data.len() < 4 * 1024);
        assert_eq!(parse_lines(&data), Err(ScreenError::TooManyCells(MAX_CELLS)));

        let mut screen = Screen::new();
        assert!(screen.feed(&data).is_err());
        let materialised: usize = screen.lines().iter().map(|l| l.chars().count()).sum();
        assert!(materialised <= MAX_CELLS);
    }

    #[test]
    fn oversized_insert_is_clamped_and_charged() {
        let mut data = b"abc\x1b[3D".to_vec();
        for _ in 0..(MAX_CELLS / MAX_COLUMNS + 1) {
            data.extend_from_slice(b"\x1b[65535@");
        }
        assert_eq!(parse_lines(&data), Err(ScreenError::TooManyCells(MAX_CELLS)));
        assert_eq!(non_empty(b"abc\x1b[3D\x1b[2@"), vec!["  abc"]);
    }

    #[test]
    fn incremental_feed_matches_single_feed() {
        let mut screen = Screen::new();
        screen.feed(b"ec").unwrap();
        screen.feed(b"ho \x1b[3").unwrap();
        screen.feed(b"1mhi\x1b[0m").unwrap();
        assert_eq!(screen.lines(), vec!["echo hi"]);
    }
}
