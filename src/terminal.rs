//! Terminal stream reconstruction.
//!
//! - `ring_buffer`: bounded per-direction byte buffer.
//! - `screen`: minimal VT emulator turning escaped bytes into visual lines.
//! - `command_parser`: prompt-aware accumulator used at command boundaries.

pub mod command_parser;
pub mod ring_buffer;
pub mod screen;

pub use command_parser::{CommandParser, ParserKind};
pub use ring_buffer::RingTextBuffer;
pub use screen::Screen;
