//! Passive ZMODEM (`rz`/`sz`) detection.

pub mod crc;
pub mod detector;
pub mod frame;

pub use detector::{Origin, TransferKind, ZFileEvent, ZmodemDetector, ZmodemEvent};
