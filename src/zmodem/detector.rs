use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use super::frame::{FrameDecoder, FrameEvent, FrameType};

/// Which side of the bridge produced the observed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Upload,
    Download,
}

/// Outcome of one file carried over ZMODEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZFileEvent {
    pub filename: String,
    pub size: u64,
    pub kind: TransferKind,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    /// Payload bytes seen in data sub-packets.
    pub transferred: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZmodemEvent {
    SessionStarted,
    FileStarted {
        filename: String,
        size: u64,
        kind: TransferKind,
    },
    FileFinished(ZFileEvent),
    SessionEnded { aborted: bool },
}

#[derive(Debug)]
struct OpenFile {
    event: ZFileEvent,
    data_seen: bool,
}

/// Watches both directions of a terminal session for ZMODEM transfers.
///
/// The detector never alters the stream. It reports when a transfer session
/// starts and ends, and produces one [`ZFileEvent`] per file: successful once
/// `ZEOF` is seen, failed on `ZSKIP`, cancellation or an abort frame.
#[derive(Debug)]
pub struct ZmodemDetector {
    user: FrameDecoder,
    server: FrameDecoder,
    active: bool,
    pending_kind: Option<TransferKind>,
    current: Option<OpenFile>,
    label: String,
}

impl ZmodemDetector {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            user: FrameDecoder::new(),
            server: FrameDecoder::new(),
            active: false,
            pending_kind: None,
            current: None,
            label: label.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Inspects one chunk travelling from `origin` and reports what it completed.
    pub fn consume(&mut self, origin: Origin, data: &[u8]) -> Vec<ZmodemEvent> {
        let frames = match origin {
            Origin::User => self.user.feed(data),
            Origin::Server => self.server.feed(data),
        };
        let mut events = Vec::new();
        for frame in frames {
            self.handle(origin, frame, &mut events);
        }
        events
    }

    /// Ends any transfer still in progress. Returns the open file, marked as
    /// failed, at most once.
    pub fn close(&mut self) -> Option<ZFileEvent> {
        self.active = false;
        self.pending_kind = None;
        self.current.take().map(|mut open| {
            open.event.success = false;
            open.event
        })
    }

    fn activate(&mut self, events: &mut Vec<ZmodemEvent>) {
        if !self.active {
            self.active = true;
            info!("[{}] zmodem session started", self.label);
            events.push(ZmodemEvent::SessionStarted);
        }
    }

    fn finish_file(&mut self, success: bool, events: &mut Vec<ZmodemEvent>) {
        if let Some(mut open) = self.current.take() {
            open.event.success = success;
            info!(
                "[{}] zmodem {:?} of {:?} finished, success={}",
                self.label, open.event.kind, open.event.filename, success
            );
            events.push(ZmodemEvent::FileFinished(open.event));
        }
    }

    fn end_session(&mut self, aborted: bool, events: &mut Vec<ZmodemEvent>) {
        if !self.active {
            return;
        }
        self.active = false;
        self.pending_kind = None;
        info!("[{}] zmodem session ended, aborted={}", self.label, aborted);
        events.push(ZmodemEvent::SessionEnded { aborted });
    }

    fn handle(&mut self, origin: Origin, frame: FrameEvent, events: &mut Vec<ZmodemEvent>) {
        match frame {
            FrameEvent::Header(header) => {
                debug!("[{}] zmodem {:?} from {:?}", self.label, header.frame_type, origin);
                match header.frame_type {
                    FrameType::ZRqInit | FrameType::ZRInit | FrameType::ZSInit => {
                        self.activate(events)
                    }
                    FrameType::ZFile => {
                        self.activate(events);
                        // an unfinished previous file did not make it
                        self.finish_file(false, events);
                        // the side sending ZFILE owns the data
                        self.pending_kind = Some(match origin {
                            Origin::Server => TransferKind::Download,
                            Origin::User => TransferKind::Upload,
                        });
                    }
                    FrameType::ZData => {
                        if let Some(open) = self.current.as_mut() {
                            open.data_seen = true;
                        }
                    }
                    FrameType::ZEof => self.finish_file(true, events),
                    FrameType::ZSkip => {
                        self.pending_kind = None;
                        self.finish_file(false, events);
                    }
                    FrameType::ZFin => {
                        let seen = self.current.as_ref().map(|o| o.data_seen).unwrap_or(false);
                        self.finish_file(seen, events);
                        self.end_session(false, events);
                    }
                    FrameType::ZAbort | FrameType::ZFErr | FrameType::ZCan => {
                        self.finish_file(false, events);
                        self.end_session(true, events);
                    }
                    _ => {}
                }
            }
            FrameEvent::FileInfo { filename, size } => {
                let Some(kind) = self.pending_kind.take() else {
                    return;
                };
                events.push(ZmodemEvent::FileStarted {
                    filename: filename.clone(),
                    size,
                    kind,
                });
                self.current = Some(OpenFile {
                    event: ZFileEvent {
                        filename,
                        size,
                        kind,
                        started_at: Utc::now(),
                        success: false,
                        transferred: 0,
                    },
                    data_seen: false,
                });
            }
            FrameEvent::Data(n) => {
                if let Some(open) = self.current.as_mut() {
                    open.data_seen = true;
                    open.event.transferred += n as u64;
                }
            }
            FrameEvent::Cancel => {
                debug!("[{}] zmodem cancel sequence from {:?}", self.label, origin);
                self.finish_file(false, events);
                self.end_session(true, events);
            }
        }
    }
}
