use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use super::boundary::{CommandBoundary, StreamMode};
use super::engine::StreamHandler;
use super::fullscreen;
use super::types::{Emitted, ParserOptions, TransferAuditor};
use crate::filter::FilterEngine;
use crate::zmodem::{Origin, ZmodemDetector, ZmodemEvent};

/// Shell-style sessions (SSH, Telnet, Kubernetes exec).
///
/// ZMODEM detection runs ahead of command attribution on both directions; while
/// a transfer is active, or a full-screen program is drawing, bytes are relayed
/// untouched and the replay is paused for transfers.
pub struct TerminalParser {
    session_id: Uuid,
    boundary: CommandBoundary,
    zmodem: ZmodemDetector,
    full_screen: bool,
    need_record: Arc<AtomicBool>,
    auditor: Arc<dyn TransferAuditor>,
}

impl TerminalParser {
    pub fn new(
        opts: &ParserOptions,
        filter: Arc<FilterEngine>,
        auditor: Arc<dyn TransferAuditor>,
        need_record: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id: opts.session_id,
            boundary: CommandBoundary::new(opts, filter),
            zmodem: ZmodemDetector::new(opts.session_id.to_string()),
            full_screen: false,
            need_record,
            auditor,
        }
    }

    fn observe_transfer(&mut self, origin: Origin, data: &[u8]) {
        for event in self.zmodem.consume(origin, data) {
            match event {
                ZmodemEvent::SessionStarted => {
                    self.need_record.store(false, Ordering::SeqCst);
                    self.boundary.enter_overlay(StreamMode::FileTransfer);
                }
                ZmodemEvent::FileStarted { filename, size, kind } => {
                    debug!("[{}] {:?} of {:?} ({} bytes) started", self.session_id, kind, filename, size);
                }
                ZmodemEvent::FileFinished(file) => self.auditor.on_transfer(self.session_id, &file),
                ZmodemEvent::SessionEnded { .. } => {
                    self.need_record.store(true, Ordering::SeqCst);
                    self.boundary.leave_overlay(StreamMode::FileTransfer);
                }
            }
        }
    }
}

impl StreamHandler for TerminalParser {
    fn on_user_input(&mut self, data: &[u8], out: &mut Emitted) {
        self.observe_transfer(Origin::User, data);
        self.boundary.on_user_input(data, out);
    }

    fn on_server_output(&mut self, data: &[u8], out: &mut Emitted) {
        let was_transferring = self.zmodem.is_active();
        self.observe_transfer(Origin::Server, data);
        if !was_transferring && !self.zmodem.is_active() {
            let next = fullscreen::next_state(self.full_screen, data);
            if next != self.full_screen {
                self.full_screen = next;
                if next {
                    self.boundary.enter_overlay(StreamMode::FullScreen);
                } else {
                    self.boundary.leave_overlay(StreamMode::FullScreen);
                }
            }
        }
        if was_transferring {
            // the tail of a transfer chunk is not terminal text either
            out.to_user.push(data.to_vec());
            return;
        }
        self.boundary.on_server_output(data, out);
    }

    fn finish(&mut self, out: &mut Emitted) {
        self.boundary.finish(out);
    }

    fn close(&mut self) {
        if let Some(file) = self.zmodem.close() {
            self.auditor.on_transfer(self.session_id, &file);
        }
        self.need_record.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterRule, RuleAction};
    use crate::zmodem::frame::encode::{bin16_header, hex_header, subpacket16};
    use crate::zmodem::frame::{ZCRCE, ZCRCW};
    use crate::zmodem::ZFileEvent;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAuditor(Mutex<Vec<ZFileEvent>>);

    impl TransferAuditor for RecordingAuditor {
        fn on_transfer(&self, _session_id: Uuid, event: &ZFileEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn parser(rules: Vec<FilterRule>) -> (TerminalParser, Arc<RecordingAuditor>, Arc<AtomicBool>) {
        let auditor = Arc::new(RecordingAuditor::default());
        let need_record = Arc::new(AtomicBool::new(true));
        let p = TerminalParser::new(
            &ParserOptions::new(Uuid::new_v4()),
            Arc::new(FilterEngine::new(rules).unwrap()),
            auditor.clone(),
            need_record.clone(),
        );
        (p, auditor, need_record)
    }

    fn type_line(p: &mut TerminalParser, line: &str, out: &mut Emitted) {
        for b in line.bytes() {
            p.on_user_input(&[b], out);
            p.on_server_output(&[b], out);
        }
        p.on_user_input(b"\r", out);
        p.on_server_output(b"\r\n", out);
    }

    #[test]
    fn download_pauses_replay_and_is_audited() {
        let (mut p, auditor, need_record) = parser(vec![]);
        let mut out = Emitted::default();
        p.on_server_output(b"$ ", &mut out);
        type_line(&mut p, "sz data.bin", &mut out);

        p.on_server_output(&hex_header(0, [0, 0, 0, 0]), &mut out);
        assert!(!need_record.load(Ordering::SeqCst));
        p.on_user_input(&hex_header(1, [0, 0, 0, 0x23]), &mut out);

        let mut offer = bin16_header(4, [0, 0, 0, 0]);
        offer.extend(subpacket16(b"data.bin\x003\x00", ZCRCW));
        p.on_server_output(&offer, &mut out);
        let mut data = bin16_header(10, [0, 0, 0, 0]);
        data.extend(subpacket16(b"abc", ZCRCE));
        p.on_server_output(&data, &mut out);
        p.on_server_output(&hex_header(11, [3, 0, 0, 0]), &mut out);
        p.on_server_output(&hex_header(8, [0, 0, 0, 0]), &mut out);
        p.on_user_input(&hex_header(8, [0, 0, 0, 0]), &mut out);
        p.on_user_input(b"OO", &mut out);
        assert!(need_record.load(Ordering::SeqCst));

        let files = auditor.0.lock().unwrap().clone();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "data.bin");
        assert!(files[0].success);

        // transfer bytes never became command output
        p.on_server_output(b"$ ", &mut out);
        p.on_user_input(b"l", &mut out);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].input, "sz data.bin");
        assert_eq!(out.records[0].output, "");
    }

    #[test]
    fn close_mid_transfer_reports_failure_once() {
        let (mut p, auditor, need_record) = parser(vec![]);
        let mut out = Emitted::default();
        p.on_server_output(&hex_header(0, [0, 0, 0, 0]), &mut out);
        let mut offer = bin16_header(4, [0, 0, 0, 0]);
        offer.extend(subpacket16(b"big.iso\x00999\x00", ZCRCW));
        p.on_server_output(&offer, &mut out);
        p.close();
        p.close();
        let files = auditor.0.lock().unwrap().clone();
        assert_eq!(files.len(), 1);
        assert!(!files[0].success);
        assert!(need_record.load(Ordering::SeqCst));
    }

    #[test]
    fn full_screen_output_is_not_attributed() {
        let (mut p, _auditor, _) = parser(vec![FilterRule::regex(1, "^rm", RuleAction::Deny)]);
        let mut out = Emitted::default();
        p.on_server_output(b"$ ", &mut out);
        type_line(&mut p, "top", &mut out);
        p.on_server_output(b"\x1b[?1049h\x1b[H\x1b[2Jtasks: 100", &mut out);
        // keys typed into the program are passed through unfiltered
        p.on_user_input(b"rm\r", &mut out);
        assert_eq!(out.to_server.last().unwrap(), b"rm\r");
        p.on_server_output(b"\x1b[?1049l", &mut out);
        p.on_server_output(b"$ ", &mut out);
        p.on_user_input(b"e", &mut out);

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].input, "top");
        assert!(!out.records[0].output.contains("tasks"));
    }
}
