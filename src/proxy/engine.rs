//! The `ParseEngine` contract and the task that drives a stream handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::{Emitted, ParsedCommand, PARSER_CHANNEL_SIZE};

/// What the bridge needs from a protocol parser.
pub trait ParseEngine: Send + Sync {
    /// Starts processing. Takes the raw chunks read from the user and from the
    /// target; returns `(to_target, to_user)` with the chunks to write on.
    /// Only the first call does anything; later calls get closed channels.
    fn parse_stream(
        &mut self,
        user_in: mpsc::Receiver<Vec<u8>>,
        srv_in: mpsc::Receiver<Vec<u8>>,
    ) -> (mpsc::Receiver<Vec<u8>>, mpsc::Receiver<Vec<u8>>);

    /// Stops processing and releases buffers. Idempotent.
    fn close(&mut self);

    /// Whether target output should currently be written to the replay.
    fn need_record(&self) -> bool;

    /// Settled commands, in boundary order. Can be taken once.
    fn command_record_chan(&mut self) -> Option<mpsc::Receiver<ParsedCommand>>;
}

/// Protocol-specific handling of one chunk at a time, run on a single task.
pub trait StreamHandler: Send + Sync + 'static {
    fn on_user_input(&mut self, data: &[u8], out: &mut Emitted);
    fn on_server_output(&mut self, data: &[u8], out: &mut Emitted);
    /// An input stream ended: commit what is still open.
    fn finish(&mut self, out: &mut Emitted);
    /// Final cleanup; runs exactly once, whether the stream finished or was closed.
    fn close(&mut self);
}

/// Runs a [`StreamHandler`] behind the [`ParseEngine`] contract.
pub struct ParserEngine<H: StreamHandler> {
    session_id: Uuid,
    handler: Option<H>,
    need_record: Arc<AtomicBool>,
    records_tx: Option<mpsc::Sender<ParsedCommand>>,
    records_rx: Option<mpsc::Receiver<ParsedCommand>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<H: StreamHandler> ParserEngine<H> {
    pub fn new(session_id: Uuid, handler: H, need_record: Arc<AtomicBool>) -> Self {
        let (records_tx, records_rx) = mpsc::channel(PARSER_CHANNEL_SIZE);
        let (stop, _) = watch::channel(false);
        Self {
            session_id,
            handler: Some(handler),
            need_record,
            records_tx: Some(records_tx),
            records_rx: Some(records_rx),
            stop,
            task: None,
        }
    }

    /// Waits for the processing task to end.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("[{}] parser task failed: {}", self.session_id, e);
            }
        }
    }
}

impl<H: StreamHandler> ParseEngine for ParserEngine<H> {
    fn parse_stream(
        &mut self,
        user_in: mpsc::Receiver<Vec<u8>>,
        srv_in: mpsc::Receiver<Vec<u8>>,
    ) -> (mpsc::Receiver<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        let (to_srv_tx, to_srv_rx) = mpsc::channel(PARSER_CHANNEL_SIZE);
        let (to_user_tx, to_user_rx) = mpsc::channel(PARSER_CHANNEL_SIZE);
        let (Some(handler), Some(records)) = (self.handler.take(), self.records_tx.take()) else {
            warn!("[{}] parse_stream called on a used parser", self.session_id);
            return (to_srv_rx, to_user_rx);
        };
        let outputs = Outputs {
            to_srv: to_srv_tx,
            to_user: to_user_tx,
            records,
        };
        let task = tokio::spawn(run(
            self.session_id,
            handler,
            user_in,
            srv_in,
            outputs,
            self.stop.subscribe(),
        ));
        self.task = Some(task);
        (to_srv_rx, to_user_rx)
    }

    fn close(&mut self) {
        if *self.stop.borrow() {
            return;
        }
        self.stop.send_replace(true);
        // never started: clean up here instead of on the task
        if let Some(mut handler) = self.handler.take() {
            handler.close();
        }
        self.records_tx.take();
        debug!("[{}] parser closed", self.session_id);
    }

    fn need_record(&self) -> bool {
        self.need_record.load(Ordering::SeqCst)
    }

    fn command_record_chan(&mut self) -> Option<mpsc::Receiver<ParsedCommand>> {
        self.records_rx.take()
    }
}

struct Outputs {
    to_srv: mpsc::Sender<Vec<u8>>,
    to_user: mpsc::Sender<Vec<u8>>,
    records: mpsc::Sender<ParsedCommand>,
}

impl Outputs {
    // A dropped receiver only loses its own stream; processing continues so
    // that the session-end commit still happens.
    async fn deliver(&self, out: Emitted) {
        for chunk in out.to_server {
            let _ = self.to_srv.send(chunk).await;
        }
        for chunk in out.to_user {
            let _ = self.to_user.send(chunk).await;
        }
        for record in out.records {
            let _ = self.records.send(record).await;
        }
    }
}

async fn run<H: StreamHandler>(
    session_id: Uuid,
    mut handler: H,
    mut user_in: mpsc::Receiver<Vec<u8>>,
    mut srv_in: mpsc::Receiver<Vec<u8>>,
    outputs: Outputs,
    mut stop: watch::Receiver<bool>,
) {
    trace!("[{}] parser task started", session_id);
    loop {
        let mut out = Emitted::default();
        let finished = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => {
                debug!("[{}] parser stopped", session_id);
                break;
            }
            msg = user_in.recv() => match msg {
                Some(data) => {
                    handler.on_user_input(&data, &mut out);
                    false
                }
                None => true,
            },
            msg = srv_in.recv() => match msg {
                Some(data) => {
                    handler.on_server_output(&data, &mut out);
                    false
                }
                None => true,
            },
        };
        if finished {
            handler.finish(&mut out);
            outputs.deliver(out).await;
            debug!("[{}] parser input closed", session_id);
            break;
        }
        outputs.deliver(out).await;
    }
    handler.close();
}
