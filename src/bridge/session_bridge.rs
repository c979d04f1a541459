//! The per-session event loop joining a user connection to a target connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::cancel::CancelToken;
use super::conn::{BoxedReader, BoxedWriter, ServerConn, UserConn, WindowSize};
use super::room::{Room, RoomMessage};
use crate::configuration::Config;
use crate::error_handling::types::BridgeError;
use crate::filter::FilterEngine;
use crate::proxy::boundary::warn_text;
use crate::proxy::types::PARSER_CHANNEL_SIZE;
use crate::proxy::{new_parser, LogAuditor, ParsedCommand, ParserOptions, TransferAuditor};
use crate::recording::{
    CommandRecord, CommandRecorder, CommandRecorderOptions, LogNotifier, ReplayOptions, ReplayRecorder,
    RiskNotifier, SessionLabels,
};
use crate::session_management::{ActiveSession, Session, SessionRegistry, SessionStatus};
use crate::storage::{CommandStorage, NullStorage, ReplayStorage};

const READ_BUF_SIZE: usize = 8 * 1024;

/// Timing and recording knobs of one bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub max_idle: Duration,
    /// How often idleness is checked.
    pub idle_check: Duration,
    pub keepalive: Duration,
    pub input_limit: usize,
    pub output_limit: usize,
    pub replay: ReplayOptions,
    pub command: CommandRecorderOptions,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(30 * 60),
            idle_check: Duration::from_secs(30),
            keepalive: Duration::from_secs(60),
            input_limit: 128,
            output_limit: 1024,
            replay: ReplayOptions::default(),
            command: CommandRecorderOptions::default(),
        }
    }
}

impl BridgeOptions {
    pub fn from_config(config: &Config) -> Self {
        let session = &config.session;
        let recording = &config.recording;
        Self {
            max_idle: config.max_idle(),
            idle_check: Duration::from_secs(session.idle_check_secs),
            keepalive: Duration::from_secs(session.keepalive_secs),
            input_limit: recording.input_limit,
            output_limit: recording.output_limit,
            replay: ReplayOptions {
                replay_dir: recording.replay_dir.clone().into(),
                width: session.width,
                height: session.height,
                term: session.term.clone(),
                upload_retries: recording.upload_retries,
                retry_backoff: Duration::from_millis(recording.retry_backoff_ms),
                ..ReplayOptions::default()
            },
            command: CommandRecorderOptions {
                batch_size: recording.command_batch_size,
                flush_interval: Duration::from_secs(recording.command_flush_secs),
                max_failures: recording.command_max_failures,
            },
        }
    }
}

/// Collaborators shared by every bridge of the process.
#[derive(Clone)]
pub struct BridgeDeps {
    pub registry: Arc<SessionRegistry>,
    pub filter: Arc<FilterEngine>,
    pub replay_storage: Arc<dyn ReplayStorage>,
    pub replay_fallback: Option<Arc<dyn ReplayStorage>>,
    pub command_storage: Arc<dyn CommandStorage>,
    pub notifier: Arc<dyn RiskNotifier>,
    pub auditor: Arc<dyn TransferAuditor>,
}

impl BridgeDeps {
    /// No filter rules, no storage, log-only notifications.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            filter: Arc::new(FilterEngine::default()),
            replay_storage: Arc::new(NullStorage),
            replay_fallback: None,
            command_storage: Arc::new(NullStorage),
            notifier: Arc::new(LogNotifier),
            auditor: Arc::new(LogAuditor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    User,
    Server,
}

#[derive(Debug)]
struct ReaderExit {
    side: Side,
    error: Option<io::Error>,
}

/// Joins one user connection to one target connection for the lifetime of a session.
pub struct SessionBridge {
    session: Session,
    opts: BridgeOptions,
    deps: BridgeDeps,
}

impl SessionBridge {
    pub fn new(session: Session, opts: BridgeOptions, deps: BridgeDeps) -> Self {
        Self { session, opts, deps }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    /// Runs the session until the user or target leaves, the session idles
    /// out, an administrator kills it, or a transport fails. Recording
    /// failures never end the session; only transport errors are returned.
    pub async fn bridge(mut self, user: UserConn, server: ServerConn) -> Result<(), BridgeError> {
        let id = self.session.id;
        let cancel = CancelToken::new();
        let room = Room::new(id);
        self.session.mark_connected();
        self.deps.registry.register(ActiveSession {
            session: self.session.clone(),
            cancel: cancel.clone(),
            room: room.clone(),
        })?;
        info!(
            "[{}] bridging {}@{} to {} as {} ({})",
            id, self.session.user, self.session.client_addr, self.session.asset, self.session.account, self.session.protocol
        );

        let UserConn {
            reader: user_reader,
            writer: mut user_writer,
            resize: mut resize_rx,
            window,
            term,
            ..
        } = user;
        let ServerConn {
            reader: srv_reader,
            writer: mut srv_writer,
            control,
            protocol,
        } = server;

        let mut parser_opts = ParserOptions::new(id);
        parser_opts.input_limit = self.opts.input_limit;
        parser_opts.output_limit = self.opts.output_limit;
        let mut parser = new_parser(protocol, &parser_opts, self.deps.filter.clone(), self.deps.auditor.clone());
        let records = parser.command_record_chan();
        let (user_in_tx, user_in_rx) = mpsc::channel(PARSER_CHANNEL_SIZE);
        let (srv_in_tx, srv_in_rx) = mpsc::channel(PARSER_CHANNEL_SIZE);
        let (mut to_srv, mut to_user) = parser.parse_stream(user_in_rx, srv_in_rx);

        let mut replay_opts = self.opts.replay.clone();
        replay_opts.width = window.width;
        replay_opts.height = window.height;
        replay_opts.term = term;
        replay_opts.title = format!("{}@{}", self.session.user, self.session.asset);
        let mut replay = ReplayRecorder::new(
            id,
            replay_opts,
            self.deps.replay_storage.clone(),
            self.deps.replay_fallback.clone(),
        );
        let command_task = self.spawn_command_recording(records);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, mut done_rx) = mpsc::channel(2);
        let readers = [
            spawn_reader(id, Side::User, user_reader, user_in_tx, stop_rx.clone(), done_tx.clone()),
            spawn_reader(id, Side::Server, srv_reader, srv_in_tx, stop_rx, done_tx),
        ];

        // first ticks one period from now
        let mut idle = interval_at(Instant::now() + self.opts.idle_check, self.opts.idle_check);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive = interval_at(Instant::now() + self.opts.keepalive, self.opts.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();
        let mut active_since_keepalive = false;
        let mut readers_open = 2usize;
        // the parser closes both outputs together; the loop ends once both are drained
        let mut user_out_closed = false;
        let mut srv_out_closed = false;

        let result: Result<(), BridgeError> = loop {
            tokio::select! {
                _ = idle.tick() => {
                    if last_activity.elapsed() >= self.opts.max_idle {
                        let minutes = self.opts.max_idle.as_secs() / 60;
                        info!("[{}] idle for {} minute(s), disconnecting", id, minutes);
                        let text = format!("Connect idle more than {} minutes, disconnect", minutes);
                        announce(id, &mut replay, &room, &mut user_writer, &text).await;
                        break Ok(());
                    }
                }
                _ = cancel.cancelled() => {
                    info!("[{}] terminated by administrator", id);
                    announce(id, &mut replay, &room, &mut user_writer, "Terminated by administrator").await;
                    break Ok(());
                }
                size = next_resize(&mut resize_rx) => match size {
                    Some(size) => {
                        debug!("[{}] window resized to {}x{}", id, size.width, size.height);
                        match control.resize(size) {
                            Ok(Some(bytes)) => {
                                if let Err(e) = write_chunk(&mut srv_writer, &bytes).await {
                                    break Err(e.into());
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("[{}] resize not propagated: {}", id, e),
                        }
                        room.broadcast(RoomMessage::Resize(size));
                    }
                    None => resize_rx = None,
                },
                chunk = to_user.recv(), if !user_out_closed => match chunk {
                    Some(data) => {
                        last_activity = Instant::now();
                        active_since_keepalive = true;
                        if parser.need_record() {
                            if let Err(e) = replay.record(&data) {
                                warn!("[{}] replay recording abandoned: {}", id, e);
                            }
                        }
                        room.broadcast(RoomMessage::Data(data.clone()));
                        if let Err(e) = write_chunk(&mut user_writer, &data).await {
                            warn!("[{}] write to user failed: {}", id, e);
                            break Err(e.into());
                        }
                    }
                    None => {
                        debug!("[{}] parser output closed", id);
                        user_out_closed = true;
                    }
                },
                chunk = to_srv.recv(), if !srv_out_closed => match chunk {
                    Some(data) => {
                        last_activity = Instant::now();
                        active_since_keepalive = true;
                        if let Err(e) = write_chunk(&mut srv_writer, &data).await {
                            warn!("[{}] write to target failed: {}", id, e);
                            announce(id, &mut replay, &room, &mut user_writer, "Connection to target lost").await;
                            break Err(e.into());
                        }
                    }
                    None => {
                        debug!("[{}] parser input side closed", id);
                        srv_out_closed = true;
                    }
                },
                _ = keepalive.tick() => {
                    if !active_since_keepalive {
                        match control.keepalive() {
                            Ok(Some(bytes)) => {
                                trace!("[{}] keepalive", id);
                                if let Err(e) = write_chunk(&mut srv_writer, &bytes).await {
                                    announce(id, &mut replay, &room, &mut user_writer, "Connection to target lost").await;
                                    break Err(e.into());
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("[{}] keepalive failed: {}", id, e),
                        }
                    }
                    active_since_keepalive = false;
                }
                exit = done_rx.recv(), if readers_open > 0 => {
                    let Some(exit) = exit else {
                        readers_open = 0;
                        continue;
                    };
                    readers_open -= 1;
                    match (exit.side, exit.error) {
                        (Side::User, Some(e)) => {
                            warn!("[{}] read from user failed: {}", id, e);
                            break Err(e.into());
                        }
                        (Side::Server, Some(e)) => {
                            warn!("[{}] read from target failed: {}", id, e);
                            announce(id, &mut replay, &room, &mut user_writer, "Connection to target lost").await;
                            break Err(e.into());
                        }
                        (Side::User, None) => {
                            info!("[{}] user disconnected", id);
                            break Ok(());
                        }
                        // the parser drains what is left to the user, then closes its outputs
                        (Side::Server, None) => info!("[{}] target closed the connection", id),
                    }
                }
            }
            if user_out_closed && srv_out_closed {
                // a reader queues its exit before the parser sees its input close
                match pending_reader_error(&mut done_rx) {
                    Some((Side::Server, e)) => {
                        warn!("[{}] read from target failed: {}", id, e);
                        announce(id, &mut replay, &room, &mut user_writer, "Connection to target lost").await;
                        break Err(e.into());
                    }
                    Some((Side::User, e)) => {
                        warn!("[{}] read from user failed: {}", id, e);
                        break Err(e.into());
                    }
                    None => break Ok(()),
                }
            }
        };

        stop_tx.send_replace(true);
        if let Err(e) = user_writer.shutdown().await {
            debug!("[{}] user shutdown: {}", id, e);
        }
        if let Err(e) = srv_writer.shutdown().await {
            debug!("[{}] target shutdown: {}", id, e);
        }
        drop(to_user);
        drop(to_srv);
        parser.close();
        for reader in readers {
            if let Err(e) = reader.await {
                warn!("[{}] reader task failed: {}", id, e);
            }
        }
        room.close();
        // The record channel closes only when the parser task exits, after its
        // final transfer audit and session-end commit, so this also waits for it.
        if let Err(e) = command_task.await {
            error!("[{}] command recording task failed: {}", id, e);
        }
        let outcome = replay.end().await;
        debug!("[{}] replay {:?}", id, outcome);

        self.session.mark_finished(if result.is_ok() {
            SessionStatus::Completed
        } else {
            SessionStatus::Error
        });
        self.deps.registry.deregister(id);
        info!("[{}] session finished ({:?})", id, self.session.status);
        result
    }

    /// Drains settled commands into a [`CommandRecorder`] until the parser
    /// closes its record channel, then flushes.
    fn spawn_command_recording(&self, records: Option<mpsc::Receiver<ParsedCommand>>) -> JoinHandle<()> {
        let labels = SessionLabels {
            session_id: self.session.id,
            org_id: self.session.org_id.clone(),
            user: self.session.user.clone(),
            asset: self.session.asset.clone(),
            account: self.session.account.clone(),
        };
        let mut recorder = CommandRecorder::start(
            self.session.id,
            self.opts.command.clone(),
            self.deps.command_storage.clone(),
            self.deps.notifier.clone(),
        );
        tokio::spawn(async move {
            if let Some(mut records) = records {
                while let Some(cmd) = records.recv().await {
                    recorder.record(CommandRecord::new(&labels, cmd.input, cmd.output, cmd.timestamp, cmd.risk));
                }
            }
            recorder.end().await;
        })
    }
}

/// Copies one socket into the parser until EOF, an error, or the stop signal.
fn spawn_reader(
    session_id: Uuid,
    side: Side,
    mut reader: BoxedReader,
    tx: mpsc::Sender<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
    done: mpsc::Sender<ReaderExit>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let error = loop {
            let n = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break None,
                res = reader.read(&mut buf) => match res {
                    Ok(0) => break None,
                    Ok(n) => n,
                    Err(e) => break Some(e),
                },
            };
            trace!("[{}] {:?} read {} bytes", session_id, side, n);
            tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break None,
                sent = tx.send(buf[..n].to_vec()) => {
                    if sent.is_err() {
                        break None;
                    }
                }
            }
        };
        debug!("[{}] {:?} reader done", session_id, side);
        let _ = done.send(ReaderExit { side, error }).await;
    })
}

fn pending_reader_error(done: &mut mpsc::Receiver<ReaderExit>) -> Option<(Side, io::Error)> {
    while let Ok(exit) = done.try_recv() {
        if let Some(e) = exit.error {
            return Some((exit.side, e));
        }
    }
    None
}

async fn next_resize(rx: &mut Option<mpsc::Receiver<WindowSize>>) -> Option<WindowSize> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_chunk(writer: &mut BoxedWriter, data: &[u8]) -> io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

/// Shows a notice to the user, its viewers and the replay.
async fn announce(
    session_id: Uuid,
    replay: &mut ReplayRecorder,
    room: &Room,
    user_writer: &mut BoxedWriter,
    text: &str,
) {
    let message = format!("\r\n{}\r\n", warn_text(text)).into_bytes();
    if let Err(e) = replay.record(&message) {
        warn!("[{}] replay recording abandoned: {}", session_id, e);
    }
    room.broadcast(RoomMessage::Data(message.clone()));
    if let Err(e) = write_chunk(user_writer, &message).await {
        debug!("[{}] notice not delivered: {}", session_id, e);
    }
}
