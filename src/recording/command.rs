use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::types::{CommandRecord, RiskLevel};
use crate::storage::storage_trait::{CommandStorage, NULL_STORAGE_TYPE};

/// Receives every command recorded at [`RiskLevel::Danger`].
pub trait RiskNotifier: Send + Sync {
    fn notify(&self, record: &CommandRecord);
}

/// Default notifier: a warning in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl RiskNotifier for LogNotifier {
    fn notify(&self, record: &CommandRecord) {
        warn!(
            "[{}] dangerous command by {} on {} as {}: {:?}",
            record.session_id, record.user, record.asset, record.account, record.input
        );
    }
}

#[derive(Debug, Clone)]
pub struct CommandRecorderOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Consecutive failed saves after which the oldest pending command is dropped.
    pub max_failures: u32,
}

impl Default for CommandRecorderOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            flush_interval: Duration::from_secs(10),
            max_failures: 5,
        }
    }
}

/// Batches commands on a single consumer task and saves them in bulk.
///
/// Recording never blocks the session: [`record`](Self::record) only queues.
/// A failed batch stays pending and is retried on the next flush; once
/// `max_failures` consecutive saves failed, every further failure drops the
/// oldest pending command.
pub struct CommandRecorder {
    session_id: Uuid,
    tx: Option<mpsc::UnboundedSender<CommandRecord>>,
    task: Option<JoinHandle<()>>,
}

impl CommandRecorder {
    /// Spawns the consumer. A null storage yields a disabled recorder with no task.
    pub fn start(
        session_id: Uuid,
        opts: CommandRecorderOptions,
        storage: Arc<dyn CommandStorage>,
        notifier: Arc<dyn RiskNotifier>,
    ) -> Self {
        if storage.type_name() == NULL_STORAGE_TYPE {
            debug!("[{}] command recording disabled", session_id);
            return Self {
                session_id,
                tx: None,
                task: None,
            };
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = Consumer {
            session_id,
            batch_size: opts.batch_size.max(1),
            max_failures: opts.max_failures.max(1),
            storage,
            notifier,
            pending: Vec::new(),
            failures: 0,
        };
        let task = tokio::spawn(consumer.run(rx, opts.flush_interval));
        Self {
            session_id,
            tx: Some(tx),
            task: Some(task),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn record(&self, record: CommandRecord) {
        if let Some(tx) = &self.tx {
            if tx.send(record).is_err() {
                warn!("[{}] command recorder already stopped", self.session_id);
            }
        }
    }

    /// Stops accepting commands, flushes what is pending and waits for the consumer.
    pub async fn end(&mut self) {
        self.tx.take();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("[{}] command recorder task failed: {}", self.session_id, e);
            }
        }
    }
}

struct Consumer {
    session_id: Uuid,
    batch_size: usize,
    max_failures: u32,
    storage: Arc<dyn CommandStorage>,
    notifier: Arc<dyn RiskNotifier>,
    pending: Vec<CommandRecord>,
    failures: u32,
}

impl Consumer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CommandRecord>, period: Duration) {
        // first tick one period from now, not immediately
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(record) => {
                        if record.risk_level == RiskLevel::Danger {
                            self.notifier.notify(&record);
                        }
                        self.pending.push(record);
                        if self.pending.len() >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }
        if !self.pending.is_empty() {
            self.flush().await;
            if !self.pending.is_empty() {
                error!(
                    "[{}] dropping {} unsaved command(s) at session end",
                    self.session_id,
                    self.pending.len()
                );
            }
        }
        info!("[{}] command recorder stopped", self.session_id);
    }

    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        let storage = Arc::clone(&self.storage);
        let joined = tokio::task::spawn_blocking(move || {
            let result = storage.bulk_save(&batch);
            (batch, result)
        })
        .await;
        let (batch, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!("[{}] command save task failed, {} command(s) lost: {}", self.session_id, count, e);
                return;
            }
        };
        match result {
            Ok(()) => {
                debug!("[{}] saved {} command(s)", self.session_id, count);
                self.failures = 0;
            }
            Err(e) => {
                self.failures += 1;
                warn!(
                    "[{}] saving {} command(s) failed ({} in a row): {}",
                    self.session_id, count, self.failures, e
                );
                self.pending = batch;
                if self.failures >= self.max_failures && !self.pending.is_empty() {
                    let dropped = self.pending.remove(0);
                    error!("[{}] dropped oldest command {:?}", self.session_id, dropped.input);
                }
            }
        }
    }
}
