mod allocator;
mod billing;
mod error;
mod mutations;
mod queries;
mod store;

pub use allocator::{SlotPick, find_nearest};
pub use billing::{duration_charge, flat_rate};
pub use error::EngineError;
pub use store::FacilityState;

use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::config::RatesConfig;
use crate::model::*;
use crate::wal::Wal;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as Ms
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block on the first append, drain whatever else is immediately queued,
/// flush the whole batch with one fsync, then ack every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first so the non-append command
                            // observes a settled log.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty
                    }
                }

                flush_and_respond(&mut wal, batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result: io::Result<()> = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Always flush, even after an append error, so partially buffered bytes
    // don't bleed into the next batch.
    let flush_err = wal.flush_sync().err();
    if result.is_ok()
        && let Some(e) = flush_err
    {
        result = Err(e);
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched above"),
    }
}

/// The slot allocation & billing engine.
///
/// Holds the facility state behind one `RwLock`: reads (lookups, allocation
/// scans) take the read guard; each top-level mutation takes the write guard,
/// validates, appends exactly one event to the WAL, and applies it. The write
/// guard scope is the transaction — a failed validation or WAL error leaves
/// no partial state behind.
pub struct Engine {
    pub(super) state: RwLock<FacilityState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) rates: RatesConfig,
    /// When false (production), settlement rejects a client-supplied end
    /// time and always bills against the current clock.
    pub(super) allow_client_end_time: bool,
}

impl Engine {
    pub fn new(wal_path: &Path, rates: RatesConfig) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = FacilityState::new();
        for event in &events {
            state.apply(event);
        }

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
            rates,
            allow_client_end_time: false,
        })
    }

    /// Permit the `end_at` settlement option. Development and test
    /// configurations only.
    pub fn allow_client_end_time(mut self, allow: bool) -> Self {
        self.allow_client_end_time = allow;
        self
    }

    pub fn rates(&self) -> &RatesConfig {
        &self.rates
    }

    /// Write an event through the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// Append + apply under an already-held write guard. The commit point of
    /// every mutation.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut FacilityState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        state.apply(&event);
        Ok(())
    }
}

/// Default WAL location under a data directory.
pub fn wal_path(data_dir: &Path) -> PathBuf {
    data_dir.join("parq.wal")
}
