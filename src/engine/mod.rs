mod access;
mod catalog;
mod compaction;
mod conflict;
mod error;
mod lifecycle;
mod queries;
mod store;
#[cfg(test)]
mod tests;

pub use access::AuthorizationAsNotFound;
pub use conflict::count_conflicts;
pub use error::{EngineError, Entity, ErrorKind, Rejection};
pub use queries::{ItemBookingSummary, StateFilter};
pub use store::{BookingStore, InMemoryStore, Role, StateQuery};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::wal::Wal;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for one fsync and answers every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction or stats see the log.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_err = batch
        .iter()
        .find_map(|(event, _)| wal.append_buffered(event).err());
    // Flush even after a failed append so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The booking reservation engine.
///
/// Every accepted mutation is appended to the WAL before it touches the
/// store. Mutations that read-check-then-write on one item (`create_booking`,
/// `decide_booking`, `set_item_available`) hold that item's mutex for the
/// whole sequence.
pub struct Engine<S: BookingStore = InMemoryStore> {
    store: S,
    clock: Arc<dyn Clock>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// item id → serialization point for that item's bookings
    item_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    /// Shared by mutations, exclusive for compaction, so a snapshot never
    /// misses an event that is already in the log.
    pub(super) commit_gate: RwLock<()>,
    /// ids whose create is between the duplicate check and apply
    id_claims: DashMap<(Entity, Ulid), ()>,
}

/// Reservation of a new id, released on drop. Hold it until the create
/// event has been applied.
pub(super) struct IdClaim<'a> {
    claims: &'a DashMap<(Entity, Ulid), ()>,
    key: (Entity, Ulid),
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.key);
    }
}

impl Engine<InMemoryStore> {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        Self::with_store(wal_path, InMemoryStore::new(), Arc::new(SystemClock))
    }
}

impl<S: BookingStore> Engine<S> {
    /// Replay the WAL at `wal_path` into `store` and start the WAL writer.
    /// Must be called from within a tokio runtime.
    pub fn with_store(wal_path: PathBuf, store: S, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store,
            clock,
            wal_tx,
            item_locks: DashMap::new(),
            commit_gate: RwLock::new(()),
            id_claims: DashMap::new(),
        };
        for event in &events {
            engine.apply(event);
        }
        tracing::debug!("replayed {} events", events.len());
        Ok(engine)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the store.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    /// Reserve `id` for a create of `entity`. Fails with `AlreadyExists` if
    /// `exists` finds it in the store or another create holds it.
    pub(super) fn claim_id(
        &self,
        entity: Entity,
        id: Ulid,
        exists: impl FnOnce(&S, &Ulid) -> bool,
    ) -> Result<IdClaim<'_>, EngineError> {
        let key = (entity, id);
        match self.id_claims.entry(key) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                if exists(&self.store, &id) {
                    return Err(EngineError::AlreadyExists(id));
                }
                slot.insert(());
                Ok(IdClaim {
                    claims: &self.id_claims,
                    key,
                })
            }
        }
    }

    pub(super) fn item_lock(&self, item_id: &Ulid) -> Option<Arc<Mutex<()>>> {
        self.item_locks.get(item_id).map(|e| e.value().clone())
    }

    /// Apply an already-durable event to the store.
    fn apply(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, email } => {
                self.store.save_user(User {
                    id: *id,
                    name: name.clone(),
                    email: email.clone(),
                });
            }
            Event::ItemAdded {
                id,
                owner_id,
                name,
                description,
                available,
            } => {
                self.store.save_item(Item {
                    id: *id,
                    owner_id: *owner_id,
                    name: name.clone(),
                    description: description.clone(),
                    available: *available,
                });
                self.item_locks.entry(*id).or_default();
            }
            Event::ItemAvailabilityChanged { id, available } => {
                if let Some(mut item) = self.store.find_item(id) {
                    item.available = *available;
                    self.store.save_item(item);
                }
            }
            Event::BookingRequested {
                id,
                item_id,
                booker_id,
                span,
            } => {
                self.store.save_booking(Booking {
                    id: *id,
                    item_id: *item_id,
                    booker_id: *booker_id,
                    span: *span,
                    status: BookingStatus::Waiting,
                });
            }
            Event::BookingDecided { id, status, .. } => {
                if let Some(mut booking) = self.store.find_booking(id) {
                    booking.status = *status;
                    self.store.save_booking(booking);
                }
            }
        }
    }
}
