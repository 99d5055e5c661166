//! Engine - the single source of truth for the local view.
//!
//! The engine serializes every mutation of the record set and the queue,
//! applies changes from either side (local optimistic or remote confirmed),
//! and emits a normalized stream of change events that downstream observers
//! rely on.

use crate::clock::{wall_clock, Clock, Timestamp, DOB};
use crate::error::Result;
use crate::event::{Action, ChangeKind, Emitter, Event, Notification, Source, Subscriber};
use crate::query::{Publication, Sorter};
use crate::queue::{self, Method, QueuedCall, QueuedMutation};
use crate::record::Record;
use crate::store::Store;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Durable queue hooks, called at construction and after each queue
/// mutation.
///
/// The queue is in-memory by default; implementations that persist it must
/// handle their own durability errors — a failed `save` is ignored by the
/// engine.
pub trait QueueStore: Send + Sync {
    /// Load the queue persisted by a previous session.
    fn load(&self) -> Result<Vec<QueuedMutation>>;

    /// Persist the queue after a mutation.
    fn save(&self, queued: &[QueuedMutation]) -> Result<()>;
}

/// Engine construction options.
#[derive(Clone)]
pub struct EngineConfig {
    /// Records carry a client-minted `uuid`; required for optimistic
    /// mutation
    pub use_uuid: bool,
    /// Records carry `updatedAt` stamps feeding the sync watermark;
    /// required for optimistic mutation
    pub use_updated_at: bool,
    /// Predicate selecting which records belong to this client's view
    pub publication: Option<Publication>,
    /// Sort order maintained over the record set
    pub sorter: Option<Sorter>,
    /// Direct subscriber callback, invoked on every emission
    pub subscriber: Option<Subscriber>,
    /// Time source for `updatedAt` stamping on local applies
    pub clock: Clock,
    /// Durable queue hooks
    pub queue_store: Option<Arc<dyn QueueStore>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_uuid: true,
            use_updated_at: true,
            publication: None,
            sorter: None,
            subscriber: None,
            clock: wall_clock(),
            queue_store: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("use_uuid", &self.use_uuid)
            .field("use_updated_at", &self.use_updated_at)
            .field("publication", &self.publication.is_some())
            .field("sorter", &self.sorter.is_some())
            .field("queue_store", &self.queue_store.is_some())
            .finish()
    }
}

/// The replication core: local record set, mutation queue, event emission.
pub struct Engine {
    state: Mutex<Store>,
    emitter: Emitter,
    use_uuid: bool,
    use_updated_at: bool,
    publication: Option<Publication>,
    clock: Clock,
    queue_store: Option<Arc<dyn QueueStore>>,
}

impl Engine {
    /// Create an engine. Loads any previously persisted queue.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let mut store = Store::new(config.sorter);
        if let Some(queue_store) = &config.queue_store {
            store.queued = queue_store.load()?;
        }

        Ok(Self {
            state: Mutex::new(store),
            emitter: Emitter::new(config.subscriber),
            use_uuid: config.use_uuid,
            use_updated_at: config.use_updated_at,
            publication: config.publication,
            clock: config.clock,
            queue_store: config.queue_store,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether records carry client-minted uuids.
    pub fn use_uuid(&self) -> bool {
        self.use_uuid
    }

    /// Whether records carry `updatedAt` stamps feeding the watermark.
    pub fn use_updated_at(&self) -> bool {
        self.use_updated_at
    }

    /// The configured publication predicate, if any.
    pub fn publication(&self) -> Option<Publication> {
        self.publication.clone()
    }

    /// The records currently visible to this client.
    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Number of records currently visible.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// The pending mutation queue, oldest first.
    pub fn queued(&self) -> Vec<QueuedMutation> {
        self.lock().queued.clone()
    }

    /// Number of mutations awaiting confirmation.
    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    /// The sync watermark.
    pub fn synced_at(&self) -> Timestamp {
        self.lock().synced_at
    }

    /// Descriptor of the most recent emitted event.
    pub fn last(&self) -> Option<Event> {
        self.lock().last.clone()
    }

    /// Whether remote listeners are attached.
    pub fn listening(&self) -> bool {
        self.lock().listening
    }

    /// The record with the given client identifier, if visible.
    pub fn find_by_uuid(&self, uuid: &Value) -> Option<Record> {
        let state = self.lock();
        state
            .position_by_uuid(uuid)
            .map(|at| state.records[at].clone())
    }

    /// The record with the given server identifier, if visible.
    pub fn find_by_server_id(&self, id: &Value) -> Option<Record> {
        let state = self.lock();
        state
            .position_by_server_id(id)
            .map(|at| state.records[at].clone())
    }

    /// Open a channel onto the `"events"` stream.
    pub fn subscribe(&self) -> (usize, mpsc::UnboundedReceiver<Notification>) {
        self.emitter.subscribe()
    }

    /// Close an `"events"` subscription.
    pub fn unsubscribe(&self, id: usize) {
        self.emitter.unsubscribe(id);
    }

    /// Replace the record set from a remote snapshot.
    ///
    /// The watermark advances to the maximum `updatedAt` over the input,
    /// falling back to the epoch; it never moves backwards.
    pub fn snapshot(&self, records: Vec<Record>) {
        let mut state = self.lock();
        let newest = records
            .iter()
            .filter_map(Record::updated_at)
            .max()
            .unwrap_or(DOB);
        state.records = records;
        state.advance_synced_at(newest);
        state.resort();
        self.emit(&mut state, Event::lifecycle(Action::Snapshot));
    }

    /// Apply one mutation to the record set.
    ///
    /// Returns the prior record for a remove, the newly applied record for a
    /// mutation, and `None` when the incoming record falls outside the
    /// publication.
    pub fn mutate_store(
        &self,
        kind: ChangeKind,
        mut record: Record,
        source: Source,
    ) -> Option<Record> {
        let mut state = self.lock();
        let before = state.take_matching(&record, self.use_uuid);

        if kind == ChangeKind::Removed {
            // A remote remove may confirm an optimistic remove: the record is
            // already gone locally but observers still need the event.
            if before.is_some() || (source == Source::Remote && self.in_publication(&record)) {
                self.emit(
                    &mut state,
                    Event::change(Action::Remove, source, kind, record),
                );
            }
            return before;
        }

        if !self.in_publication(&record) {
            if before.is_some() {
                self.emit(
                    &mut state,
                    Event::change(Action::LeftPub, source, kind, record),
                );
            }
            return None;
        }

        record.set_updated_at((self.clock)());
        state.records.push(record.clone());
        state.resort();
        self.emit(
            &mut state,
            Event::change(Action::Mutated, source, kind, record.clone()),
        );
        Some(record)
    }

    /// Append to the queue without coalescing.
    pub fn enqueue(&self, call: QueuedCall, record: Record) {
        let mut state = self.lock();
        state.queued.push(QueuedMutation { call, record });
        self.persist_queue(&state);
    }

    /// Append to the queue with net-change coalescing.
    pub fn enqueue_net(&self, call: QueuedCall, record: Record) -> Result<()> {
        let mut state = self.lock();
        queue::coalesce(&mut state.queued, QueuedMutation { call, record })?;
        self.persist_queue(&state);
        Ok(())
    }

    /// Drop the most recent queue entry matching the confirmed mutation and
    /// advance the watermark to the confirmation stamp.
    pub fn confirm(
        &self,
        method: Method,
        record: &Record,
        confirmed_at: Option<Timestamp>,
    ) -> Option<QueuedMutation> {
        let uuid = record.uuid()?.clone();
        let mut state = self.lock();
        let taken = queue::confirm(&mut state.queued, method, &uuid);
        if let Some(at) = confirmed_at {
            state.advance_synced_at(at);
        }
        self.persist_queue(&state);
        taken
    }

    /// Take the queue head for replay.
    pub fn pop_queued(&self) -> Option<QueuedMutation> {
        let mut state = self.lock();
        if state.queued.is_empty() {
            return None;
        }
        let head = state.queued.remove(0);
        self.persist_queue(&state);
        Some(head)
    }

    /// Push a failed replay back onto the queue head.
    pub fn requeue_front(&self, entry: QueuedMutation) {
        let mut state = self.lock();
        state.queued.insert(0, entry);
        self.persist_queue(&state);
    }

    /// Advance the watermark after a confirmed remote write.
    pub fn advance_synced_at(&self, at: Timestamp) {
        self.lock().advance_synced_at(at);
    }

    /// Record the listening-state transition, emitting `add-listeners` or
    /// `remove-listeners`. A no-op when the state is unchanged.
    pub fn mark_listening(&self, listening: bool) {
        let mut state = self.lock();
        if state.listening == listening {
            return;
        }
        state.listening = listening;
        let action = if listening {
            Action::AddListeners
        } else {
            Action::RemoveListeners
        };
        self.emit(&mut state, Event::lifecycle(action));
    }

    /// Install a new sort order and re-sort in place.
    pub fn change_sort(&self, sorter: Sorter) {
        let mut state = self.lock();
        state.sorter = Some(sorter);
        state.resort();
        self.emit(&mut state, Event::lifecycle(Action::ChangeSort));
    }

    fn in_publication(&self, record: &Record) -> bool {
        self.publication
            .as_ref()
            .map(|publication| publication(record))
            .unwrap_or(true)
    }

    fn emit(&self, state: &mut Store, event: Event) {
        state.last = Some(event.clone());
        self.emitter.emit(&state.records, &event);
    }

    fn persist_queue(&self, state: &Store) {
        if let Some(queue_store) = &self.queue_store {
            let _ = queue_store.save(&state.queued);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &*self.lock())
            .field("use_uuid", &self.use_uuid)
            .field("use_updated_at", &self.use_updated_at)
            .finish()
    }
}
