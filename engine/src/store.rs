//! Store - the in-memory state container.
//!
//! The store holds the records currently visible to this client, the queue
//! of mutations awaiting remote confirmation, the sync watermark, and the
//! descriptor of the last emitted event. It is owned exclusively by the
//! engine; all access goes through engine methods.

use crate::clock::{Timestamp, DOB};
use crate::event::Event;
use crate::query::Sorter;
use crate::queue::QueuedMutation;
use crate::record::Record;
use serde_json::Value;
use std::fmt;

/// The process-local replicated view.
pub struct Store {
    /// Records currently visible to this client
    pub(crate) records: Vec<Record>,
    /// Mutations awaiting remote confirmation, FIFO by enqueue order
    pub(crate) queued: Vec<QueuedMutation>,
    /// Maximum `updatedAt` observed at last snapshot or confirmation
    pub(crate) synced_at: Timestamp,
    /// Descriptor of the most recent emitted event
    pub(crate) last: Option<Event>,
    /// Whether remote listeners are attached
    pub(crate) listening: bool,
    /// Active sort order, when configured
    pub(crate) sorter: Option<Sorter>,
}

impl Store {
    /// Create an empty store with an optional sort order.
    pub(crate) fn new(sorter: Option<Sorter>) -> Self {
        Self {
            records: Vec::new(),
            queued: Vec::new(),
            synced_at: DOB,
            last: None,
            listening: false,
            sorter,
        }
    }

    /// Position of the record with the given server identifier.
    pub(crate) fn position_by_server_id(&self, id: &Value) -> Option<usize> {
        self.records.iter().position(|record| record.has_server_id(id))
    }

    /// Position of the record with the given client identifier.
    pub(crate) fn position_by_uuid(&self, uuid: &Value) -> Option<usize> {
        self.records.iter().position(|record| record.has_uuid(uuid))
    }

    /// Locate and remove the record matching `incoming`, returning its prior
    /// form.
    ///
    /// Identity is the server id (`id` else `_id`); when `use_uuid` is set
    /// and no server-id match exists, the `uuid` is tried as well, so an
    /// optimistic record without a server id and its confirmed form collapse
    /// to one entry.
    pub(crate) fn take_matching(&mut self, incoming: &Record, use_uuid: bool) -> Option<Record> {
        let position = incoming
            .id()
            .and_then(|id| self.position_by_server_id(id))
            .or_else(|| {
                if use_uuid {
                    incoming.uuid().and_then(|uuid| self.position_by_uuid(uuid))
                } else {
                    None
                }
            })?;
        Some(self.records.remove(position))
    }

    /// Re-apply the configured sort order, if any. Stable.
    pub(crate) fn resort(&mut self) {
        if let Some(sorter) = &self.sorter {
            self.records.sort_by(|a, b| sorter(a, b));
        }
    }

    /// Advance the sync watermark; never moves backwards.
    pub(crate) fn advance_synced_at(&mut self, at: Timestamp) {
        self.synced_at = self.synced_at.max(at);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.records.len())
            .field("queued", &self.queued.len())
            .field("synced_at", &self.synced_at)
            .field("listening", &self.listening)
            .field("sorted", &self.sorter.is_some())
            .finish()
    }
}
