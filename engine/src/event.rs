//! Change events and their fan-out.
//!
//! Every mutation of the local view produces one [`Event`] descriptor. The
//! descriptor is stored as `last` on the store and delivered, together with
//! the full record set, to every channel subscriber and to the optional
//! direct subscriber callback. Fan-out is synchronous with respect to the
//! mutation that caused it.

use crate::record::Record;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where a mutation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Confirmed by the remote service
    Remote,
    /// Applied optimistically by this client
    Local,
}

/// The four change topics a remote service publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Patched,
    Removed,
}

impl ChangeKind {
    /// The topic name as published on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Patched => "patched",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions reported on the `"events"` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Snapshot,
    AddListeners,
    RemoveListeners,
    ChangeSort,
    Mutated,
    Remove,
    LeftPub,
}

/// Descriptor of the most recent emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(
        rename = "eventName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub event_name: Option<ChangeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
}

impl Event {
    /// A lifecycle event with no record attached.
    pub fn lifecycle(action: Action) -> Self {
        Self {
            action,
            source: None,
            event_name: None,
            record: None,
        }
    }

    /// A record-bearing change event.
    pub fn change(action: Action, source: Source, kind: ChangeKind, record: Record) -> Self {
        Self {
            action,
            source: Some(source),
            event_name: Some(kind),
            record: Some(record),
        }
    }
}

/// One delivery on the `"events"` channel.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The full record set after the change
    pub records: Vec<Record>,
    /// Descriptor of the change
    pub last: Event,
}

/// Direct subscriber callback, invoked on every emission.
pub type Subscriber = Arc<dyn Fn(&[Record], &Event) + Send + Sync>;

/// Fan-out registry for engine events.
///
/// Subscribers are held in an id-keyed map with an unbounded channel each;
/// closed channels are dropped on the next emission. Callbacks run while the
/// engine holds its store lock and must not call back into the engine.
#[derive(Default)]
pub struct Emitter {
    next_id: AtomicUsize,
    channels: DashMap<usize, mpsc::UnboundedSender<Notification>>,
    subscriber: Option<Subscriber>,
}

impl Emitter {
    /// Create an emitter with an optional direct subscriber.
    pub fn new(subscriber: Option<Subscriber>) -> Self {
        Self {
            next_id: AtomicUsize::new(0),
            channels: DashMap::new(),
            subscriber,
        }
    }

    /// Open a channel onto the event stream.
    ///
    /// Returns the subscription id and the receiving end.
    pub fn subscribe(&self) -> (usize, mpsc::UnboundedReceiver<Notification>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(id, tx);
        (id, rx)
    }

    /// Close a subscription.
    pub fn unsubscribe(&self, id: usize) {
        self.channels.remove(&id);
    }

    /// Deliver `(records, last)` to every live subscriber.
    pub fn emit(&self, records: &[Record], last: &Event) {
        self.channels.retain(|_, tx| {
            tx.send(Notification {
                records: records.to_vec(),
                last: last.clone(),
            })
            .is_ok()
        });

        if let Some(subscriber) = &self.subscriber {
            subscriber(records, last);
        }
    }

    /// Number of open channel subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("channels", &self.channels.len())
            .field("subscriber", &self.subscriber.is_some())
            .finish()
    }
}
