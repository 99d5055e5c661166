//! # Tether Engine
//!
//! The replication core of an offline-capable, optimistic-replication
//! client.
//!
//! Application code reads and writes records through a local in-memory view;
//! the view mirrors a server-side collection and keeps accepting mutations
//! while the network is unavailable. This crate owns the hard parts: the
//! local store, the mutation queue with net-change coalescing, the
//! publication-filtered event projection, and the sync watermark.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of transports or platforms;
//!   a client crate binds it to a concrete remote service
//! - **Serialized**: every mutation of the record set and the queue goes
//!   through the engine, so no external locking is needed
//! - **Observable**: every change produces one normalized event, delivered
//!   synchronously to all subscribers
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an opaque JSON object. The engine interprets three
//! fields: the server identifier (`id`, falling back to `_id`), the
//! client-minted `uuid`, and the freshness stamp `updatedAt`. Everything
//! else is carried through untouched.
//!
//! ### Mutations
//!
//! [`Engine::mutate_store`] is the central apply routine, fed from either
//! side: [`Source::Local`] for optimistic applies, [`Source::Remote`] for
//! confirmed changes pushed by the server. Local mutations are also queued
//! as [`QueuedMutation`]s until the remote service confirms them.
//!
//! ### Publication
//!
//! An optional predicate selects which records belong to this client's
//! view. Records failing it are dropped on arrival; records patched out of
//! it leave the view with a `left-pub` event.
//!
//! ### Events
//!
//! Every change sets the store's `last` descriptor and fans out
//! `(records, last)` to channel subscribers and the direct subscriber
//! callback. Actions: `snapshot`, `add-listeners`, `remove-listeners`,
//! `change-sort`, `mutated`, `remove`, `left-pub`.
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use tether_engine::{query, ChangeKind, Engine, EngineConfig, Record, Source};
//!
//! // 1. Configure the engine
//! let engine = Engine::new(EngineConfig {
//!     sorter: Some(query::sort("order")),
//!     ..EngineConfig::default()
//! })
//! .unwrap();
//!
//! // 2. Install a snapshot of the remote view
//! let records = vec![
//!     Record::from_value(json!({"id": 0, "uuid": 1000, "order": 0, "updatedAt": 1000})).unwrap(),
//! ];
//! engine.snapshot(records);
//!
//! // 3. Apply a change pushed by the remote service
//! engine.mutate_store(
//!     ChangeKind::Created,
//!     Record::from_value(json!({"id": 1, "uuid": 1001, "order": 1})).unwrap(),
//!     Source::Remote,
//! );
//! assert_eq!(engine.len(), 2);
//! assert_eq!(engine.synced_at(), 1000);
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod event;
pub mod query;
pub mod queue;
pub mod record;
pub mod store;

// Re-export main types at crate root
pub use clock::{fixed, now, wall_clock, Clock, Timestamp, DOB};
pub use engine::{Engine, EngineConfig, QueueStore};
pub use error::{Error, Result};
pub use event::{Action, ChangeKind, Emitter, Event, Notification, Source, Subscriber};
pub use query::{
    default_matcher, multi_sort, publication_from_query, sort, Clauses, FindResult, Matcher, Page,
    Paginate, Params, Publication, Sorter,
};
pub use queue::{Method, QueuedCall, QueuedMutation};
pub use record::Record;
