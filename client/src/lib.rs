//! # Tether Client
//!
//! Binds a [`tether_engine::Engine`] to a remote record service and exposes
//! the standard CRUD surface with optimistic replication.
//!
//! Three pieces cooperate:
//!
//! - [`RemoteService`] — the contract a remote service must satisfy:
//!   asynchronous `find`/`get`/`create`/`update`/`patch`/`remove` plus a
//!   subscription delivering `created`/`updated`/`patched`/`removed` events
//! - [`Replicator`] — owns the connect/disconnect lifecycle: snapshots the
//!   remote view (following pagination until exhausted), replays the
//!   mutation queue in order, and keeps a listener task feeding remote
//!   events into the engine
//! - [`Mutator`] — the application-facing CRUD surface; writes apply
//!   locally first, enqueue the intended remote call, and fire it under a
//!   time limit in the background
//!
//! A write while the network is down still succeeds locally; the queued
//! call replays on the next [`Replicator::connect`]. The in-process
//! [`MemoryService`] implements the full remote contract and doubles as a
//! test harness with failure injection.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tether_client::{
//!     MemoryService, Mutator, MutatorConfig, Replicator, ReplicatorConfig,
//! };
//! use tether_engine::{Engine, EngineConfig, Params, Record};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tether_engine::Result<()> {
//! let service = Arc::new(MemoryService::new());
//! let engine = Arc::new(Engine::new(EngineConfig::default())?);
//! let replicator = Arc::new(Replicator::new(
//!     Arc::clone(&engine),
//!     service,
//!     ReplicatorConfig::default(),
//! ));
//! replicator.connect().await?;
//!
//! let mutator = Mutator::new(replicator, MutatorConfig::default())?;
//! let created = mutator
//!     .create(
//!         Record::from_value(json!({"order": 1}))?,
//!         Params::default(),
//!     )
//!     .await?;
//! assert!(created.uuid().is_some());
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod memory;
pub mod mint;
pub mod mutator;
pub mod replicator;
pub mod service;

// Re-export main types at crate root
pub use call::within;
pub use memory::MemoryService;
pub use mint::{mint, UuidForm};
pub use mutator::{Mutator, MutatorConfig, SorterFactory, DEFAULT_TIMEOUT};
pub use replicator::{Replicator, ReplicatorConfig};
pub use service::{RemoteService, ServiceEvent};

// The engine crate is part of the public surface
pub use tether_engine as engine;
pub use tether_engine::{multi_sort, sort};
