//! Replicator - binds an engine to one remote service instance.
//!
//! Owns the connect/disconnect lifecycle: snapshotting the remote view
//! (paginated until exhausted), replaying the mutation queue, and keeping a
//! listener task that feeds the service's change topics into the engine.

use crate::mint::{mint, UuidForm};
use crate::service::{self, RemoteService};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tether_engine::{Engine, FindResult, Params, Record, Result, Source};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Replicator construction options.
#[derive(Debug, Clone, Default)]
pub struct ReplicatorConfig {
    /// Base snapshot query, merged with per-connect extras
    pub query: Map<String, Value>,
    /// Shape of minted client identifiers
    pub uuid_form: UuidForm,
    /// Narrow snapshot queries to `updatedAt >= synced_at`.
    ///
    /// Only suitable when the remote `find` is a delta feed: the snapshot
    /// replaces the view wholesale, so a narrowed full query would drop
    /// unchanged records.
    pub use_updated_at: bool,
}

/// Binds one engine to one remote service and owns the reconnect flow.
pub struct Replicator {
    engine: Arc<Engine>,
    service: Arc<dyn RemoteService>,
    query: Map<String, Value>,
    uuid_form: UuidForm,
    use_updated_at: bool,
    connected: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    /// Bind `engine` to `service`.
    pub fn new(
        engine: Arc<Engine>,
        service: Arc<dyn RemoteService>,
        config: ReplicatorConfig,
    ) -> Self {
        Self {
            engine,
            service,
            query: config.query,
            uuid_form: config.uuid_form,
            use_updated_at: config.use_updated_at,
            connected: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// The bound engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// The bound remote service.
    pub fn service(&self) -> &Arc<dyn RemoteService> {
        &self.service
    }

    /// Whether `connect` has succeeded since the last `disconnect`.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Mint a new client identifier.
    pub fn uuid(&self) -> String {
        mint(self.uuid_form)
    }

    /// Connect with the base query only.
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(Map::new()).await
    }

    /// Connect: snapshot the remote view, replay the queue, attach
    /// listeners.
    ///
    /// `extra` is merged over the base query. A snapshot failure propagates
    /// and leaves the engine in its previous state with listeners detached;
    /// queue-replay failures are logged and the remainder stays queued.
    pub async fn connect_with(&self, extra: Map<String, Value>) -> Result<()> {
        self.detach_listeners();

        let mut query = self.query.clone();
        query.extend(extra);
        if self.use_updated_at {
            query.insert(
                "updatedAt".into(),
                json!({"$gte": self.engine.synced_at()}),
            );
        }

        let mut records = self.fetch_all(query).await?;
        if let Some(publication) = self.engine.publication() {
            records.retain(|record| publication(record));
        }
        self.engine.snapshot(records);

        if let Err(err) = self.process_queued_events().await {
            tracing::warn!(%err, pending = self.engine.queued_len(), "queue replay stopped");
        }

        self.attach_listeners();
        self.connected.store(true, Ordering::Relaxed);
        tracing::info!(
            records = self.engine.len(),
            synced_at = self.engine.synced_at(),
            "connected"
        );
        Ok(())
    }

    /// Detach listeners. The local store is retained; queued mutations
    /// remain pending.
    pub fn disconnect(&self) {
        self.detach_listeners();
        self.connected.store(false, Ordering::Relaxed);
        tracing::info!(pending = self.engine.queued_len(), "disconnected");
    }

    /// Fetch the full remote result set, following pagination until
    /// exhausted.
    async fn fetch_all(&self, query: Map<String, Value>) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = Vec::new();

        loop {
            let mut page_query = query.clone();
            page_query.insert("$skip".into(), Value::from(records.len()));

            match self.service.find(Params { query: page_query }).await? {
                FindResult::Records(mut batch) => {
                    records.append(&mut batch);
                    return Ok(records);
                }
                FindResult::Page(page) => {
                    let got = page.data.len();
                    records.extend(page.data);
                    if got == 0 || records.len() >= page.total {
                        return Ok(records);
                    }
                }
            }
        }
    }

    /// Drain the queue head-first, replaying each entry against the remote
    /// service. On the first failure the entry goes back onto the head and
    /// the drain stops; the next `connect` resumes from the unchanged head.
    ///
    /// Listeners attach only after the drain, so each confirmation is also
    /// applied to the engine here — otherwise the snapshot taken before the
    /// replay would leave the view behind the remote.
    pub async fn process_queued_events(&self) -> Result<()> {
        while let Some(entry) = self.engine.pop_queued() {
            let method = entry.method();
            match service::replay(self.service.as_ref(), &entry.call).await {
                Ok(confirmed) => {
                    if let Some(at) = confirmed.updated_at() {
                        self.engine.advance_synced_at(at);
                    }
                    self.engine
                        .mutate_store(method.change_kind(), confirmed, Source::Remote);
                    tracing::debug!(method = method.as_str(), "replayed queued mutation");
                }
                Err(err) => {
                    self.engine.requeue_front(entry);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn attach_listeners(&self) {
        let mut rx = self.service.subscribe();
        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        engine.mutate_store(event.kind, event.record, Source::Remote);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "listener lagged; remote events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        *self.listener_slot() = Some(handle);
        self.engine.mark_listening(true);
    }

    fn detach_listeners(&self) {
        if let Some(handle) = self.listener_slot().take() {
            handle.abort();
        }
        self.engine.mark_listening(false);
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Replicator {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_slot().take() {
            handle.abort();
        }
    }
}
