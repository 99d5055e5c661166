//! The remote service contract the client consumes.
//!
//! The replicator and mutator require a record-oriented service exposing the
//! standard asynchronous methods plus a subscription facility delivering
//! `created`, `updated`, `patched`, and `removed` events with the
//! post-change record as payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_engine::{ChangeKind, FindResult, Params, QueuedCall, Record, Result};
use tokio::sync::broadcast;

/// A change pushed by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    /// Which topic the change was published on
    pub kind: ChangeKind,
    /// The record after the change
    pub record: Record,
}

/// The record-oriented remote service.
///
/// `find` may paginate; when it does, it returns a
/// [`Page`](tether_engine::Page) envelope and the caller follows `$skip`
/// until the result set is exhausted.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn find(&self, params: Params) -> Result<FindResult>;
    async fn get(&self, id: Value, params: Params) -> Result<Record>;
    async fn create(&self, data: Record, params: Params) -> Result<Record>;
    async fn update(&self, id: Value, data: Record, params: Params) -> Result<Record>;
    async fn patch(&self, id: Value, data: Record, params: Params) -> Result<Record>;
    async fn remove(&self, id: Value, params: Params) -> Result<Record>;

    /// Subscribe to the service's change topics.
    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent>;
}

/// Replay a queued call against the service, exactly as issued.
pub(crate) async fn replay(service: &dyn RemoteService, call: &QueuedCall) -> Result<Record> {
    match call {
        QueuedCall::Create { data, params } => {
            service.create(data.clone(), params.clone()).await
        }
        QueuedCall::Update { id, data, params } => {
            service.update(id.clone(), data.clone(), params.clone()).await
        }
        QueuedCall::Patch { id, data, params } => {
            service.patch(id.clone(), data.clone(), params.clone()).await
        }
        QueuedCall::Remove { id, params } => service.remove(id.clone(), params.clone()).await,
    }
}
