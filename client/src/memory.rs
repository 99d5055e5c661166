//! In-process remote service.
//!
//! A complete implementation of the [`RemoteService`] contract backed by a
//! `Vec` of records. Serves as the reference semantics for a conforming
//! server and as a test double: failure and unresponsiveness can be
//! injected to exercise the offline and timeout paths.

use crate::service::{RemoteService, ServiceEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tether_engine::{
    clock, default_matcher, query, ChangeKind, Error, FindResult, Paginate, Params, Record, Result,
};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An in-memory record service with event push.
pub struct MemoryService {
    records: Mutex<Vec<Record>>,
    events: broadcast::Sender<ServiceEvent>,
    paginate: Option<Paginate>,
    failing: AtomicBool,
    unresponsive: AtomicBool,
    next_id: AtomicU64,
}

impl MemoryService {
    /// Create an empty, unpaginated service.
    pub fn new() -> Self {
        Self::with_paginate(None)
    }

    /// Create an empty service with the given pagination defaults.
    pub fn with_paginate(paginate: Option<Paginate>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(Vec::new()),
            events,
            paginate,
            failing: AtomicBool::new(false),
            unresponsive: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    /// Replace the stored records, without emitting events.
    pub fn seed(&self, records: Vec<Record>) {
        let highest = records
            .iter()
            .filter_map(|r| r.id().and_then(Value::as_u64))
            .max()
            .map(|id| id + 1)
            .unwrap_or(0);
        self.next_id.fetch_max(highest, Ordering::Relaxed);
        *self.lock() = records;
    }

    /// The stored records, as the server sees them.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    /// Make every method fail with a remote error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Make every method hang forever, as a dead network would.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn gate(&self) -> Result<()> {
        if self.unresponsive.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Remote("service unavailable".into()));
        }
        Ok(())
    }

    fn position(&self, records: &[Record], id: &Value) -> Result<usize> {
        records
            .iter()
            .position(|record| record.has_server_id(id))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn publish(&self, kind: ChangeKind, record: Record) {
        // nobody listening is fine
        let _ = self.events.send(ServiceEvent { kind, record });
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteService for MemoryService {
    async fn find(&self, params: Params) -> Result<FindResult> {
        self.gate().await?;
        let records = self.lock().clone();
        Ok(query::run_find(
            records,
            &params.query,
            &default_matcher(),
            self.paginate,
        ))
    }

    async fn get(&self, id: Value, _params: Params) -> Result<Record> {
        self.gate().await?;
        let records = self.lock();
        let at = self.position(&records, &id)?;
        Ok(records[at].clone())
    }

    async fn create(&self, mut data: Record, _params: Params) -> Result<Record> {
        self.gate().await?;
        let mut records = self.lock();

        if let Some(id) = data.id() {
            if records.iter().any(|record| record.has_server_id(id)) {
                return Err(Error::BadRequest(format!("id {id} already exists")));
            }
        } else {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            data.insert("id", Value::from(id));
        }

        data.set_updated_at(clock::now());
        records.push(data.clone());
        drop(records);

        self.publish(ChangeKind::Created, data.clone());
        Ok(data)
    }

    async fn update(&self, id: Value, mut data: Record, _params: Params) -> Result<Record> {
        self.gate().await?;
        let mut records = self.lock();
        let at = self.position(&records, &id)?;

        data.insert("id", id);
        data.set_updated_at(clock::now());
        records[at] = data.clone();
        drop(records);

        self.publish(ChangeKind::Updated, data.clone());
        Ok(data)
    }

    async fn patch(&self, id: Value, data: Record, _params: Params) -> Result<Record> {
        self.gate().await?;
        let mut records = self.lock();
        let at = self.position(&records, &id)?;

        let mut patched = records[at].clone();
        patched.merge(&data);
        patched.set_updated_at(clock::now());
        records[at] = patched.clone();
        drop(records);

        self.publish(ChangeKind::Patched, patched.clone());
        Ok(patched)
    }

    async fn remove(&self, id: Value, _params: Params) -> Result<Record> {
        self.gate().await?;
        let mut records = self.lock();
        let at = self.position(&records, &id)?;
        let removed = records.remove(at);
        drop(records);

        self.publish(ChangeKind::Removed, removed.clone());
        Ok(removed)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn seeded() -> MemoryService {
        let service = MemoryService::new();
        service.seed(
            (0..5)
                .map(|i| record(json!({"id": i, "uuid": 1000 + i, "order": i})))
                .collect(),
        );
        service
    }

    #[tokio::test]
    async fn find_filters_and_sorts() {
        let service = seeded();
        let result = service
            .find(Params::with_query(
                json!({"order": {"$lt": 3}, "$sort": {"order": -1}}),
            ))
            .await
            .unwrap();

        let records = result.into_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("order"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn find_paginates_when_configured() {
        let service = MemoryService::with_paginate(Some(Paginate { default: 2, max: 10 }));
        service.seed(seeded().records());

        let result = service.find(Params::default()).await.unwrap();
        match result {
            FindResult::Page(page) => {
                assert_eq!(page.total, 5);
                assert_eq!(page.limit, 2);
                assert_eq!(page.data.len(), 2);
            }
            FindResult::Records(_) => panic!("expected a page"),
        }
    }

    #[tokio::test]
    async fn get_by_server_id() {
        let service = seeded();
        let found = service.get(json!(3), Params::default()).await.unwrap();
        assert_eq!(found.uuid(), Some(&json!(1003)));

        let missing = service.get(json!(9999), Params::default()).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn create_assigns_id_and_stamps() {
        let service = seeded();
        let created = service
            .create(record(json!({"uuid": 1099, "order": 9})), Params::default())
            .await
            .unwrap();

        assert!(created.id().is_some());
        assert!(created.updated_at().is_some());
        assert_eq!(service.records().len(), 6);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let service = seeded();
        let result = service
            .create(record(json!({"id": 0, "uuid": 1099})), Params::default())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn patch_merges_over_existing() {
        let service = seeded();
        let patched = service
            .patch(json!(1), record(json!({"order": 42})), Params::default())
            .await
            .unwrap();

        assert_eq!(patched.get("order"), Some(&json!(42)));
        assert_eq!(patched.uuid(), Some(&json!(1001)));
    }

    #[tokio::test]
    async fn remove_returns_the_removed_record() {
        let service = seeded();
        let removed = service.remove(json!(2), Params::default()).await.unwrap();
        assert_eq!(removed.uuid(), Some(&json!(1002)));
        assert_eq!(service.records().len(), 4);
    }

    #[tokio::test]
    async fn mutations_are_published_to_subscribers() {
        let service = seeded();
        let mut rx = service.subscribe();

        service
            .create(record(json!({"uuid": 1099, "order": 9})), Params::default())
            .await
            .unwrap();
        service.remove(json!(0), Params::default()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Created);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Removed);
    }

    #[tokio::test]
    async fn failure_injection() {
        let service = seeded();
        service.set_failing(true);

        let result = service.find(Params::default()).await;
        assert!(matches!(result, Err(Error::Remote(_))));

        service.set_failing(false);
        assert!(service.find(Params::default()).await.is_ok());
    }
}
