//! Mutator - the optimistic CRUD surface over a replicated store.
//!
//! Writes apply locally first, enqueue the intended remote call, and fire
//! it under a time limit in the background. A confirmed call dequeues its
//! entry; a timed-out or failed call leaves the entry queued for the next
//! reconnect. Reads never touch the network.

use crate::call;
use crate::replicator::Replicator;
use crate::service;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{
    default_matcher, query, ChangeKind, Engine, Error, FindResult, Matcher, Paginate, Params,
    QueuedCall, Record, Result, Sorter, Source,
};

/// Default time limit for one remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Compiles a `$sort` specification into a comparator.
pub type SorterFactory = Arc<dyn Fn(&Map<String, Value>) -> Sorter + Send + Sync>;

/// Mutator construction options.
#[derive(Clone)]
pub struct MutatorConfig {
    /// Per-remote-call time limit
    pub timeout: Duration,
    /// Pagination defaults for `find`; `None` returns bare record lists
    pub paginate: Option<Paginate>,
    /// Predicate evaluator for local queries
    pub matcher: Matcher,
    /// Custom `$sort` compiler; defaults to the engine's
    pub sorter: Option<SorterFactory>,
    /// Whether null-id `patch`/`remove` may fan out over a query
    pub multi: bool,
    /// Primary server-id field
    pub id_field: String,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            paginate: None,
            matcher: default_matcher(),
            sorter: None,
            multi: true,
            id_field: "id".into(),
        }
    }
}

/// The standard CRUD surface of a local record service, driving optimistic
/// replication underneath.
pub struct Mutator {
    replicator: Arc<Replicator>,
    timeout: Duration,
    paginate: Option<Paginate>,
    matcher: Matcher,
    sorter: Option<SorterFactory>,
    multi: bool,
    id_field: String,
}

impl Mutator {
    /// Build the CRUD surface over a bound replicator.
    ///
    /// Fails unless the replicator's engine carries client uuids and the
    /// `updatedAt` watermark; optimistic mutation depends on both.
    pub fn new(replicator: Arc<Replicator>, config: MutatorConfig) -> Result<Self> {
        let engine = replicator.engine();
        if !engine.use_uuid() || !engine.use_updated_at() {
            return Err(Error::BadRequest(
                "optimistic mutation requires an engine with use_uuid and use_updated_at".into(),
            ));
        }

        Ok(Self {
            replicator,
            timeout: config.timeout,
            paginate: config.paginate,
            matcher: config.matcher,
            sorter: config.sorter,
            multi: config.multi,
            id_field: config.id_field,
        })
    }

    fn engine(&self) -> &Arc<Engine> {
        self.replicator.engine()
    }

    /// Filter the local view by the query. Read-only; never enqueues.
    pub fn find(&self, params: &Params) -> Result<FindResult> {
        let (criteria, clauses) = query::split_query(&params.query);

        let mut matched: Vec<Record> = self
            .engine()
            .records()
            .into_iter()
            .filter(|record| (self.matcher)(record, &criteria))
            .collect();
        let total = matched.len();

        if let Some(spec) = &clauses.sort {
            let sorter = match &self.sorter {
                Some(factory) => factory(spec),
                None => query::sorter_from_spec(spec),
            };
            matched.sort_by(|a, b| sorter(a, b));
        }

        let limit = match self.paginate {
            Some(p) => Some(clauses.limit.unwrap_or(p.default).min(p.max)),
            None => clauses.limit,
        };

        let mut data: Vec<Record> = matched
            .into_iter()
            .skip(clauses.skip)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        if let Some(select) = &clauses.select {
            data = data.iter().map(|record| query::project(record, select)).collect();
        }

        Ok(match (self.paginate, limit) {
            (Some(_), Some(limit)) => FindResult::Page(tether_engine::Page {
                total,
                limit,
                skip: clauses.skip,
                data,
            }),
            _ => FindResult::Records(data),
        })
    }

    /// Look up one record by its client identifier.
    pub fn get(&self, uuid: &Value, params: &Params) -> Result<Record> {
        let record = self
            .engine()
            .find_by_uuid(uuid)
            .ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        Ok(self.projected(record, params))
    }

    /// Create one record optimistically.
    pub async fn create(&self, data: Record, params: Params) -> Result<Record> {
        self.require_connected()?;

        let mut data = data;
        let uuid = match data.uuid() {
            Some(uuid) => uuid.clone(),
            None => {
                let minted = Value::String(self.replicator.uuid());
                data.set_uuid(minted.clone());
                minted
            }
        };

        if self.engine().find_by_uuid(&uuid).is_some() {
            return Err(Error::BadRequest("uuid must be unique".into()));
        }

        let applied = self
            .engine()
            .mutate_store(ChangeKind::Created, data.clone(), Source::Local)
            .unwrap_or(data);

        let queued = QueuedCall::Create {
            data: applied.clone(),
            params: params.clone(),
        };
        self.engine().enqueue(queued.clone(), applied.clone());
        self.spawn_confirm(applied.clone(), queued);

        Ok(self.projected(applied, &params))
    }

    /// Create several records; results come back in input order.
    pub async fn create_many(&self, data: Vec<Record>, params: Params) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(data.len());
        for record in data {
            out.push(self.create(record, params.clone()).await?);
        }
        Ok(out)
    }

    /// Replace one record optimistically. `data` must carry a `uuid`.
    pub async fn update(&self, id: Value, data: Record, params: Params) -> Result<Record> {
        self.require_connected()?;

        if data.uuid().is_none() {
            return Err(Error::BadRequest("update requires a uuid".into()));
        }

        let existing = self.locate(&id)?;
        let mut data = data;
        self.carry_identity(&existing, &mut data);

        let applied = self
            .engine()
            .mutate_store(ChangeKind::Updated, data.clone(), Source::Local)
            .unwrap_or(data);

        let queued = QueuedCall::Update {
            id,
            data: applied.clone(),
            params: params.clone(),
        };
        self.engine().enqueue_net(queued.clone(), applied.clone())?;
        self.spawn_confirm(applied.clone(), queued);

        Ok(self.projected(applied, &params))
    }

    /// Merge `data` over one record optimistically.
    pub async fn patch(&self, id: Value, data: Record, params: Params) -> Result<Record> {
        self.require_connected()?;

        let existing = self.locate(&id)?;
        let mut merged = existing.clone();
        merged.merge(&data);

        let applied = self
            .engine()
            .mutate_store(ChangeKind::Patched, merged.clone(), Source::Local)
            .unwrap_or(merged);

        let queued = QueuedCall::Patch {
            id,
            data,
            params: params.clone(),
        };
        self.engine().enqueue_net(queued.clone(), applied.clone())?;
        self.spawn_confirm(applied.clone(), queued);

        Ok(self.projected(applied, &params))
    }

    /// Patch every record matching the query.
    pub async fn patch_many(&self, data: Record, params: Params) -> Result<Vec<Record>> {
        let targets = self.fan_out_targets(&params)?;
        let mut out = Vec::with_capacity(targets.len());
        for id in targets {
            out.push(self.patch(id, data.clone(), params.clone()).await?);
        }
        Ok(out)
    }

    /// Remove one record optimistically.
    pub async fn remove(&self, id: Value, params: Params) -> Result<Record> {
        self.require_connected()?;

        let existing = self.locate(&id)?;
        self.engine()
            .mutate_store(ChangeKind::Removed, existing.clone(), Source::Local);

        let queued = QueuedCall::Remove {
            id,
            params: params.clone(),
        };
        self.engine().enqueue_net(queued.clone(), existing.clone())?;
        self.spawn_confirm(existing.clone(), queued);

        Ok(self.projected(existing, &params))
    }

    /// Remove every record matching the query.
    pub async fn remove_many(&self, params: Params) -> Result<Vec<Record>> {
        let targets = self.fan_out_targets(&params)?;
        let mut out = Vec::with_capacity(targets.len());
        for id in targets {
            out.push(self.remove(id, params.clone()).await?);
        }
        Ok(out)
    }

    fn require_connected(&self) -> Result<()> {
        if self.replicator.connected() {
            Ok(())
        } else {
            Err(Error::BadRequest("replicator not connected".into()))
        }
    }

    fn locate(&self, id: &Value) -> Result<Record> {
        self.engine()
            .records()
            .into_iter()
            .find(|record| record.get(&self.id_field) == Some(id) || record.has_server_id(id))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Server ids of the records a null-id mutation fans out over.
    fn fan_out_targets(&self, params: &Params) -> Result<Vec<Value>> {
        if !self.multi {
            return Err(Error::BadRequest(
                "multi-record mutation is disabled".into(),
            ));
        }
        Ok(self
            .find(params)?
            .into_records()
            .into_iter()
            .filter_map(|record| record.id().cloned())
            .collect())
    }

    /// Carry the existing record's identity onto an outgoing replacement.
    fn carry_identity(&self, existing: &Record, data: &mut Record) {
        for field in ["id", "_id"] {
            if let Some(value) = existing.get(field) {
                data.insert(field, value.clone());
            }
        }
        if let Some(uuid) = existing.uuid() {
            data.set_uuid(uuid.clone());
        }
    }

    fn projected(&self, record: Record, params: &Params) -> Record {
        match params.query.get("$select").and_then(Value::as_array) {
            Some(fields) => {
                let select: Vec<String> = fields
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect();
                query::project(&record, &select)
            }
            None => record,
        }
    }

    /// Fire the remote leg of an optimistic mutation in the background.
    ///
    /// Success dequeues the entry and advances the watermark; timeout or
    /// failure leaves it queued for the next reconnect.
    fn spawn_confirm(&self, record: Record, queued: QueuedCall) {
        let engine = Arc::clone(self.engine());
        let remote = Arc::clone(self.replicator.service());
        let limit = self.timeout;

        tokio::spawn(async move {
            let method = queued.method();
            let outcome = call::within(
                limit,
                method.as_str(),
                service::replay(remote.as_ref(), &queued),
            )
            .await;

            match outcome {
                Ok(confirmed) => {
                    engine.confirm(method, &record, confirmed.updated_at());
                }
                Err(err) => {
                    tracing::debug!(
                        %err,
                        method = method.as_str(),
                        "remote call not confirmed; mutation stays queued"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryService;
    use crate::replicator::ReplicatorConfig;
    use serde_json::json;
    use tether_engine::EngineConfig;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    async fn connected_mutator() -> (Arc<MemoryService>, Arc<Replicator>, Mutator) {
        let service = Arc::new(MemoryService::new());
        service.seed(
            (0..5)
                .map(|i| {
                    record(json!({
                        "id": i,
                        "uuid": 1000 + i,
                        "order": i,
                        "updatedAt": 1000 + i,
                    }))
                })
                .collect(),
        );

        let engine = Arc::new(
            Engine::new(EngineConfig {
                sorter: Some(query::sort("order")),
                ..EngineConfig::default()
            })
            .unwrap(),
        );
        let replicator = Arc::new(Replicator::new(
            engine,
            Arc::clone(&service) as Arc<dyn crate::service::RemoteService>,
            ReplicatorConfig::default(),
        ));
        replicator.connect().await.unwrap();

        let mutator = Mutator::new(Arc::clone(&replicator), MutatorConfig::default()).unwrap();
        (service, replicator, mutator)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn construction_requires_uuid_and_updated_at() {
        let service = Arc::new(MemoryService::new());
        let engine = Arc::new(
            Engine::new(EngineConfig {
                use_uuid: false,
                ..EngineConfig::default()
            })
            .unwrap(),
        );
        let replicator = Arc::new(Replicator::new(
            engine,
            service,
            ReplicatorConfig::default(),
        ));

        let result = Mutator::new(replicator, MutatorConfig::default());
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn find_is_local_and_supports_clauses() {
        let (service, _replicator, mutator) = connected_mutator().await;
        service.set_failing(true); // find must not touch the remote

        let result = mutator
            .find(&Params::with_query(
                json!({"order": {"$gte": 1}, "$sort": {"order": -1}, "$limit": 2}),
            ))
            .unwrap();

        let records = result.into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("order"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn get_looks_up_by_uuid() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let found = mutator.get(&json!(1002), &Params::default()).unwrap();
        assert_eq!(found.get("order"), Some(&json!(2)));

        let missing = mutator.get(&json!(9999), &Params::default());
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn create_mints_a_uuid_when_absent() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let created = mutator
            .create(record(json!({"id": 99, "order": 99})), Params::default())
            .await
            .unwrap();

        assert!(created.uuid().and_then(Value::as_str).is_some());
        settle().await;
    }

    #[tokio::test]
    async fn create_rejects_duplicate_uuid() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let result = mutator
            .create(record(json!({"id": 99, "uuid": 1000, "order": 99})), Params::default())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn writes_require_connection() {
        let (_service, replicator, mutator) = connected_mutator().await;
        replicator.disconnect();

        let result = mutator
            .create(record(json!({"uuid": 2000})), Params::default())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn update_requires_a_uuid() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let result = mutator
            .update(json!(0), record(json!({"order": 99})), Params::default())
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn update_preserves_identity() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let updated = mutator
            .update(
                json!(0),
                record(json!({"uuid": 9999, "order": 50})),
                Params::default(),
            )
            .await
            .unwrap();

        // the stored record's identity wins over what the caller sent
        assert_eq!(updated.uuid(), Some(&json!(1000)));
        assert_eq!(updated.id(), Some(&json!(0)));
        settle().await;
    }

    #[tokio::test]
    async fn patch_merges_and_confirms() {
        let (service, replicator, mutator) = connected_mutator().await;

        let patched = mutator
            .patch(json!(1), record(json!({"order": 42})), Params::default())
            .await
            .unwrap();
        assert_eq!(patched.get("order"), Some(&json!(42)));
        assert_eq!(patched.uuid(), Some(&json!(1001)));

        settle().await;
        assert_eq!(replicator.engine().queued_len(), 0);
        let remote = service.records();
        let server_side = remote.iter().find(|r| r.has_server_id(&json!(1))).unwrap();
        assert_eq!(server_side.get("order"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn patch_many_fans_out() {
        let (_service, replicator, mutator) = connected_mutator().await;

        let patched = mutator
            .patch_many(
                record(json!({"flagged": true})),
                Params::with_query(json!({"order": {"$lt": 2}})),
            )
            .await
            .unwrap();

        assert_eq!(patched.len(), 2);
        settle().await;
        let flagged = replicator
            .engine()
            .records()
            .iter()
            .filter(|r| r.get("flagged") == Some(&json!(true)))
            .count();
        assert_eq!(flagged, 2);
    }

    #[tokio::test]
    async fn remove_of_unknown_id_is_not_found() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let result = mutator.remove(json!(9999), Params::default()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn remove_many_respects_the_multi_switch() {
        let (service, _replicator, mutator) = connected_mutator().await;

        let engine = Arc::new(Engine::new(EngineConfig::default()).unwrap());
        let replicator = Arc::new(Replicator::new(
            engine,
            Arc::clone(&service) as Arc<dyn crate::service::RemoteService>,
            ReplicatorConfig::default(),
        ));
        replicator.connect().await.unwrap();
        let single_only = Mutator::new(
            replicator,
            MutatorConfig {
                multi: false,
                ..MutatorConfig::default()
            },
        )
        .unwrap();

        let result = single_only.remove_many(Params::default()).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));

        let removed = mutator
            .remove_many(Params::with_query(json!({"order": {"$gte": 3}})))
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        settle().await;
    }

    #[tokio::test]
    async fn selection_keeps_identity_fields() {
        let (_service, _replicator, mutator) = connected_mutator().await;

        let created = mutator
            .create(
                record(json!({"id": 99, "uuid": 1099, "order": 99, "label": "x"})),
                Params::with_query(json!({"$select": ["label"]})),
            )
            .await
            .unwrap();

        assert_eq!(created.get("label"), Some(&json!("x")));
        assert_eq!(created.id(), Some(&json!(99)));
        assert_eq!(created.uuid(), Some(&json!(1099)));
        assert!(created.get("order").is_none());
        settle().await;
    }
}
