//! The mutation queue: local changes awaiting remote confirmation.
//!
//! Queue entries preserve exactly what must be replayed against the remote
//! service, in the causal order the mutations were issued. Net-change
//! coalescing may merge entries for the same `uuid` but never reorders them
//! relative to other uuids.

use crate::error::{Error, Result};
use crate::event::ChangeKind;
use crate::query::Params;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Replay method names, matching the remote service surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Update,
    Patch,
    Remove,
}

impl Method {
    /// The method name as invoked on the remote service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Update => "update",
            Method::Patch => "patch",
            Method::Remove => "remove",
        }
    }

    /// The change topic a confirmation of this method corresponds to.
    pub fn change_kind(&self) -> ChangeKind {
        match self {
            Method::Create => ChangeKind::Created,
            Method::Update => ChangeKind::Updated,
            Method::Patch => ChangeKind::Patched,
            Method::Remove => ChangeKind::Removed,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote call a queued mutation must replay, exactly as issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum QueuedCall {
    Create {
        data: Record,
        params: Params,
    },
    Update {
        id: Value,
        data: Record,
        params: Params,
    },
    Patch {
        id: Value,
        data: Record,
        params: Params,
    },
    Remove {
        id: Value,
        params: Params,
    },
}

impl QueuedCall {
    /// The replay method of this call.
    pub fn method(&self) -> Method {
        match self {
            QueuedCall::Create { .. } => Method::Create,
            QueuedCall::Update { .. } => Method::Update,
            QueuedCall::Patch { .. } => Method::Patch,
            QueuedCall::Remove { .. } => Method::Remove,
        }
    }
}

/// A mutation applied locally and not yet confirmed by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// The call to replay
    pub call: QueuedCall,
    /// The record as applied locally
    pub record: Record,
}

impl QueuedMutation {
    /// The replay method of this entry.
    pub fn method(&self) -> Method {
        self.call.method()
    }

    /// The client identifier of the affected record.
    pub fn uuid(&self) -> Option<&Value> {
        self.record.uuid()
    }
}

/// Append an entry with net-change coalescing.
///
/// A prior entry for the same uuid is overwritten in place unless it is a
/// `remove`; a `create` following a pending `remove` is inserted right after
/// it, and any other follow-up to a pending `remove` is an error.
pub fn coalesce(queue: &mut Vec<QueuedMutation>, entry: QueuedMutation) -> Result<()> {
    let Some(uuid) = entry.uuid().cloned() else {
        queue.push(entry);
        return Ok(());
    };

    match queue.iter().rposition(|queued| queued.uuid() == Some(&uuid)) {
        None => queue.push(entry),
        Some(at) if queue[at].method() != Method::Remove => queue[at] = entry,
        Some(at) if entry.method() == Method::Create => queue.insert(at + 1, entry),
        Some(_) => {
            return Err(Error::BadRequest(format!(
                "cannot queue {} after a pending remove",
                entry.method()
            )))
        }
    }

    Ok(())
}

/// Remove the most recent `(uuid, method)` match, scanning from the newest
/// end. Returns the removed entry.
pub fn confirm(
    queue: &mut Vec<QueuedMutation>,
    method: Method,
    uuid: &Value,
) -> Option<QueuedMutation> {
    let at = queue
        .iter()
        .rposition(|queued| queued.method() == method && queued.uuid() == Some(uuid))?;
    Some(queue.remove(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(method: Method, uuid: u64, order: u64) -> QueuedMutation {
        let record =
            Record::from_value(json!({"id": uuid - 1000, "uuid": uuid, "order": order})).unwrap();
        let params = Params::default();
        let call = match method {
            Method::Create => QueuedCall::Create {
                data: record.clone(),
                params,
            },
            Method::Update => QueuedCall::Update {
                id: json!(uuid - 1000),
                data: record.clone(),
                params,
            },
            Method::Patch => QueuedCall::Patch {
                id: json!(uuid - 1000),
                data: record.clone(),
                params,
            },
            Method::Remove => QueuedCall::Remove {
                id: json!(uuid - 1000),
                params,
            },
        };
        QueuedMutation { call, record }
    }

    #[test]
    fn coalesce_merges_same_uuid() {
        let mut queue = Vec::new();
        coalesce(&mut queue, entry(Method::Update, 1000, 99)).unwrap();
        coalesce(&mut queue, entry(Method::Update, 1000, 999)).unwrap();
        coalesce(&mut queue, entry(Method::Update, 1000, 9999)).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].record.get("order"), Some(&json!(9999)));
    }

    #[test]
    fn coalesce_overwrites_method_and_args() {
        let mut queue = Vec::new();
        coalesce(&mut queue, entry(Method::Update, 1000, 1)).unwrap();
        coalesce(&mut queue, entry(Method::Patch, 1000, 2)).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].method(), Method::Patch);
    }

    #[test]
    fn coalesce_never_reorders_across_uuids() {
        let mut queue = Vec::new();
        coalesce(&mut queue, entry(Method::Update, 1000, 1)).unwrap();
        coalesce(&mut queue, entry(Method::Update, 1001, 1)).unwrap();
        coalesce(&mut queue, entry(Method::Update, 1000, 2)).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].uuid(), Some(&json!(1000)));
        assert_eq!(queue[1].uuid(), Some(&json!(1001)));
    }

    #[test]
    fn create_after_remove_is_inserted_after_it() {
        let mut queue = Vec::new();
        coalesce(&mut queue, entry(Method::Remove, 1000, 1)).unwrap();
        coalesce(&mut queue, entry(Method::Update, 1001, 1)).unwrap();
        coalesce(&mut queue, entry(Method::Create, 1000, 2)).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].method(), Method::Remove);
        assert_eq!(queue[1].method(), Method::Create);
        assert_eq!(queue[1].uuid(), Some(&json!(1000)));
        assert_eq!(queue[2].uuid(), Some(&json!(1001)));
    }

    #[test]
    fn non_create_after_remove_is_rejected() {
        let mut queue = Vec::new();
        coalesce(&mut queue, entry(Method::Remove, 1000, 1)).unwrap();

        let err = coalesce(&mut queue, entry(Method::Patch, 1000, 2)).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn entries_without_uuid_are_appended() {
        let mut queue = Vec::new();
        let mut no_uuid = entry(Method::Create, 1000, 1);
        no_uuid.record = Record::from_value(json!({"id": 0})).unwrap();
        coalesce(&mut queue, no_uuid.clone()).unwrap();
        coalesce(&mut queue, no_uuid).unwrap();

        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn confirm_takes_the_newest_match() {
        let mut queue = vec![
            entry(Method::Create, 1000, 1),
            entry(Method::Update, 1001, 1),
        ];
        // a second create for the same uuid, bypassing coalescing
        queue.push(entry(Method::Create, 1000, 2));

        let taken = confirm(&mut queue, Method::Create, &json!(1000)).unwrap();
        assert_eq!(taken.record.get("order"), Some(&json!(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].record.get("order"), Some(&json!(1)));
    }

    #[test]
    fn confirm_requires_method_match() {
        let mut queue = vec![entry(Method::Update, 1000, 1)];
        assert!(confirm(&mut queue, Method::Patch, &json!(1000)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queued_call_serialization_is_tagged() {
        let queued = entry(Method::Update, 1000, 5);
        let text = serde_json::to_string(&queued).unwrap();
        assert!(text.contains(r#""method":"update""#));

        let parsed: QueuedMutation = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, queued);
    }
}
