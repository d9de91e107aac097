//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use estate_sync::queue::{QueueProcessor, QueueStore};
use estate_sync::remote::{Collection, Record, RemoteApi, RemoteError};
use estate_sync::storage::Database;

/// One call observed by [`FakeRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Insert(Collection, String),
    Update(Collection, String),
    Delete(Collection, String),
}

impl Call {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Insert(c, _) | Self::Update(c, _) | Self::Delete(c, _) => *c,
        }
    }
}

/// In-process backend that records every call and fails on demand.
#[derive(Default)]
pub struct FakeRemote {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<Option<String>>>,
    always_fail: Mutex<Option<String>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next calls: `None` succeeds, `Some(msg)` fails with `msg`.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Option<&'static str>>) {
        self.failures
            .lock()
            .unwrap()
            .extend(outcomes.into_iter().map(|o| o.map(str::to_string)));
    }

    /// Fail every call with `message` until cleared.
    pub fn fail_all(&self, message: Option<&str>) {
        *self.always_fail.lock().unwrap() = message.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, call: Call) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call);
        if let Some(message) = self.always_fail.lock().unwrap().clone() {
            return Err(RemoteError::new(message));
        }
        match self.failures.lock().unwrap().pop_front().flatten() {
            Some(message) => Err(RemoteError::new(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn insert(&self, record_id: &str, record: &Record) -> Result<Value, RemoteError> {
        self.respond(Call::Insert(record.collection(), record_id.to_string()))?;
        Ok(serde_json::to_value(record).unwrap_or(Value::Null))
    }

    async fn update(&self, record_id: &str, record: &Record) -> Result<Value, RemoteError> {
        self.respond(Call::Update(record.collection(), record_id.to_string()))?;
        Ok(serde_json::to_value(record).unwrap_or(Value::Null))
    }

    async fn delete(&self, collection: Collection, record_id: &str) -> Result<(), RemoteError> {
        self.respond(Call::Delete(collection, record_id.to_string()))
    }
}

/// Backend that stores rows by collection and id, like a real table.
///
/// Inserting an existing id is a conflict; updating or deleting a missing
/// one is not found.
#[derive(Default)]
pub struct TableRemote {
    rows: Mutex<HashMap<(Collection, String), Value>>,
}

impl TableRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn row(&self, collection: Collection, record_id: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&(collection, record_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteApi for TableRemote {
    async fn insert(&self, record_id: &str, record: &Record) -> Result<Value, RemoteError> {
        let key = (record.collection(), record_id.to_string());
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&key) {
            return Err(RemoteError::new("409 Conflict"));
        }

        let mut row = serde_json::to_value(record).unwrap();
        row["id"] = Value::String(record_id.to_string());
        rows.insert(key, row.clone());
        Ok(row)
    }

    async fn update(&self, record_id: &str, record: &Record) -> Result<Value, RemoteError> {
        let key = (record.collection(), record_id.to_string());
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&key)
            .ok_or_else(|| RemoteError::new("404 Not Found"))?;

        if let Value::Object(patch) = serde_json::to_value(record).unwrap() {
            for (field, value) in patch {
                row[field.as_str()] = value;
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, collection: Collection, record_id: &str) -> Result<(), RemoteError> {
        self.rows
            .lock()
            .unwrap()
            .remove(&(collection, record_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| RemoteError::new("404 Not Found"))
    }
}

pub fn memory_store() -> Arc<QueueStore> {
    Arc::new(QueueStore::new(Database::open_in_memory().unwrap()))
}

pub fn processor(store: &Arc<QueueStore>, remote: &Arc<FakeRemote>) -> Arc<QueueProcessor> {
    let remote: Arc<dyn RemoteApi> = remote.clone();
    Arc::new(QueueProcessor::new(Arc::clone(store), remote))
}
