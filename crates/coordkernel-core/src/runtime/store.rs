// coordkernel-core/src/runtime/store.rs
// ============================================================================
// Module: Coordination Kernel In-Memory Document Store
// Description: Deterministic in-memory DocumentStore for tests and local runs.
// Purpose: Let higher crates exercise gate/dispatch/relay logic without a real store.
// Dependencies: crate::interfaces, async-trait, serde_json
// ============================================================================

//! ## Overview
//! A `BTreeMap`-backed [`DocumentStore`] implementation. Not intended for
//! production use; the sqlite-backed adapter is the production store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::identifiers::TenantUid;
use crate::core::time::Timestamp;
use crate::interfaces::DocPath;
use crate::interfaces::DocumentStore;
use crate::interfaces::Query;
use crate::interfaces::QueryFilter;
use crate::interfaces::SortOrder;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory [`DocumentStore`] for tests and local demos.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    /// Every document, keyed by its full path.
    documents: Mutex<BTreeMap<String, Value>>,
    /// Monotonic clock used for `server_timestamp`, in milliseconds.
    clock_millis: AtomicI64,
}

impl InMemoryDocumentStore {
    /// Creates an empty store whose server clock starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `value` satisfies every filter in `query`.
    fn matches(value: &Value, query: &Query) -> bool {
        query.filters.iter().all(|filter| match filter {
            QueryFilter::Eq(field, expected) => value.get(field) == Some(expected),
            QueryFilter::ArrayContains(field, expected) => value
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.contains(expected)),
            QueryFilter::Lt(field, expected) => compare(value.get(field), expected).is_some_and(|o| o.is_lt()),
            QueryFilter::Gte(field, expected) => compare(value.get(field), expected).is_some_and(|o| o.is_ge()),
        })
    }
}

/// Compares two JSON values as numbers or strings; returns `None` when incomparable.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_value(&self, path: &DocPath) -> Result<Value, StoreError> {
        self.get_value_optional(path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn get_value_optional(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        Ok(guard.get(path.as_str()).cloned())
    }

    async fn put_value(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        guard.insert(path.as_str().to_string(), value);
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        guard.remove(path.as_str());
        Ok(())
    }

    async fn increment(&self, path: &DocPath, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        let doc = guard
            .entry(path.as_str().to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let Value::Object(map) = doc else {
            return Err(StoreError::Codec(format!("{path} is not a document object")));
        };
        let current = map.get(field).and_then(Value::as_i64).unwrap_or(0);
        let updated = current + delta;
        map.insert(field.to_string(), Value::from(updated));
        Ok(updated)
    }

    async fn query_values(&self, collection_path: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        let prefix = format!("{collection_path}/");
        let mut results: Vec<Value> = guard
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(_, value)| value.clone())
            .filter(|value| Self::matches(value, query))
            .collect();
        apply_order_and_limit(&mut results, query);
        Ok(results)
    }

    async fn compare_and_swap_field(
        &self,
        path: &DocPath,
        field: &str,
        expected: &Value,
        new_value: Value,
    ) -> Result<bool, StoreError> {
        let mut guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        let Some(Value::Object(map)) = guard.get_mut(path.as_str()) else {
            return Ok(false);
        };
        if map.get(field) != Some(expected) {
            return Ok(false);
        }
        map.insert(field.to_string(), new_value);
        Ok(true)
    }

    async fn collection_group_scan_values(
        &self,
        collection_name: &str,
        query: &Query,
    ) -> Result<Vec<(TenantUid, Value)>, StoreError> {
        let guard = self
            .documents
            .lock()
            .map_err(|_err| StoreError::Io("in-memory store mutex poisoned".to_string()))?;
        let needle = format!("/{collection_name}/");
        let mut results: Vec<(TenantUid, Value)> = guard
            .iter()
            .filter_map(|(path, value)| {
                let tenant = extract_tenant(path, &needle)?;
                Self::matches(value, query).then(|| (tenant, value.clone()))
            })
            .collect();
        let mut bare_values: Vec<Value> = results.iter().map(|(_, v)| v.clone()).collect();
        apply_order_and_limit(&mut bare_values, query);
        results.retain(|(_, v)| bare_values.contains(v));
        Ok(results)
    }

    fn server_timestamp(&self) -> Timestamp {
        let millis = self.clock_millis.fetch_add(1, Ordering::SeqCst) + 1;
        Timestamp::from_unix_millis(millis)
    }
}

/// Extracts the tenant uid from a `tenants/{uid}/{collection}/...` path when
/// `path` contains `needle` (`/{collection}/`).
fn extract_tenant(path: &str, needle: &str) -> Option<TenantUid> {
    let prefix = path.strip_prefix("tenants/")?;
    let (uid, rest) = prefix.split_once('/')?;
    let rest_with_slashes = format!("/{rest}");
    rest_with_slashes
        .starts_with(needle)
        .then(|| TenantUid::new(uid))
}

/// Applies `query`'s order-by and limit to an already-filtered result set.
fn apply_order_and_limit(results: &mut Vec<Value>, query: &Query) {
    if let Some((field, order)) = &query.order_by {
        results.sort_by(|a, b| {
            let ordering = compare(a.get(field), b.get(field).unwrap_or(&Value::Null))
                .unwrap_or(std::cmp::Ordering::Equal);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }
    if let Some(limit) = query.limit {
        results.truncate(limit as usize);
    }
}
