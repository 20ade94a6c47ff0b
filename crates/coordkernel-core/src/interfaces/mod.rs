// coordkernel-core/src/interfaces/mod.rs
// ============================================================================
// Module: Coordination Kernel Interfaces
// Description: Backend-agnostic document-store and dispatch contracts.
// Purpose: Let the gate and entity modules depend on traits, not a concrete store.
// Dependencies: crate::core, async-trait, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The coordination kernel never embeds a persistence engine. It assumes a
//! document store that supports typed path-addressed CRUD, atomic field
//! increments, server-assigned timestamps, and collection-group scans across
//! tenants (used only by control loops). [`DocumentStore`] is that contract;
//! [`coordkernel_store_sqlite`] and any future adapter implement it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::TenantUid;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Document Store
// ============================================================================

/// Store adapter errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage engine reported an I/O or connection failure.
    #[error("store io error: {0}")]
    Io(String),
    /// A document at `path` was expected to exist but did not.
    #[error("document not found: {0}")]
    NotFound(String),
    /// A document failed to (de)serialize against its expected shape.
    #[error("document codec error: {0}")]
    Codec(String),
    /// An atomic increment or conditional write lost a concurrency race it
    /// could not retry (the caller must re-read and decide).
    #[error("conflict writing document: {0}")]
    Conflict(String),
}

/// A fully qualified document path, always rooted under a tenant namespace
/// except for the handful of global collections (`apiKeys`, `canonical_accounts`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath(String);

impl DocPath {
    /// Builds a tenant-scoped path: `tenants/{tenant}/{collection}/{id}`.
    #[must_use]
    pub fn tenant_scoped(tenant: &TenantUid, collection: &str, id: &str) -> Self {
        Self(format!("tenants/{tenant}/{collection}/{id}"))
    }

    /// Builds a global (non-tenant-scoped) path: `{collection}/{id}`.
    #[must_use]
    pub fn global(collection: &str, id: &str) -> Self {
        Self(format!("{collection}/{id}"))
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single equality or comparison filter applied by [`DocumentStore::query`].
#[derive(Debug, Clone)]
pub enum QueryFilter {
    /// Field equals the given JSON-encoded value.
    Eq(String, serde_json::Value),
    /// Field's array contains the given JSON-encoded value.
    ArrayContains(String, serde_json::Value),
    /// Field is less than the given JSON-encoded value.
    Lt(String, serde_json::Value),
    /// Field is greater than or equal to the given JSON-encoded value.
    Gte(String, serde_json::Value),
}

/// Sort order for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// A composite-index query against one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Filters, implicitly AND-ed together.
    pub filters: Vec<QueryFilter>,
    /// Optional field to sort by.
    pub order_by: Option<(String, SortOrder)>,
    /// Maximum documents to return.
    pub limit: Option<u32>,
}

impl Query {
    /// Starts building a query with no filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn with_eq(mut self, field: &str, value: serde_json::Value) -> Self {
        self.filters.push(QueryFilter::Eq(field.to_string(), value));
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    /// Caps the number of returned documents.
    #[must_use]
    pub const fn limited(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Backend-agnostic, path-addressed document store.
///
/// Methods are typed over `serde_json::Value` rather than generic `T` so the
/// trait stays object-safe (`Arc<dyn DocumentStore>`); [`get_typed`] and
/// [`put_typed`] provide the typed convenience wrapper call sites actually use.
///
/// Implementations must provide real atomicity for [`DocumentStore::increment`]
/// even under concurrent callers; the gate's claim and budget semantics depend on it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document as a raw JSON value.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when no document exists at `path`.
    async fn get_value(&self, path: &DocPath) -> Result<Value, StoreError>;

    /// Reads one document if it exists, returning `None` rather than erroring.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure.
    async fn get_value_optional(&self, path: &DocPath) -> Result<Option<Value>, StoreError>;

    /// Writes a document, overwriting any existing value at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure.
    async fn put_value(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;

    /// Deletes a document. Deleting a missing document is not an error.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure.
    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    /// Atomically adds `delta` to a numeric field, creating the document
    /// (and field, at `0`) if it does not exist. Returns the field's new value.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure or [`StoreError::Conflict`]
    /// if a concurrent writer could not be reconciled.
    async fn increment(&self, path: &DocPath, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Runs a composite-index query over one collection under the given parent path.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure.
    async fn query_values(
        &self,
        collection_path: &str,
        query: &Query,
    ) -> Result<Vec<Value>, StoreError>;

    /// Scans `collection_name` across every tenant (a "collection-group"
    /// scan), used only by control loops. Implementations without native
    /// collection-group support may fall back to per-tenant iteration.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure.
    async fn collection_group_scan_values(
        &self,
        collection_name: &str,
        query: &Query,
    ) -> Result<Vec<(TenantUid, Value)>, StoreError>;

    /// Atomically sets `field` to `new_value` only if its current value
    /// equals `expected`, returning `true` if the write happened. This is
    /// the trait's sole compare-and-swap primitive: `claim_task` and
    /// `get_messages` use it to move a document out of its pending state
    /// exactly once, even when two pollers race for the same document.
    /// A missing document never matches and always returns `false`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on a storage failure.
    async fn compare_and_swap_field(
        &self,
        path: &DocPath,
        field: &str,
        expected: &Value,
        new_value: Value,
    ) -> Result<bool, StoreError>;

    /// Returns the server's current timestamp, used to stamp writes so
    /// concurrent callers agree on ordering regardless of client clock skew.
    fn server_timestamp(&self) -> Timestamp;
}

// ============================================================================
// SECTION: Typed Convenience Wrappers
// ============================================================================

/// Reads and deserializes a document as `T`.
///
/// # Errors
/// Returns [`StoreError::NotFound`] when missing, or [`StoreError::Codec`]
/// when the stored document does not match `T`.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> Result<T, StoreError> {
    let value = store.get_value(path).await?;
    serde_json::from_value(value).map_err(|err| StoreError::Codec(err.to_string()))
}

/// Reads and deserializes a document as `T` if it exists.
///
/// # Errors
/// Returns [`StoreError::Codec`] when the stored document does not match `T`.
pub async fn get_typed_optional<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocPath,
) -> Result<Option<T>, StoreError> {
    match store.get_value_optional(path).await? {
        Some(value) => {
            serde_json::from_value(value).map(Some).map_err(|err| StoreError::Codec(err.to_string()))
        }
        None => Ok(None),
    }
}

/// Serializes and writes `value` as a document.
///
/// # Errors
/// Returns [`StoreError::Codec`] when `value` cannot be serialized, or
/// [`StoreError::Io`] on a storage failure.
pub async fn put_typed<T: Serialize>(
    store: &dyn DocumentStore,
    path: &DocPath,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_value(value).map_err(|err| StoreError::Codec(err.to_string()))?;
    store.put_value(path, json).await
}

/// Runs a query and deserializes every result as `T`.
///
/// # Errors
/// Returns [`StoreError::Codec`] when a result does not match `T`, or
/// [`StoreError::Io`] on a storage failure.
pub async fn query_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection_path: &str,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    let values = store.query_values(collection_path, query).await?;
    values
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(|err| StoreError::Codec(err.to_string())))
        .collect()
}

// ============================================================================
// SECTION: Dispatcher Webhook
// ============================================================================

/// Errors from the fire-and-forget dispatcher webhook call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The outbound HTTP call itself failed (network, timeout, non-2xx).
    #[error("dispatcher webhook failed: {0}")]
    Request(String),
}

/// Outbound notifier invoked fire-and-forget when a task is created.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Notifies the configured dispatcher URL of a newly created task.
    ///
    /// # Errors
    /// Returns [`DispatchError`] when the outbound call fails; callers treat
    /// this as non-fatal and log rather than propagate.
    async fn notify_created(&self, task_id: &str, target: &str, priority: &str)
    -> Result<(), DispatchError>;
}
