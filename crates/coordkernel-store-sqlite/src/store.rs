// coordkernel-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Document Store
// Description: Durable DocumentStore backed by SQLite WAL.
// Purpose: Persist tenant-namespaced documents with atomic increment/CAS writes.
// Dependencies: coordkernel-core, rusqlite, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! One table, `documents`, holds every document as a JSON blob keyed by its
//! full path string; `tenant_uid` and `collection` are derived from the path
//! at write time into indexed columns. All blocking `SQLite` work runs on
//! `tokio::task::spawn_blocking` so the async [`DocumentStore`] contract
//! never stalls the runtime's worker threads on file I/O. Every mutating
//! operation — `put_value`, `increment`, `compare_and_swap_field` — takes
//! the connection mutex and runs inside one `SQLite` transaction, so the
//! store's atomicity guarantees hold even though the connection itself is
//! shared and serialized.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::Query;
use coordkernel_core::QueryFilter;
use coordkernel_core::SortOrder;
use coordkernel_core::StoreError;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum serialized document size accepted by the store.
pub const MAX_DOCUMENT_BYTES: usize = 512 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` document store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Document failed to (de)serialize.
    #[error("sqlite store codec error: {0}")]
    Codec(String),
    /// Document path did not match either supported shape.
    #[error("sqlite store invalid path: {0}")]
    InvalidPath(String),
    /// Document payload exceeded the configured size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Io(message),
            SqliteStoreError::Codec(message) => Self::Codec(message),
            SqliteStoreError::InvalidPath(message) => Self::Codec(message),
            SqliteStoreError::TooLarge { max_bytes, actual_bytes } => Self::Codec(format!(
                "document exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed [`DocumentStore`] with WAL support.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Opens a `SQLite`-backed document store, creating the schema if absent.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_value(&self, path: &DocPath) -> Result<Value, StoreError> {
        self.get_value_optional(path).await?.ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn get_value_optional(&self, path: &DocPath) -> Result<Option<Value>, StoreError> {
        let connection = Arc::clone(&self.connection);
        let path_str = path.as_str().to_string();
        run_blocking(move || fetch_document(&connection, &path_str)).await
    }

    async fn put_value(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        let connection = Arc::clone(&self.connection);
        let path_str = path.as_str().to_string();
        run_blocking(move || write_document(&connection, &path_str, &value)).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let connection = Arc::clone(&self.connection);
        let path_str = path.as_str().to_string();
        run_blocking(move || delete_document(&connection, &path_str)).await
    }

    async fn increment(&self, path: &DocPath, field: &str, delta: i64) -> Result<i64, StoreError> {
        let connection = Arc::clone(&self.connection);
        let path_str = path.as_str().to_string();
        let field = field.to_string();
        run_blocking(move || increment_field(&connection, &path_str, &field, delta)).await
    }

    async fn compare_and_swap_field(
        &self,
        path: &DocPath,
        field: &str,
        expected: &Value,
        new_value: Value,
    ) -> Result<bool, StoreError> {
        let connection = Arc::clone(&self.connection);
        let path_str = path.as_str().to_string();
        let field = field.to_string();
        let expected = expected.clone();
        run_blocking(move || compare_and_swap(&connection, &path_str, &field, &expected, new_value))
            .await
    }

    async fn query_values(
        &self,
        collection_path: &str,
        query: &Query,
    ) -> Result<Vec<Value>, StoreError> {
        let connection = Arc::clone(&self.connection);
        let collection_path = collection_path.to_string();
        let query = query.clone();
        run_blocking(move || query_collection(&connection, &collection_path, &query)).await
    }

    async fn collection_group_scan_values(
        &self,
        collection_name: &str,
        query: &Query,
    ) -> Result<Vec<(TenantUid, Value)>, StoreError> {
        let connection = Arc::clone(&self.connection);
        let collection_name = collection_name.to_string();
        let query = query.clone();
        run_blocking(move || scan_collection_group(&connection, &collection_name, &query)).await
    }

    fn server_timestamp(&self) -> Timestamp {
        Timestamp::from_unix_millis(unix_millis())
    }
}

/// Runs a blocking `SQLite` closure on the tokio blocking pool and maps its
/// error into [`StoreError`].
async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, SqliteStoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| StoreError::Io(format!("sqlite worker task panicked: {err}")))?
        .map_err(StoreError::from)
}

// ============================================================================
// SECTION: Path Parsing
// ============================================================================

/// A document path split into its tenant (if any) and collection name.
struct PathParts {
    /// Tenant uid, absent for global collections.
    tenant: Option<String>,
    /// Collection name the document belongs to.
    collection: String,
}

/// Parses `tenants/{uid}/{collection}/{id}` or `{collection}/{id}`.
fn split_path(path: &str) -> Result<PathParts, SqliteStoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        ["tenants", tenant, collection, _id] => {
            Ok(PathParts { tenant: Some((*tenant).to_string()), collection: (*collection).to_string() })
        }
        [collection, _id] => Ok(PathParts { tenant: None, collection: (*collection).to_string() }),
        _ => Err(SqliteStoreError::InvalidPath(path.to_string())),
    }
}

// ============================================================================
// SECTION: Document Operations
// ============================================================================

/// Fetches one document by path.
fn fetch_document(
    connection: &Mutex<Connection>,
    path: &str,
) -> Result<Option<Value>, SqliteStoreError> {
    let guard = lock(connection)?;
    let bytes: Option<Vec<u8>> = guard
        .query_row("SELECT doc_json FROM documents WHERE path = ?1", params![path], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    bytes
        .map(|bytes| serde_json::from_slice(&bytes).map_err(|err| SqliteStoreError::Codec(err.to_string())))
        .transpose()
}

/// Writes (overwriting) one document.
fn write_document(
    connection: &Mutex<Connection>,
    path: &str,
    value: &Value,
) -> Result<(), SqliteStoreError> {
    let bytes = encode_document(value)?;
    let parts = split_path(path)?;
    let guard = lock(connection)?;
    guard
        .execute(
            "INSERT INTO documents (path, tenant_uid, collection, doc_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                doc_json = excluded.doc_json, updated_at = excluded.updated_at",
            params![path, parts.tenant, parts.collection, bytes, unix_millis()],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Deletes one document; missing documents are not an error.
fn delete_document(connection: &Mutex<Connection>, path: &str) -> Result<(), SqliteStoreError> {
    let guard = lock(connection)?;
    guard
        .execute("DELETE FROM documents WHERE path = ?1", params![path])
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Atomically increments a numeric field inside one transaction.
fn increment_field(
    connection: &Mutex<Connection>,
    path: &str,
    field: &str,
    delta: i64,
) -> Result<i64, SqliteStoreError> {
    let parts = split_path(path)?;
    let mut guard = lock(connection)?;
    let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let mut doc = load_or_default(&tx, path)?;
    let Value::Object(map) = &mut doc else {
        return Err(SqliteStoreError::Codec(format!("{path} is not a document object")));
    };
    let current = map.get(field).and_then(Value::as_i64).unwrap_or(0);
    let updated = current + delta;
    map.insert(field.to_string(), Value::from(updated));
    let bytes = encode_document(&doc)?;
    tx.execute(
        "INSERT INTO documents (path, tenant_uid, collection, doc_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(path) DO UPDATE SET
            doc_json = excluded.doc_json, updated_at = excluded.updated_at",
        params![path, parts.tenant, parts.collection, bytes, unix_millis()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(updated)
}

/// Atomically sets `field` to `new_value` only if it currently equals
/// `expected`, inside one transaction so the read-compare-write sequence
/// cannot interleave with a concurrent caller.
fn compare_and_swap(
    connection: &Mutex<Connection>,
    path: &str,
    field: &str,
    expected: &Value,
    new_value: Value,
) -> Result<bool, SqliteStoreError> {
    split_path(path)?;
    let mut guard = lock(connection)?;
    let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let bytes: Option<Vec<u8>> = tx
        .query_row("SELECT doc_json FROM documents WHERE path = ?1", params![path], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let Some(bytes) = bytes else {
        return Ok(false);
    };
    let mut doc: Value =
        serde_json::from_slice(&bytes).map_err(|err| SqliteStoreError::Codec(err.to_string()))?;
    let Value::Object(map) = &mut doc else {
        return Err(SqliteStoreError::Codec(format!("{path} is not a document object")));
    };
    if map.get(field) != Some(expected) {
        return Ok(false);
    }
    map.insert(field.to_string(), new_value);
    let encoded = encode_document(&doc)?;
    tx.execute(
        "UPDATE documents SET doc_json = ?1, updated_at = ?2 WHERE path = ?3",
        params![encoded, unix_millis(), path],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(true)
}

/// Loads a document for mutation, defaulting to an empty object when absent.
fn load_or_default(tx: &rusqlite::Transaction<'_>, path: &str) -> Result<Value, SqliteStoreError> {
    let bytes: Option<Vec<u8>> = tx
        .query_row("SELECT doc_json FROM documents WHERE path = ?1", params![path], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match bytes {
        Some(bytes) => {
            serde_json::from_slice(&bytes).map_err(|err| SqliteStoreError::Codec(err.to_string()))
        }
        None => Ok(Value::Object(serde_json::Map::new())),
    }
}

/// Serializes a document, enforcing the size limit.
fn encode_document(value: &Value) -> Result<Vec<u8>, SqliteStoreError> {
    let bytes =
        serde_json::to_vec(value).map_err(|err| SqliteStoreError::Codec(err.to_string()))?;
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_DOCUMENT_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Runs a composite-index-style query over one collection path.
fn query_collection(
    connection: &Mutex<Connection>,
    collection_path: &str,
    query: &Query,
) -> Result<Vec<Value>, SqliteStoreError> {
    let guard = lock(connection)?;
    let pattern = format!("{collection_path}/%");
    let mut stmt = guard
        .prepare("SELECT doc_json FROM documents WHERE path LIKE ?1")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params![pattern], |row| row.get::<_, Vec<u8>>(0))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let mut results = Vec::new();
    for row in rows {
        let bytes = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| SqliteStoreError::Codec(err.to_string()))?;
        if matches_query(&value, query) {
            results.push(value);
        }
    }
    apply_order_and_limit(&mut results, query);
    Ok(results)
}

/// Scans one collection across every tenant.
fn scan_collection_group(
    connection: &Mutex<Connection>,
    collection_name: &str,
    query: &Query,
) -> Result<Vec<(TenantUid, Value)>, SqliteStoreError> {
    let guard = lock(connection)?;
    let mut stmt = guard
        .prepare(
            "SELECT tenant_uid, doc_json FROM documents
             WHERE collection = ?1 AND tenant_uid IS NOT NULL",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params![collection_name], |row| {
            let tenant: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((tenant, bytes))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let mut results = Vec::new();
    for row in rows {
        let (tenant, bytes) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|err| SqliteStoreError::Codec(err.to_string()))?;
        if matches_query(&value, query) {
            results.push((TenantUid::new(tenant), value));
        }
    }
    let mut bare_values: Vec<Value> = results.iter().map(|(_, value)| value.clone()).collect();
    apply_order_and_limit(&mut bare_values, query);
    results.retain(|(_, value)| bare_values.contains(value));
    Ok(results)
}

/// Returns `true` when `value` satisfies every filter in `query`.
fn matches_query(value: &Value, query: &Query) -> bool {
    query.filters.iter().all(|filter| match filter {
        QueryFilter::Eq(field, expected) => value.get(field) == Some(expected),
        QueryFilter::ArrayContains(field, expected) => {
            value.get(field).and_then(Value::as_array).is_some_and(|arr| arr.contains(expected))
        }
        QueryFilter::Lt(field, expected) => {
            compare_values(value.get(field), expected).is_some_and(|o| o.is_lt())
        }
        QueryFilter::Gte(field, expected) => {
            compare_values(value.get(field), expected).is_some_and(|o| o.is_ge())
        }
    })
}

/// Compares two JSON values as numbers or strings; `None` when incomparable.
fn compare_values(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

/// Applies `query`'s order-by and limit to an already-filtered result set.
fn apply_order_and_limit(results: &mut Vec<Value>, query: &Query) {
    if let Some((field, order)) = &query.order_by {
        results.sort_by(|a, b| {
            let ordering = compare_values(a.get(field), b.get(field).unwrap_or(&Value::Null))
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

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Locks the connection mutex, mapping poisoning to a store error.
fn lock(connection: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
    connection.lock().map_err(|_err| SqliteStoreError::Db("sqlite store mutex poisoned".to_string()))
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::InvalidPath("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::InvalidPath(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::InvalidPath(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens a `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    path TEXT PRIMARY KEY,
                    tenant_uid TEXT,
                    collection TEXT NOT NULL,
                    doc_json BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_documents_collection
                    ON documents (collection, tenant_uid);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::Db(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use coordkernel_core::DocPath;
    use coordkernel_core::DocumentStore;
    use coordkernel_core::Query;
    use coordkernel_core::SortOrder;
    use serde_json::json;
    use tempfile::tempdir;

    use super::SqliteDocumentStore;
    use super::SqliteStoreConfig;
    use super::SqliteStoreMode;
    use super::SqliteSyncMode;

    fn open_store(dir: &tempfile::TempDir) -> SqliteDocumentStore {
        let config = SqliteStoreConfig {
            path: dir.path().join("store.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
        };
        SqliteDocumentStore::open(&config).expect("open store")
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let path = DocPath::global("widgets", "w1");
        store.put_value(&path, json!({"name": "bolt"})).await.expect("put");
        let value = store.get_value(&path).await.expect("get");
        assert_eq!(value["name"], "bolt");
    }

    #[tokio::test]
    async fn get_missing_document_errors_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let path = DocPath::global("widgets", "missing");
        assert!(store.get_value(&path).await.is_err());
        assert!(store.get_value_optional(&path).await.expect("get optional").is_none());
    }

    #[tokio::test]
    async fn increment_creates_and_accumulates() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let path = DocPath::global("usage", "2026-03");
        let first = store.increment(&path, "tasks_created", 1).await.expect("inc");
        let second = store.increment(&path, "tasks_created", 2).await.expect("inc");
        assert_eq!(first, 1);
        assert_eq!(second, 3);
    }

    #[tokio::test]
    async fn compare_and_swap_only_writes_on_match() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let path = DocPath::global("relay", "m1");
        store.put_value(&path, json!({"status": "pending"})).await.expect("put");
        let lost = store
            .compare_and_swap_field(&path, "status", &json!("delivered"), json!("delivered"))
            .await
            .expect("cas");
        assert!(!lost);
        let won = store
            .compare_and_swap_field(&path, "status", &json!("pending"), json!("delivered"))
            .await
            .expect("cas");
        assert!(won);
        let doc = store.get_value(&path).await.expect("get");
        assert_eq!(doc["status"], "delivered");
    }

    #[tokio::test]
    async fn query_filters_and_orders_within_a_tenant_collection() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let tenant = coordkernel_core::TenantUid::new("acme");
        store
            .put_value(
                &DocPath::tenant_scoped(&tenant, "tasks", "t1"),
                json!({"status": "created", "priority": 2}),
            )
            .await
            .expect("put");
        store
            .put_value(
                &DocPath::tenant_scoped(&tenant, "tasks", "t2"),
                json!({"status": "created", "priority": 5}),
            )
            .await
            .expect("put");
        store
            .put_value(
                &DocPath::tenant_scoped(&tenant, "tasks", "t3"),
                json!({"status": "done", "priority": 1}),
            )
            .await
            .expect("put");
        let query = Query::new().with_eq("status", json!("created")).order_by("priority", SortOrder::Desc);
        let results = store.query_values("tenants/acme/tasks", &query).await.expect("query");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["priority"], 5);
    }

    #[tokio::test]
    async fn collection_group_scan_crosses_tenants() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(&dir);
        let acme = coordkernel_core::TenantUid::new("acme");
        let globex = coordkernel_core::TenantUid::new("globex");
        store
            .put_value(&DocPath::tenant_scoped(&acme, "sessions", "s1"), json!({"status": "active"}))
            .await
            .expect("put");
        store
            .put_value(&DocPath::tenant_scoped(&globex, "sessions", "s2"), json!({"status": "active"}))
            .await
            .expect("put");
        let results =
            store.collection_group_scan_values("sessions", &Query::new()).await.expect("scan");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn reopening_the_same_file_preserves_documents() {
        let dir = tempdir().expect("tempdir");
        let config = SqliteStoreConfig {
            path: dir.path().join("store.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Normal,
        };
        {
            let store = SqliteDocumentStore::open(&config).expect("open store");
            store
                .put_value(&DocPath::global("widgets", "w1"), json!({"name": "bolt"}))
                .await
                .expect("put");
        }
        let reopened = SqliteDocumentStore::open(&config).expect("reopen store");
        let value = reopened.get_value(&DocPath::global("widgets", "w1")).await.expect("get");
        assert_eq!(value["name"], "bolt");
    }
}
