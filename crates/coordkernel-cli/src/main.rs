// coordkernel-cli/src/main.rs
// ============================================================================
// Module: Coordination Kernel CLI
// Description: Operator tooling against the same document store the server
//              runs against: key issuance, tenant inspection, control-loop
//              triggers.
// Purpose: The coordination plane's admin surface, invoked out-of-band from
//          the scheduled server routes.
// Dependencies: clap, coordkernel-broker, coordkernel-config, coordkernel-core,
//               coordkernel-server, coordkernel-store-sqlite, rand, tokio
// ============================================================================

//! ## Overview
//! This binary never talks HTTP; it opens the configured `SQLite` document
//! store directly and runs the same domain/control-loop code the server does.
//! `issue-key` mints an API key record, `inspect-tenant` prints counts across
//! a tenant's collections, and `trigger` runs one control loop pass
//! synchronously, in place of waiting for the external scheduler's tick.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use coordkernel_core::ApiKeyRecord;
use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::TenantUid;
use coordkernel_core::hash_api_key;
use coordkernel_server::control_loops;
use rand::RngCore;

/// API keys issued by this CLI carry the same `cb_` prefix the auth resolver
/// uses to classify a bearer token's shape.
const API_KEY_PREFIX: &str = "cb_";

/// Writes a line to stdout, bypassing the `println!` macro this workspace
/// denies so CLI output still routes through a fallible, flushed write.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr, used for the top-level error path.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

// ============================================================================
// SECTION: CLI Surface
// ============================================================================

/// Coordination kernel operator CLI.
#[derive(Debug, Parser)]
#[command(name = "coordkernel", about = "Operate a coordination kernel document store")]
struct Cli {
    /// Path to the `coordkernel.toml` configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Subcommand selection for the `coordkernel` binary.
#[derive(Debug, Subcommand)]
enum Command {
    /// Mint a new API key for a tenant/program pair.
    IssueKey {
        /// Tenant namespace the key resolves to.
        #[arg(long)]
        tenant: String,
        /// Program identity the key is bound to.
        #[arg(long)]
        program: String,
        /// Human-readable label for the key.
        #[arg(long)]
        label: String,
        /// Comma-separated capabilities. Defaults to the wildcard `*`.
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
    /// Print a tenant's task/session/message document counts.
    InspectTenant {
        /// Tenant namespace to inspect.
        #[arg(long)]
        tenant: String,
    },
    /// Run one control-loop pass synchronously.
    Trigger {
        /// Which control loop to run.
        #[arg(value_enum)]
        loop_name: TriggerLoop,
    },
}

/// Named control loops an operator can run on demand.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum TriggerLoop {
    /// Revive tasks whose owning session stopped heartbeating.
    ReconcileTasks,
    /// Detect pulse sessions that have gone stale.
    ReconcileSessions,
    /// Fail dreams that exceeded their timeout.
    DreamTimeout,
    /// Expire undelivered relay messages past their TTL.
    RelayExpiry,
    /// Move aged failed tasks to the dead-letter collection.
    DeadLetter,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Parses CLI arguments and reports a subcommand's outcome via exit code.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            let _ = write_stderr_line(&format!("error: {message}"));
            ExitCode::FAILURE
        }
    }
}

/// Opens the configured store and dispatches to the requested subcommand.
async fn run(cli: Cli) -> Result<(), String> {
    let config = coordkernel_config::CoordkernelConfig::load(cli.config.as_deref()).map_err(|err| err.to_string())?;
    let store: Arc<dyn DocumentStore> =
        Arc::new(coordkernel_store_sqlite::SqliteDocumentStore::open(&config.store).map_err(|err| err.to_string())?);

    match cli.command {
        Command::IssueKey { tenant, program, label, capabilities } => issue_key(store.as_ref(), &tenant, &program, &label, capabilities).await,
        Command::InspectTenant { tenant } => inspect_tenant(store.as_ref(), &tenant).await,
        Command::Trigger { loop_name } => trigger(store, loop_name, config.control_loops.batch_size).await,
    }
}

// ============================================================================
// SECTION: Key Issuance
// ============================================================================

/// Mints and persists a new API key record, printing the raw key once.
async fn issue_key(store: &dyn DocumentStore, tenant: &str, program: &str, label: &str, capabilities: Vec<String>) -> Result<(), String> {
    let capabilities = if capabilities.is_empty() { vec!["*".to_string()] } else { capabilities };
    let raw_key = generate_raw_api_key();
    let hash = hash_api_key(&raw_key);
    let record = ApiKeyRecord {
        tenant_uid: TenantUid::new(tenant),
        program_id: ProgramId::new(program),
        label: label.to_string(),
        capabilities,
        active: true,
        created_at: store.server_timestamp(),
        last_used_at: None,
        revoked_at: None,
    };
    let path = DocPath::global("apiKeys", hash.as_str());
    let value = serde_json::to_value(&record).map_err(|err| err.to_string())?;
    store.put_value(&path, value).await.map_err(|err| err.to_string())?;
    write_stdout_line(&format!("issued key for tenant={tenant} program={program}: {raw_key}")).map_err(|err| err.to_string())?;
    write_stdout_line("store this value now; only its hash is kept").map_err(|err| err.to_string())?;
    Ok(())
}

/// Generates a fresh random API key in the same `cb_`-prefixed shape the
/// auth resolver expects to see on the wire.
fn generate_raw_api_key() -> String {
    let mut bytes = [0_u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", hex_encode(&bytes))
}

/// Renders bytes as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

// ============================================================================
// SECTION: Tenant Inspection
// ============================================================================

/// Prints document counts across a tenant's task/session/message collections.
async fn inspect_tenant(store: &dyn DocumentStore, tenant: &str) -> Result<(), String> {
    let tenant_uid = TenantUid::new(tenant);
    for collection in ["tasks", "sessions", "messages"] {
        let collection_path = format!("tenants/{tenant_uid}/{collection}");
        let count = store.query_values(&collection_path, &Query::new()).await.map_err(|err| err.to_string())?.len();
        write_stdout_line(&format!("{collection}: {count}")).map_err(|err| err.to_string())?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Control-Loop Triggers
// ============================================================================

/// Runs one pass of the requested control loop against a throwaway ledger
/// writer, standing in for the scheduled tick an operator can't wait for.
async fn trigger(store: Arc<dyn DocumentStore>, loop_name: TriggerLoop, batch_size: u32) -> Result<(), String> {
    let (ledger, _handle) = coordkernel_broker::spawn_ledger_writer(Arc::clone(&store), 64);
    let report = match loop_name {
        TriggerLoop::ReconcileTasks => control_loops::orphan_revival(store.as_ref(), &ledger, batch_size).await,
        TriggerLoop::ReconcileSessions => control_loops::stale_session_detector(store.as_ref(), batch_size).await,
        TriggerLoop::DreamTimeout => control_loops::dream_timeout_enforcement(store.as_ref(), &ledger, batch_size).await,
        TriggerLoop::RelayExpiry => control_loops::relay_expiry(store.as_ref(), &ledger, batch_size).await,
        TriggerLoop::DeadLetter => control_loops::dead_letter_processing(store.as_ref(), &ledger, batch_size).await,
    }
    .map_err(|err| err.to_string())?;
    write_stdout_line(&format!(
        "scanned={} mutated={} errors={}",
        report.documents_scanned,
        report.documents_mutated,
        report.errors.len()
    ))
    .map_err(|err| err.to_string())?;
    for error in &report.errors {
        write_stdout_line(&format!("  - {error}")).map_err(|err| err.to_string())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::expect_used,
        clippy::unwrap_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]

    use super::*;

    #[test]
    fn generated_keys_carry_the_expected_prefix_and_length() {
        let raw_key = generate_raw_api_key();
        assert!(raw_key.starts_with(API_KEY_PREFIX));
        assert_eq!(raw_key.len(), API_KEY_PREFIX.len() + 48);
    }

    #[test]
    fn generated_keys_are_not_repeated() {
        let first = generate_raw_api_key();
        let second = generate_raw_api_key();
        assert_ne!(first, second);
    }

    #[test]
    fn hex_encode_matches_known_bytes() {
        assert_eq!(hex_encode(&[0x0a, 0xff, 0x00]), "0aff00");
    }

    #[tokio::test]
    async fn issue_key_persists_a_usable_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store_config = coordkernel_store_sqlite::SqliteStoreConfig {
            path: dir.path().join("cli-test.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: coordkernel_store_sqlite::SqliteStoreMode::Wal,
            sync_mode: coordkernel_store_sqlite::SqliteSyncMode::Normal,
        };
        let store = coordkernel_store_sqlite::SqliteDocumentStore::open(&store_config).expect("open store");
        issue_key(&store, "tenant-a", "program-a", "cli test key", vec![]).await.expect("issue key");

        let records = store
            .query_values("apiKeys", &Query::new())
            .await
            .expect("query api keys");
        assert_eq!(records.len(), 1);
        let record: ApiKeyRecord = serde_json::from_value(records[0].clone()).expect("decode record");
        assert_eq!(record.tenant_uid, TenantUid::new("tenant-a"));
        assert!(record.is_usable());
    }
}
