// coordkernel-broker/src/lib.rs
// ============================================================================
// Module: Coordination Kernel Broker
// Description: Outbound side effects: the dispatcher webhook, the
//              fire-and-forget ledger/audit/analytics writer, and the
//              mirror-write sync queue.
// Purpose: Keep every non-document side effect out of the gate's request path.
// Dependencies: coordkernel-core, reqwest, hmac, sha2, tokio
// ============================================================================

//! ## Overview
//! Three outbound concerns share this crate because none of them may block
//! or fail a tool call: [`webhook::WebhookDispatcher`] notifies an external
//! host of newly created tasks; [`ledger::spawn_ledger_writer`] persists
//! ledger, claim, and analytics records off the caller's path; and
//! [`syncqueue`] retries a mirror write that failed inline, on a
//! control-loop cadence, up to a fixed abandon threshold.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod ledger;
pub mod syncqueue;
pub mod webhook;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use ledger::LedgerRecord;
pub use ledger::LedgerWriter;
pub use ledger::LedgerWriterStats;
pub use ledger::spawn_ledger_writer;
pub use syncqueue::MAX_RETRIES;
pub use syncqueue::SyncExecutor;
pub use syncqueue::SyncQueueEntry;
pub use syncqueue::SyncQueueReport;
pub use syncqueue::enqueue;
pub use syncqueue::process_once;
pub use webhook::WebhookDispatcher;
