// coordkernel-core/src/core/mod.rs
// ============================================================================
// Module: Coordination Kernel Core Types
// Description: Canonical entity schema, identifiers, crypto, and lifecycle rules.
// Purpose: Provide stable, serializable types shared by every higher crate.
// Dependencies: serde, sha2, subtle, pbkdf2, aes, cbc
// ============================================================================

//! ## Overview
//! Core types are the canonical source of truth for the coordination plane's
//! data model: identifiers, the shared envelope, the task/relay/session
//! entities, API keys, ledger records, multicast groups, and the pure
//! lifecycle engine that is the only writer of `status` fields.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod apikey;
pub mod crypto;
pub mod envelope;
pub mod groups;
pub mod hashing;
pub mod identifiers;
pub mod ledger;
pub mod lifecycle;
pub mod relay;
pub mod session;
pub mod task;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use apikey::ApiKeyRecord;
pub use apikey::BearerTokenShape;
pub use apikey::classify_bearer_token;
pub use envelope::Action;
pub use envelope::Envelope;
pub use envelope::Priority;
pub use envelope::Provenance;
pub use envelope::Ttl;
pub use groups::is_group_name;
pub use groups::resolve_targets;
pub use hashing::constant_time_eq;
pub use hashing::hash_api_key;
pub use hashing::hash_canonical_email;
pub use hashing::sha256_hex;
pub use identifiers::ApiKeyHash;
pub use identifiers::ClaimEventId;
pub use identifiers::CorrelationId;
pub use identifiers::DeviceId;
pub use identifiers::McpSessionId;
pub use identifiers::MessageId;
pub use identifiers::MulticastId;
pub use identifiers::ProgramId;
pub use identifiers::SessionId;
pub use identifiers::SpanId;
pub use identifiers::TaskId;
pub use identifiers::TenantUid;
pub use identifiers::ThreadId;
pub use identifiers::TraceId;
pub use ledger::AggregateKeys;
pub use ledger::AnalyticsEvent;
pub use ledger::AnalyticsEventType;
pub use ledger::CalendarDate;
pub use ledger::CanonicalAccount;
pub use ledger::ClaimEvent;
pub use ledger::ClaimOutcome;
pub use ledger::LedgerEntry;
pub use ledger::LedgerEntryType;
pub use ledger::UsageCounter;
pub use ledger::build_aggregate_keys;
pub use ledger::get_iso_week;
pub use lifecycle::EntityKind;
pub use lifecycle::LifecycleError;
pub use lifecycle::Status;
pub use lifecycle::transition;
pub use lifecycle::validate_transition;
pub use relay::MessageType;
pub use relay::RelayMessage;
pub use relay::RelayStatus;
pub use session::ComplianceBlock;
pub use session::ComplianceState;
pub use session::Session;
pub use session::SessionIdMode;
pub use session::validate_session_id;
pub use task::CostFields;
pub use task::DreamBlock;
pub use task::QuestionBlock;
pub use task::RetryBlock;
pub use task::SprintBlock;
pub use task::Task;
pub use task::TaskBody;
pub use time::Clock;
pub use time::SystemClock;
pub use time::Timestamp;
