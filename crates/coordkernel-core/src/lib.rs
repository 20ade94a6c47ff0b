// coordkernel-core/src/lib.rs
// ============================================================================
// Module: Coordination Kernel Core Library
// Description: Public API surface for the coordination kernel core.
// Purpose: Expose entity types, the lifecycle engine, crypto, and the store contract.
// Dependencies: crate::{core, interfaces, runtime, tooling}
// ============================================================================

//! ## Overview
//! The coordination kernel core is backend- and transport-agnostic: it
//! defines the entity schema (envelope, task, relay message, session, API
//! key, ledger), the pure lifecycle engine that is the sole writer of
//! `status` fields, crypto utilities, multicast group resolution, and the
//! [`DocumentStore`] contract that the sqlite adapter implements. Gate,
//! transport, and control-loop logic live in higher crates.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;
pub mod tooling;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::DispatchError;
pub use interfaces::DocPath;
pub use interfaces::DocumentStore;
pub use interfaces::Query;
pub use interfaces::QueryFilter;
pub use interfaces::SortOrder;
pub use interfaces::StoreError;
pub use interfaces::TaskDispatcher;
pub use interfaces::get_typed;
pub use interfaces::get_typed_optional;
pub use interfaces::put_typed;
pub use interfaces::query_typed;
pub use runtime::InMemoryDocumentStore;
pub use tooling::ToolName;
