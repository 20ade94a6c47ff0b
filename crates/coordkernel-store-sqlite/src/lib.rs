// coordkernel-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Document Store
// Description: Durable DocumentStore backend using SQLite WAL.
// Purpose: Provide production-grade persistence for the coordination kernel.
// Dependencies: coordkernel-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a `SQLite`-backed [`DocumentStore`] implementation.
//! Every document is a JSON blob addressed by its full
//! [`coordkernel_core::DocPath`] string; tenant and collection are extracted
//! from the path at write time into indexed columns so per-tenant queries
//! and cross-tenant collection-group scans both stay index-backed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_DOCUMENT_BYTES;
pub use store::SqliteDocumentStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
