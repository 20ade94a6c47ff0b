// coordkernel-core/src/runtime/mod.rs
// ============================================================================
// Module: Coordination Kernel Runtime
// Description: Store implementations usable by higher crates and tests.
// Purpose: Keep a dependency-free reference DocumentStore next to the trait.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! The runtime module currently holds only the in-memory document store
//! implementation used by unit tests and local demos; the sqlite-backed
//! production adapter lives in its own crate.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::InMemoryDocumentStore;
