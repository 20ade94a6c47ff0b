// coordkernel-config/src/lib.rs
// ============================================================================
// Module: Coordination Kernel Config Library
// Description: Canonical config model and strict, fail-closed loading.
// Purpose: Single source of truth for coordkernel.toml semantics.
// Dependencies: coordkernel-core, coordkernel-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `coordkernel-config` defines the canonical configuration model for the
//! coordination kernel: server/transport settings, rate-limit tiers, the
//! dispatcher webhook, session-id enforcement, and the cadence of the
//! background control loops. Loading is strict and fail-closed.
//!
//! Security posture: config inputs are untrusted, the same as any other
//! externally supplied file.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
