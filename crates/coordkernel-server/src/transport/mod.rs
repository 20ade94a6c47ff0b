// coordkernel-server/src/transport/mod.rs
// ============================================================================
// Module: Transport
// Description: Shared application state and router assembly for the MCP
//              and REST front doors.
// Purpose: spec.md §4.13/§4.14 — one state struct, one router, two transports.
// Dependencies: axum, coordkernel-broker, coordkernel-config, coordkernel-core
// ============================================================================

//! ## Overview
//! [`AppState`] is the one piece of shared state both transports close over:
//! the gate (which already owns the store, ledger, and rate limiter), the
//! raw store handle domain modules read/write directly, the dispatcher
//! webhook client, and the MCP session registry. [`router`] merges
//! [`mcp::router`] and [`rest::router`] into one [`axum::Router`] and applies
//! `with_state` once, at the top.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod dispatch_router;
pub mod mcp;
pub mod rest;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Router;
use coordkernel_broker::LedgerWriter;
use coordkernel_core::DocumentStore;
use coordkernel_core::TaskDispatcher;

use crate::gate::Gate;

// ============================================================================
// SECTION: AppState
// ============================================================================

/// Everything a request handler needs, shared across every connection.
#[derive(Clone)]
pub struct AppState {
    /// The seven-step pipeline every gated tool call runs through.
    pub gate: Arc<Gate>,
    /// The document store, for reads the transport does directly (metrics,
    /// internal endpoints) rather than through a domain module.
    pub store: Arc<dyn DocumentStore>,
    /// Fire-and-forget ledger/analytics writer, shared with [`Gate`].
    pub ledger: LedgerWriter,
    /// Loaded configuration, consulted for session timeouts, the internal
    /// scheduler secret, and the DNS-rebinding allow-list.
    pub config: Arc<coordkernel_config::CoordkernelConfig>,
    /// The dispatcher webhook client, if configured.
    pub dispatcher: Option<Arc<dyn TaskDispatcher>>,
    /// Live MCP sessions.
    pub sessions: Arc<mcp::SessionRegistry>,
}

impl AppState {
    /// Builds application state from its constituent parts.
    #[must_use]
    pub fn new(
        gate: Arc<Gate>,
        store: Arc<dyn DocumentStore>,
        ledger: LedgerWriter,
        config: Arc<coordkernel_config::CoordkernelConfig>,
        dispatcher: Option<Arc<dyn TaskDispatcher>>,
    ) -> Self {
        Self {
            gate,
            store,
            ledger,
            config,
            dispatcher,
            sessions: Arc::new(mcp::SessionRegistry::new()),
        }
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Merges the MCP and REST routers and applies `state` to both.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new().merge(mcp::router()).merge(rest::router()).with_state(state)
}
