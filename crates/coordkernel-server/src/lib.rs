// coordkernel-server/src/lib.rs
// ============================================================================
// Module: Coordination Kernel Server
// Description: Gate, auth resolver, capability map, rate limiter, the
//              dispatch/relay/pulse/signal/dream modules, the control-loop
//              schedulers, and the MCP + REST transports.
// Purpose: The coordination kernel's request-handling front end.
// Dependencies: coordkernel-core, coordkernel-broker, coordkernel-config, axum
// ============================================================================

//! ## Overview
//! This crate is the coordination kernel's server half: every request a
//! program, a human client, or the external scheduler sends arrives through
//! [`transport`], passes through [`gate`], and lands in one of the five
//! domain modules ([`dispatch`], [`relay`], [`pulse`], [`signal`],
//! [`dream`]). [`control_loops`] runs the same domain modules on a timer
//! instead of a request.
//!
//! Security posture: every module in this crate treats its inputs as
//! untrusted until the gate has resolved auth, verified the source claim,
//! and checked capabilities. Domain modules never skip the gate for an
//! internal caller; the control loops construct their own privileged
//! [`auth::AuthContext`] rather than bypassing capability checks entirely.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod capabilities;
pub mod control_loops;
pub mod dispatch;
pub mod dream;
pub mod error;
pub mod gate;
pub mod pulse;
pub mod rate_limit;
pub mod relay;
pub mod signal;
pub mod transport;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use auth::AuthContext;
pub use error::GateError;
pub use gate::Gate;
