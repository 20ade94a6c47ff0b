// coordkernel-server/src/capabilities.rs
// ============================================================================
// Module: Capability Map
// Description: Tool -> required capability table; program -> default grants.
// Purpose: The third gate stage (spec.md §4.3).
// Dependencies: coordkernel-core
// ============================================================================

//! ## Overview
//! Two static tables. [`required_capability`] maps a tool name to the single
//! `module.action` string it requires. [`default_capabilities_for`] maps a
//! program id to the capability list it holds absent a narrower API-key
//! grant. `*` short-circuits both the per-key grant and the per-program
//! default. Unknown tool names pass through the gate unchecked — the module
//! handler itself decides what to do with an unrecognized tool.

use coordkernel_core::resolve_targets;
use coordkernel_core::tooling::ToolName;

// ============================================================================
// SECTION: Tool -> Capability
// ============================================================================

/// Returns the capability string required to invoke `tool`.
#[must_use]
pub const fn required_capability(tool: ToolName) -> &'static str {
    match tool {
        ToolName::CreateTask | ToolName::ClaimTask | ToolName::CompleteTask => "dispatch.write",
        ToolName::GetTasks => "dispatch.read",
        ToolName::SendMessage => "relay.write",
        ToolName::GetMessages => "relay.read",
        ToolName::CreateSession | ToolName::UpdateSession => "pulse.write",
        ToolName::ListSessions => "pulse.read",
        ToolName::AskQuestion | ToolName::SendAlert => "signal.write",
        ToolName::GetResponse => "signal.read",
        ToolName::DreamActivate => "dream.write",
        ToolName::DreamPeek => "dream.read",
        ToolName::GetOperationalMetrics => "ledger.read",
    }
}

/// Outcome of a capability check (spec.md §4.3: `{allowed}` or
/// `{allowed: false, required, held}`).
#[derive(Debug, Clone)]
pub struct CapabilityCheck {
    /// Whether `held` grants `required`.
    pub allowed: bool,
    /// The capability the tool required.
    pub required: String,
    /// The capabilities the caller actually held.
    pub held: Vec<String>,
}

/// Checks whether `held` grants `required` (`*` or an exact match).
#[must_use]
pub fn check(held: &[String], required: &str) -> CapabilityCheck {
    let allowed = held.iter().any(|capability| capability == "*" || capability == required);
    CapabilityCheck {
        allowed,
        required: required.to_string(),
        held: held.to_vec(),
    }
}

// ============================================================================
// SECTION: Program -> Default Capabilities
// ============================================================================

/// Returns the default capability list for `program_id`, consulted when an
/// API key carries no narrower grant of its own. Council programs get full
/// read/write across every module; builders get dispatch/relay/pulse
/// read/write but not `dream.write` (only the council activates dreams);
/// intelligence programs are read-only; `legacy` is the documented
/// privileged wildcard; unrecognized programs get the minimal read set.
#[must_use]
pub fn default_capabilities_for(program_id: &str) -> Vec<String> {
    if program_id == "legacy" {
        return vec!["*".to_string()];
    }
    if program_id == "mobile" {
        return to_owned_strings(&["signal.read", "signal.write", "pulse.read", "dispatch.read"]);
    }
    if resolve_targets("council").iter().any(|member| member == program_id) {
        return to_owned_strings(&[
            "dispatch.read",
            "dispatch.write",
            "relay.read",
            "relay.write",
            "pulse.read",
            "pulse.write",
            "signal.read",
            "signal.write",
            "dream.read",
            "dream.write",
            "ledger.read",
        ]);
    }
    if resolve_targets("builders").iter().any(|member| member == program_id) {
        return to_owned_strings(&[
            "dispatch.read",
            "dispatch.write",
            "relay.read",
            "relay.write",
            "pulse.read",
            "pulse.write",
            "dream.read",
        ]);
    }
    if resolve_targets("intelligence").iter().any(|member| member == program_id) {
        return to_owned_strings(&["dispatch.read", "relay.read", "pulse.read", "ledger.read"]);
    }
    to_owned_strings(&["dispatch.read", "relay.read", "pulse.read"])
}

fn to_owned_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_a_non_empty_required_capability() {
        for tool in ToolName::all() {
            assert!(!required_capability(*tool).is_empty());
        }
    }

    #[test]
    fn wildcard_holder_is_always_allowed() {
        let result = check(&["*".to_string()], "dispatch.write");
        assert!(result.allowed);
    }

    #[test]
    fn missing_capability_is_denied_with_required_and_held() {
        let held = vec!["dispatch.read".to_string()];
        let result = check(&held, "dispatch.write");
        assert!(!result.allowed);
        assert_eq!(result.required, "dispatch.write");
        assert_eq!(result.held, held);
    }

    #[test]
    fn legacy_program_gets_wildcard() {
        assert_eq!(default_capabilities_for("legacy"), vec!["*".to_string()]);
    }

    #[test]
    fn council_program_gets_dream_write_builder_does_not() {
        assert!(default_capabilities_for("architect").contains(&"dream.write".to_string()));
        assert!(!default_capabilities_for("builder").contains(&"dream.write".to_string()));
    }

    #[test]
    fn unrecognized_program_gets_minimal_read_set() {
        let caps = default_capabilities_for("some-unknown-program");
        assert!(caps.contains(&"dispatch.read".to_string()));
        assert!(!caps.contains(&"dispatch.write".to_string()));
    }
}
