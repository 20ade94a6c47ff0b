// coordkernel-core/src/core/groups.rs
// ============================================================================
// Module: Coordination Kernel Multicast Groups
// Description: Closed-set group-name vocabulary and target expansion.
// Purpose: Expand a relay `target` that names a group into its member programs.
// Dependencies: (none)
// ============================================================================

//! ## Overview
//! Relay sends may target a named group instead of a single program. The
//! group roster is a closed, static vocabulary; any other target string is
//! treated as a literal program id and passed through unexpanded.

// ============================================================================
// SECTION: Group Roster
// ============================================================================

/// The `council` group: senior coordination programs consulted on
/// cross-cutting decisions.
const COUNCIL: &[&str] = &[
    "architect",
    "historian",
    "overseer",
    "quartermaster",
    "sentinel",
    "cartographer",
];

/// The `builders` group: programs that turn tasks into code changes.
const BUILDERS: &[&str] = &["builder", "builder-prod", "builder-staging"];

/// The `intelligence` group: programs that analyze and summarize, never write.
const INTELLIGENCE: &[&str] = &["analyst", "researcher"];

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Expands a relay `target` into the list of concrete program ids it denotes.
///
/// Known group names (`council`, `builders`, `intelligence`, `all`) expand to
/// their roster, sorted and deduplicated. Any other string is returned as a
/// single-element vector containing the target unchanged, since it names a
/// literal program rather than a group.
#[must_use]
pub fn resolve_targets(target: &str) -> Vec<String> {
    let members: Vec<&str> = match target {
        "council" => COUNCIL.to_vec(),
        "builders" => BUILDERS.to_vec(),
        "intelligence" => INTELLIGENCE.to_vec(),
        "all" => {
            let mut all: Vec<&str> = COUNCIL
                .iter()
                .chain(BUILDERS.iter())
                .chain(INTELLIGENCE.iter())
                .copied()
                .collect();
            all.sort_unstable();
            all.dedup();
            all
        }
        other => return vec![other.to_string()],
    };

    let mut resolved: Vec<String> = members.into_iter().map(str::to_owned).collect();
    resolved.sort_unstable();
    resolved.dedup();
    resolved
}

/// Returns `true` when `name` is one of the closed-set group names.
#[must_use]
pub fn is_group_name(name: &str) -> bool {
    matches!(name, "council" | "builders" | "intelligence" | "all")
}

#[cfg(test)]
mod tests {
    use super::is_group_name;
    use super::resolve_targets;

    #[test]
    fn council_resolves_to_a_fixed_sorted_roster() {
        let mut expected = vec![
            "architect",
            "cartographer",
            "historian",
            "overseer",
            "quartermaster",
            "sentinel",
        ];
        expected.sort_unstable();
        assert_eq!(resolve_targets("council"), expected);
    }

    #[test]
    fn unknown_target_passes_through_as_single_program() {
        assert_eq!(resolve_targets("builder"), vec!["builder".to_string()]);
    }

    #[test]
    fn all_is_the_union_of_every_roster() {
        let all = resolve_targets("all");
        for program in resolve_targets("council") {
            assert!(all.contains(&program));
        }
        for program in resolve_targets("builders") {
            assert!(all.contains(&program));
        }
    }

    #[test]
    fn is_group_name_recognizes_the_closed_set_only() {
        assert!(is_group_name("council"));
        assert!(is_group_name("all"));
        assert!(!is_group_name("builder"));
    }
}
