// coordkernel-core/src/core/ledger.rs
// ============================================================================
// Module: Coordination Kernel Ledger, Usage, and Canonical Accounts
// Description: Append-only audit/cost records, usage counters, identity merge.
// Purpose: Back the fire-and-forget observability paths (component 12).
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Ledger entries, usage counters, and canonical-account records are written
//! fire-and-forget from the gate and the dispatch/relay/pulse modules. This
//! module defines their shapes plus the pure helpers (ISO week, aggregate
//! key construction) that the usage-rollup control path needs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ClaimEventId;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::ProgramId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TenantUid;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Ledger Entry
// ============================================================================

/// The kind of append-only record stored in the merged ledger collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// A gate allow/deny decision.
    Audit,
    /// A cross-entity trace record.
    Trace,
    /// A per-tool-call cost record.
    Cost,
}

/// One append-only ledger record. Readers filter the merged collection by `entry_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Discriminates audit / trace / cost records sharing one collection.
    pub entry_type: LedgerEntryType,
    /// The tool this entry concerns.
    pub tool: String,
    /// The calling program.
    pub program_id: ProgramId,
    /// The transport endpoint invoked.
    pub endpoint: String,
    /// The session in scope, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Handler duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the gate allowed and the handler succeeded.
    pub success: bool,
    /// Error text, if `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The per-request correlation id.
    pub correlation_id: CorrelationId,
    /// Why the gate denied the request, for audit entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When this entry was written.
    pub timestamp: Timestamp,
}

// ============================================================================
// SECTION: Analytics Events
// ============================================================================

/// The product-event categories the analytics emitter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    /// A task moved between lifecycle states.
    TaskLifecycle,
    /// A relay message was sent, delivered, or dead-lettered.
    MessageLifecycle,
    /// A session moved between lifecycle states.
    SessionLifecycle,
    /// A handler raised an error.
    Error,
    /// An auth resolution succeeded or failed.
    Auth,
    /// An inbound payload failed schema validation.
    SchemaValidation,
}

/// A metadata-only analytics event. `metadata` is a flat string map rather
/// than a free-form JSON value so that question/response content, task
/// instructions, and other encrypted fields cannot be attached even by
/// mistake: the type has no slot that accepts them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Category of product event.
    pub event_type: AnalyticsEventType,
    /// The calling program.
    pub program_id: ProgramId,
    /// The session in scope, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// The tool this event concerns.
    pub tool: String,
    /// String-only metadata (ids, status names, counts-as-strings).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// When this event occurred.
    pub timestamp: Timestamp,
}

// ============================================================================
// SECTION: Claim Events
// ============================================================================

/// The outcome recorded for one claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// The claimant won the task.
    Claimed,
    /// The task was already claimed by a different session.
    Contention,
}

/// A contention-metrics record written on every `claim_task` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimEvent {
    /// Unique claim-event id.
    pub id: ClaimEventId,
    /// The task that was claimed or contended for.
    pub task_id: TaskId,
    /// The session that attempted the claim.
    pub session_id: SessionId,
    /// Outcome of this attempt.
    pub outcome: ClaimOutcome,
    /// The session that currently owns the claim, when `outcome=contention`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_owner: Option<SessionId>,
    /// When recorded.
    pub recorded_at: Timestamp,
}

/// TTL applied to claim events, in seconds (7 days).
pub const CLAIM_EVENT_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

// ============================================================================
// SECTION: Usage Counters
// ============================================================================

/// Monthly usage counter document, keyed by `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UsageCounter {
    /// Tasks created this month.
    #[serde(default)]
    pub tasks_created: u64,
    /// Sessions started this month.
    #[serde(default)]
    pub sessions_started: u64,
    /// Relay messages sent this month.
    #[serde(default)]
    pub messages_sent: u64,
    /// Every tool call this month, regardless of kind.
    #[serde(default)]
    pub total_tool_calls: u64,
}

// ============================================================================
// SECTION: Canonical Accounts
// ============================================================================

/// Maps an identity-provider UID onto the tenant's canonical UID, enabling
/// multiple sign-in methods to merge onto one tenant path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAccount {
    /// The canonical tenant uid all alternates resolve to.
    pub canonical_uid: TenantUid,
    /// Every identity-provider UID known to resolve to `canonical_uid`.
    pub alternate_uids: Vec<String>,
}

// ============================================================================
// SECTION: ISO Week & Aggregate Keys
// ============================================================================

/// A calendar date, used only for ISO-week and aggregate-key computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDate {
    /// Four-digit year.
    pub year: i32,
    /// Month, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
}

/// The three rollup keys produced for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateKeys {
    /// `daily_YYYY-MM-DD`.
    pub daily: String,
    /// `weekly_YYYY-Www`.
    pub weekly: String,
    /// `monthly_YYYY-MM`.
    pub monthly: String,
}

/// Computes the ISO-8601 week number (1-53) for a calendar date.
#[must_use]
pub fn get_iso_week(date: CalendarDate) -> u32 {
    let ordinal = day_of_year(date);
    let weekday = iso_weekday(date);
    // Rounds to the Thursday of the date's week, per the ISO-8601 definition.
    #[allow(
        clippy::cast_possible_wrap,
        reason = "ordinal and weekday both fit comfortably in i32 for any realistic date"
    )]
    let thursday_ordinal = ordinal as i32 - weekday as i32 + 4;
    if thursday_ordinal < 1 {
        let prev_year_days = days_in_year(date.year - 1);
        #[allow(
            clippy::cast_sign_loss,
            reason = "thursday_ordinal + prev_year_days is positive by construction here"
        )]
        let adjusted = (thursday_ordinal + prev_year_days as i32) as u32;
        return week_from_thursday_ordinal(adjusted, date.year - 1);
    }
    let year_days = days_in_year(date.year);
    if thursday_ordinal > i32::from(u16::try_from(year_days).unwrap_or(u16::MAX)) {
        return 1;
    }
    #[allow(
        clippy::cast_sign_loss,
        reason = "thursday_ordinal is checked >= 1 above"
    )]
    week_from_thursday_ordinal(thursday_ordinal as u32, date.year)
}

/// Converts a Thursday-adjusted ordinal day into its 1-based week number.
fn week_from_thursday_ordinal(thursday_ordinal: u32, _year: i32) -> u32 {
    thursday_ordinal.div_ceil(7)
}

/// Builds the `daily`/`weekly`/`monthly` aggregate keys for one calendar date.
#[must_use]
pub fn build_aggregate_keys(date: CalendarDate) -> AggregateKeys {
    let week = get_iso_week(date);
    AggregateKeys {
        daily: format!("daily_{:04}-{:02}-{:02}", date.year, date.month, date.day),
        weekly: format!("weekly_{:04}-W{:02}", date.year, week),
        monthly: format!("monthly_{:04}-{:02}", date.year, date.month),
    }
}

/// Gregorian leap-year rule.
const fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Days in the given Gregorian year.
const fn days_in_year(year: i32) -> u32 {
    if is_leap_year(year) { 366 } else { 365 }
}

/// Cumulative days before the first of each month in a non-leap year.
const DAYS_BEFORE_MONTH: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// 1-based day-of-year for a calendar date.
const fn day_of_year(date: CalendarDate) -> u32 {
    let mut days = DAYS_BEFORE_MONTH[(date.month - 1) as usize] + date.day;
    if date.month > 2 && is_leap_year(date.year) {
        days += 1;
    }
    days
}

/// Zeller-congruence-free weekday via days-since-epoch modulo 7, ISO
/// convention (Monday=1 .. Sunday=7).
fn iso_weekday(date: CalendarDate) -> u32 {
    let days_since_epoch = days_since_epoch(date);
    // 1970-01-01 was a Thursday (ISO weekday 4).
    let offset = (days_since_epoch % 7 + 7) % 7;
    #[allow(
        clippy::cast_sign_loss,
        reason = "offset is reduced into [0, 7) just above"
    )]
    let offset = offset as u32;
    ((4 + offset - 1) % 7) + 1
}

/// Days elapsed between the Unix epoch and the given calendar date (may be negative).
fn days_since_epoch(date: CalendarDate) -> i64 {
    let mut days: i64 = 0;
    if date.year >= 1970 {
        for y in 1970..date.year {
            days += i64::from(days_in_year(y));
        }
    } else {
        for y in date.year..1970 {
            days -= i64::from(days_in_year(y));
        }
    }
    days + i64::from(day_of_year(date)) - 1
}

#[cfg(test)]
mod tests {
    use super::CalendarDate;
    use super::build_aggregate_keys;
    use super::get_iso_week;

    #[test]
    fn iso_week_stays_in_range_across_a_year() {
        for month in 1..=12u32 {
            let date = CalendarDate {
                year: 2026,
                month,
                day: 15,
            };
            let week = get_iso_week(date);
            assert!((1..=53).contains(&week), "month {month} gave week {week}");
        }
    }

    #[test]
    fn aggregate_keys_match_expected_shapes() {
        let date = CalendarDate {
            year: 2026,
            month: 3,
            day: 5,
        };
        let keys = build_aggregate_keys(date);
        assert_eq!(keys.daily, "daily_2026-03-05");
        assert!(keys.weekly.starts_with("weekly_2026-W"));
        assert_eq!(keys.monthly, "monthly_2026-03");
    }

    #[test]
    fn known_iso_week_vector() {
        // 2026-01-01 is a Thursday, so it falls in ISO week 1 of 2026.
        let date = CalendarDate {
            year: 2026,
            month: 1,
            day: 1,
        };
        assert_eq!(get_iso_week(date), 1);
    }
}
