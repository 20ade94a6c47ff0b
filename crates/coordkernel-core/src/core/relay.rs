// coordkernel-core/src/core/relay.rs
// ============================================================================
// Module: Coordination Kernel Relay Message
// Description: Ephemeral, TTL'd, at-most-once inter-program messages.
// Purpose: Represent the relay wire shape and its delivery/expiry state.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Relay messages ride on the same [`Envelope`](crate::core::envelope::Envelope)
//! as tasks but carry their own delivery and expiry bookkeeping. A message
//! sent to a multicast group produces one document per resolved program,
//! all sharing a `multicastId` for correlation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::envelope::Envelope;
use crate::core::identifiers::MessageId;
use crate::core::identifiers::MulticastId;
use crate::core::identifiers::ProgramId;
use crate::core::identifiers::SessionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default message TTL in seconds (24 hours).
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;
/// Default maximum delivery attempts before dead-lettering.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

// ============================================================================
// SECTION: Enumerations
// ============================================================================

/// The closed-set relay message-type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Liveness probe.
    Ping,
    /// Liveness response.
    Pong,
    /// Session or protocol handshake.
    Handshake,
    /// An imperative instruction to the receiver.
    Directive,
    /// A status report.
    Status,
    /// Acknowledgement of a prior message.
    Ack,
    /// A question the receiver should answer.
    Query,
    /// The answer to a prior query.
    Result,
}

/// Relay message delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    /// Awaiting delivery.
    Pending,
    /// Delivered to the receiver's poll.
    Delivered,
    /// Past its expiry and swept without being delivered.
    Expired,
    /// Exceeded its delivery-attempt budget and moved to the dead-letter set.
    DeadLettered,
}

// ============================================================================
// SECTION: Relay Message
// ============================================================================

/// An ephemeral inter-program message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Unique message id.
    pub id: MessageId,
    /// Shared addressing envelope.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The message-type tag.
    pub message_type: MessageType,
    /// Opaque payload; interpretation is up to sender and receiver.
    pub payload: serde_json::Value,
    /// The session this message is scoped to, if sent in a session context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Current delivery status.
    pub status: RelayStatus,
    /// Time-to-live in seconds from creation.
    pub ttl: u64,
    /// Absolute expiry timestamp, `created_at + ttl`.
    pub expires_at: Timestamp,
    /// Number of delivery attempts made so far.
    #[serde(default)]
    pub delivery_attempts: u32,
    /// Maximum delivery attempts before dead-lettering.
    pub max_delivery_attempts: u32,
    /// Shared id across every document produced by one multicast send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast_id: Option<MulticastId>,
    /// The original (pre-expansion) target, when this document was produced
    /// by expanding a group name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast_source: Option<ProgramId>,
    /// When this document was delivered, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<Timestamp>,
    /// When created.
    pub created_at: Timestamp,
}

impl RelayMessage {
    /// Returns `true` once the message's expiry has passed `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_before(now)
    }

    /// Returns `true` once delivery attempts have reached the dead-letter
    /// threshold.
    #[must_use]
    pub fn exhausted_delivery_attempts(&self) -> bool {
        self.delivery_attempts + 1 >= self.max_delivery_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::RelayMessage;
    use super::RelayStatus;
    use crate::core::envelope::Action;
    use crate::core::envelope::Envelope;
    use crate::core::envelope::Priority;
    use crate::core::identifiers::MessageId;
    use crate::core::identifiers::ProgramId;
    use crate::core::time::Timestamp;

    fn sample(expires_at: Timestamp) -> RelayMessage {
        RelayMessage {
            id: MessageId::new("msg-1"),
            envelope: Envelope {
                source: ProgramId::new("builder"),
                target: "council".to_string(),
                priority: Priority::Normal,
                action: Action::Queue,
                ttl: None,
                reply_to: None,
                thread_id: None,
                provenance: None,
                trace_id: None,
                span_id: None,
                parent_span_id: None,
                correlation_id: None,
                schema_version: 1,
            },
            message_type: super::MessageType::Ping,
            payload: serde_json::Value::Null,
            session_id: None,
            status: RelayStatus::Pending,
            ttl: super::DEFAULT_TTL_SECONDS,
            expires_at,
            delivery_attempts: 0,
            max_delivery_attempts: super::DEFAULT_MAX_DELIVERY_ATTEMPTS,
            multicast_id: None,
            multicast_source: None,
            delivered_at: None,
            created_at: Timestamp::from_unix_millis(0),
        }
    }

    #[test]
    fn is_expired_compares_against_expires_at() {
        let msg = sample(Timestamp::from_unix_millis(1_000));
        assert!(!msg.is_expired(Timestamp::from_unix_millis(500)));
        assert!(msg.is_expired(Timestamp::from_unix_millis(1_500)));
    }

    #[test]
    fn exhausted_delivery_attempts_respects_max() {
        let mut msg = sample(Timestamp::from_unix_millis(0));
        msg.max_delivery_attempts = 2;
        msg.delivery_attempts = 0;
        assert!(!msg.exhausted_delivery_attempts());
        msg.delivery_attempts = 1;
        assert!(msg.exhausted_delivery_attempts());
    }
}
