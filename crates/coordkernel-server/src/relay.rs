// coordkernel-server/src/relay.rs
// ============================================================================
// Module: Relay
// Description: Ephemeral inter-program message send/receive, multicast
//              group expansion, at-most-once delivery.
// Purpose: spec.md §4.7.
// Dependencies: coordkernel-core
// ============================================================================

//! ## Overview
//! [`send_message`] expands `envelope.target` through
//! [`coordkernel_core::resolve_targets`] when it names a closed-set group
//! (`council`, `builders`, `intelligence`, `all`); each resolved program gets
//! its own document, all sharing one [`MulticastId`] for correlation.
//! [`get_messages`] returns pending messages addressed to the caller and
//! marks each delivered with a compare-and-swap on `status`, so two
//! concurrent pollers racing the same document can never both observe it as
//! pending — the loser's swap fails and it simply does not see that message
//! (spec.md §4.7: "at-most-once delivery per caller attempt").

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use coordkernel_core::DocPath;
use coordkernel_core::DocumentStore;
use coordkernel_core::Envelope;
use coordkernel_core::MessageId;
use coordkernel_core::MessageType;
use coordkernel_core::MulticastId;
use coordkernel_core::ProgramId;
use coordkernel_core::Query;
use coordkernel_core::QueryFilter;
use coordkernel_core::RelayMessage;
use coordkernel_core::RelayStatus;
use coordkernel_core::SessionId;
use coordkernel_core::SortOrder;
use coordkernel_core::TenantUid;
use coordkernel_core::Timestamp;
use coordkernel_core::core::relay::DEFAULT_MAX_DELIVERY_ATTEMPTS;
use coordkernel_core::core::relay::DEFAULT_TTL_SECONDS;
use coordkernel_core::put_typed;
use coordkernel_core::query_typed;
use rand::Rng;
use serde_json::Value;
use serde_json::json;

use crate::error::GateError;

// ============================================================================
// SECTION: Send
// ============================================================================

/// Sends a relay message, expanding a group target into one document per
/// resolved program.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn send_message(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    envelope: Envelope,
    message_type: MessageType,
    payload: Value,
    session_id: Option<SessionId>,
    ttl_seconds: Option<u64>,
) -> Result<Vec<MessageId>, GateError> {
    let targets = coordkernel_core::resolve_targets(&envelope.target);
    let is_multicast = targets.len() > 1 || coordkernel_core::is_group_name(&envelope.target);
    let multicast_id = is_multicast.then(|| MulticastId::new(generate_hex_id()));
    let now = store.server_timestamp();
    let ttl = ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
    let expires_at = now.plus(Duration::from_secs(ttl));

    let mut message_ids = Vec::with_capacity(targets.len());
    for target in targets {
        let message_id = MessageId::new(generate_hex_id());
        let mut target_envelope = envelope.clone();
        target_envelope.target = target;
        let message = RelayMessage {
            id: message_id.clone(),
            envelope: target_envelope,
            message_type,
            payload: payload.clone(),
            session_id: session_id.clone(),
            status: RelayStatus::Pending,
            ttl,
            expires_at,
            delivery_attempts: 0,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            multicast_id: multicast_id.clone(),
            multicast_source: multicast_id.as_ref().map(|_| envelope.source.clone()),
            delivered_at: None,
            created_at: now,
        };
        let path = DocPath::tenant_scoped(tenant, "relay", message_id.as_str());
        put_typed(store, &path, &message).await?;
        message_ids.push(message_id);
    }
    Ok(message_ids)
}

// ============================================================================
// SECTION: Receive
// ============================================================================

/// Options narrowing a [`get_messages`] poll.
#[derive(Debug, Clone, Default)]
pub struct MessageFilters {
    /// Only return messages created at or after this time.
    pub since: Option<Timestamp>,
    /// When `true`, also return already-delivered messages (default: pending only).
    pub include_delivered: bool,
}

/// Returns pending messages addressed to `program` (optionally narrowed to
/// `session_id`), marking each `delivered` as it is read. A message another
/// poller claims first — observed by its compare-and-swap failing — is
/// silently skipped rather than returned twice.
///
/// # Errors
/// Returns [`GateError::Store`] on a storage failure.
pub async fn get_messages(
    store: &dyn DocumentStore,
    tenant: &TenantUid,
    program: &ProgramId,
    session_id: Option<&SessionId>,
    filters: MessageFilters,
) -> Result<Vec<RelayMessage>, GateError> {
    let mut query = Query::new()
        .with_eq("target", json!(program.as_str()))
        .order_by("created_at", SortOrder::Asc);
    if !filters.include_delivered {
        query = query.with_eq("status", json!("pending"));
    }
    if let Some(session_id) = session_id {
        query = query.with_eq("session_id", json!(session_id.as_str()));
    }
    if let Some(since) = filters.since {
        query.filters.push(QueryFilter::Gte("created_at".to_string(), json!(since.as_unix_millis())));
    }

    let collection_path = format!("tenants/{tenant}/relay");
    let candidates: Vec<RelayMessage> = query_typed(store, &collection_path, &query).await?;

    let now = store.server_timestamp();
    let mut delivered = Vec::with_capacity(candidates.len());
    for mut message in candidates {
        if message.status != RelayStatus::Pending {
            delivered.push(message);
            continue;
        }
        let path = DocPath::tenant_scoped(tenant, "relay", message.id.as_str());
        let swapped = store
            .compare_and_swap_field(&path, "status", &json!(RelayStatus::Pending), json!(RelayStatus::Delivered))
            .await?;
        if !swapped {
            continue;
        }
        store.increment(&path, "delivery_attempts", 1).await?;
        message.status = RelayStatus::Delivered;
        message.delivered_at = Some(now);
        message.delivery_attempts += 1;
        delivered.push(message);
    }
    Ok(delivered)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn generate_hex_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use coordkernel_core::Action;
    use coordkernel_core::InMemoryDocumentStore;
    use coordkernel_core::Priority;

    use super::*;

    fn envelope(source: &str, target: &str) -> Envelope {
        Envelope {
            source: ProgramId::new(source),
            target: target.to_string(),
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
            schema_version: coordkernel_core::core::envelope::SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn multicast_group_send_produces_one_document_per_member_sharing_a_multicast_id() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        let ids = send_message(
            &store,
            &tenant,
            envelope("architect", "council"),
            MessageType::Directive,
            json!({"text": "hi"}),
            None,
            None,
        )
        .await
        .expect("send");
        assert_eq!(ids.len(), coordkernel_core::resolve_targets("council").len());

        let messages = get_messages(
            &store,
            &tenant,
            &ProgramId::new("sentinel"),
            None,
            MessageFilters::default(),
        )
        .await
        .expect("get");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].multicast_id.is_some());
    }

    #[tokio::test]
    async fn get_messages_marks_delivered_and_does_not_return_it_twice() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        send_message(
            &store,
            &tenant,
            envelope("builder", "analyst"),
            MessageType::Ping,
            Value::Null,
            None,
            None,
        )
        .await
        .expect("send");

        let first = get_messages(&store, &tenant, &ProgramId::new("analyst"), None, MessageFilters::default())
            .await
            .expect("first poll");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, RelayStatus::Delivered);

        let second = get_messages(&store, &tenant, &ProgramId::new("analyst"), None, MessageFilters::default())
            .await
            .expect("second poll");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn include_delivered_surfaces_already_delivered_messages() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantUid::new("acme");
        send_message(
            &store,
            &tenant,
            envelope("builder", "analyst"),
            MessageType::Ping,
            Value::Null,
            None,
            None,
        )
        .await
        .expect("send");
        get_messages(&store, &tenant, &ProgramId::new("analyst"), None, MessageFilters::default())
            .await
            .expect("first poll");

        let seen = get_messages(
            &store,
            &tenant,
            &ProgramId::new("analyst"),
            None,
            MessageFilters {
                since: None,
                include_delivered: true,
            },
        )
        .await
        .expect("second poll");
        assert_eq!(seen.len(), 1);
    }
}
