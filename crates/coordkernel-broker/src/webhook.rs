// coordkernel-broker/src/webhook.rs
// ============================================================================
// Module: Dispatcher Webhook
// Description: HMAC-signed outbound notification fired on task creation.
// Purpose: Implement coordkernel_core::TaskDispatcher over an HTTP webhook.
// Dependencies: coordkernel-core, reqwest, hmac, sha2
// ============================================================================

//! ## Overview
//! `create_task` fires a webhook to a configured dispatcher URL so an
//! external host listener can react to new work without polling. The call
//! is fire-and-forget: the gate logs a failed [`DispatchError`] but never
//! surfaces it to the caller. The request body is HMAC-SHA256 signed with a
//! shared secret so the receiving host can verify origin.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use coordkernel_core::DispatchError;
use coordkernel_core::TaskDispatcher;
use hmac::Hmac;
use hmac::Mac;
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Request timeout applied to every webhook call (spec: 3 seconds).
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// SECTION: Webhook Dispatcher
// ============================================================================

/// Notifies a fixed dispatcher URL of newly created tasks.
///
/// # Invariants
/// - Every request carries an `X-Coordkernel-Signature` header: the lowercase
///   hex HMAC-SHA256 of the JSON body under the configured secret.
/// - The call never retries; the gate treats a failure as non-fatal.
pub struct WebhookDispatcher {
    /// Target URL for the dispatcher webhook.
    url: String,
    /// Shared HMAC secret.
    secret: String,
    /// HTTP client reused across calls.
    client: Client,
}

impl WebhookDispatcher {
    /// Builds a dispatcher for the given URL and shared secret.
    ///
    /// # Errors
    /// Returns [`DispatchError`] if the underlying HTTP client cannot be built.
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|err| DispatchError::Request(err.to_string()))?;
        Ok(Self {
            url: url.into(),
            secret: secret.into(),
            client,
        })
    }

    /// Signs `body` with the configured secret, returning a lowercase hex digest.
    fn sign(&self, body: &[u8]) -> Result<String, DispatchError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|err| DispatchError::Request(err.to_string()))?;
        mac.update(body);
        Ok(hex_encode(&mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl TaskDispatcher for WebhookDispatcher {
    async fn notify_created(
        &self,
        task_id: &str,
        target: &str,
        priority: &str,
    ) -> Result<(), DispatchError> {
        let body = serde_json::to_vec(&json!({
            "taskId": task_id,
            "target": target,
            "priority": priority,
        }))
        .map_err(|err| DispatchError::Request(err.to_string()))?;
        let signature = self.sign(&body)?;
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Coordkernel-Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(|err| DispatchError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DispatchError::Request(format!(
                "dispatcher returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
