//! Typed webhook events.
//!
//! The provider delivers a generic envelope with a string `type` tag and a
//! JSON object payload. The tag maps onto a closed set of handled kinds;
//! everything else lands on an explicit `Unknown` variant that the
//! dispatcher ignores (forward compatibility, not an error path).

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Handled webhook event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A checkout flow finished and was paid.
    CheckoutSessionCompleted,
    /// The provider refreshed the subscription's billing period.
    SubscriptionUpdated,
    /// The subscription was cancelled at the provider.
    SubscriptionDeleted,
    /// A renewal invoice could not be collected.
    PaymentFailed,
    /// Any event type this service does not act on.
    Unknown,
}

impl EventKind {
    /// Map the provider's string tag to a kind.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "checkout.session.completed" => EventKind::CheckoutSessionCompleted,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_failed" => EventKind::PaymentFailed,
            _ => EventKind::Unknown,
        }
    }
}

/// Generic webhook event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider-assigned event ID.
    pub id: String,
    /// String event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event creation time (Unix seconds).
    #[serde(default)]
    pub created: i64,
    /// Whether this is a live-mode event.
    #[serde(default)]
    pub livemode: bool,
    /// Payload container.
    pub data: EventData,
}

/// Payload container inside the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The event object (checkout session, subscription, invoice...).
    pub object: serde_json::Value,
}

/// Metadata bag the service attaches when creating checkout sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Internal user ID.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Requested plan tag ("PRO_MONTHLY" / "PRO_YEARLY").
    #[serde(default)]
    pub plan: Option<String>,
}

/// Checkout session payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionObject {
    /// Session ID.
    pub id: String,
    /// Billing customer reference.
    #[serde(default)]
    pub customer: Option<String>,
    /// Billing subscription reference created by the checkout.
    #[serde(default)]
    pub subscription: Option<String>,
    /// Metadata attached at session creation.
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Subscription payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionObject {
    /// Subscription ID.
    pub id: String,
    /// Billing customer reference.
    #[serde(default)]
    pub customer: Option<String>,
    /// Current billing period end (Unix seconds).
    #[serde(default)]
    pub current_period_end: Option<i64>,
    /// Metadata attached at subscription creation.
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Invoice payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceObject {
    /// Invoice ID.
    pub id: String,
    /// Billing customer reference.
    #[serde(default)]
    pub customer: Option<String>,
    /// Amount still owed, in cents.
    #[serde(default)]
    pub amount_due: i64,
}

impl WebhookEvent {
    /// Parse an event from the raw request body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))
    }

    /// The typed kind for dispatch.
    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(&self.event_type)
    }

    /// Extract the checkout session payload.
    pub fn as_checkout_session(&self) -> Result<CheckoutSessionObject> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| AppError::Validation(format!("Malformed checkout session: {}", e)))
    }

    /// Extract the subscription payload.
    pub fn as_subscription(&self) -> Result<SubscriptionObject> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| AppError::Validation(format!("Malformed subscription object: {}", e)))
    }

    /// Extract the invoice payload.
    pub fn as_invoice(&self) -> Result<InvoiceObject> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| AppError::Validation(format!("Malformed invoice object: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_map_to_kinds() {
        assert_eq!(
            EventKind::from_tag("checkout.session.completed"),
            EventKind::CheckoutSessionCompleted
        );
        assert_eq!(
            EventKind::from_tag("customer.subscription.deleted"),
            EventKind::SubscriptionDeleted
        );
        assert_eq!(EventKind::from_tag("charge.refunded"), EventKind::Unknown);
    }

    #[test]
    fn parses_checkout_completion() {
        let body = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1700000000,
            "livemode": false,
            "data": {
                "object": {
                    "id": "cs_1",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "metadata": {"user_id": "u-1", "plan": "PRO_MONTHLY"}
                }
            }
        }"#;

        let event = WebhookEvent::from_bytes(body.as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::CheckoutSessionCompleted);

        let session = event.as_checkout_session().unwrap();
        assert_eq!(session.metadata.user_id.as_deref(), Some("u-1"));
        assert_eq!(session.metadata.plan.as_deref(), Some("PRO_MONTHLY"));
        assert_eq!(session.subscription.as_deref(), Some("sub_1"));
    }

    #[test]
    fn unknown_metadata_fields_are_tolerated() {
        let body = r#"{
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "data": {
                "object": {
                    "id": "sub_9",
                    "customer": "cus_9",
                    "current_period_end": 1731000000,
                    "metadata": {},
                    "status": "active"
                }
            }
        }"#;

        let event = WebhookEvent::from_bytes(body.as_bytes()).unwrap();
        let sub = event.as_subscription().unwrap();
        assert_eq!(sub.current_period_end, Some(1731000000));
        assert!(sub.metadata.user_id.is_none());
    }
}
