//! Webhook event dispatch.
//!
//! Events arrive at-least-once. Handlers only set absolute plan state, so
//! duplicate delivery converges on the same end state; the history and
//! audit trails record every delivery, which is the intended behavior for
//! an audit trail.

use crate::audit::{AuditRecorder, RequestMeta};
use crate::billing::events::{EventKind, WebhookEvent};
use crate::db::{Database, PlanChangeReason, PlanType, User};
use crate::error::{AppError, Result};
use crate::subscription::SubscriptionService;
use std::sync::Arc;

/// Dispatches verified webhook events onto the plan state machine.
pub struct WebhookProcessor {
    db: Database,
    subscriptions: Arc<SubscriptionService>,
    audit: AuditRecorder,
}

impl WebhookProcessor {
    /// Create a new processor.
    pub fn new(db: Database, subscriptions: Arc<SubscriptionService>, audit: AuditRecorder) -> Self {
        Self {
            db,
            subscriptions,
            audit,
        }
    }

    /// Handle one verified event. Unknown event types are an explicit
    /// no-op, never an error.
    pub fn handle_event(&self, event: &WebhookEvent) -> Result<()> {
        match event.kind() {
            EventKind::CheckoutSessionCompleted => self.on_checkout_completed(event),
            EventKind::SubscriptionUpdated => self.on_subscription_updated(event),
            EventKind::SubscriptionDeleted => self.on_subscription_deleted(event),
            EventKind::PaymentFailed => self.on_payment_failed(event),
            EventKind::Unknown => {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Ignoring unhandled webhook event type"
                );
                Ok(())
            }
        }
    }

    /// A completion event that cannot name the user/plan it is for is a
    /// bad event, not a silent no-op.
    fn on_checkout_completed(&self, event: &WebhookEvent) -> Result<()> {
        let session = event.as_checkout_session()?;

        let user_id = session.metadata.user_id.as_deref().ok_or_else(|| {
            AppError::Validation("Checkout completion missing user metadata".to_string())
        })?;
        let plan_tag = session.metadata.plan.as_deref().ok_or_else(|| {
            AppError::Validation("Checkout completion missing plan metadata".to_string())
        })?;

        let plan = PlanType::parse(plan_tag)
            .filter(|p| *p != PlanType::Free)
            .ok_or_else(|| {
                AppError::Validation(format!("Checkout completion with invalid plan: {}", plan_tag))
            })?;

        if plan == PlanType::ProYearly {
            self.subscriptions.upgrade_to_pro_yearly(user_id)?;
        } else {
            self.subscriptions.upgrade_to_pro_monthly(user_id)?;
        }

        if let Some(customer) = &session.customer {
            self.db.set_billing_customer(user_id, customer)?;
        }
        if let Some(subscription) = &session.subscription {
            self.db.set_billing_subscription(user_id, subscription)?;
        }

        // Second trail, independent of the subscription history row the
        // upgrade already appended.
        self.audit.record(
            Some(user_id),
            "PAYMENT_SUCCESSFUL",
            None,
            None,
            Some(serde_json::json!({
                "plan": plan.as_str(),
                "billing_subscription_id": session.subscription,
                "event_id": event.id,
            })),
            &RequestMeta::default(),
        );

        tracing::info!(event_id = %event.id, user = %user_id, plan = plan.as_str(),
            "Checkout completed, plan upgraded");
        Ok(())
    }

    /// Period refresh only; the plan tier does not change here.
    fn on_subscription_updated(&self, event: &WebhookEvent) -> Result<()> {
        let subscription = event.as_subscription()?;

        let Some(user) = self.resolve_user(
            subscription.metadata.user_id.as_deref(),
            subscription.customer.as_deref(),
        )?
        else {
            tracing::debug!(event_id = %event.id, "Subscription update for unknown user, skipping");
            return Ok(());
        };

        self.db
            .set_subscription_end(&user.id, subscription.current_period_end)?;

        self.audit.record(
            Some(&user.id),
            "SUBSCRIPTION_UPDATED",
            None,
            None,
            Some(serde_json::json!({
                "billing_subscription_id": subscription.id,
                "current_period_end": subscription.current_period_end,
            })),
            &RequestMeta::default(),
        );
        Ok(())
    }

    /// The provider is authoritative for cancellations: downgrade without
    /// the interactive "reduce resources first" guard.
    fn on_subscription_deleted(&self, event: &WebhookEvent) -> Result<()> {
        let subscription = event.as_subscription()?;

        let Some(user) = self.resolve_user(
            subscription.metadata.user_id.as_deref(),
            subscription.customer.as_deref(),
        )?
        else {
            tracing::debug!(event_id = %event.id, "Cancellation for unknown user, skipping");
            return Ok(());
        };

        self.subscriptions
            .force_downgrade_to_free(&user.id, PlanChangeReason::Canceled)?;

        self.audit.record(
            Some(&user.id),
            "SUBSCRIPTION_CANCELED",
            None,
            None,
            Some(serde_json::json!({ "billing_subscription_id": subscription.id })),
            &RequestMeta::default(),
        );
        Ok(())
    }

    /// Audit-only: no automatic downgrade on a failed renewal payment
    /// (grace-period policy; the provider keeps retrying and will send a
    /// deletion event if it gives up).
    fn on_payment_failed(&self, event: &WebhookEvent) -> Result<()> {
        let invoice = event.as_invoice()?;

        let user = self.resolve_user(None, invoice.customer.as_deref())?;

        self.audit.record(
            user.as_ref().map(|u| u.id.as_str()),
            "PAYMENT_FAILED",
            None,
            None,
            Some(serde_json::json!({
                "invoice_id": invoice.id,
                "billing_customer_id": invoice.customer,
                "amount_due": invoice.amount_due,
            })),
            &RequestMeta::default(),
        );

        tracing::warn!(event_id = %event.id, invoice = %invoice.id, "Renewal payment failed");
        Ok(())
    }

    /// Resolve the affected user by metadata first, then by the stored
    /// billing customer reference.
    fn resolve_user(
        &self,
        metadata_user_id: Option<&str>,
        customer_id: Option<&str>,
    ) -> Result<Option<User>> {
        if let Some(user_id) = metadata_user_id
            && let Some(user) = self.db.get_user_by_id(user_id)?
        {
            return Ok(Some(user));
        }

        if let Some(customer) = customer_id {
            return self.db.get_user_by_billing_customer(customer);
        }

        Ok(None)
    }
}
