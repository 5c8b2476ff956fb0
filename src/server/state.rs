//! Application state shared across handlers.

use crate::audit::AuditRecorder;
use crate::auth::AuthService;
use crate::billing::{CheckoutClient, WebhookProcessor};
use crate::config::Config;
use crate::db::Database;
use crate::export::ExportService;
use crate::projects::ProjectService;
use crate::subscription::SubscriptionService;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database handle.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Project/chapter authoring service.
    pub projects: Arc<ProjectService>,
    /// Plan state machine.
    pub subscriptions: Arc<SubscriptionService>,
    /// Export engine wrapper.
    pub exports: Arc<ExportService>,
    /// Best-effort audit trail.
    pub audit: AuditRecorder,
    /// Webhook event dispatcher.
    pub webhooks: Arc<WebhookProcessor>,
    /// Billing provider client.
    pub checkout: Arc<CheckoutClient>,
}

impl AppState {
    /// Wire all services over one database handle.
    pub fn new(config: Config, db: Database) -> Self {
        let auth = Arc::new(AuthService::new(
            db.clone(),
            config.auth.session_days,
            config.auth.registration_enabled(),
        ));
        let projects = Arc::new(ProjectService::new(db.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(db.clone()));
        let exports = Arc::new(ExportService::new(
            db.clone(),
            config.export.output_dir.clone(),
            config.export.timeout_seconds,
        ));
        let audit = AuditRecorder::new(db.clone());
        let webhooks = Arc::new(WebhookProcessor::new(
            db.clone(),
            subscriptions.clone(),
            audit.clone(),
        ));
        let checkout = Arc::new(CheckoutClient::new(
            config.billing.api_base.clone(),
            config.billing.secret_key.clone(),
        ));

        Self {
            config: Arc::new(config),
            db,
            auth,
            projects,
            subscriptions,
            exports,
            audit,
            webhooks,
            checkout,
        }
    }
}
