//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth_register))
        .route("/login", post(handlers::auth_login))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me));

    let project_routes = Router::new()
        .route("/", get(handlers::project_list))
        .route("/", post(handlers::project_create))
        .route("/{id}", get(handlers::project_get))
        .route("/{id}", put(handlers::project_update))
        .route("/{id}", delete(handlers::project_delete))
        .route("/{id}/cover", post(handlers::project_upload_cover))
        .route("/{id}/chapters", get(handlers::chapter_list))
        .route("/{id}/chapters", post(handlers::chapter_create))
        .route("/{id}/chapters/reorder", post(handlers::chapter_reorder))
        .route("/{id}/chapters/import", post(handlers::chapter_import))
        .route("/{id}/export/pdf", post(handlers::export_pdf))
        .route("/{id}/export/epub", post(handlers::export_epub))
        .route("/{id}/exports", get(handlers::export_history));

    let chapter_routes = Router::new()
        .route("/{id}", get(handlers::chapter_get))
        .route("/{id}", put(handlers::chapter_update))
        .route("/{id}", delete(handlers::chapter_delete));

    let subscription_routes = Router::new()
        .route("/limits", get(handlers::subscription_limits))
        .route("/status", get(handlers::subscription_status))
        .route("/history", get(handlers::subscription_history))
        .route(
            "/upgrade/monthly",
            post(handlers::subscription_upgrade_monthly),
        )
        .route(
            "/upgrade/yearly",
            post(handlers::subscription_upgrade_yearly),
        )
        .route("/downgrade", post(handlers::subscription_downgrade))
        .route("/cancel", post(handlers::subscription_cancel));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/auth", auth_routes)
        .nest("/api/projects", project_routes)
        .nest("/api/chapters", chapter_routes)
        .nest("/api/subscription", subscription_routes)
        .route("/api/exports/{id}/download", get(handlers::export_download))
        .route("/api/billing/checkout", post(handlers::billing_checkout))
        // The webhook route consumes the raw body; signature verification
        // happens before any parsing.
        .route("/api/webhooks/billing", post(handlers::billing_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
