//! HTTP request handlers.

use crate::audit::RequestMeta;
use crate::billing::{WebhookEvent, signature};
use crate::db::{self, ExportFormat, PlanChangeReason, PlanType, ProjectStatus, User};
use crate::error::{AppError, Result};
use crate::projects::{NewChapter, NewProject, ProcessedChapter};
use crate::server::AppState;
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

/// Health check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// ============================================================================
// AUTH API
// ============================================================================

/// Register request.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    email: String,
    name: String,
    password: String,
}

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
    user: User,
}

/// Register a new account and log it in.
pub async fn auth_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<LoginResponse>> {
    state.auth.register(&req.email, &req.name, &req.password)?;
    let (user, token) = state.auth.login(&req.email, &req.password)?;

    state.audit.record(
        Some(&user.id),
        "SIGNUP",
        None,
        None,
        None,
        &request_meta(&headers),
    );

    Ok(Json(LoginResponse { token, user }))
}

/// Login.
pub async fn auth_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (user, token) = state.auth.login(&req.email, &req.password)?;

    state.audit.record(
        Some(&user.id),
        "LOGIN",
        None,
        None,
        None,
        &request_meta(&headers),
    );

    Ok(Json(LoginResponse { token, user }))
}

/// Logout.
pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token)?;
    }
    Ok(StatusCode::OK)
}

/// Current account info.
pub async fn auth_me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<User>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(user))
}

// ============================================================================
// PROJECT API
// ============================================================================

/// Fields a project update may touch. Everything is optional; omitted
/// fields keep their stored values.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectUpdateRequest {
    title: Option<String>,
    subtitle: Option<String>,
    author: Option<String>,
    genre: Option<String>,
    status: Option<ProjectStatus>,
    page_size: Option<String>,
    custom_width_mm: Option<i64>,
    custom_height_mm: Option<i64>,
    margin_top_mm: Option<i64>,
    margin_bottom_mm: Option<i64>,
    margin_left_mm: Option<i64>,
    margin_right_mm: Option<i64>,
    margin_gutter_mm: Option<i64>,
    font_family: Option<String>,
    font_size_pt: Option<i64>,
    line_height_percent: Option<i64>,
    cover_title_x: Option<i64>,
    cover_title_y: Option<i64>,
    cover_author_x: Option<i64>,
    cover_author_y: Option<i64>,
    cover_title_size_pt: Option<i64>,
    cover_author_size_pt: Option<i64>,
    cover_title_color: Option<String>,
    cover_author_color: Option<String>,
    biography: Option<String>,
    dedication: Option<String>,
    acknowledgments: Option<String>,
    copyright: Option<String>,
    isbn: Option<String>,
    publisher: Option<String>,
    auto_number_chapters: Option<bool>,
    chapter_number_format: Option<String>,
}

/// List the caller's projects.
pub async fn project_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<db::Project>>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(state.projects.list_projects(&user.id)?))
}

/// Create a project. The book ceiling is enforced at the write.
pub async fn project_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewProject>,
) -> Result<Json<db::Project>> {
    let user = authenticated_user(&state, &headers)?;
    let max_books = state.subscriptions.book_ceiling(&user.id)?;
    let project = state.projects.create_project(&user.id, req, max_books)?;

    state.audit.record(
        Some(&user.id),
        "CREATE_PROJECT",
        Some("PROJECT"),
        Some(&project.id),
        None,
        &request_meta(&headers),
    );

    Ok(Json(project))
}

/// Get one project.
pub async fn project_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<db::Project>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(state.projects.get_owned_project(&user.id, &id)?))
}

/// Update a project.
pub async fn project_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ProjectUpdateRequest>,
) -> Result<Json<db::Project>> {
    let user = authenticated_user(&state, &headers)?;
    let mut project = state.projects.get_owned_project(&user.id, &id)?;

    if let Some(title) = req.title {
        let title = title.trim().to_string();
        if title.is_empty() || title.len() > 500 {
            return Err(AppError::Validation(
                "Title must be 1-500 characters".to_string(),
            ));
        }
        project.title = title;
    }
    if let Some(v) = req.subtitle {
        project.subtitle = Some(v);
    }
    if let Some(v) = req.author {
        project.author = Some(v);
    }
    if let Some(v) = req.genre {
        project.genre = Some(v);
    }
    if let Some(v) = req.status {
        project.status = v;
    }
    if let Some(v) = req.page_size {
        project.page_size = v;
    }
    if let Some(v) = req.custom_width_mm {
        project.custom_width_mm = Some(v);
    }
    if let Some(v) = req.custom_height_mm {
        project.custom_height_mm = Some(v);
    }
    if let Some(v) = req.margin_top_mm {
        project.margin_top_mm = v;
    }
    if let Some(v) = req.margin_bottom_mm {
        project.margin_bottom_mm = v;
    }
    if let Some(v) = req.margin_left_mm {
        project.margin_left_mm = v;
    }
    if let Some(v) = req.margin_right_mm {
        project.margin_right_mm = v;
    }
    if let Some(v) = req.margin_gutter_mm {
        project.margin_gutter_mm = v;
    }
    if let Some(v) = req.font_family {
        project.font_family = v;
    }
    if let Some(v) = req.font_size_pt {
        project.font_size_pt = v;
    }
    if let Some(v) = req.line_height_percent {
        project.line_height_percent = v;
    }
    if let Some(v) = req.cover_title_x {
        project.cover_title_x = Some(v);
    }
    if let Some(v) = req.cover_title_y {
        project.cover_title_y = Some(v);
    }
    if let Some(v) = req.cover_author_x {
        project.cover_author_x = Some(v);
    }
    if let Some(v) = req.cover_author_y {
        project.cover_author_y = Some(v);
    }
    if let Some(v) = req.cover_title_size_pt {
        project.cover_title_size_pt = v;
    }
    if let Some(v) = req.cover_author_size_pt {
        project.cover_author_size_pt = v;
    }
    if let Some(v) = req.cover_title_color {
        project.cover_title_color = v;
    }
    if let Some(v) = req.cover_author_color {
        project.cover_author_color = v;
    }
    if let Some(v) = req.biography {
        project.biography = Some(v);
    }
    if let Some(v) = req.dedication {
        project.dedication = Some(v);
    }
    if let Some(v) = req.acknowledgments {
        project.acknowledgments = Some(v);
    }
    if let Some(v) = req.copyright {
        project.copyright = Some(v);
    }
    if let Some(v) = req.isbn {
        project.isbn = Some(v);
    }
    if let Some(v) = req.publisher {
        project.publisher = Some(v);
    }
    if let Some(v) = req.auto_number_chapters {
        project.auto_number_chapters = v;
    }
    if let Some(v) = req.chapter_number_format {
        project.chapter_number_format = v;
    }

    state.projects.save_project(&project)?;

    state.audit.record(
        Some(&user.id),
        "UPDATE_PROJECT",
        Some("PROJECT"),
        Some(&project.id),
        None,
        &request_meta(&headers),
    );

    Ok(Json(project))
}

/// Delete a project; chapters and export records cascade.
pub async fn project_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = authenticated_user(&state, &headers)?;
    state.projects.delete_project(&user.id, &id)?;

    state.audit.record(
        Some(&user.id),
        "DELETE_PROJECT",
        Some("PROJECT"),
        Some(&id),
        None,
        &request_meta(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Upload a custom cover image (PRO feature).
pub async fn project_upload_cover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<db::Project>> {
    let user = authenticated_user(&state, &headers)?;
    state.subscriptions.require_can_upload_cover(&user.id)?;
    let mut project = state.projects.get_owned_project(&user.id, &id)?;

    if body.is_empty() || body.len() > 5 * 1024 * 1024 {
        return Err(AppError::Validation(
            "Cover image must be between 1 byte and 5 MB".to_string(),
        ));
    }
    image::load_from_memory(&body)
        .map_err(|e| AppError::Validation(format!("Unreadable image: {}", e)))?;

    let covers_dir = &state.config.export.covers_dir;
    tokio::fs::create_dir_all(covers_dir).await?;
    let path = covers_dir.join(format!("{}.img", project.id));
    tokio::fs::write(&path, &body).await?;

    project.cover_image_path = Some(path.to_string_lossy().to_string());
    state.projects.save_project(&project)?;

    state.audit.record(
        Some(&user.id),
        "UPLOAD_COVER",
        Some("PROJECT"),
        Some(&project.id),
        None,
        &request_meta(&headers),
    );

    Ok(Json(project))
}

// ============================================================================
// CHAPTER API
// ============================================================================

/// Fields a chapter update may touch.
#[derive(Debug, Default, Deserialize)]
pub struct ChapterUpdateRequest {
    title: Option<String>,
    content: Option<String>,
    kind: Option<db::ChapterKind>,
    parent_id: Option<String>,
    order_index: Option<i64>,
    start_on_new_page: Option<bool>,
    include_in_toc: Option<bool>,
}

/// One entry of a reorder request.
#[derive(Debug, Deserialize)]
pub struct ChapterOrder {
    id: String,
    order_index: i64,
}

/// Reorder request.
#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    chapter_orders: Vec<ChapterOrder>,
}

/// Bulk import request (output of the external document-import heuristic).
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    chapters: Vec<ProcessedChapter>,
}

/// List a project's chapters in render order.
pub async fn chapter_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<db::Chapter>>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(state.projects.list_chapters(&user.id, &project_id)?))
}

/// Create a chapter. The chapter ceiling is enforced at the write.
pub async fn chapter_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(req): Json<NewChapter>,
) -> Result<Json<db::Chapter>> {
    let user = authenticated_user(&state, &headers)?;
    let max_chapters = state.subscriptions.chapter_ceiling(&user.id)?;
    let chapter = state
        .projects
        .create_chapter(&user.id, &project_id, req, max_chapters)?;

    state.audit.record(
        Some(&user.id),
        "CREATE_CHAPTER",
        Some("CHAPTER"),
        Some(&chapter.id),
        Some(serde_json::json!({ "project_id": project_id })),
        &request_meta(&headers),
    );

    Ok(Json(chapter))
}

/// Get one chapter.
pub async fn chapter_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<db::Chapter>> {
    let user = authenticated_user(&state, &headers)?;
    let (chapter, _) = state.projects.get_owned_chapter(&user.id, &id)?;
    Ok(Json(chapter))
}

/// Update a chapter.
pub async fn chapter_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ChapterUpdateRequest>,
) -> Result<Json<db::Chapter>> {
    let user = authenticated_user(&state, &headers)?;
    let (mut chapter, _) = state.projects.get_owned_chapter(&user.id, &id)?;

    if let Some(title) = req.title {
        let title = title.trim().to_string();
        if title.is_empty() || title.len() > 500 {
            return Err(AppError::Validation(
                "Chapter title must be 1-500 characters".to_string(),
            ));
        }
        chapter.title = title;
    }
    if let Some(v) = req.content {
        chapter.content = v;
    }
    if let Some(v) = req.kind {
        chapter.kind = v;
    }
    if let Some(v) = req.parent_id {
        chapter.parent_id = Some(v);
    }
    if let Some(v) = req.order_index {
        chapter.order_index = v;
    }
    if let Some(v) = req.start_on_new_page {
        chapter.start_on_new_page = v;
    }
    if let Some(v) = req.include_in_toc {
        chapter.include_in_toc = v;
    }

    state.projects.save_chapter(&mut chapter)?;

    state.audit.record(
        Some(&user.id),
        "UPDATE_CHAPTER",
        Some("CHAPTER"),
        Some(&chapter.id),
        None,
        &request_meta(&headers),
    );

    Ok(Json(chapter))
}

/// Delete a chapter. Later chapters keep their baked-in numbers.
pub async fn chapter_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let user = authenticated_user(&state, &headers)?;
    state.projects.delete_chapter(&user.id, &id)?;

    state.audit.record(
        Some(&user.id),
        "DELETE_CHAPTER",
        Some("CHAPTER"),
        Some(&id),
        None,
        &request_meta(&headers),
    );

    Ok(StatusCode::OK)
}

/// Reorder chapters; indexes come back contiguous from 0.
pub async fn chapter_reorder(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(req): Json<ReorderRequest>,
) -> Result<Json<Vec<db::Chapter>>> {
    let user = authenticated_user(&state, &headers)?;

    let orders: Vec<(String, i64)> = req
        .chapter_orders
        .into_iter()
        .map(|o| (o.id, o.order_index))
        .collect();
    state
        .projects
        .reorder_chapters(&user.id, &project_id, &orders)?;

    state.audit.record(
        Some(&user.id),
        "REORDER_CHAPTERS",
        Some("PROJECT"),
        Some(&project_id),
        None,
        &request_meta(&headers),
    );

    Ok(Json(state.projects.list_chapters(&user.id, &project_id)?))
}

/// Accept a processed document-import chapter list through the normal
/// creation contract.
pub async fn chapter_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<Vec<db::Chapter>>> {
    let user = authenticated_user(&state, &headers)?;
    let max_chapters = state.subscriptions.chapter_ceiling(&user.id)?;
    let created =
        state
            .projects
            .import_chapters(&user.id, &project_id, req.chapters, max_chapters)?;

    state.audit.record(
        Some(&user.id),
        "IMPORT_CHAPTERS",
        Some("PROJECT"),
        Some(&project_id),
        Some(serde_json::json!({ "imported": created.len() })),
        &request_meta(&headers),
    );

    Ok(Json(created))
}

// ============================================================================
// EXPORT API
// ============================================================================

async fn run_export(
    state: AppState,
    headers: HeaderMap,
    project_id: String,
    format: ExportFormat,
) -> Result<Json<db::ExportRecord>> {
    let user = authenticated_user(&state, &headers)?;
    state.subscriptions.require_can_export(&user.id)?;

    let project = state.projects.get_owned_project(&user.id, &project_id)?;
    let chapters = state.db.list_project_chapters(&project_id)?;

    let record = state.exports.export(project, chapters, format).await?;

    let action = match (format, record.status) {
        (_, db::ExportStatus::Failed) => "EXPORT_FAILED",
        (ExportFormat::Pdf, _) => "EXPORT_PDF",
        (ExportFormat::Epub, _) => "EXPORT_EPUB",
    };
    state.audit.record(
        Some(&user.id),
        action,
        Some("PROJECT"),
        Some(&project_id),
        record
            .error_message
            .as_ref()
            .map(|e| serde_json::json!({ "error": e })),
        &request_meta(&headers),
    );

    Ok(Json(record))
}

/// Export a project to PDF (PRO feature).
pub async fn export_pdf(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<db::ExportRecord>> {
    run_export(state, headers, project_id, ExportFormat::Pdf).await
}

/// Export a project to EPUB (PRO feature).
pub async fn export_epub(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<db::ExportRecord>> {
    run_export(state, headers, project_id, ExportFormat::Epub).await
}

/// Export history for a project, newest first.
pub async fn export_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<db::ExportRecord>>> {
    let user = authenticated_user(&state, &headers)?;
    state.projects.get_owned_project(&user.id, &project_id)?;
    Ok(Json(state.db.list_project_exports(&project_id)?))
}

/// Download a completed export artifact.
pub async fn export_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response<Body>> {
    let user = authenticated_user(&state, &headers)?;
    let record = state
        .db
        .get_export(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Export not found: {}", id)))?;

    if record.user_id != user.id {
        return Err(AppError::Forbidden(
            "You do not have access to this export".to_string(),
        ));
    }
    if record.status != db::ExportStatus::Completed {
        return Err(AppError::NotFound(format!(
            "Export {} is not completed",
            id
        )));
    }

    let file = tokio::fs::File::open(&record.file_path).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let filename = format!("book.{}", record.format.as_str());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.format.mime_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ============================================================================
// SUBSCRIPTION API
// ============================================================================

/// Current plan limits and usage.
pub async fn subscription_limits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<crate::plan::PlanLimits>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(state.subscriptions.plan_limits(&user.id)?))
}

/// Subscription status, applying the lazy lapse check.
pub async fn subscription_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<crate::subscription::SubscriptionStatus>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(state.subscriptions.check_subscription_status(&user.id)?))
}

/// The append-only plan transition ledger for the caller.
pub async fn subscription_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<db::SubscriptionChange>>> {
    let user = authenticated_user(&state, &headers)?;
    Ok(Json(state.db.list_subscription_changes(&user.id)?))
}

async fn upgrade(
    state: AppState,
    headers: HeaderMap,
    plan: PlanType,
) -> Result<Json<serde_json::Value>> {
    let user = authenticated_user(&state, &headers)?;

    match plan {
        PlanType::ProMonthly => state.subscriptions.upgrade_to_pro_monthly(&user.id)?,
        PlanType::ProYearly => state.subscriptions.upgrade_to_pro_yearly(&user.id)?,
        PlanType::Free => return Err(AppError::Validation("Cannot upgrade to FREE".to_string())),
    }

    state.audit.record(
        Some(&user.id),
        "UPGRADE_PLAN",
        None,
        None,
        Some(serde_json::json!({ "new_plan": plan.as_str() })),
        &request_meta(&headers),
    );

    Ok(Json(serde_json::json!({ "success": true, "plan": plan.as_str() })))
}

/// Upgrade to PRO monthly.
pub async fn subscription_upgrade_monthly(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    upgrade(state, headers, PlanType::ProMonthly).await
}

/// Upgrade to PRO yearly.
pub async fn subscription_upgrade_yearly(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    upgrade(state, headers, PlanType::ProYearly).await
}

/// Interactive downgrade to FREE; refuses while over the FREE ceilings.
pub async fn subscription_downgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let user = authenticated_user(&state, &headers)?;
    state
        .subscriptions
        .downgrade_to_free(&user.id, PlanChangeReason::Downgrade)?;

    state.audit.record(
        Some(&user.id),
        "DOWNGRADE_PLAN",
        None,
        None,
        Some(serde_json::json!({ "new_plan": "FREE" })),
        &request_meta(&headers),
    );

    Ok(Json(serde_json::json!({ "success": true, "plan": "FREE" })))
}

/// Cancel the subscription (downgrade with CANCELED reason).
pub async fn subscription_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let user = authenticated_user(&state, &headers)?;
    state
        .subscriptions
        .downgrade_to_free(&user.id, PlanChangeReason::Canceled)?;

    state
        .audit
        .record(Some(&user.id), "CANCEL_SUBSCRIPTION", None, None, None, &request_meta(&headers));

    Ok(Json(serde_json::json!({ "success": true, "plan": "FREE" })))
}

// ============================================================================
// BILLING API
// ============================================================================

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Requested plan: PRO_MONTHLY or PRO_YEARLY.
    plan: PlanType,
}

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    session_id: String,
    url: Option<String>,
}

/// Create a checkout session for a plan upgrade.
pub async fn billing_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let user = authenticated_user(&state, &headers)?;

    let price_id = match req.plan {
        PlanType::ProMonthly => &state.config.billing.price_pro_monthly,
        PlanType::ProYearly => &state.config.billing.price_pro_yearly,
        PlanType::Free => {
            return Err(AppError::Validation(
                "Checkout requires a paid plan".to_string(),
            ));
        }
    };
    if price_id.is_empty() {
        return Err(AppError::Config(
            "Billing price IDs are not configured".to_string(),
        ));
    }

    let customer_id = match &user.billing_customer_id {
        Some(id) => id.clone(),
        None => {
            let id = state.checkout.create_customer(&user).await?;
            state.db.set_billing_customer(&user.id, &id)?;
            id
        }
    };

    let frontend = &state.config.server.frontend_url;
    let session = state
        .checkout
        .create_checkout_session(
            &customer_id,
            &user,
            req.plan,
            price_id,
            &format!("{}/dashboard?session_id={{CHECKOUT_SESSION_ID}}", frontend),
            &format!("{}/pricing?canceled=true", frontend),
        )
        .await?;

    state.audit.record(
        Some(&user.id),
        "CHECKOUT_STARTED",
        None,
        None,
        Some(serde_json::json!({ "plan": req.plan.as_str(), "session_id": session.id })),
        &request_meta(&headers),
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Billing webhook receiver.
///
/// Consumes the raw body: the signature covers the exact bytes on the
/// wire, so verification must happen before any JSON parsing.
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let header_value = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::SignatureVerification("Missing signature header".to_string())
        })?;

    signature::verify(
        &state.config.billing.webhook_secret,
        header_value,
        &body,
        state.config.billing.signature_tolerance_secs,
    )?;

    let event = WebhookEvent::from_bytes(&body)?;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

    state.webhooks.handle_event(&event)?;

    Ok(Json(serde_json::json!({ "received": true })))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get the authenticated user from the session token.
fn authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Forbidden("Missing Authorization header".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Forbidden("Invalid or expired token".to_string()))
}

/// Request metadata for audit rows.
fn request_meta(headers: &HeaderMap) -> RequestMeta {
    RequestMeta {
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}
