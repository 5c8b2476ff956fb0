//! Book export engine.
//!
//! The render functions are pure: given the same project configuration and
//! chapter list they produce structurally identical artifacts. The service
//! wrapper runs them off the request event loop with a bounded timeout and
//! tracks every attempt as an [`ExportRecord`]; a failed render produces a
//! failed record with the error detail rather than a transport error.

pub mod epub;
pub mod html;
pub mod markup;
pub mod pdf;

use crate::db::{Chapter, Database, ExportFormat, ExportRecord, ExportStatus, Project, now_timestamp};
use crate::error::{AppError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Render a project to a paginated PDF. `chapters` must be sorted
/// ascending by order index (the persistence layer returns them so).
pub fn render_pdf(project: &Project, chapters: &[Chapter]) -> Result<Vec<u8>> {
    let document = html::book_html(project, chapters, true);
    let options = pdf::PdfOptions::from_project(project);
    pdf::compose(&document, &options)
}

/// Render a project to a reflowable EPUB. `cover` carries the uploaded
/// cover image bytes when the project has one.
pub fn render_epub(project: &Project, chapters: &[Chapter], cover: Option<&[u8]>) -> Result<Vec<u8>> {
    epub::package(project, chapters, cover)
}

/// Runs exports as isolated blocking tasks and records their outcomes.
pub struct ExportService {
    db: Database,
    output_dir: PathBuf,
    timeout: Duration,
}

impl ExportService {
    /// Create a new export service writing artifacts under `output_dir`.
    pub fn new(db: Database, output_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            db,
            output_dir,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Generate an artifact for an already ownership-checked project.
    ///
    /// Always returns the resulting [`ExportRecord`]; generation failures
    /// and timeouts come back as a record with status `failed`.
    pub async fn export(
        &self,
        project: Project,
        chapters: Vec<Chapter>,
        format: ExportFormat,
    ) -> Result<ExportRecord> {
        let export_id = uuid::Uuid::new_v4().to_string();
        let file_name = format!("{}-{}.{}", project.id, export_id, format.as_str());
        let file_path = self.output_dir.join(&file_name);

        let record = ExportRecord {
            id: export_id.clone(),
            project_id: project.id.clone(),
            user_id: project.user_id.clone(),
            format,
            file_path: file_path.to_string_lossy().to_string(),
            file_size: None,
            status: ExportStatus::Processing,
            error_message: None,
            created_at: now_timestamp(),
        };
        self.db.create_export(&record)?;

        // The EPUB cover is loaded up front; a broken cover file downgrades
        // to a coverless book instead of failing the whole export.
        let cover = if format == ExportFormat::Epub {
            match &project.cover_image_path {
                Some(path) => match tokio::fs::read(path).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "Cover unreadable, exporting without it");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let render = tokio::task::spawn_blocking(move || match format {
            ExportFormat::Pdf => render_pdf(&project, &chapters),
            ExportFormat::Epub => render_epub(&project, &chapters, cover.as_deref()),
        });

        let outcome = match tokio::time::timeout(self.timeout, render).await {
            Err(_) => Err(AppError::ExternalService(format!(
                "Export timed out after {}s",
                self.timeout.as_secs()
            ))),
            Ok(Err(join_error)) => Err(AppError::Internal(format!(
                "Render task failed: {}",
                join_error
            ))),
            Ok(Ok(result)) => result,
        };

        match outcome {
            Ok(bytes) => {
                tokio::fs::create_dir_all(&self.output_dir).await?;
                tokio::fs::write(&file_path, &bytes).await?;
                self.db.mark_export_completed(&export_id, bytes.len() as i64)?;
                tracing::info!(
                    export = %export_id,
                    format = format.as_str(),
                    bytes = bytes.len(),
                    "Export completed"
                );
            }
            Err(e) => {
                self.db.mark_export_failed(&export_id, &e.to_string())?;
                tracing::warn!(export = %export_id, error = %e, "Export failed");
            }
        }

        self.db
            .get_export(&export_id)?
            .ok_or_else(|| AppError::Internal("Export record vanished".to_string()))
    }
}
