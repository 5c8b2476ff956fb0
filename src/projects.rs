//! Project and chapter authoring.
//!
//! All mutating operations check ownership first and are gated by the plan
//! ceilings. Chapter auto-numbering is applied here, at creation time: the
//! formatted number becomes part of the stored title and is never
//! recomputed when earlier chapters are deleted or reordered.

use crate::db::{Chapter, ChapterKind, Database, Project, ProjectStatus, now_timestamp};
use crate::error::{AppError, Result};
use serde::Deserialize;

/// Input for creating a project.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    /// Book title.
    pub title: String,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Author name as printed.
    pub author: Option<String>,
    /// Genre label.
    pub genre: Option<String>,
    /// Named page size; defaults to 6"x9".
    pub page_size: Option<String>,
}

/// Input for creating a chapter.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChapter {
    /// Raw chapter title (before auto-numbering).
    pub title: String,
    /// HTML content body.
    #[serde(default)]
    pub content: String,
    /// Structural role; defaults to a regular chapter.
    pub kind: Option<ChapterKind>,
    /// Parent chapter for nesting.
    pub parent_id: Option<String>,
    /// Position in the render order; appended at the end when omitted.
    pub order_index: Option<i64>,
    /// Force a page break before the chapter (default true).
    pub start_on_new_page: Option<bool>,
    /// Include in the generated TOC (default true).
    pub include_in_toc: Option<bool>,
}

/// A chapter produced by the external document-import heuristic. Accepted
/// through the normal creation contract; the heuristic itself lives outside
/// this service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessedChapter {
    /// Detected chapter title.
    pub title: String,
    /// Extracted HTML content.
    pub content: String,
    /// Detected structural role.
    pub kind: ChapterKind,
    /// Position in the detected order.
    pub order_index: i64,
}

/// Substitute the `{n}` placeholder and prefix the raw title.
fn numbered_title(format: &str, n: i64, raw_title: &str) -> String {
    let prefix = format.replace("{n}", &n.to_string());
    format!("{}: {}", prefix, raw_title)
}

/// Project/chapter authoring service.
pub struct ProjectService {
    db: Database,
}

impl ProjectService {
    /// Create a new project service.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a project for a user, enforcing the book ceiling at the write.
    pub fn create_project(
        &self,
        user_id: &str,
        input: NewProject,
        max_books: i64,
    ) -> Result<Project> {
        let title = input.title.trim();
        if title.is_empty() || title.len() > 500 {
            return Err(AppError::Validation(
                "Title must be 1-500 characters".to_string(),
            ));
        }

        let now = now_timestamp();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            subtitle: input.subtitle,
            author: input.author,
            genre: input.genre,
            status: ProjectStatus::Draft,
            page_size: input.page_size.unwrap_or_else(|| "6x9".to_string()),
            custom_width_mm: None,
            custom_height_mm: None,
            margin_top_mm: 19,
            margin_bottom_mm: 19,
            margin_left_mm: 19,
            margin_right_mm: 19,
            margin_gutter_mm: 6,
            font_family: "Georgia".to_string(),
            font_size_pt: 11,
            line_height_percent: 160,
            cover_image_path: None,
            cover_title_x: None,
            cover_title_y: None,
            cover_author_x: None,
            cover_author_y: None,
            cover_title_size_pt: 48,
            cover_author_size_pt: 24,
            cover_title_color: "#FFFFFF".to_string(),
            cover_author_color: "#FFFFFF".to_string(),
            biography: None,
            dedication: None,
            acknowledgments: None,
            copyright: None,
            isbn: None,
            publisher: None,
            auto_number_chapters: true,
            chapter_number_format: "Capítulo {n}".to_string(),
            created_at: now,
            updated_at: now,
        };

        self.db.create_project_within_limit(&project, max_books)?;
        Ok(project)
    }

    /// Fetch a project, verifying the caller owns it.
    pub fn get_owned_project(&self, user_id: &str, project_id: &str) -> Result<Project> {
        let project = self
            .db
            .get_project(project_id)?
            .ok_or_else(|| AppError::NotFound(format!("Project not found: {}", project_id)))?;

        if project.user_id != user_id {
            return Err(AppError::Forbidden(
                "You do not have access to this project".to_string(),
            ));
        }

        Ok(project)
    }

    /// List the caller's projects.
    pub fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        self.db.list_user_projects(user_id)
    }

    /// Persist a modified project row (caller already holds an owned copy).
    pub fn save_project(&self, project: &Project) -> Result<()> {
        self.db.save_project(project)
    }

    /// Delete an owned project; chapters and export records cascade.
    pub fn delete_project(&self, user_id: &str, project_id: &str) -> Result<()> {
        self.get_owned_project(user_id, project_id)?;
        self.db.delete_project(project_id)?;
        Ok(())
    }

    /// Create a chapter in an owned project, enforcing the chapter ceiling
    /// at the write.
    ///
    /// The heading level is derived from the kind (part 1, chapter 2,
    /// subchapter 3, matter 1), which keeps the type/level invariant
    /// structural. When auto-numbering is on and the kind is `chapter`, the
    /// stored title is the project's number format applied to the count of
    /// chapters created so far.
    pub fn create_chapter(
        &self,
        user_id: &str,
        project_id: &str,
        input: NewChapter,
        max_chapters: i64,
    ) -> Result<Chapter> {
        let project = self.get_owned_project(user_id, project_id)?;

        let raw_title = input.title.trim();
        if raw_title.is_empty() || raw_title.len() > 500 {
            return Err(AppError::Validation(
                "Chapter title must be 1-500 characters".to_string(),
            ));
        }

        let kind = input.kind.unwrap_or(ChapterKind::Chapter);

        if let Some(parent_id) = &input.parent_id {
            let parent = self
                .db
                .get_chapter(parent_id)?
                .ok_or_else(|| AppError::NotFound(format!("Chapter not found: {}", parent_id)))?;
            if parent.project_id != project.id {
                return Err(AppError::Validation(
                    "Parent chapter belongs to a different project".to_string(),
                ));
            }
        }

        let title = if project.auto_number_chapters
            && kind == ChapterKind::Chapter
            && !project.chapter_number_format.is_empty()
        {
            let created_so_far = self
                .db
                .count_project_chapters_of_kind(project_id, ChapterKind::Chapter)?;
            numbered_title(&project.chapter_number_format, created_so_far + 1, raw_title)
        } else {
            raw_title.to_string()
        };

        let order_index = match input.order_index {
            Some(index) => index,
            None => self.db.count_project_chapters(project_id)?,
        };

        let now = now_timestamp();
        let chapter = Chapter {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            parent_id: input.parent_id,
            title,
            content: input.content,
            kind,
            level: kind.level(),
            order_index,
            start_on_new_page: input.start_on_new_page.unwrap_or(true),
            include_in_toc: input.include_in_toc.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        self.db.create_chapter_within_limit(&chapter, max_chapters)?;
        Ok(chapter)
    }

    /// Fetch a chapter together with its project, verifying ownership.
    pub fn get_owned_chapter(&self, user_id: &str, chapter_id: &str) -> Result<(Chapter, Project)> {
        let chapter = self
            .db
            .get_chapter(chapter_id)?
            .ok_or_else(|| AppError::NotFound(format!("Chapter not found: {}", chapter_id)))?;

        let project = self.get_owned_project(user_id, &chapter.project_id)?;
        Ok((chapter, project))
    }

    /// List an owned project's chapters in render order.
    pub fn list_chapters(&self, user_id: &str, project_id: &str) -> Result<Vec<Chapter>> {
        self.get_owned_project(user_id, project_id)?;
        self.db.list_project_chapters(project_id)
    }

    /// Persist a modified chapter row. The level is re-derived from the
    /// kind so updates cannot break the consistency invariant.
    pub fn save_chapter(&self, chapter: &mut Chapter) -> Result<()> {
        chapter.level = chapter.kind.level();
        self.db.save_chapter(chapter)
    }

    /// Delete an owned chapter. Stored titles of later chapters keep their
    /// baked-in numbers.
    pub fn delete_chapter(&self, user_id: &str, chapter_id: &str) -> Result<()> {
        self.get_owned_chapter(user_id, chapter_id)?;
        self.db.delete_chapter(chapter_id)?;
        Ok(())
    }

    /// Reorder an owned project's chapters; indexes come back contiguous
    /// from 0 whatever the requested values were.
    pub fn reorder_chapters(
        &self,
        user_id: &str,
        project_id: &str,
        orders: &[(String, i64)],
    ) -> Result<()> {
        self.get_owned_project(user_id, project_id)?;
        self.db.reorder_chapters(project_id, orders)
    }

    /// Accept a document-import result through the normal chapter-creation
    /// contract, preserving the detected order. Stops at the first chapter
    /// that would exceed the plan ceiling.
    pub fn import_chapters(
        &self,
        user_id: &str,
        project_id: &str,
        mut drafts: Vec<ProcessedChapter>,
        max_chapters: i64,
    ) -> Result<Vec<Chapter>> {
        drafts.sort_by_key(|d| d.order_index);

        let mut created = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let chapter = self.create_chapter(
                user_id,
                project_id,
                NewChapter {
                    title: draft.title,
                    content: draft.content,
                    kind: Some(draft.kind),
                    parent_id: None,
                    order_index: None,
                    start_on_new_page: None,
                    include_in_toc: None,
                },
                max_chapters,
            )?;
            created.push(chapter);
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_title_substitutes_placeholder() {
        assert_eq!(numbered_title("Capítulo {n}", 1, "A"), "Capítulo 1: A");
        assert_eq!(numbered_title("Chapter {n}", 12, "The End"), "Chapter 12: The End");
    }

    #[test]
    fn numbered_title_without_placeholder_keeps_format() {
        assert_eq!(numbered_title("Capítulo", 3, "C"), "Capítulo: C");
    }
}
