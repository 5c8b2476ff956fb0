use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Unavailable(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Unavailable(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                plan_type TEXT NOT NULL DEFAULT 'FREE',
                plan_active INTEGER NOT NULL DEFAULT 1,
                subscription_start INTEGER,
                subscription_end INTEGER,
                billing_customer_id TEXT,
                billing_subscription_id TEXT,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            );

            -- Sessions table
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Projects table (one row per book)
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                subtitle TEXT,
                author TEXT,
                genre TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                page_size TEXT NOT NULL DEFAULT '6x9',
                custom_width_mm INTEGER,
                custom_height_mm INTEGER,
                margin_top_mm INTEGER NOT NULL DEFAULT 19,
                margin_bottom_mm INTEGER NOT NULL DEFAULT 19,
                margin_left_mm INTEGER NOT NULL DEFAULT 19,
                margin_right_mm INTEGER NOT NULL DEFAULT 19,
                margin_gutter_mm INTEGER NOT NULL DEFAULT 6,
                font_family TEXT NOT NULL DEFAULT 'Georgia',
                font_size_pt INTEGER NOT NULL DEFAULT 11,
                line_height_percent INTEGER NOT NULL DEFAULT 160,
                cover_image_path TEXT,
                cover_title_x INTEGER,
                cover_title_y INTEGER,
                cover_author_x INTEGER,
                cover_author_y INTEGER,
                cover_title_size_pt INTEGER NOT NULL DEFAULT 48,
                cover_author_size_pt INTEGER NOT NULL DEFAULT 24,
                cover_title_color TEXT NOT NULL DEFAULT '#FFFFFF',
                cover_author_color TEXT NOT NULL DEFAULT '#FFFFFF',
                biography TEXT,
                dedication TEXT,
                acknowledgments TEXT,
                copyright TEXT,
                isbn TEXT,
                publisher TEXT,
                auto_number_chapters INTEGER NOT NULL DEFAULT 1,
                chapter_number_format TEXT NOT NULL DEFAULT 'Capítulo {n}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Chapters table
            CREATE TABLE IF NOT EXISTS chapters (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                parent_id TEXT,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL DEFAULT 'chapter',
                level INTEGER NOT NULL DEFAULT 2,
                order_index INTEGER NOT NULL,
                start_on_new_page INTEGER NOT NULL DEFAULT 1,
                include_in_toc INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES chapters(id) ON DELETE SET NULL
            );

            -- Export history table
            CREATE TABLE IF NOT EXISTS exports (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                format TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER,
                status TEXT NOT NULL DEFAULT 'processing',
                error_message TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Subscription history: append-only billing ledger
            CREATE TABLE IF NOT EXISTS subscription_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                old_plan TEXT,
                new_plan TEXT NOT NULL,
                reason TEXT NOT NULL,
                effective_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- Audit log: append-only, best-effort
            CREATE TABLE IF NOT EXISTS audit_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT,
                action TEXT NOT NULL,
                resource_type TEXT,
                resource_id TEXT,
                details TEXT,
                ip_address TEXT,
                user_agent TEXT,
                created_at INTEGER NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
            CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id);
            CREATE INDEX IF NOT EXISTS idx_chapters_project ON chapters(project_id);
            CREATE INDEX IF NOT EXISTS idx_chapters_order ON chapters(project_id, order_index);
            CREATE INDEX IF NOT EXISTS idx_exports_project ON exports(project_id);
            CREATE INDEX IF NOT EXISTS idx_history_user ON subscription_history(user_id);
            CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_logs(action);
            "#,
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, email, name, password_hash, plan_type, plan_active,
                                subscription_start, subscription_end, billing_customer_id,
                                billing_subscription_id, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user.id,
                user.email,
                user.name,
                user.password_hash,
                user.plan_type.as_str(),
                user.plan_active,
                user.subscription_start,
                user.subscription_end,
                user.billing_customer_id,
                user.billing_subscription_id,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Validation(format!("Email '{}' is already registered", user.email))
            } else {
                AppError::Unavailable(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        let plan: String = row.get(4)?;
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            password_hash: row.get(3)?,
            plan_type: PlanType::parse(&plan).unwrap_or(PlanType::Free),
            plan_active: row.get(5)?,
            subscription_start: row.get(6)?,
            subscription_end: row.get(7)?,
            billing_customer_id: row.get(8)?,
            billing_subscription_id: row.get(9)?,
            created_at: row.get(10)?,
            last_login: row.get(11)?,
        })
    }

    const USER_COLUMNS: &'static str = "id, email, name, password_hash, plan_type, plan_active,
        subscription_start, subscription_end, billing_customer_id, billing_subscription_id,
        created_at, last_login";

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", Self::USER_COLUMNS),
            params![email],
            Self::map_user,
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::USER_COLUMNS),
            params![id],
            Self::map_user,
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get user: {}", e)))
    }

    /// Get user by their external billing customer reference.
    pub fn get_user_by_billing_customer(&self, customer_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM users WHERE billing_customer_id = ?1",
                Self::USER_COLUMNS
            ),
            params![customer_id],
            Self::map_user,
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY email",
                Self::USER_COLUMNS
            ))
            .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::map_user)
            .map_err(|e| AppError::Unavailable(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Unavailable(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    /// Update user last login.
    pub fn update_user_last_login(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![now_timestamp(), user_id],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    /// Set the absolute plan state for a user. Transitions always write the
    /// whole window so repeated application converges on the same state.
    pub fn set_user_plan(
        &self,
        user_id: &str,
        plan: PlanType,
        active: bool,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET plan_type = ?1, plan_active = ?2,
                        subscription_start = ?3, subscription_end = ?4
                 WHERE id = ?5",
                params![plan.as_str(), active, start, end, user_id],
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to update plan: {}", e)))?;
        if rows == 0 {
            return Err(AppError::NotFound(format!("User not found: {}", user_id)));
        }
        Ok(())
    }

    /// Store the external billing customer reference.
    pub fn set_billing_customer(&self, user_id: &str, customer_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET billing_customer_id = ?1 WHERE id = ?2",
            params![customer_id, user_id],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to update billing ref: {}", e)))?;
        Ok(())
    }

    /// Store the external billing subscription reference.
    pub fn set_billing_subscription(&self, user_id: &str, subscription_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET billing_subscription_id = ?1 WHERE id = ?2",
            params![subscription_id, user_id],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to update billing ref: {}", e)))?;
        Ok(())
    }

    /// Refresh only the subscription window end (billing period update).
    pub fn set_subscription_end(&self, user_id: &str, end: Option<i64>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET subscription_end = ?1 WHERE id = ?2",
            params![end, user_id],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to update subscription end: {}", e)))?;
        Ok(())
    }

    /// Update a user's password hash.
    pub fn update_user_password(&self, email: &str, password_hash: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE users SET password_hash = ?1 WHERE email = ?2",
                params![password_hash, email],
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to update password: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete user by email.
    pub fn delete_user(&self, email: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM users WHERE email = ?1", params![email])
            .map_err(|e| AppError::Unavailable(format!("Failed to delete user: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SESSION OPERATIONS ==========

    /// Create a session.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
            params![session.token, session.user_id, session.expires_at],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to create session: {}", e)))?;
        Ok(())
    }

    /// Get a session by token.
    pub fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get session: {}", e)))
    }

    /// Delete a session.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .map_err(|e| AppError::Unavailable(format!("Failed to delete session: {}", e)))?;
        Ok(())
    }

    // ========== PROJECT OPERATIONS ==========

    const PROJECT_COLUMNS: &'static str = "id, user_id, title, subtitle, author, genre, status,
        page_size, custom_width_mm, custom_height_mm,
        margin_top_mm, margin_bottom_mm, margin_left_mm, margin_right_mm, margin_gutter_mm,
        font_family, font_size_pt, line_height_percent,
        cover_image_path, cover_title_x, cover_title_y, cover_author_x, cover_author_y,
        cover_title_size_pt, cover_author_size_pt, cover_title_color, cover_author_color,
        biography, dedication, acknowledgments, copyright, isbn, publisher,
        auto_number_chapters, chapter_number_format, created_at, updated_at";

    fn map_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
        let status: String = row.get(6)?;
        Ok(Project {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            subtitle: row.get(3)?,
            author: row.get(4)?,
            genre: row.get(5)?,
            status: ProjectStatus::parse(&status).unwrap_or(ProjectStatus::Draft),
            page_size: row.get(7)?,
            custom_width_mm: row.get(8)?,
            custom_height_mm: row.get(9)?,
            margin_top_mm: row.get(10)?,
            margin_bottom_mm: row.get(11)?,
            margin_left_mm: row.get(12)?,
            margin_right_mm: row.get(13)?,
            margin_gutter_mm: row.get(14)?,
            font_family: row.get(15)?,
            font_size_pt: row.get(16)?,
            line_height_percent: row.get(17)?,
            cover_image_path: row.get(18)?,
            cover_title_x: row.get(19)?,
            cover_title_y: row.get(20)?,
            cover_author_x: row.get(21)?,
            cover_author_y: row.get(22)?,
            cover_title_size_pt: row.get(23)?,
            cover_author_size_pt: row.get(24)?,
            cover_title_color: row.get(25)?,
            cover_author_color: row.get(26)?,
            biography: row.get(27)?,
            dedication: row.get(28)?,
            acknowledgments: row.get(29)?,
            copyright: row.get(30)?,
            isbn: row.get(31)?,
            publisher: row.get(32)?,
            auto_number_chapters: row.get(33)?,
            chapter_number_format: row.get(34)?,
            created_at: row.get(35)?,
            updated_at: row.get(36)?,
        })
    }

    fn insert_project(conn: &Connection, project: &Project) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO projects (id, user_id, title, subtitle, author, genre, status,
                page_size, custom_width_mm, custom_height_mm,
                margin_top_mm, margin_bottom_mm, margin_left_mm, margin_right_mm, margin_gutter_mm,
                font_family, font_size_pt, line_height_percent,
                cover_image_path, cover_title_x, cover_title_y, cover_author_x, cover_author_y,
                cover_title_size_pt, cover_author_size_pt, cover_title_color, cover_author_color,
                biography, dedication, acknowledgments, copyright, isbn, publisher,
                auto_number_chapters, chapter_number_format, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32,
                     ?33, ?34, ?35, ?36, ?37)",
            params![
                project.id,
                project.user_id,
                project.title,
                project.subtitle,
                project.author,
                project.genre,
                project.status.as_str(),
                project.page_size,
                project.custom_width_mm,
                project.custom_height_mm,
                project.margin_top_mm,
                project.margin_bottom_mm,
                project.margin_left_mm,
                project.margin_right_mm,
                project.margin_gutter_mm,
                project.font_family,
                project.font_size_pt,
                project.line_height_percent,
                project.cover_image_path,
                project.cover_title_x,
                project.cover_title_y,
                project.cover_author_x,
                project.cover_author_y,
                project.cover_title_size_pt,
                project.cover_author_size_pt,
                project.cover_title_color,
                project.cover_author_color,
                project.biography,
                project.dedication,
                project.acknowledgments,
                project.copyright,
                project.isbn,
                project.publisher,
                project.auto_number_chapters,
                project.chapter_number_format,
                project.created_at,
                project.updated_at,
            ],
        )
    }

    /// Insert a project only if the owner stays under `max_books`.
    ///
    /// COUNT and INSERT run inside one transaction on the single connection,
    /// so two concurrent near-ceiling requests cannot both slip through.
    pub fn create_project_within_limit(&self, project: &Project, max_books: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Unavailable(format!("Failed to start transaction: {}", e)))?;

        let owned: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM projects WHERE user_id = ?1",
                params![project.user_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to count projects: {}", e)))?;

        if owned >= max_books {
            return Err(AppError::Forbidden(
                "Book limit reached for the current plan. Upgrade to PRO to create more."
                    .to_string(),
            ));
        }

        Self::insert_project(&tx, project)
            .map_err(|e| AppError::Unavailable(format!("Failed to create project: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Unavailable(format!("Failed to commit: {}", e)))?;
        Ok(())
    }

    /// Get project by ID.
    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM projects WHERE id = ?1",
                Self::PROJECT_COLUMNS
            ),
            params![id],
            Self::map_project,
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get project: {}", e)))
    }

    /// List projects owned by a user, most recently updated first.
    pub fn list_user_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM projects WHERE user_id = ?1 ORDER BY updated_at DESC",
                Self::PROJECT_COLUMNS
            ))
            .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;

        let projects = stmt
            .query_map(params![user_id], Self::map_project)
            .map_err(|e| AppError::Unavailable(format!("Failed to list projects: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Unavailable(format!("Failed to collect projects: {}", e)))?;

        Ok(projects)
    }

    /// Count projects owned by a user (fresh read, no caching).
    pub fn count_user_projects(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM projects WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to count projects: {}", e)))
    }

    /// Persist the full project row.
    pub fn save_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE projects SET title = ?2, subtitle = ?3, author = ?4, genre = ?5,
                    status = ?6, page_size = ?7, custom_width_mm = ?8, custom_height_mm = ?9,
                    margin_top_mm = ?10, margin_bottom_mm = ?11, margin_left_mm = ?12,
                    margin_right_mm = ?13, margin_gutter_mm = ?14,
                    font_family = ?15, font_size_pt = ?16, line_height_percent = ?17,
                    cover_image_path = ?18, cover_title_x = ?19, cover_title_y = ?20,
                    cover_author_x = ?21, cover_author_y = ?22,
                    cover_title_size_pt = ?23, cover_author_size_pt = ?24,
                    cover_title_color = ?25, cover_author_color = ?26,
                    biography = ?27, dedication = ?28, acknowledgments = ?29, copyright = ?30,
                    isbn = ?31, publisher = ?32,
                    auto_number_chapters = ?33, chapter_number_format = ?34, updated_at = ?35
                 WHERE id = ?1",
                params![
                    project.id,
                    project.title,
                    project.subtitle,
                    project.author,
                    project.genre,
                    project.status.as_str(),
                    project.page_size,
                    project.custom_width_mm,
                    project.custom_height_mm,
                    project.margin_top_mm,
                    project.margin_bottom_mm,
                    project.margin_left_mm,
                    project.margin_right_mm,
                    project.margin_gutter_mm,
                    project.font_family,
                    project.font_size_pt,
                    project.line_height_percent,
                    project.cover_image_path,
                    project.cover_title_x,
                    project.cover_title_y,
                    project.cover_author_x,
                    project.cover_author_y,
                    project.cover_title_size_pt,
                    project.cover_author_size_pt,
                    project.cover_title_color,
                    project.cover_author_color,
                    project.biography,
                    project.dedication,
                    project.acknowledgments,
                    project.copyright,
                    project.isbn,
                    project.publisher,
                    project.auto_number_chapters,
                    project.chapter_number_format,
                    now_timestamp(),
                ],
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to update project: {}", e)))?;
        if rows == 0 {
            return Err(AppError::NotFound(format!(
                "Project not found: {}",
                project.id
            )));
        }
        Ok(())
    }

    /// Delete a project; chapters and exports cascade.
    pub fn delete_project(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .map_err(|e| AppError::Unavailable(format!("Failed to delete project: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== CHAPTER OPERATIONS ==========

    const CHAPTER_COLUMNS: &'static str = "id, project_id, parent_id, title, content, kind, level,
        order_index, start_on_new_page, include_in_toc, created_at, updated_at";

    fn map_chapter(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chapter> {
        let kind: String = row.get(5)?;
        Ok(Chapter {
            id: row.get(0)?,
            project_id: row.get(1)?,
            parent_id: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            kind: ChapterKind::parse(&kind).unwrap_or(ChapterKind::Chapter),
            level: row.get(6)?,
            order_index: row.get(7)?,
            start_on_new_page: row.get(8)?,
            include_in_toc: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    /// Insert a chapter only if the project stays under `max_chapters`.
    /// Same transactional shape as [`Self::create_project_within_limit`].
    pub fn create_chapter_within_limit(&self, chapter: &Chapter, max_chapters: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Unavailable(format!("Failed to start transaction: {}", e)))?;

        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM chapters WHERE project_id = ?1",
                params![chapter.project_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to count chapters: {}", e)))?;

        if existing >= max_chapters {
            return Err(AppError::Forbidden(
                "Chapter limit reached for the current plan. Upgrade to PRO to create more."
                    .to_string(),
            ));
        }

        tx.execute(
            "INSERT INTO chapters (id, project_id, parent_id, title, content, kind, level,
                                   order_index, start_on_new_page, include_in_toc,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                chapter.id,
                chapter.project_id,
                chapter.parent_id,
                chapter.title,
                chapter.content,
                chapter.kind.as_str(),
                chapter.level,
                chapter.order_index,
                chapter.start_on_new_page,
                chapter.include_in_toc,
                chapter.created_at,
                chapter.updated_at,
            ],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to create chapter: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Unavailable(format!("Failed to commit: {}", e)))?;
        Ok(())
    }

    /// Get chapter by ID.
    pub fn get_chapter(&self, id: &str) -> Result<Option<Chapter>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM chapters WHERE id = ?1",
                Self::CHAPTER_COLUMNS
            ),
            params![id],
            Self::map_chapter,
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get chapter: {}", e)))
    }

    /// List a project's chapters sorted ascending by order index.
    pub fn list_project_chapters(&self, project_id: &str) -> Result<Vec<Chapter>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM chapters WHERE project_id = ?1 ORDER BY order_index, id",
                Self::CHAPTER_COLUMNS
            ))
            .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;

        let chapters = stmt
            .query_map(params![project_id], Self::map_chapter)
            .map_err(|e| AppError::Unavailable(format!("Failed to list chapters: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Unavailable(format!("Failed to collect chapters: {}", e)))?;

        Ok(chapters)
    }

    /// Count chapters in a project (fresh read, no caching).
    pub fn count_project_chapters(&self, project_id: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to count chapters: {}", e)))
    }

    /// Count chapters of a given kind (used for auto-numbering at creation).
    pub fn count_project_chapters_of_kind(
        &self,
        project_id: &str,
        kind: ChapterKind,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM chapters WHERE project_id = ?1 AND kind = ?2",
            params![project_id, kind.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to count chapters: {}", e)))
    }

    /// Persist the full chapter row.
    pub fn save_chapter(&self, chapter: &Chapter) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE chapters SET parent_id = ?2, title = ?3, content = ?4, kind = ?5,
                        level = ?6, order_index = ?7, start_on_new_page = ?8,
                        include_in_toc = ?9, updated_at = ?10
                 WHERE id = ?1",
                params![
                    chapter.id,
                    chapter.parent_id,
                    chapter.title,
                    chapter.content,
                    chapter.kind.as_str(),
                    chapter.level,
                    chapter.order_index,
                    chapter.start_on_new_page,
                    chapter.include_in_toc,
                    now_timestamp(),
                ],
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to update chapter: {}", e)))?;
        if rows == 0 {
            return Err(AppError::NotFound(format!(
                "Chapter not found: {}",
                chapter.id
            )));
        }
        Ok(())
    }

    /// Delete a chapter.
    pub fn delete_chapter(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM chapters WHERE id = ?1", params![id])
            .map_err(|e| AppError::Unavailable(format!("Failed to delete chapter: {}", e)))?;
        Ok(rows > 0)
    }

    /// Apply requested (chapter id, order index) pairs, then renumber the
    /// whole project contiguously from 0, all in one transaction.
    ///
    /// A pair referencing a chapter outside the project aborts the reorder.
    pub fn reorder_chapters(&self, project_id: &str, orders: &[(String, i64)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Unavailable(format!("Failed to start transaction: {}", e)))?;

        for (chapter_id, order_index) in orders {
            let rows = tx
                .execute(
                    "UPDATE chapters SET order_index = ?1, updated_at = ?2
                     WHERE id = ?3 AND project_id = ?4",
                    params![order_index, now_timestamp(), chapter_id, project_id],
                )
                .map_err(|e| AppError::Unavailable(format!("Failed to reorder: {}", e)))?;
            if rows == 0 {
                return Err(AppError::Validation(format!(
                    "Chapter {} does not belong to project {}",
                    chapter_id, project_id
                )));
            }
        }

        // Renumber 0..n in the resulting order so indexes stay contiguous.
        let ids: Vec<String> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id FROM chapters WHERE project_id = ?1 ORDER BY order_index, id",
                )
                .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;
            let ids = stmt
                .query_map(params![project_id], |row| row.get(0))
                .map_err(|e| AppError::Unavailable(format!("Failed to renumber: {}", e)))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| AppError::Unavailable(format!("Failed to renumber: {}", e)))?;
            ids
        };

        for (index, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE chapters SET order_index = ?1 WHERE id = ?2",
                params![index as i64, id],
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to renumber: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| AppError::Unavailable(format!("Failed to commit: {}", e)))?;
        Ok(())
    }

    // ========== EXPORT OPERATIONS ==========

    const EXPORT_COLUMNS: &'static str =
        "id, project_id, user_id, format, file_path, file_size, status, error_message, created_at";

    fn map_export(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExportRecord> {
        let format: String = row.get(3)?;
        let status: String = row.get(6)?;
        Ok(ExportRecord {
            id: row.get(0)?,
            project_id: row.get(1)?,
            user_id: row.get(2)?,
            format: ExportFormat::parse(&format).unwrap_or(ExportFormat::Pdf),
            file_path: row.get(4)?,
            file_size: row.get(5)?,
            status: ExportStatus::parse(&status).unwrap_or(ExportStatus::Processing),
            error_message: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Record a new export attempt.
    pub fn create_export(&self, export: &ExportRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO exports (id, project_id, user_id, format, file_path, file_size,
                                  status, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                export.id,
                export.project_id,
                export.user_id,
                export.format.as_str(),
                export.file_path,
                export.file_size,
                export.status.as_str(),
                export.error_message,
                export.created_at,
            ],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to record export: {}", e)))?;
        Ok(())
    }

    /// Transition an export to completed with its artifact size.
    pub fn mark_export_completed(&self, id: &str, file_size: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE exports SET status = 'completed', file_size = ?1 WHERE id = ?2",
            params![file_size, id],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to update export: {}", e)))?;
        Ok(())
    }

    /// Transition an export to failed with an error detail.
    pub fn mark_export_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE exports SET status = 'failed', error_message = ?1 WHERE id = ?2",
            params![error, id],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to update export: {}", e)))?;
        Ok(())
    }

    /// Get export by ID.
    pub fn get_export(&self, id: &str) -> Result<Option<ExportRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM exports WHERE id = ?1", Self::EXPORT_COLUMNS),
            params![id],
            Self::map_export,
        )
        .optional()
        .map_err(|e| AppError::Unavailable(format!("Failed to get export: {}", e)))
    }

    /// List a project's export history, newest first.
    pub fn list_project_exports(&self, project_id: &str) -> Result<Vec<ExportRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM exports WHERE project_id = ?1 ORDER BY created_at DESC, id",
                Self::EXPORT_COLUMNS
            ))
            .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;

        let exports = stmt
            .query_map(params![project_id], Self::map_export)
            .map_err(|e| AppError::Unavailable(format!("Failed to list exports: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Unavailable(format!("Failed to collect exports: {}", e)))?;

        Ok(exports)
    }

    // ========== SUBSCRIPTION HISTORY ==========

    /// Append a plan transition to the ledger. Never updated, never merged.
    pub fn append_subscription_change(
        &self,
        user_id: &str,
        old_plan: Option<PlanType>,
        new_plan: PlanType,
        reason: PlanChangeReason,
        effective_at: i64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO subscription_history (user_id, old_plan, new_plan, reason,
                                               effective_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                old_plan.map(|p| p.as_str()),
                new_plan.as_str(),
                reason.as_str(),
                effective_at,
                now_timestamp(),
            ],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to append history: {}", e)))?;
        Ok(())
    }

    /// List a user's plan transitions, oldest first.
    pub fn list_subscription_changes(&self, user_id: &str) -> Result<Vec<SubscriptionChange>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, old_plan, new_plan, reason, effective_at, created_at
                 FROM subscription_history WHERE user_id = ?1 ORDER BY id",
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;

        let changes = stmt
            .query_map(params![user_id], |row| {
                let old_plan: Option<String> = row.get(2)?;
                let new_plan: String = row.get(3)?;
                let reason: String = row.get(4)?;
                Ok(SubscriptionChange {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    old_plan: old_plan.as_deref().and_then(PlanType::parse),
                    new_plan: PlanType::parse(&new_plan).unwrap_or(PlanType::Free),
                    reason: PlanChangeReason::parse(&reason)
                        .unwrap_or(PlanChangeReason::ManualChange),
                    effective_at: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(|e| AppError::Unavailable(format!("Failed to list history: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Unavailable(format!("Failed to collect history: {}", e)))?;

        Ok(changes)
    }

    // ========== AUDIT LOG ==========

    /// Append an audit row. Callers go through [`crate::audit::AuditRecorder`],
    /// which downgrades failures to warnings.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_logs (user_id, action, resource_type, resource_id, details,
                                     ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.user_id,
                entry.action,
                entry.resource_type,
                entry.resource_id,
                entry.details,
                entry.ip_address,
                entry.user_agent,
                entry.created_at,
            ],
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to write audit entry: {}", e)))?;
        Ok(())
    }

    /// List recent audit entries for a user, newest first.
    pub fn list_audit_entries(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, action, resource_type, resource_id, details,
                        ip_address, user_agent, created_at
                 FROM audit_logs WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| AppError::Unavailable(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt
            .query_map(params![user_id, limit], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    action: row.get(2)?,
                    resource_type: row.get(3)?,
                    resource_id: row.get(4)?,
                    details: row.get(5)?,
                    ip_address: row.get(6)?,
                    user_agent: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })
            .map_err(|e| AppError::Unavailable(format!("Failed to list audit entries: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Unavailable(format!("Failed to collect audit entries: {}", e)))?;

        Ok(entries)
    }

    /// Count audit entries for a user with a given action (used in tests
    /// and for idempotency inspection).
    pub fn count_audit_entries(&self, user_id: &str, action: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM audit_logs WHERE user_id = ?1 AND action = ?2",
            params![user_id, action],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Unavailable(format!("Failed to count audit entries: {}", e)))
    }
}
