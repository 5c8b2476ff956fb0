mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription plan tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanType {
    /// Free tier: one book, five chapters, no export.
    #[serde(rename = "FREE")]
    Free,
    /// Monthly PRO subscription.
    #[serde(rename = "PRO_MONTHLY")]
    ProMonthly,
    /// Yearly PRO subscription (discounted vs monthly).
    #[serde(rename = "PRO_YEARLY")]
    ProYearly,
}

impl PlanType {
    /// Stable string form used in storage and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "FREE",
            PlanType::ProMonthly => "PRO_MONTHLY",
            PlanType::ProYearly => "PRO_YEARLY",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FREE" => Some(PlanType::Free),
            "PRO_MONTHLY" => Some(PlanType::ProMonthly),
            "PRO_YEARLY" => Some(PlanType::ProYearly),
            _ => None,
        }
    }
}

/// Why a plan transition happened (append-only ledger tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanChangeReason {
    /// User moved to a higher tier.
    #[serde(rename = "UPGRADE")]
    Upgrade,
    /// User moved to a lower tier interactively.
    #[serde(rename = "DOWNGRADE")]
    Downgrade,
    /// Provider-driven cancellation.
    #[serde(rename = "CANCELED")]
    Canceled,
    /// Subscription window lapsed without renewal.
    #[serde(rename = "RENEWAL")]
    Renewal,
    /// Operator-initiated change.
    #[serde(rename = "MANUAL_CHANGE")]
    ManualChange,
}

impl PlanChangeReason {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanChangeReason::Upgrade => "UPGRADE",
            PlanChangeReason::Downgrade => "DOWNGRADE",
            PlanChangeReason::Canceled => "CANCELED",
            PlanChangeReason::Renewal => "RENEWAL",
            PlanChangeReason::ManualChange => "MANUAL_CHANGE",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPGRADE" => Some(PlanChangeReason::Upgrade),
            "DOWNGRADE" => Some(PlanChangeReason::Downgrade),
            "CANCELED" => Some(PlanChangeReason::Canceled),
            "RENEWAL" => Some(PlanChangeReason::Renewal),
            "MANUAL_CHANGE" => Some(PlanChangeReason::ManualChange),
            _ => None,
        }
    }
}

/// Structural role of a chapter within the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterKind {
    /// Dedication, biography, copyright page... rendered before the main body.
    Frontmatter,
    /// Top-level part divider ("PART I").
    Part,
    /// Regular main-matter chapter.
    Chapter,
    /// Nested section below a chapter.
    Subchapter,
    /// Bibliography, appendix... rendered after the main body.
    Backmatter,
}

impl ChapterKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterKind::Frontmatter => "frontmatter",
            ChapterKind::Part => "part",
            ChapterKind::Chapter => "chapter",
            ChapterKind::Subchapter => "subchapter",
            ChapterKind::Backmatter => "backmatter",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "frontmatter" => Some(ChapterKind::Frontmatter),
            "part" => Some(ChapterKind::Part),
            "chapter" => Some(ChapterKind::Chapter),
            "subchapter" => Some(ChapterKind::Subchapter),
            "backmatter" => Some(ChapterKind::Backmatter),
            _ => None,
        }
    }

    /// Heading depth mandated by the kind: part 1, chapter 2, subchapter 3.
    /// Front and back matter conventionally sit at level 1.
    pub fn level(&self) -> i64 {
        match self {
            ChapterKind::Part => 1,
            ChapterKind::Chapter => 2,
            ChapterKind::Subchapter => 3,
            ChapterKind::Frontmatter | ChapterKind::Backmatter => 1,
        }
    }

    /// Whether the kind belongs to the main-matter stream.
    pub fn is_main_matter(&self) -> bool {
        matches!(
            self,
            ChapterKind::Part | ChapterKind::Chapter | ChapterKind::Subchapter
        )
    }
}

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Being written.
    Draft,
    /// Layout/typography pass in progress.
    Formatting,
    /// Ready to export.
    Ready,
    /// Published.
    Published,
}

impl ProjectStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Formatting => "formatting",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Published => "published",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ProjectStatus::Draft),
            "formatting" => Some(ProjectStatus::Formatting),
            "ready" => Some(ProjectStatus::Ready),
            "published" => Some(ProjectStatus::Published),
            _ => None,
        }
    }
}

/// Export artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Paginated PDF.
    Pdf,
    /// Reflowable EPUB.
    Epub,
}

impl ExportFormat {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Epub => "epub",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(ExportFormat::Pdf),
            "epub" => Some(ExportFormat::Epub),
            _ => None,
        }
    }

    /// MIME type of the produced artifact.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Epub => "application/epub+zip",
        }
    }
}

/// Export attempt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    /// Generation in flight.
    Processing,
    /// Artifact written.
    Completed,
    /// Generation failed; see error detail.
    Failed,
}

impl ExportStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Processing => "processing",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
        }
    }

    /// Parse the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ExportStatus::Processing),
            "completed" => Some(ExportStatus::Completed),
            "failed" => Some(ExportStatus::Failed),
            _ => None,
        }
    }
}

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Login email (unique).
    pub email: String,
    /// Display name.
    pub name: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Current plan tier.
    pub plan_type: PlanType,
    /// Whether the plan is active.
    pub plan_active: bool,
    /// Subscription window start.
    pub subscription_start: Option<i64>,
    /// Subscription window end; past this, a non-FREE plan has lapsed.
    pub subscription_end: Option<i64>,
    /// External billing customer reference.
    pub billing_customer_id: Option<String>,
    /// External billing subscription reference.
    pub billing_subscription_id: Option<String>,
    /// Account creation timestamp.
    pub created_at: i64,
    /// Last login timestamp.
    pub last_login: Option<i64>,
}

/// Authentication session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Expiration timestamp.
    pub expires_at: i64,
}

/// A book project. Owned by exactly one user; deleting it cascades to
/// chapters and export records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project ID.
    pub id: String,
    /// Owner user ID.
    pub user_id: String,
    /// Book title.
    pub title: String,
    /// Subtitle.
    pub subtitle: Option<String>,
    /// Author name as printed.
    pub author: Option<String>,
    /// Genre label.
    pub genre: Option<String>,
    /// Lifecycle status.
    pub status: ProjectStatus,
    /// Named page size ("6x9", "A4", ...) or "custom".
    pub page_size: String,
    /// Custom page width in mm (only with page_size = "custom").
    pub custom_width_mm: Option<i64>,
    /// Custom page height in mm (only with page_size = "custom").
    pub custom_height_mm: Option<i64>,
    /// Top margin in mm.
    pub margin_top_mm: i64,
    /// Bottom margin in mm.
    pub margin_bottom_mm: i64,
    /// Left margin in mm.
    pub margin_left_mm: i64,
    /// Right margin in mm.
    pub margin_right_mm: i64,
    /// Gutter added to the binding side, in mm.
    pub margin_gutter_mm: i64,
    /// Body font family.
    pub font_family: String,
    /// Body font size in points.
    pub font_size_pt: i64,
    /// Line height as a percentage of the font size (160 = 1.6).
    pub line_height_percent: i64,
    /// Cover image file path, if a custom cover was uploaded.
    pub cover_image_path: Option<String>,
    /// Cover title X position.
    pub cover_title_x: Option<i64>,
    /// Cover title Y position.
    pub cover_title_y: Option<i64>,
    /// Cover author X position.
    pub cover_author_x: Option<i64>,
    /// Cover author Y position.
    pub cover_author_y: Option<i64>,
    /// Cover title font size in points.
    pub cover_title_size_pt: i64,
    /// Cover author font size in points.
    pub cover_author_size_pt: i64,
    /// Cover title color (hex).
    pub cover_title_color: String,
    /// Cover author color (hex).
    pub cover_author_color: String,
    /// Author biography front-matter block.
    pub biography: Option<String>,
    /// Dedication front-matter block.
    pub dedication: Option<String>,
    /// Acknowledgments front-matter block.
    pub acknowledgments: Option<String>,
    /// Copyright notice.
    pub copyright: Option<String>,
    /// ISBN.
    pub isbn: Option<String>,
    /// Publisher imprint.
    pub publisher: Option<String>,
    /// Whether new chapters get an automatic number baked into the title.
    pub auto_number_chapters: bool,
    /// Number format containing the `{n}` placeholder.
    pub chapter_number_format: String,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// A chapter inside a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Unique chapter ID.
    pub id: String,
    /// Owning project ID.
    pub project_id: String,
    /// Parent chapter for hierarchical nesting (part -> chapter -> subchapter).
    pub parent_id: Option<String>,
    /// Chapter title as stored (auto-numbering is baked in at creation).
    pub title: String,
    /// HTML content body.
    pub content: String,
    /// Structural role.
    pub kind: ChapterKind,
    /// Heading depth; always consistent with `kind`.
    pub level: i64,
    /// Render order within the project; unique, contiguous from 0 after reorder.
    pub order_index: i64,
    /// Force a page break before this chapter's title block.
    pub start_on_new_page: bool,
    /// Include this chapter in the generated table of contents.
    pub include_in_toc: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// One export attempt. Immutable once completed/failed except for the
/// status transition itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Unique export ID.
    pub id: String,
    /// Project exported.
    pub project_id: String,
    /// User that requested the export.
    pub user_id: String,
    /// Artifact format.
    pub format: ExportFormat,
    /// Artifact location on disk.
    pub file_path: String,
    /// Artifact size in bytes (known once completed).
    pub file_size: Option<i64>,
    /// Attempt status.
    pub status: ExportStatus,
    /// Error detail when status is failed.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Append-only record of a plan transition. The authoritative billing
/// ledger; rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionChange {
    /// Row ID.
    pub id: i64,
    /// Affected user.
    pub user_id: String,
    /// Plan before the transition.
    pub old_plan: Option<PlanType>,
    /// Plan after the transition.
    pub new_plan: PlanType,
    /// Why the transition happened.
    pub reason: PlanChangeReason,
    /// When the transition took effect.
    pub effective_at: i64,
    /// Row creation timestamp.
    pub created_at: i64,
}

/// Append-only audit record for security/billing-relevant actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Row ID.
    pub id: i64,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Action name (CREATE_PROJECT, EXPORT_PDF, PAYMENT_FAILED, ...).
    pub action: String,
    /// Resource type the action touched.
    pub resource_type: Option<String>,
    /// Resource ID the action touched.
    pub resource_id: Option<String>,
    /// Free-form JSON detail payload.
    pub details: Option<String>,
    /// Request source IP.
    pub ip_address: Option<String>,
    /// Request user agent.
    pub user_agent: Option<String>,
    /// Row creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
