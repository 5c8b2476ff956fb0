//! Plan state machine: limit gates, upgrades, downgrades, lapse handling.
//!
//! Transitions set absolute plan state (tier + active flag + window), which
//! makes re-applying the same transition converge on the same end state.
//! Every transition appends to the subscription history ledger; ledger
//! writes are authoritative and their failures propagate.

use crate::db::{Database, PlanChangeReason, PlanType, User, now_timestamp, timestamp_to_datetime};
use crate::error::{AppError, Result};
use crate::plan::{PlanLimits, plan_spec};
use chrono::Months;
use serde::Serialize;

/// Result of a subscription status check.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// "active" or "expired".
    pub status: String,
    /// Plan after the check (a lapsed plan reads as FREE).
    pub plan: PlanType,
    /// Subscription window end, when one exists.
    pub end_date: Option<i64>,
}

/// Subscription service.
pub struct SubscriptionService {
    db: Database,
}

impl SubscriptionService {
    /// Create a new subscription service.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn get_user(&self, user_id: &str) -> Result<User> {
        self.db
            .get_user_by_id(user_id)?
            .ok_or_else(|| AppError::NotFound(format!("User not found: {}", user_id)))
    }

    /// Current usage vs ceilings. Usage is recomputed from storage on every
    /// call; nothing here is cached.
    pub fn plan_limits(&self, user_id: &str) -> Result<PlanLimits> {
        let user = self.get_user(user_id)?;
        let spec = plan_spec(user.plan_type);
        let owned = self.db.count_user_projects(user_id)?;

        Ok(PlanLimits {
            plan: user.plan_type,
            is_active: user.plan_active,
            can_create_book: owned < spec.max_books,
            books_remaining: (spec.max_books - owned).max(0),
            max_chapters_per_book: spec.max_chapters_per_book,
            can_export: spec.can_export,
            can_upload_cover: spec.can_upload_cover,
        })
    }

    /// Gate: fail unless the user can create another project.
    pub fn require_can_create_project(&self, user_id: &str) -> Result<()> {
        let user = self.get_user(user_id)?;
        let spec = plan_spec(user.plan_type);
        let owned = self.db.count_user_projects(user_id)?;

        if owned >= spec.max_books {
            return Err(AppError::Forbidden(
                "Book limit reached for the current plan. Upgrade to PRO to create more."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Gate: fail unless the project can take another chapter.
    pub fn require_can_create_chapter(&self, user_id: &str, project_id: &str) -> Result<()> {
        let user = self.get_user(user_id)?;
        let spec = plan_spec(user.plan_type);
        let existing = self.db.count_project_chapters(project_id)?;

        if existing >= spec.max_chapters_per_book {
            return Err(AppError::Forbidden(
                "Chapter limit reached for the current plan. Upgrade to PRO to create more."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Gate: fail unless the plan includes export.
    pub fn require_can_export(&self, user_id: &str) -> Result<()> {
        let user = self.get_user(user_id)?;
        if !plan_spec(user.plan_type).can_export {
            return Err(AppError::Forbidden(
                "Export is available on PRO plans. Upgrade to download your book.".to_string(),
            ));
        }
        Ok(())
    }

    /// Gate: fail unless the plan includes custom covers.
    pub fn require_can_upload_cover(&self, user_id: &str) -> Result<()> {
        let user = self.get_user(user_id)?;
        if !plan_spec(user.plan_type).can_upload_cover {
            return Err(AppError::Forbidden(
                "Custom covers are available on PRO plans.".to_string(),
            ));
        }
        Ok(())
    }

    /// The chapter ceiling for the user's current plan (used by the
    /// transactional limit-checked insert).
    pub fn chapter_ceiling(&self, user_id: &str) -> Result<i64> {
        let user = self.get_user(user_id)?;
        Ok(plan_spec(user.plan_type).max_chapters_per_book)
    }

    /// The book ceiling for the user's current plan.
    pub fn book_ceiling(&self, user_id: &str) -> Result<i64> {
        let user = self.get_user(user_id)?;
        Ok(plan_spec(user.plan_type).max_books)
    }

    fn upgrade(&self, user_id: &str, plan: PlanType, months: u32) -> Result<()> {
        let user = self.get_user(user_id)?;

        let now = now_timestamp();
        let end = timestamp_to_datetime(now)
            .checked_add_months(Months::new(months))
            .map(|dt| dt.timestamp())
            .ok_or_else(|| AppError::Internal("Subscription end out of range".to_string()))?;

        // Absolute state: re-invoking simply resets the window.
        self.db
            .set_user_plan(user_id, plan, true, Some(now), Some(end))?;

        // Every transition is logged, never merged.
        self.db.append_subscription_change(
            user_id,
            Some(user.plan_type),
            plan,
            PlanChangeReason::Upgrade,
            now,
        )?;

        tracing::info!(user = %user_id, plan = plan.as_str(), "Plan upgraded");
        Ok(())
    }

    /// Upgrade to PRO monthly; window is now + 1 month.
    pub fn upgrade_to_pro_monthly(&self, user_id: &str) -> Result<()> {
        self.upgrade(user_id, PlanType::ProMonthly, 1)
    }

    /// Upgrade to PRO yearly; window is now + 12 months.
    pub fn upgrade_to_pro_yearly(&self, user_id: &str) -> Result<()> {
        self.upgrade(user_id, PlanType::ProYearly, 12)
    }

    /// Interactive downgrade to FREE. Refuses while the user owns more
    /// projects than the FREE ceiling allows; content is never deleted
    /// on the user's behalf.
    pub fn downgrade_to_free(&self, user_id: &str, reason: PlanChangeReason) -> Result<()> {
        let owned = self.db.count_user_projects(user_id)?;
        let free_spec = plan_spec(PlanType::Free);

        if owned > free_spec.max_books {
            return Err(AppError::Forbidden(
                "Delete extra projects before switching to the free plan.".to_string(),
            ));
        }

        self.apply_downgrade(user_id, reason)
    }

    /// Provider-driven downgrade to FREE. The billing provider is
    /// authoritative, so the resource guard is bypassed.
    pub fn force_downgrade_to_free(&self, user_id: &str, reason: PlanChangeReason) -> Result<()> {
        self.apply_downgrade(user_id, reason)
    }

    fn apply_downgrade(&self, user_id: &str, reason: PlanChangeReason) -> Result<()> {
        let user = self.get_user(user_id)?;
        let now = now_timestamp();

        self.db
            .set_user_plan(user_id, PlanType::Free, true, None, None)?;

        self.db.append_subscription_change(
            user_id,
            Some(user.plan_type),
            PlanType::Free,
            reason,
            now,
        )?;

        tracing::info!(user = %user_id, reason = reason.as_str(), "Plan downgraded to FREE");
        Ok(())
    }

    /// Lazy expiration check, performed at access time instead of by a
    /// background sweep. A non-FREE plan whose window has ended is
    /// downgraded before the status is returned.
    pub fn check_subscription_status(&self, user_id: &str) -> Result<SubscriptionStatus> {
        let user = self.get_user(user_id)?;
        let now = now_timestamp();

        let expired = user
            .subscription_end
            .is_some_and(|end| end < now && user.plan_type != PlanType::Free);

        if expired {
            self.force_downgrade_to_free(user_id, PlanChangeReason::Renewal)?;
            return Ok(SubscriptionStatus {
                status: "expired".to_string(),
                plan: PlanType::Free,
                end_date: None,
            });
        }

        Ok(SubscriptionStatus {
            status: "active".to_string(),
            plan: user.plan_type,
            end_date: user.subscription_end,
        })
    }
}
