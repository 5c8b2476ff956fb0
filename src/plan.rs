//! Static plan configuration.

use crate::db::PlanType;
use serde::Serialize;

/// Resource ceilings and feature flags for one plan tier.
#[derive(Debug, Clone, Copy)]
pub struct PlanSpec {
    /// Maximum number of owned books.
    pub max_books: i64,
    /// Maximum chapters per book.
    pub max_chapters_per_book: i64,
    /// Whether PDF/EPUB export is allowed.
    pub can_export: bool,
    /// Whether a custom cover can be uploaded.
    pub can_upload_cover: bool,
    /// Price in cents per billing period (0 for free).
    pub price_cents: i64,
}

/// Closed plan table. PRO ceilings are high enough to be effectively
/// unlimited while still bounding runaway clients.
pub fn plan_spec(plan: PlanType) -> PlanSpec {
    match plan {
        PlanType::Free => PlanSpec {
            max_books: 1,
            max_chapters_per_book: 5,
            can_export: false,
            can_upload_cover: false,
            price_cents: 0,
        },
        PlanType::ProMonthly => PlanSpec {
            max_books: 100,
            max_chapters_per_book: 999,
            can_export: true,
            can_upload_cover: true,
            price_cents: 999,
        },
        PlanType::ProYearly => PlanSpec {
            max_books: 100,
            max_chapters_per_book: 999,
            can_export: true,
            can_upload_cover: true,
            price_cents: 9999,
        },
    }
}

/// Current usage vs plan ceilings, as reported to the client.
#[derive(Debug, Clone, Serialize)]
pub struct PlanLimits {
    /// Current plan tier.
    pub plan: PlanType,
    /// Whether the plan is active.
    pub is_active: bool,
    /// Whether another book can be created right now.
    pub can_create_book: bool,
    /// Books remaining under the ceiling.
    pub books_remaining: i64,
    /// Chapter ceiling per book.
    pub max_chapters_per_book: i64,
    /// Whether export is allowed.
    pub can_export: bool,
    /// Whether a custom cover can be uploaded.
    pub can_upload_cover: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_is_locked_down() {
        let spec = plan_spec(PlanType::Free);
        assert_eq!(spec.max_books, 1);
        assert_eq!(spec.max_chapters_per_book, 5);
        assert!(!spec.can_export);
        assert!(!spec.can_upload_cover);
        assert_eq!(spec.price_cents, 0);
    }

    #[test]
    fn yearly_is_discounted_vs_monthly() {
        let monthly = plan_spec(PlanType::ProMonthly);
        let yearly = plan_spec(PlanType::ProYearly);
        assert!(yearly.price_cents < monthly.price_cents * 12);
    }
}
