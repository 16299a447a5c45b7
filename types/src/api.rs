//! Read-side projections shared by the engine and the HTTP surface.

use serde::{Deserialize, Serialize};

use crate::raffle::{Amount, Gift, GiftId, PurchaseId, ResultId, TimestampMs, UserId};

/// A draw result joined with gift and winner details.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultView {
    pub id: ResultId,
    pub gift_id: GiftId,
    pub gift_name: String,
    pub gift_price: Amount,
    pub category: String,
    pub winner_user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_email: Option<String>,
    pub drawn_at_ms: TimestampMs,
    /// Paid tickets that took part in the draw.
    pub participants: u64,
}

/// Administrative overview of the raffle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotterySummary {
    pub total_gifts: u64,
    pub drawn_gifts: u64,
    /// Gifts with at least one paid ticket and no result yet.
    pub awaiting_gifts: u64,
    pub total_revenue: Amount,
    pub lottery_completed: bool,
}

/// The subset of [`LotterySummary`] exposed without authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSummary {
    pub drawn_gifts: u64,
    pub awaiting_gifts: u64,
    pub total_revenue: Amount,
    pub lottery_completed: bool,
}

impl From<&LotterySummary> for PublicSummary {
    fn from(summary: &LotterySummary) -> Self {
        Self {
            drawn_gifts: summary.drawn_gifts,
            awaiting_gifts: summary.awaiting_gifts,
            total_revenue: summary.total_revenue,
            lottery_completed: summary.lottery_completed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitingGift {
    pub gift: Gift,
    pub tickets: u64,
}

/// Totals over every paid line-item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueReport {
    pub total_income: Amount,
    /// Number of paid line-items (not tickets).
    pub total_purchases: u64,
    pub total_users: u64,
    pub total_gifts: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftIncome {
    pub gift_id: GiftId,
    pub gift_name: String,
    pub gift_price: Amount,
    pub total_quantity: u64,
    pub total_income: Amount,
    pub buyers: u64,
}

/// Paid tickets of one gift, grouped for the purchases report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftPurchaseSummary {
    pub gift_id: GiftId,
    pub gift_name: String,
    pub gift_price: Amount,
    pub total_quantity: u64,
    /// Distinct users holding at least one paid ticket.
    pub buyers: u64,
}

/// Ordering of the purchases report. Ties fall back to gift id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseSort {
    #[default]
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "price-asc")]
    PriceAsc,
    #[serde(rename = "price-desc", alias = "price")]
    PriceDesc,
    #[serde(rename = "popularity")]
    Popularity,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// One-based page selector. Out-of-range values are normalized rather than rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Page 0 reads as page 1; a size outside `1..=MAX_PAGE_SIZE` falls back to the default.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: if (1..=MAX_PAGE_SIZE).contains(&self.page_size) {
                self.page_size
            } else {
                DEFAULT_PAGE_SIZE
            },
        }
    }

    /// Number of leading items to skip.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items across all pages.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    /// Cuts the page selected by `request` out of the full, already ordered `items`.
    pub fn slice(items: Vec<T>, request: PageRequest) -> Self {
        let request = request.normalized();
        let total = items.len() as u64;
        let data = items
            .into_iter()
            .skip(request.offset())
            .take(request.page_size as usize)
            .collect();
        Self {
            total,
            page: request.page,
            page_size: request.page_size,
            data,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoParticipants,
    AlreadyDrawn,
}

/// What happened to one gift during a bulk draw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrawOutcome {
    Drawn { winner: UserId, pool_size: u64 },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftDrawReport {
    pub gift_id: GiftId,
    pub gift_name: String,
    #[serde(flatten)]
    pub outcome: DrawOutcome,
}

/// Audit report of a bulk draw.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawReport {
    pub gifts: Vec<GiftDrawReport>,
    pub drawn: u64,
    pub skipped: u64,
    pub failed: u64,
    pub lottery_locked: bool,
}

impl DrawReport {
    pub fn push(&mut self, entry: GiftDrawReport) {
        match entry.outcome {
            DrawOutcome::Drawn { .. } => self.drawn += 1,
            DrawOutcome::Skipped { .. } => self.skipped += 1,
            DrawOutcome::Failed { .. } => self.failed += 1,
        }
        self.gifts.push(entry);
    }

    pub fn outcome_for(&self, gift_id: GiftId) -> Option<&DrawOutcome> {
        self.gifts
            .iter()
            .find(|entry| entry.gift_id == gift_id)
            .map(|entry| &entry.outcome)
    }
}

/// Acknowledgement returned after a cart mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartReceipt {
    pub purchase_id: PurchaseId,
    pub gift_id: GiftId,
    pub quantity: u32,
}
