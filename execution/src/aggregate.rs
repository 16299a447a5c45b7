//! Derived views over paid tickets.
//!
//! Nothing here is persisted. Only `Paid` rows ever contribute: a ticket sitting in a cart
//! does not count towards a pool, a ticket count, or revenue.

use raffle_types::api::{
    GiftIncome, GiftPurchaseSummary, Page, PageRequest, PurchaseSort, RevenueReport,
};
use raffle_types::{Amount, Gift, GiftId, Purchase, TicketStatus, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::state::{Store, StoreResult};

/// Paid ticket totals for `gifts`, fetched in a single aggregate call.
pub async fn ticket_counts<S: Store>(
    store: &S,
    gifts: &[GiftId],
) -> StoreResult<BTreeMap<GiftId, u64>> {
    store.ticket_counts(gifts).await
}

/// Entrants for a draw: each buyer appears once per paid ticket, in purchase order.
pub async fn weighted_pool<S: Store>(store: &S, gift: GiftId) -> StoreResult<Vec<UserId>> {
    let paid = store.purchases_for_gift(gift, TicketStatus::Paid).await?;
    Ok(expand_pool(&paid))
}

/// Expands paid rows into one slot per ticket. Cart rows are ignored.
pub fn expand_pool(purchases: &[Purchase]) -> Vec<UserId> {
    let total: usize = purchases
        .iter()
        .filter(|p| p.is_paid())
        .map(|p| p.quantity as usize)
        .sum();
    let mut pool = Vec::with_capacity(total);
    for purchase in purchases.iter().filter(|p| p.is_paid()) {
        pool.extend(std::iter::repeat(purchase.user_id).take(purchase.quantity as usize));
    }
    pool
}

/// Income and participation totals over every paid row.
pub async fn revenue_and_participants<S: Store>(store: &S) -> StoreResult<RevenueReport> {
    let prices = price_table(&store.gifts().await?);
    let paid = store.paid_purchases().await?;
    Ok(summarize(&paid, &prices))
}

/// Per-gift income, highest earning first (ties broken by gift id).
pub async fn income_by_gift<S: Store>(store: &S) -> StoreResult<Vec<GiftIncome>> {
    let gifts: HashMap<GiftId, Gift> = store
        .gifts()
        .await?
        .into_iter()
        .map(|gift| (gift.id, gift))
        .collect();
    let paid = store.paid_purchases().await?;

    let mut rows: BTreeMap<GiftId, (u64, BTreeSet<UserId>)> = BTreeMap::new();
    for purchase in &paid {
        let entry = rows.entry(purchase.gift_id).or_default();
        entry.0 = entry.0.saturating_add(u64::from(purchase.quantity));
        entry.1.insert(purchase.user_id);
    }

    let mut report: Vec<GiftIncome> = rows
        .into_iter()
        .filter_map(|(gift_id, (quantity, buyers))| {
            let gift = gifts.get(&gift_id)?;
            Some(GiftIncome {
                gift_id,
                gift_name: gift.name.clone(),
                gift_price: gift.price,
                total_quantity: quantity,
                total_income: gift.price.saturating_mul(quantity),
                buyers: buyers.len() as u64,
            })
        })
        .collect();
    report.sort_by(|a, b| {
        b.total_income
            .cmp(&a.total_income)
            .then(a.gift_id.cmp(&b.gift_id))
    });
    Ok(report)
}

/// Paid tickets grouped per gift, ordered by `sort` and cut down to one page.
pub async fn purchases_by_gift<S: Store>(
    store: &S,
    sort: PurchaseSort,
    page: PageRequest,
) -> StoreResult<Page<GiftPurchaseSummary>> {
    let mut rows: Vec<GiftPurchaseSummary> = income_by_gift(store)
        .await?
        .into_iter()
        .map(|income| GiftPurchaseSummary {
            gift_id: income.gift_id,
            gift_name: income.gift_name,
            gift_price: income.gift_price,
            total_quantity: income.total_quantity,
            buyers: income.buyers,
        })
        .collect();
    sort_purchase_summaries(&mut rows, sort);
    Ok(Page::slice(rows, page))
}

/// Paid rows for one gift, oldest purchase first.
pub async fn paid_purchases_for_gift<S: Store>(
    store: &S,
    gift: GiftId,
) -> StoreResult<Vec<Purchase>> {
    let mut rows = store.purchases_for_gift(gift, TicketStatus::Paid).await?;
    rows.sort_by_key(|row| row.id);
    Ok(rows)
}

fn sort_purchase_summaries(rows: &mut [GiftPurchaseSummary], sort: PurchaseSort) {
    rows.sort_by(|a, b| {
        let primary = match sort {
            PurchaseSort::Name => a.gift_name.cmp(&b.gift_name),
            PurchaseSort::PriceAsc => a.gift_price.cmp(&b.gift_price),
            PurchaseSort::PriceDesc => b.gift_price.cmp(&a.gift_price),
            PurchaseSort::Popularity => b.total_quantity.cmp(&a.total_quantity),
        };
        primary.then(a.gift_id.cmp(&b.gift_id))
    });
}

fn price_table(gifts: &[Gift]) -> HashMap<GiftId, Amount> {
    gifts.iter().map(|gift| (gift.id, gift.price)).collect()
}

fn summarize(paid: &[Purchase], prices: &HashMap<GiftId, Amount>) -> RevenueReport {
    let mut users = BTreeSet::new();
    let mut gifts = BTreeSet::new();
    let mut report = RevenueReport::default();
    for purchase in paid.iter().filter(|p| p.is_paid()) {
        // Rows whose gift was removed externally have no price to charge.
        let Some(price) = prices.get(&purchase.gift_id) else {
            continue;
        };
        report.total_income = report
            .total_income
            .saturating_add(price.saturating_mul(u64::from(purchase.quantity)));
        report.total_purchases += 1;
        users.insert(purchase.user_id);
        gifts.insert(purchase.gift_id);
    }
    report.total_users = users.len() as u64;
    report.total_gifts = gifts.len() as u64;
    report
}
