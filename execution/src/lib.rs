//! Raffle execution layer.
//!
//! This crate owns the ticket lifecycle (cart → paid), the aggregation of paid tickets into
//! draw pools, the process-wide lottery gate, and the draw engine. Persistence sits behind the
//! [`Store`] trait; notification and contact lookup sit behind [`Notifier`] and
//! [`UserDirectory`].
//!
//! ## Invariants
//! - At most one `Cart` row per (user, gift); adding again bumps the quantity.
//! - A `Paid` row is never modified.
//! - At most one result per gift. Its `lottery_completed` flag flips in the same batch.
//! - Once the gate is locked, no cart mutation commits.
//! - Only `Paid` rows feed pools, counts, and revenue.
//!
//! The primary entrypoint is [`Raffle`].
//!
//! ## Example
//! ```
//! use raffle_execution::{aggregate, rng, LotteryGate};
//! use raffle_types::Purchase;
//! use std::time::Duration;
//!
//! let ann = Purchase { quantity: 3, ..Purchase::cart(1, 7, 1) }.paid(1_000);
//! let ben = Purchase::cart(2, 8, 1).paid(1_000);
//! let still_in_cart = Purchase::cart(3, 9, 1);
//!
//! // Only paid tickets enter the pool, one slot per ticket.
//! let pool = aggregate::expand_pool(&[ann, ben, still_in_cart]);
//! assert_eq!(pool, vec![7, 7, 7, 8]);
//! let slot = rng::draw_index(pool.len()).expect("non-empty pool");
//! assert!([7, 8].contains(&pool[slot]));
//!
//! # let runtime = tokio::runtime::Runtime::new().expect("runtime");
//! # runtime.block_on(async {
//! let gate = LotteryGate::new(Duration::from_secs(1));
//! gate.set_locked(true).await.expect("no cart mutation in flight");
//! assert!(gate.enter().await.is_err());
//! # });
//! ```

pub mod aggregate;
pub mod cart;
pub mod draw;
pub mod error;
pub mod gate;
pub mod locks;
pub mod notify;
pub mod report;
pub mod rng;
pub mod state;

mod backoff;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod concurrency_tests;
#[cfg(test)]
mod scenario_tests;

use raffle_types::api::{
    GiftIncome, GiftPurchaseSummary, Page, PageRequest, PurchaseSort, RevenueReport,
};
use raffle_types::{GiftId, Purchase, TimestampMs};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use cart::CartService;
pub use draw::{DrawEngine, Drawn, RetryPolicy};
pub use error::RaffleError;
pub use gate::{CommerceGuard, GateError, LotteryGate};
pub use locks::{KeyGuard, KeyedLocks, LockTimeout};
pub use notify::{LogNotifier, Notifier, NotifyError, StaticDirectory, UserDirectory, WinnerNotice};
pub use report::Reports;
pub use state::{Op, Store, StoreError, StoreResult};

#[cfg(any(test, feature = "mocks"))]
pub use state::MemoryStore;

/// Tunables shared by the cart and the draw engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on any single lock wait (gate, user, or gift).
    pub lock_timeout: Duration,
    /// Extra attempts a bulk draw makes for a gift after a retryable failure.
    pub draw_retry_attempts: u32,
    pub draw_retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            lock_timeout: Duration::from_secs(5),
            draw_retry_attempts: retry.attempts,
            draw_retry_backoff: retry.backoff,
        }
    }
}

/// The assembled engine: one store, one gate, and the services built over them.
pub struct Raffle<S: Store, N: Notifier, D: UserDirectory> {
    store: Arc<S>,
    gate: Arc<LotteryGate>,
    cart: CartService<S>,
    draws: DrawEngine<S, N, D>,
    reports: Reports<S, D>,
}

impl<S: Store, N: Notifier, D: UserDirectory> Raffle<S, N, D> {
    /// Wires a fresh (open) gate and lock tables around `store`.
    pub fn new(store: Arc<S>, notifier: Arc<N>, directory: Arc<D>, config: EngineConfig) -> Self {
        let gate = Arc::new(LotteryGate::new(config.lock_timeout));
        let gift_locks = Arc::new(KeyedLocks::new(config.lock_timeout));
        let cart = CartService::new(
            store.clone(),
            gate.clone(),
            KeyedLocks::new(config.lock_timeout),
            gift_locks.clone(),
        );
        let draws = DrawEngine::new(
            store.clone(),
            gate.clone(),
            gift_locks,
            notifier,
            directory.clone(),
            RetryPolicy {
                attempts: config.draw_retry_attempts,
                backoff: config.draw_retry_backoff,
            },
        );
        let reports = Reports::new(store.clone(), gate.clone(), directory);
        Self {
            store,
            gate,
            cart,
            draws,
            reports,
        }
    }

    pub fn cart(&self) -> &CartService<S> {
        &self.cart
    }

    pub fn draws(&self) -> &DrawEngine<S, N, D> {
        &self.draws
    }

    pub fn reports(&self) -> &Reports<S, D> {
        &self.reports
    }

    pub fn gate(&self) -> &LotteryGate {
        &self.gate
    }

    /// Explicit administrative override of the gate.
    pub async fn set_locked(&self, locked: bool) -> Result<(), RaffleError> {
        Ok(self.gate.set_locked(locked).await?)
    }

    pub async fn ticket_counts(&self, gifts: &[GiftId]) -> Result<BTreeMap<GiftId, u64>, RaffleError> {
        Ok(aggregate::ticket_counts(self.store.as_ref(), gifts).await?)
    }

    pub async fn revenue_and_participants(&self) -> Result<RevenueReport, RaffleError> {
        Ok(aggregate::revenue_and_participants(self.store.as_ref()).await?)
    }

    pub async fn income_by_gift(&self) -> Result<Vec<GiftIncome>, RaffleError> {
        Ok(aggregate::income_by_gift(self.store.as_ref()).await?)
    }

    pub async fn purchases_by_gift(
        &self,
        sort: PurchaseSort,
        page: PageRequest,
    ) -> Result<Page<GiftPurchaseSummary>, RaffleError> {
        Ok(aggregate::purchases_by_gift(self.store.as_ref(), sort, page).await?)
    }

    /// Paid rows of an existing gift.
    pub async fn paid_purchases_for_gift(
        &self,
        gift_id: GiftId,
    ) -> Result<Vec<Purchase>, RaffleError> {
        if self.store.gift(gift_id).await?.is_none() {
            return Err(RaffleError::GiftNotFound(gift_id));
        }
        Ok(aggregate::paid_purchases_for_gift(self.store.as_ref(), gift_id).await?)
    }
}

/// Wall-clock milliseconds since the unix epoch.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as TimestampMs)
        .unwrap_or(0)
}
