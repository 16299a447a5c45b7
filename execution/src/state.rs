use raffle_types::{
    Gift, GiftId, LotteryResult, Purchase, PurchaseId, ResultId, TicketStatus, UserId,
};
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error as ThisError;

#[cfg(any(test, feature = "mocks"))]
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
#[cfg(any(test, feature = "mocks"))]
use std::sync::RwLock;

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness rule rejected the batch (second result for a gift, second cart row).
    #[error("constraint violated: {0}")]
    Conflict(String),
    /// Transient backend failure; the batch was not applied.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single write inside an atomic batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    PutGift(Gift),
    PutPurchase(Purchase),
    DeletePurchase(PurchaseId),
    /// Fails the whole batch with [`StoreError::Conflict`] if the gift already has a result.
    InsertResult(LotteryResult),
}

/// Persistence contract for gifts, ticket line-items, and draw results.
///
/// Reads return rows ordered by id. [`Store::apply`] must be all-or-nothing: either every
/// op in the batch is visible afterwards or none is. Implementations must reject a second
/// `Cart` row for the same (user, gift) and a second result for the same gift.
pub trait Store: Send + Sync + 'static {
    fn gift(&self, id: GiftId) -> impl Future<Output = StoreResult<Option<Gift>>> + Send;
    fn gifts(&self) -> impl Future<Output = StoreResult<Vec<Gift>>> + Send;

    fn purchase(&self, id: PurchaseId)
        -> impl Future<Output = StoreResult<Option<Purchase>>> + Send;
    fn purchases_for_user(
        &self,
        user: UserId,
        status: TicketStatus,
    ) -> impl Future<Output = StoreResult<Vec<Purchase>>> + Send;
    fn purchases_for_gift(
        &self,
        gift: GiftId,
        status: TicketStatus,
    ) -> impl Future<Output = StoreResult<Vec<Purchase>>> + Send;
    fn paid_purchases(&self) -> impl Future<Output = StoreResult<Vec<Purchase>>> + Send;

    /// Sum of paid quantity per gift, restricted to `gifts`, in one aggregate pass.
    /// Gifts without paid rows are absent from the map.
    fn ticket_counts(
        &self,
        gifts: &[GiftId],
    ) -> impl Future<Output = StoreResult<BTreeMap<GiftId, u64>>> + Send;

    fn result(&self, gift: GiftId)
        -> impl Future<Output = StoreResult<Option<LotteryResult>>> + Send;
    fn results(&self) -> impl Future<Output = StoreResult<Vec<LotteryResult>>> + Send;

    fn next_purchase_id(&self) -> PurchaseId;
    fn next_result_id(&self) -> ResultId;

    fn apply(&self, ops: Vec<Op>) -> impl Future<Output = StoreResult<()>> + Send;
}

#[derive(Clone, Debug, Default)]
#[cfg(any(test, feature = "mocks"))]
struct Tables {
    gifts: BTreeMap<GiftId, Gift>,
    purchases: BTreeMap<PurchaseId, Purchase>,
    results: BTreeMap<GiftId, LotteryResult>,
}

#[cfg(any(test, feature = "mocks"))]
impl Tables {
    fn apply_op(&mut self, op: Op) -> StoreResult<()> {
        match op {
            Op::PutGift(gift) => {
                self.gifts.insert(gift.id, gift);
            }
            Op::PutPurchase(purchase) => {
                if purchase.is_cart() {
                    let duplicate = self.purchases.values().any(|other| {
                        other.id != purchase.id
                            && other.is_cart()
                            && other.user_id == purchase.user_id
                            && other.gift_id == purchase.gift_id
                    });
                    if duplicate {
                        return Err(StoreError::Conflict(format!(
                            "cart row already exists for user {} gift {}",
                            purchase.user_id, purchase.gift_id
                        )));
                    }
                }
                self.purchases.insert(purchase.id, purchase);
            }
            Op::DeletePurchase(id) => {
                self.purchases.remove(&id);
            }
            Op::InsertResult(result) => {
                if self.results.contains_key(&result.gift_id) {
                    return Err(StoreError::Conflict(format!(
                        "result already recorded for gift {}",
                        result.gift_id
                    )));
                }
                self.results.insert(result.gift_id, result);
            }
        }
        Ok(())
    }
}

/// In-process store used by tests and the `mocks` feature.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_purchase: AtomicU64,
    next_result: AtomicU64,
    failing_applies: AtomicU32,
    applied_batches: AtomicU64,
    rival_result: std::sync::Mutex<Option<LotteryResult>>,
}

#[cfg(any(test, feature = "mocks"))]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gifts(gifts: impl IntoIterator<Item = Gift>) -> Self {
        let store = Self::default();
        {
            let mut tables = store.write_tables();
            for gift in gifts {
                tables.gifts.insert(gift.id, gift);
            }
        }
        store
    }

    /// Makes the next `count` calls to [`Store::apply`] fail with [`StoreError::Unavailable`].
    pub fn fail_next_applies(&self, count: u32) {
        self.failing_applies.store(count, Ordering::SeqCst);
    }

    /// Records `result` just before the next [`Store::apply`] runs, as a writer in another
    /// process would between a draw's checks and its commit.
    pub fn commit_rival_result_before_next_apply(&self, result: LotteryResult) {
        let mut rival = match self.rival_result.lock() {
            Ok(rival) => rival,
            Err(poisoned) => poisoned.into_inner(),
        };
        *rival = Some(result);
    }

    /// Number of batches committed so far.
    pub fn applied_batches(&self) -> u64 {
        self.applied_batches.load(Ordering::SeqCst)
    }

    pub fn all_purchases(&self) -> Vec<Purchase> {
        self.read_tables().purchases.values().cloned().collect()
    }

    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        match self.tables.read() {
            Ok(tables) => tables,
            Err(poisoned) => {
                tracing::warn!("memory store lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        match self.tables.write() {
            Ok(tables) => tables,
            Err(poisoned) => {
                tracing::warn!("memory store lock poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Store for MemoryStore {
    async fn gift(&self, id: GiftId) -> StoreResult<Option<Gift>> {
        Ok(self.read_tables().gifts.get(&id).cloned())
    }

    async fn gifts(&self) -> StoreResult<Vec<Gift>> {
        Ok(self.read_tables().gifts.values().cloned().collect())
    }

    async fn purchase(&self, id: PurchaseId) -> StoreResult<Option<Purchase>> {
        Ok(self.read_tables().purchases.get(&id).cloned())
    }

    async fn purchases_for_user(
        &self,
        user: UserId,
        status: TicketStatus,
    ) -> StoreResult<Vec<Purchase>> {
        Ok(self
            .read_tables()
            .purchases
            .values()
            .filter(|p| p.user_id == user && p.status == status)
            .cloned()
            .collect())
    }

    async fn purchases_for_gift(
        &self,
        gift: GiftId,
        status: TicketStatus,
    ) -> StoreResult<Vec<Purchase>> {
        Ok(self
            .read_tables()
            .purchases
            .values()
            .filter(|p| p.gift_id == gift && p.status == status)
            .cloned()
            .collect())
    }

    async fn paid_purchases(&self) -> StoreResult<Vec<Purchase>> {
        Ok(self
            .read_tables()
            .purchases
            .values()
            .filter(|p| p.is_paid())
            .cloned()
            .collect())
    }

    async fn ticket_counts(&self, gifts: &[GiftId]) -> StoreResult<BTreeMap<GiftId, u64>> {
        let tables = self.read_tables();
        let mut counts = BTreeMap::new();
        for purchase in tables.purchases.values() {
            if purchase.is_paid() && gifts.contains(&purchase.gift_id) {
                *counts.entry(purchase.gift_id).or_insert(0u64) += u64::from(purchase.quantity);
            }
        }
        Ok(counts)
    }

    async fn result(&self, gift: GiftId) -> StoreResult<Option<LotteryResult>> {
        Ok(self.read_tables().results.get(&gift).cloned())
    }

    async fn results(&self) -> StoreResult<Vec<LotteryResult>> {
        let mut results: Vec<_> = self.read_tables().results.values().cloned().collect();
        results.sort_by_key(|r| r.id);
        Ok(results)
    }

    fn next_purchase_id(&self) -> PurchaseId {
        self.next_purchase.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_result_id(&self) -> ResultId {
        self.next_result.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply(&self, ops: Vec<Op>) -> StoreResult<()> {
        let injected = self
            .failing_applies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let rival = match self.rival_result.lock() {
            Ok(mut rival) => rival.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let mut tables = self.write_tables();
        if let Some(result) = rival {
            tables.results.insert(result.gift_id, result);
        }
        let mut staged = tables.clone();
        for op in ops {
            staged.apply_op(op)?;
        }
        *tables = staged;
        self.applied_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
