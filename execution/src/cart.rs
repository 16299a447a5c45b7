//! Cart state machine: NoTicket → InCart(q) → Paid(q).
//!
//! Every mutation enters the [`LotteryGate`] first and holds it for its whole duration, then
//! serializes on the caller's user id and on the gift(s) it touches. The gift locks are shared
//! with the draw engine, so a draw commit and a cart edit on the same gift never interleave.
//!
//! # Lock order
//!
//! gate (shared) → user → gifts in ascending id order. The draw engine only ever takes gift
//! locks, and the bulk draw trips the gate before taking any, so the order is acyclic.

use raffle_types::{GiftId, Purchase, PurchaseId, QuantityAction, TicketStatus, UserId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::RaffleError;
use crate::gate::LotteryGate;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::now_ms;
use crate::state::{Op, Store};

pub struct CartService<S: Store> {
    store: Arc<S>,
    gate: Arc<LotteryGate>,
    users: KeyedLocks<UserId>,
    gifts: Arc<KeyedLocks<GiftId>>,
}

impl<S: Store> CartService<S> {
    pub fn new(
        store: Arc<S>,
        gate: Arc<LotteryGate>,
        users: KeyedLocks<UserId>,
        gifts: Arc<KeyedLocks<GiftId>>,
    ) -> Self {
        Self {
            store,
            gate,
            users,
            gifts,
        }
    }

    /// Puts one ticket for `gift_id` in the user's cart, creating the row or bumping its
    /// quantity. Returns the row as stored.
    pub async fn add_ticket(&self, user: UserId, gift_id: GiftId) -> Result<Purchase, RaffleError> {
        let _commerce = self.gate.enter().await?;
        let _user = self.users.acquire(user).await?;
        let _gift = self.gifts.acquire(gift_id).await?;

        let gift = self
            .store
            .gift(gift_id)
            .await?
            .ok_or(RaffleError::GiftNotFound(gift_id))?;
        if gift.lottery_completed {
            return Err(RaffleError::GiftUnavailable(gift_id));
        }

        let existing = self
            .store
            .purchases_for_user(user, TicketStatus::Cart)
            .await?
            .into_iter()
            .find(|row| row.gift_id == gift_id);
        let row = match existing {
            Some(row) => Purchase {
                quantity: row.quantity.saturating_add(1),
                ..row
            },
            None => Purchase::cart(self.store.next_purchase_id(), user, gift_id),
        };
        self.store.apply(vec![Op::PutPurchase(row.clone())]).await?;
        debug!(user, gift_id, purchase = row.id, quantity = row.quantity, "ticket added");
        Ok(row)
    }

    pub async fn remove_ticket(&self, user: UserId, purchase: PurchaseId) -> Result<(), RaffleError> {
        let _commerce = self.gate.enter().await?;
        let _user = self.users.acquire(user).await?;
        let (row, _gift) = self.lock_cart_row(user, purchase).await?;

        self.store.apply(vec![Op::DeletePurchase(row.id)]).await?;
        debug!(user, purchase, gift_id = row.gift_id, "ticket removed");
        Ok(())
    }

    /// Moves a cart row's quantity by one. A decrease that would leave zero tickets fails
    /// with [`RaffleError::BelowMinimum`] and leaves the row untouched.
    pub async fn adjust_quantity(
        &self,
        user: UserId,
        purchase: PurchaseId,
        action: QuantityAction,
    ) -> Result<Purchase, RaffleError> {
        let _commerce = self.gate.enter().await?;
        let _user = self.users.acquire(user).await?;
        let (row, _gift) = self.lock_cart_row(user, purchase).await?;

        let quantity = match action {
            QuantityAction::Increase => row.quantity.saturating_add(1),
            QuantityAction::Decrease if row.quantity <= 1 => {
                return Err(RaffleError::BelowMinimum)
            }
            QuantityAction::Decrease => row.quantity - 1,
        };
        let row = Purchase { quantity, ..row };
        self.store.apply(vec![Op::PutPurchase(row.clone())]).await?;
        debug!(user, purchase, quantity, "ticket quantity adjusted");
        Ok(row)
    }

    /// Pays for every row in the user's cart in one batch. If any row's gift has already
    /// been drawn, nothing is paid.
    pub async fn checkout(&self, user: UserId) -> Result<Vec<Purchase>, RaffleError> {
        let _commerce = self.gate.enter().await?;
        let _user = self.users.acquire(user).await?;

        let rows = self.store.purchases_for_user(user, TicketStatus::Cart).await?;
        if rows.is_empty() {
            return Err(RaffleError::EmptyCart);
        }
        let gift_ids: Vec<GiftId> = rows.iter().map(|row| row.gift_id).collect();
        let _gifts = self.gifts.acquire_many(&gift_ids).await?;

        // A draw may have purged rows between the first read and taking the gift locks.
        let rows = self.store.purchases_for_user(user, TicketStatus::Cart).await?;
        if rows.is_empty() {
            return Err(RaffleError::EmptyCart);
        }
        for row in &rows {
            let drawn = self
                .store
                .gift(row.gift_id)
                .await?
                .map_or(true, |gift| gift.lottery_completed);
            if drawn {
                return Err(RaffleError::GiftUnavailable(row.gift_id));
            }
        }

        let now = now_ms();
        let paid: Vec<Purchase> = rows.iter().map(|row| row.paid(now)).collect();
        self.store
            .apply(paid.iter().cloned().map(Op::PutPurchase).collect())
            .await?;
        let tickets: u64 = paid.iter().map(|row| u64::from(row.quantity)).sum();
        info!(user, rows = paid.len(), tickets, "checkout completed");
        Ok(paid)
    }

    /// The user's unpaid rows.
    pub async fn cart(&self, user: UserId) -> Result<Vec<Purchase>, RaffleError> {
        Ok(self.store.purchases_for_user(user, TicketStatus::Cart).await?)
    }

    /// The user's paid rows.
    pub async fn paid_tickets(&self, user: UserId) -> Result<Vec<Purchase>, RaffleError> {
        Ok(self.store.purchases_for_user(user, TicketStatus::Paid).await?)
    }

    /// Loads an owned cart row and locks its gift. The row is read again under the gift lock
    /// since a draw commit may have purged it in between.
    async fn lock_cart_row(
        &self,
        user: UserId,
        purchase: PurchaseId,
    ) -> Result<(Purchase, KeyGuard<GiftId>), RaffleError> {
        let row = self.owned_row(user, purchase).await?;
        let guard = self.gifts.acquire(row.gift_id).await?;
        let row = self.owned_row(user, purchase).await?;

        if !row.is_cart() {
            return Err(RaffleError::WrongState {
                purchase,
                status: row.status,
            });
        }
        let drawn = self
            .store
            .gift(row.gift_id)
            .await?
            .is_some_and(|gift| gift.lottery_completed);
        if drawn {
            return Err(RaffleError::GiftUnavailable(row.gift_id));
        }
        Ok((row, guard))
    }

    async fn owned_row(&self, user: UserId, purchase: PurchaseId) -> Result<Purchase, RaffleError> {
        self.store
            .purchase(purchase)
            .await?
            .filter(|row| row.user_id == user)
            .ok_or(RaffleError::NotFound(purchase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use raffle_types::Gift;
    use std::time::Duration;

    fn service(gifts: impl IntoIterator<Item = Gift>) -> (CartService<MemoryStore>, Arc<MemoryStore>, Arc<LotteryGate>) {
        let store = Arc::new(MemoryStore::with_gifts(gifts));
        let gate = Arc::new(LotteryGate::new(Duration::from_millis(200)));
        let cart = CartService::new(
            store.clone(),
            gate.clone(),
            KeyedLocks::new(Duration::from_millis(200)),
            Arc::new(KeyedLocks::new(Duration::from_millis(200))),
        );
        (cart, store, gate)
    }

    fn drawn(id: GiftId) -> Gift {
        Gift {
            lottery_completed: true,
            ..Gift::new(id, "Drawn", 10)
        }
    }

    #[tokio::test]
    async fn add_ticket_accumulates_one_row() {
        let (cart, store, _) = service([Gift::new(1, "Bike", 50)]);
        let first = cart.add_ticket(7, 1).await.expect("first");
        let second = cart.add_ticket(7, 1).await.expect("second");
        assert_eq!(first.id, second.id);
        assert_eq!(second.quantity, 2);
        assert_eq!(store.all_purchases().len(), 1);
    }

    #[tokio::test]
    async fn add_ticket_checks_gift() {
        let (cart, store, _) = service([drawn(2)]);
        assert_eq!(cart.add_ticket(7, 9).await, Err(RaffleError::GiftNotFound(9)));
        assert_eq!(cart.add_ticket(7, 2).await, Err(RaffleError::GiftUnavailable(2)));
        assert!(store.all_purchases().is_empty());
    }

    #[tokio::test]
    async fn remove_requires_ownership_and_cart_state() {
        let (cart, store, _) = service([Gift::new(1, "Bike", 50)]);
        let row = cart.add_ticket(7, 1).await.expect("add");

        assert_eq!(cart.remove_ticket(8, row.id).await, Err(RaffleError::NotFound(row.id)));
        assert_eq!(cart.remove_ticket(7, 99).await, Err(RaffleError::NotFound(99)));

        cart.checkout(7).await.expect("checkout");
        assert_eq!(
            cart.remove_ticket(7, row.id).await,
            Err(RaffleError::WrongState {
                purchase: row.id,
                status: TicketStatus::Paid
            })
        );
        assert_eq!(store.all_purchases().len(), 1);

        let fresh = cart.add_ticket(7, 1).await.expect("add again");
        cart.remove_ticket(7, fresh.id).await.expect("remove");
        assert!(cart.cart(7).await.expect("cart").is_empty());
    }

    #[tokio::test]
    async fn decrease_stops_at_one() {
        let (cart, store, _) = service([Gift::new(1, "Bike", 50)]);
        let row = cart.add_ticket(7, 1).await.expect("add");
        let batches = store.applied_batches();

        assert_eq!(
            cart.adjust_quantity(7, row.id, QuantityAction::Decrease).await,
            Err(RaffleError::BelowMinimum)
        );
        assert_eq!(store.applied_batches(), batches);
        assert_eq!(cart.cart(7).await.expect("cart")[0].quantity, 1);

        let up = cart
            .adjust_quantity(7, row.id, QuantityAction::Increase)
            .await
            .expect("increase");
        assert_eq!(up.quantity, 2);
        let down = cart
            .adjust_quantity(7, row.id, QuantityAction::Decrease)
            .await
            .expect("decrease");
        assert_eq!(down.quantity, 1);
    }

    #[tokio::test]
    async fn checkout_pays_every_row_at_once() {
        let (cart, _, _) = service([Gift::new(1, "Bike", 50), Gift::new(2, "Lamp", 20)]);
        assert_eq!(cart.checkout(7).await, Err(RaffleError::EmptyCart));

        cart.add_ticket(7, 1).await.expect("add");
        cart.add_ticket(7, 1).await.expect("add");
        cart.add_ticket(7, 2).await.expect("add");
        let paid = cart.checkout(7).await.expect("checkout");
        assert_eq!(paid.len(), 2);
        assert!(paid.iter().all(|row| row.is_paid() && row.validate().is_ok()));
        assert!(cart.cart(7).await.expect("cart").is_empty());
        assert_eq!(cart.paid_tickets(7).await.expect("paid").len(), 2);
    }

    #[tokio::test]
    async fn checkout_refuses_drawn_gift_as_a_whole() {
        let (cart, store, _) = service([Gift::new(1, "Bike", 50)]);
        cart.add_ticket(7, 1).await.expect("add");
        // Simulate a row left behind for a gift that has since been drawn.
        store
            .apply(vec![
                Op::PutGift(drawn(2)),
                Op::PutPurchase(Purchase::cart(50, 7, 2)),
            ])
            .await
            .expect("seed");

        assert_eq!(cart.checkout(7).await, Err(RaffleError::GiftUnavailable(2)));
        assert!(cart.paid_tickets(7).await.expect("paid").is_empty());
        assert_eq!(
            cart.adjust_quantity(7, 50, QuantityAction::Increase).await,
            Err(RaffleError::GiftUnavailable(2))
        );
    }

    #[tokio::test]
    async fn locked_gate_refuses_every_mutation() {
        let (cart, store, gate) = service([Gift::new(1, "Bike", 50)]);
        let row = cart.add_ticket(7, 1).await.expect("add");
        gate.set_locked(true).await.expect("lock");
        let batches = store.applied_batches();

        assert_eq!(cart.add_ticket(7, 1).await, Err(RaffleError::LotteryLocked));
        assert_eq!(cart.remove_ticket(7, row.id).await, Err(RaffleError::LotteryLocked));
        assert_eq!(
            cart.adjust_quantity(7, row.id, QuantityAction::Increase).await,
            Err(RaffleError::LotteryLocked)
        );
        assert_eq!(cart.checkout(7).await, Err(RaffleError::LotteryLocked));
        assert_eq!(store.applied_batches(), batches);
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_leaves_cart_intact() {
        let (cart, store, _) = service([Gift::new(1, "Bike", 50)]);
        cart.add_ticket(7, 1).await.expect("add");
        store.fail_next_applies(1);
        let err = cart.checkout(7).await.expect_err("injected");
        assert!(err.is_retryable());
        assert_eq!(cart.cart(7).await.expect("cart").len(), 1);
        assert_eq!(cart.checkout(7).await.expect("retry").len(), 1);
    }
}
