//! End-to-end flows across the cart, aggregator, gate, and draw engine.
//!
//! Each test drives a [`crate::Raffle`] over an in-memory store the way the HTTP surface
//! would, then checks the persisted rows directly.

#[cfg(test)]
mod tests {
    use crate::mocks::test_raffle;
    use crate::state::Store;
    use crate::RaffleError;
    use raffle_types::api::{DrawOutcome, PageRequest, PurchaseSort, SkipReason};
    use raffle_types::{Gift, QuantityAction, TicketStatus};
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkout_feeds_counts_and_revenue() {
        let (raffle, _, _) = test_raffle([Gift::new(1, "Bike", 50)]);
        raffle.cart().add_ticket(1, 1).await.expect("add");
        raffle.cart().add_ticket(1, 1).await.expect("add");

        // Cart rows do not count yet.
        assert!(raffle.ticket_counts(&[1]).await.expect("counts").is_empty());

        raffle.cart().checkout(1).await.expect("checkout");
        assert_eq!(
            raffle.ticket_counts(&[1]).await.expect("counts"),
            BTreeMap::from([(1, 2)])
        );
        let revenue = raffle.revenue_and_participants().await.expect("revenue");
        assert_eq!(revenue.total_income, 100);
        assert_eq!(revenue.total_users, 1);
    }

    #[tokio::test]
    async fn test_draw_without_paid_tickets() {
        let (raffle, store, _) = test_raffle([Gift::new(1, "Bike", 50)]);
        raffle.cart().add_ticket(1, 1).await.expect("add");

        assert_eq!(
            raffle.draws().draw_one(1).await,
            Err(RaffleError::NoParticipants(1))
        );
        assert!(store.result(1).await.expect("read").is_none());
        assert!(!store.gift(1).await.expect("read").expect("gift").lottery_completed);
        // The unpaid cart row survives a failed draw.
        assert_eq!(raffle.cart().cart(1).await.expect("cart").len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_draw_skips_empty_gifts_and_locks() {
        let (raffle, store, notifier) =
            test_raffle([Gift::new(1, "Bike", 50), Gift::new(2, "Lamp", 20)]);
        for user in [1, 2, 3] {
            raffle.cart().add_ticket(user, 1).await.expect("add");
            raffle.cart().checkout(user).await.expect("checkout");
        }

        let report = raffle.draws().draw_all().await.expect("draw all");
        let Some(DrawOutcome::Drawn { winner, pool_size }) = report.outcome_for(1) else {
            panic!("gift 1 not drawn: {report:?}");
        };
        assert!([1, 2, 3].contains(winner));
        assert_eq!(*pool_size, 3);
        assert_eq!(
            report.outcome_for(2),
            Some(&DrawOutcome::Skipped {
                reason: SkipReason::NoParticipants
            })
        );
        assert!(report.lottery_locked);
        assert!(raffle.reports().is_lottery_completed());

        let result = store.result(1).await.expect("read").expect("result");
        assert_eq!(result.winner, *winner);
        assert!(store.result(2).await.expect("read").is_none());

        let notices = notifier.wait_for(1, Duration::from_secs(1)).await;
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].gift_name, "Bike");
    }

    #[tokio::test]
    async fn test_locked_gate_blocks_every_cart_mutation() {
        let (raffle, store, _) = test_raffle([Gift::new(1, "Bike", 50)]);
        let row = raffle.cart().add_ticket(1, 1).await.expect("add");
        raffle.set_locked(true).await.expect("lock");
        let before = store.applied_batches();
        let rows_before = store.all_purchases();

        let cart = raffle.cart();
        assert_eq!(cart.add_ticket(1, 1).await, Err(RaffleError::LotteryLocked));
        assert_eq!(cart.add_ticket(2, 1).await, Err(RaffleError::LotteryLocked));
        assert_eq!(cart.remove_ticket(1, row.id).await, Err(RaffleError::LotteryLocked));
        assert_eq!(
            cart.adjust_quantity(1, row.id, QuantityAction::Decrease).await,
            Err(RaffleError::LotteryLocked)
        );
        assert_eq!(cart.checkout(1).await, Err(RaffleError::LotteryLocked));

        assert_eq!(store.applied_batches(), before);
        assert_eq!(store.all_purchases(), rows_before);

        // Reads keep working while locked.
        assert_eq!(cart.cart(1).await.expect("cart").len(), 1);
    }

    #[tokio::test]
    async fn test_single_draw_clears_other_carts_for_the_gift() {
        let (raffle, store, _) = test_raffle([Gift::new(1, "Bike", 50), Gift::new(2, "Lamp", 20)]);
        raffle.cart().add_ticket(1, 1).await.expect("add");
        raffle.cart().checkout(1).await.expect("checkout");
        raffle.cart().add_ticket(2, 1).await.expect("add");
        raffle.cart().add_ticket(2, 2).await.expect("add");

        raffle.draws().draw_one(1).await.expect("draw");

        // User 2 keeps the unrelated row and can still check out.
        let cart = raffle.cart().cart(2).await.expect("cart");
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].gift_id, 2);
        assert_eq!(raffle.cart().checkout(2).await.expect("checkout").len(), 1);

        assert_eq!(
            raffle.cart().add_ticket(2, 1).await,
            Err(RaffleError::GiftUnavailable(1))
        );
        assert!(store
            .purchases_for_gift(1, TicketStatus::Cart)
            .await
            .expect("read")
            .is_empty());
    }

    #[tokio::test]
    async fn test_reports_follow_the_draw() {
        let (raffle, _, _) = test_raffle([Gift::new(1, "Bike", 50), Gift::new(2, "Lamp", 20)]);
        raffle.cart().add_ticket(1, 1).await.expect("add");
        raffle.cart().add_ticket(2, 2).await.expect("add");
        raffle.cart().checkout(1).await.expect("checkout");
        raffle.cart().checkout(2).await.expect("checkout");

        let summary = raffle.reports().summary().await.expect("summary");
        assert_eq!(summary.awaiting_gifts, 2);
        assert_eq!(summary.drawn_gifts, 0);
        assert_eq!(raffle.reports().gifts_awaiting_draw().await.expect("awaiting").len(), 2);

        raffle.draws().draw_one(1).await.expect("draw");
        let summary = raffle.reports().summary().await.expect("summary");
        assert_eq!(summary.awaiting_gifts, 1);
        assert_eq!(summary.drawn_gifts, 1);
        assert_eq!(summary.total_revenue, 70);
        assert!(!summary.lottery_completed);

        let view = raffle
            .reports()
            .result_for_gift(1)
            .await
            .expect("read")
            .expect("result");
        assert_eq!(view.winner_user_id, 1);
        assert_eq!(view.winner_email.as_deref(), Some("user1@example.com"));
        assert_eq!(view.participants, 1);

        let income = raffle.income_by_gift().await.expect("income");
        assert_eq!(income[0].gift_id, 1);
        assert_eq!(income[1].gift_id, 2);
    }

    #[tokio::test]
    async fn test_purchase_reports_ignore_carts_and_survive_the_draw() {
        let (raffle, _, _) = test_raffle([Gift::new(1, "Bike", 50), Gift::new(2, "Lamp", 20)]);
        raffle.cart().add_ticket(1, 2).await.expect("add");
        raffle.cart().add_ticket(1, 2).await.expect("add");
        raffle.cart().add_ticket(2, 2).await.expect("add");
        raffle.cart().add_ticket(3, 1).await.expect("add");
        raffle.cart().checkout(1).await.expect("checkout");
        raffle.cart().checkout(2).await.expect("checkout");

        let page = raffle
            .purchases_by_gift(PurchaseSort::Popularity, PageRequest::default())
            .await
            .expect("report");
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].gift_id, 2);
        assert_eq!(page.data[0].total_quantity, 3);
        assert_eq!(page.data[0].buyers, 2);

        raffle.draws().draw_one(2).await.expect("draw");
        let rows = raffle.paid_purchases_for_gift(2).await.expect("rows");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.status == TicketStatus::Paid));
        assert!(raffle.paid_purchases_for_gift(1).await.expect("rows").is_empty());
        assert_eq!(
            raffle.paid_purchases_for_gift(9).await,
            Err(RaffleError::GiftNotFound(9))
        );
    }
}
