//! Races between cart edits, draws, and the gate.
//!
//! These run on the multi-threaded runtime so tasks genuinely interleave.

#[cfg(test)]
mod tests {
    use crate::aggregate;
    use crate::mocks::{raffle_over, test_raffle};
    use crate::state::Store;
    use crate::RaffleError;
    use futures::future::join_all;
    use proptest::prelude::*;
    use raffle_types::{Gift, TicketStatus};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_draws_elect_one_winner() {
        let (raffle, store, _) = test_raffle([Gift::new(1, "Bike", 50)]);
        for user in 1..=5 {
            raffle.cart().add_ticket(user, 1).await.expect("add");
            raffle.cart().checkout(user).await.expect("checkout");
        }
        let raffle = Arc::new(raffle);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let raffle = raffle.clone();
                tokio::spawn(async move { raffle.draws().draw_one(1).await })
            })
            .collect();
        let outcomes: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("join"))
            .collect();

        let wins = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let already = outcomes
            .iter()
            .filter(|outcome| **outcome == Err(RaffleError::AlreadyDrawn(1)))
            .count();
        assert_eq!(wins, 1, "{outcomes:?}");
        assert_eq!(already, 15, "{outcomes:?}");
        assert_eq!(store.results().await.expect("read").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_engines_sharing_a_store_record_one_result() {
        let (first, store, _) = test_raffle([Gift::new(1, "Bike", 50)]);
        for user in 1..=5 {
            first.cart().add_ticket(user, 1).await.expect("add");
            first.cart().checkout(user).await.expect("checkout");
        }
        // Separate gates and lock tables, as two server processes would have.
        let (second, _) = raffle_over(store.clone());
        let engines = [Arc::new(first), Arc::new(second)];

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let raffle = engines[i % 2].clone();
                tokio::spawn(async move { raffle.draws().draw_one(1).await })
            })
            .collect();
        let outcomes: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("join"))
            .collect();

        let wins = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        let already = outcomes
            .iter()
            .filter(|outcome| **outcome == Err(RaffleError::AlreadyDrawn(1)))
            .count();
        assert_eq!(wins, 1, "{outcomes:?}");
        assert_eq!(already, 19, "{outcomes:?}");
        assert_eq!(store.results().await.expect("read").len(), 1);
        assert!(store.gift(1).await.expect("read").expect("gift").lottery_completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_share_one_cart_row() {
        let (raffle, store, _) = test_raffle([Gift::new(1, "Bike", 50)]);
        let raffle = Arc::new(raffle);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let raffle = raffle.clone();
                tokio::spawn(async move { raffle.cart().add_ticket(3, 1).await })
            })
            .collect();
        for joined in join_all(handles).await {
            joined.expect("join").expect("add");
        }

        let rows = store.purchases_for_user(3, TicketStatus::Cart).await.expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nothing_commits_after_gate_trips() {
        let (raffle, store, _) = test_raffle([Gift::new(1, "Bike", 50), Gift::new(2, "Lamp", 20)]);
        let raffle = Arc::new(raffle);

        let handles: Vec<_> = (0..40u64)
            .map(|i| {
                let raffle = raffle.clone();
                tokio::spawn(async move {
                    let user = i % 8 + 1;
                    let _ = raffle.cart().add_ticket(user, i % 2 + 1).await;
                    let _ = raffle.cart().checkout(user).await;
                })
            })
            .collect();

        tokio::task::yield_now().await;
        raffle.set_locked(true).await.expect("lock");
        let committed = store.applied_batches();
        let rows = store.all_purchases();

        for joined in join_all(handles).await {
            joined.expect("join");
        }
        assert_eq!(store.applied_batches(), committed);
        assert_eq!(store.all_purchases(), rows);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bulk_draw_races_with_shoppers() {
        let gifts = (1..=4).map(|id| Gift::new(id, format!("Gift {id}"), 10));
        let (raffle, store, _) = test_raffle(gifts);
        for user in 1..=4 {
            raffle.cart().add_ticket(user, user).await.expect("add");
            raffle.cart().checkout(user).await.expect("checkout");
        }
        let raffle = Arc::new(raffle);

        let shoppers: Vec<_> = (0..20u64)
            .map(|i| {
                let raffle = raffle.clone();
                tokio::spawn(async move {
                    let _ = raffle.cart().add_ticket(i % 9 + 1, i % 4 + 1).await;
                })
            })
            .collect();
        let report = raffle.draws().draw_all().await.expect("draw all");
        for joined in join_all(shoppers).await {
            joined.expect("join");
        }

        assert_eq!(report.drawn, 4, "{report:?}");
        assert_eq!(store.results().await.expect("read").len(), 4);
        // Every cart row for a drawn gift was purged by the draw commit.
        for gift in 1..=4 {
            assert!(store
                .purchases_for_gift(gift, TicketStatus::Cart)
                .await
                .expect("read")
                .is_empty());
        }
    }

    #[derive(Clone, Debug)]
    enum Action {
        Add { user: u64, gift: u64 },
        Checkout { user: u64 },
        Remove { user: u64, nth: usize },
    }

    fn action() -> impl Strategy<Value = Action> {
        prop_oneof![
            (1u64..4, 1u64..4).prop_map(|(user, gift)| Action::Add { user, gift }),
            (1u64..4).prop_map(|user| Action::Checkout { user }),
            (1u64..4, 0usize..3).prop_map(|(user, nth)| Action::Remove { user, nth }),
        ]
    }

    proptest! {
        #[test]
        fn test_counts_match_paid_quantity(actions in proptest::collection::vec(action(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async {
                let gifts = (1..4).map(|id| Gift::new(id, format!("Gift {id}"), id * 10));
                let (raffle, store, _) = test_raffle(gifts);
                for action in actions {
                    match action {
                        Action::Add { user, gift } => {
                            raffle.cart().add_ticket(user, gift).await.expect("add");
                        }
                        Action::Checkout { user } => {
                            let _ = raffle.cart().checkout(user).await;
                        }
                        Action::Remove { user, nth } => {
                            let rows = raffle.cart().cart(user).await.expect("cart");
                            if let Some(row) = rows.get(nth) {
                                raffle.cart().remove_ticket(user, row.id).await.expect("remove");
                            }
                        }
                    }
                }

                let paid = store.paid_purchases().await.expect("paid");
                let expected: u64 = paid.iter().map(|row| u64::from(row.quantity)).sum();
                let counts = raffle.ticket_counts(&[1, 2, 3]).await.expect("counts");
                assert_eq!(counts.values().sum::<u64>(), expected);

                for gift in 1..4 {
                    let pool = aggregate::weighted_pool(store.as_ref(), gift).await.expect("pool");
                    assert_eq!(pool.len() as u64, counts.get(&gift).copied().unwrap_or(0));
                }
                assert!(store.all_purchases().iter().all(|row| row.validate().is_ok()));
            });
        }
    }
}
