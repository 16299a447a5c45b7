//! The draw engine: Undrawn → Drawn, once per gift.
//!
//! A draw builds the weighted pool from paid tickets, picks one slot with
//! [`crate::rng::unbiased_index`], and commits three things in a single batch: the result row,
//! the gift's `lottery_completed` flag, and the removal of any cart rows still pointing at the
//! gift. Draws of the same gift serialize on the gift lock, and the store's unique constraint
//! on results backs that up across processes.
//!
//! Winner notification happens after the commit on a detached task; its failure is logged and
//! never affects the result.

use raffle_types::api::{DrawOutcome, DrawReport, GiftDrawReport, SkipReason};
use raffle_types::{Gift, GiftId, LotteryResult, TicketStatus};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregate;
use crate::backoff::{jittered_backoff, next_backoff};
use crate::error::RaffleError;
use crate::gate::LotteryGate;
use crate::locks::KeyedLocks;
use crate::notify::{Notifier, UserDirectory, WinnerNotice};
use crate::now_ms;
use crate::rng;
use crate::state::{Op, Store, StoreError};

/// How a bulk draw treats retryable failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub attempts: u32,
    /// Base delay before the first retry; doubles per attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// A committed draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Drawn {
    pub result: LotteryResult,
    /// The gift as committed, flag set.
    pub gift: Gift,
    pub pool_size: u64,
}

pub struct DrawEngine<S: Store, N: Notifier, D: UserDirectory> {
    store: Arc<S>,
    gate: Arc<LotteryGate>,
    gifts: Arc<KeyedLocks<GiftId>>,
    notifier: Arc<N>,
    directory: Arc<D>,
    retry: RetryPolicy,
}

impl<S: Store, N: Notifier, D: UserDirectory> DrawEngine<S, N, D> {
    pub fn new(
        store: Arc<S>,
        gate: Arc<LotteryGate>,
        gifts: Arc<KeyedLocks<GiftId>>,
        notifier: Arc<N>,
        directory: Arc<D>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            gate,
            gifts,
            notifier,
            directory,
            retry,
        }
    }

    /// Draws a single gift.
    ///
    /// # Errors
    ///
    /// [`RaffleError::AlreadyDrawn`] when a result exists (checked before anything else),
    /// [`RaffleError::GiftNotFound`], [`RaffleError::NoParticipants`] for an empty pool, and
    /// [`RaffleError::Busy`] when the gift lock cannot be taken in time.
    pub async fn draw_one(&self, gift_id: GiftId) -> Result<Drawn, RaffleError> {
        let drawn = self.draw_gift(gift_id).await?;
        self.dispatch_notice(&drawn.gift, &drawn.result);
        Ok(drawn)
    }

    /// Trips the gate, then draws every gift in id order.
    ///
    /// Per-gift failures do not stop the run; they are recorded in the report. Retryable
    /// failures are retried with jittered backoff. The gate stays locked afterwards whatever
    /// the outcomes.
    pub async fn draw_all(&self) -> Result<DrawReport, RaffleError> {
        self.trip_gate().await?;
        let gifts = self.store.gifts().await?;
        info!(gifts = gifts.len(), "bulk draw started");

        let mut report = DrawReport::default();
        for gift in gifts {
            let outcome = self.draw_with_retry(gift.id).await;
            report.push(GiftDrawReport {
                gift_id: gift.id,
                gift_name: gift.name,
                outcome,
            });
        }
        report.lottery_locked = self.gate.is_locked();
        info!(
            drawn = report.drawn,
            skipped = report.skipped,
            failed = report.failed,
            "bulk draw finished"
        );
        Ok(report)
    }

    /// The flag flips on the first attempt; retries only wait for in-flight cart mutations to
    /// drain. On [`RaffleError::Busy`] the gate is still locked and nothing was drawn.
    async fn trip_gate(&self) -> Result<(), RaffleError> {
        let mut backoff = self.retry.backoff;
        let mut attempt = 0;
        loop {
            match self.gate.set_locked(true).await {
                Ok(()) => return Ok(()),
                Err(_) if attempt < self.retry.attempts => {
                    attempt += 1;
                    warn!(attempt, "gate busy; retrying");
                    tokio::time::sleep(jittered_backoff(&mut OsRng, backoff)).await;
                    backoff = next_backoff(backoff);
                }
                Err(timeout) => return Err(timeout.into()),
            }
        }
    }

    async fn draw_with_retry(&self, gift_id: GiftId) -> DrawOutcome {
        let mut backoff = self.retry.backoff;
        let mut attempt = 0;
        loop {
            let err = match self.draw_one(gift_id).await {
                Ok(drawn) => {
                    return DrawOutcome::Drawn {
                        winner: drawn.result.winner,
                        pool_size: drawn.pool_size,
                    }
                }
                Err(err) => err,
            };
            match err {
                RaffleError::AlreadyDrawn(_) => {
                    return DrawOutcome::Skipped {
                        reason: SkipReason::AlreadyDrawn,
                    }
                }
                RaffleError::NoParticipants(_) => {
                    return DrawOutcome::Skipped {
                        reason: SkipReason::NoParticipants,
                    }
                }
                err if err.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    warn!(gift_id, attempt, ?err, "draw failed; retrying");
                    tokio::time::sleep(jittered_backoff(&mut OsRng, backoff)).await;
                    backoff = next_backoff(backoff);
                }
                err => {
                    warn!(gift_id, ?err, "draw failed");
                    return DrawOutcome::Failed {
                        error: err.to_string(),
                    };
                }
            }
        }
    }

    async fn draw_gift(&self, gift_id: GiftId) -> Result<Drawn, RaffleError> {
        let _gift_lock = self.gifts.acquire(gift_id).await?;

        if self.store.result(gift_id).await?.is_some() {
            return Err(RaffleError::AlreadyDrawn(gift_id));
        }
        let gift = self
            .store
            .gift(gift_id)
            .await?
            .ok_or(RaffleError::GiftNotFound(gift_id))?;
        if gift.lottery_completed {
            return Err(RaffleError::AlreadyDrawn(gift_id));
        }

        let pool = aggregate::weighted_pool(self.store.as_ref(), gift_id).await?;
        let index = rng::draw_index(pool.len()).ok_or(RaffleError::NoParticipants(gift_id))?;
        let winner = pool[index];

        let result = LotteryResult {
            id: self.store.next_result_id(),
            gift_id,
            winner,
            drawn_at_ms: now_ms(),
        };
        let stale = self
            .store
            .purchases_for_gift(gift_id, TicketStatus::Cart)
            .await?;
        let mut ops = Vec::with_capacity(stale.len() + 2);
        ops.push(Op::InsertResult(result.clone()));
        let gift = Gift {
            lottery_completed: true,
            ..gift
        };
        ops.push(Op::PutGift(gift.clone()));
        ops.extend(stale.iter().map(|row| Op::DeletePurchase(row.id)));

        match self.store.apply(ops).await {
            Ok(()) => {}
            // Another writer recorded a result for this gift first.
            Err(StoreError::Conflict(_)) => return Err(RaffleError::AlreadyDrawn(gift_id)),
            Err(err) => return Err(err.into()),
        }

        let pool_size = pool.len() as u64;
        info!(
            gift_id,
            winner,
            pool_size,
            purged_cart_rows = stale.len(),
            "lottery drawn"
        );
        Ok(Drawn {
            result,
            gift,
            pool_size,
        })
    }

    fn dispatch_notice(&self, gift: &Gift, result: &LotteryResult) {
        let Some(contact) = self.directory.contact(result.winner) else {
            warn!(
                gift_id = gift.id,
                winner = result.winner,
                "winner has no contact; notification skipped"
            );
            return;
        };
        let notice = WinnerNotice {
            email: contact.email,
            winner_name: contact.name,
            gift_name: gift.name.clone(),
            gift_price: gift.price,
        };
        let notifier = self.notifier.clone();
        let gift_id = gift.id;
        tokio::spawn(async move {
            if let Err(err) = notifier.notify_winner(notice).await {
                warn!(gift_id, ?err, "winner notification failed");
            }
        });
    }
}
