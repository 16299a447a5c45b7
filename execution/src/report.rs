use raffle_types::api::{AwaitingGift, LotterySummary, ResultView};
use raffle_types::{Gift, GiftId, LotteryResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::aggregate;
use crate::draw::Drawn;
use crate::error::RaffleError;
use crate::gate::LotteryGate;
use crate::notify::UserDirectory;
use crate::state::Store;

/// Read-only views over results and the overall lottery state.
pub struct Reports<S: Store, D: UserDirectory> {
    store: Arc<S>,
    gate: Arc<LotteryGate>,
    directory: Arc<D>,
}

impl<S: Store, D: UserDirectory> Reports<S, D> {
    pub fn new(store: Arc<S>, gate: Arc<LotteryGate>, directory: Arc<D>) -> Self {
        Self {
            store,
            gate,
            directory,
        }
    }

    /// The result for `gift_id`, or `None` if it has not been drawn.
    pub async fn result_for_gift(&self, gift_id: GiftId) -> Result<Option<ResultView>, RaffleError> {
        let Some(result) = self.store.result(gift_id).await? else {
            return Ok(None);
        };
        let gift = self.store.gift(gift_id).await?;
        let counts = aggregate::ticket_counts(self.store.as_ref(), &[gift_id]).await?;
        let participants = participants(&counts, gift_id);
        Ok(Some(self.view(result, gift.as_ref(), participants)))
    }

    /// View of a draw that has just committed, built without reading the store again.
    pub fn drawn_view(&self, drawn: &Drawn) -> ResultView {
        self.view(drawn.result.clone(), Some(&drawn.gift), drawn.pool_size)
    }

    /// Every result, earliest draw first.
    pub async fn all_results(&self) -> Result<Vec<ResultView>, RaffleError> {
        let mut results = self.store.results().await?;
        results.sort_by_key(|result| (result.drawn_at_ms, result.id));

        let gifts: HashMap<GiftId, Gift> = self
            .store
            .gifts()
            .await?
            .into_iter()
            .map(|gift| (gift.id, gift))
            .collect();
        let ids: Vec<GiftId> = results.iter().map(|result| result.gift_id).collect();
        let counts = aggregate::ticket_counts(self.store.as_ref(), &ids).await?;

        Ok(results
            .into_iter()
            .map(|result| {
                let gift = gifts.get(&result.gift_id);
                let participants = participants(&counts, result.gift_id);
                self.view(result, gift, participants)
            })
            .collect())
    }

    pub fn is_lottery_completed(&self) -> bool {
        self.gate.is_locked()
    }

    pub async fn summary(&self) -> Result<LotterySummary, RaffleError> {
        let gifts = self.store.gifts().await?;
        let ids: Vec<GiftId> = gifts.iter().map(|gift| gift.id).collect();
        let counts = aggregate::ticket_counts(self.store.as_ref(), &ids).await?;
        let drawn: Vec<GiftId> = self
            .store
            .results()
            .await?
            .into_iter()
            .map(|result| result.gift_id)
            .collect();
        let revenue = aggregate::revenue_and_participants(self.store.as_ref()).await?;

        let drawn_gifts = gifts.iter().filter(|gift| drawn.contains(&gift.id)).count();
        let awaiting_gifts = gifts
            .iter()
            .filter(|gift| is_awaiting(gift, &counts, &drawn))
            .count();
        Ok(LotterySummary {
            total_gifts: gifts.len() as u64,
            drawn_gifts: drawn_gifts as u64,
            awaiting_gifts: awaiting_gifts as u64,
            total_revenue: revenue.total_income,
            lottery_completed: self.gate.is_locked(),
        })
    }

    /// Gifts with paid tickets and no result yet, by gift id.
    pub async fn gifts_awaiting_draw(&self) -> Result<Vec<AwaitingGift>, RaffleError> {
        let gifts = self.store.gifts().await?;
        let ids: Vec<GiftId> = gifts.iter().map(|gift| gift.id).collect();
        let counts = aggregate::ticket_counts(self.store.as_ref(), &ids).await?;
        let drawn: Vec<GiftId> = self
            .store
            .results()
            .await?
            .into_iter()
            .map(|result| result.gift_id)
            .collect();

        Ok(gifts
            .into_iter()
            .filter(|gift| is_awaiting(gift, &counts, &drawn))
            .map(|gift| {
                let tickets = counts.get(&gift.id).copied().unwrap_or(0);
                AwaitingGift { gift, tickets }
            })
            .collect())
    }

    fn view(
        &self,
        result: LotteryResult,
        gift: Option<&Gift>,
        participants: u64,
    ) -> ResultView {
        let contact = self.directory.contact(result.winner);
        ResultView {
            id: result.id,
            gift_id: result.gift_id,
            gift_name: gift.map(|g| g.name.clone()).unwrap_or_default(),
            gift_price: gift.map_or(0, |g| g.price),
            category: gift.map(|g| g.category.clone()).unwrap_or_default(),
            winner_user_id: result.winner,
            winner_name: contact.as_ref().map(|c| c.name.clone()),
            winner_email: contact.map(|c| c.email),
            drawn_at_ms: result.drawn_at_ms,
            participants,
        }
    }
}

fn participants(counts: &BTreeMap<GiftId, u64>, gift_id: GiftId) -> u64 {
    counts.get(&gift_id).copied().unwrap_or(0)
}

fn is_awaiting(gift: &Gift, counts: &BTreeMap<GiftId, u64>, drawn: &[GiftId]) -> bool {
    !gift.lottery_completed
        && !drawn.contains(&gift.id)
        && counts.get(&gift.id).is_some_and(|tickets| *tickets > 0)
}
