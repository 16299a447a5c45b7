//! Test doubles and builders shared by unit tests and downstream crates (`mocks` feature).

use crate::notify::{Notifier, NotifyError, StaticDirectory, WinnerNotice};
use crate::state::MemoryStore;
use crate::{EngineConfig, Raffle};
use raffle_types::{Contact, Gift, GiftId, Purchase, PurchaseId, UserId};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A paid row holding `quantity` tickets.
pub fn paid(id: PurchaseId, user: UserId, gift: GiftId, quantity: u32) -> Purchase {
    Purchase {
        quantity,
        ..Purchase::cart(id, user, gift)
    }
    .paid(1_000)
}

/// A contact whose email is derived from `name`.
pub fn contact(name: &str) -> Contact {
    Contact {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_ascii_lowercase()),
    }
}

/// Collects every notice it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<WinnerNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<WinnerNotice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Polls until at least `count` notices arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<WinnerNotice> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notices = self.notices();
            if notices.len() >= count || tokio::time::Instant::now() >= deadline {
                return notices;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Notifier for RecordingNotifier {
    async fn notify_winner(&self, notice: WinnerNotice) -> Result<(), NotifyError> {
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
        Ok(())
    }
}

/// Rejects every notice.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    async fn notify_winner(&self, _notice: WinnerNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("mailbox unavailable".to_string()))
    }
}

pub type TestRaffle = Raffle<MemoryStore, RecordingNotifier, StaticDirectory>;

/// A raffle over an in-memory store seeded with `gifts`, short lock timeouts, and a directory
/// that knows users 1 through 9.
pub fn test_raffle(
    gifts: impl IntoIterator<Item = Gift>,
) -> (TestRaffle, Arc<MemoryStore>, Arc<RecordingNotifier>) {
    let store = Arc::new(MemoryStore::with_gifts(gifts));
    let (raffle, notifier) = raffle_over(store.clone());
    (raffle, store, notifier)
}

/// A second engine over an existing store, with its own gate and lock tables.
pub fn raffle_over(store: Arc<MemoryStore>) -> (TestRaffle, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let directory: StaticDirectory = (1..10)
        .map(|user| (user, contact(&format!("user{user}"))))
        .collect();
    let config = EngineConfig {
        lock_timeout: Duration::from_millis(500),
        draw_retry_attempts: 2,
        draw_retry_backoff: Duration::from_millis(2),
    };
    let raffle = Raffle::new(store, notifier.clone(), Arc::new(directory), config);
    (raffle, notifier)
}
