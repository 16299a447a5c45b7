//! Collaborators the draw engine talks to after a winner is committed.

use raffle_types::{Amount, Contact, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error as ThisError;
use tracing::info;

/// Payload handed to the notification sender for a freshly drawn winner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WinnerNotice {
    pub email: String,
    pub winner_name: String,
    pub gift_name: String,
    pub gift_price: Amount,
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// Sends winner notifications. Failures are reported, never retried by the engine.
pub trait Notifier: Send + Sync + 'static {
    fn notify_winner(
        &self,
        notice: WinnerNotice,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Resolves user ids to contact details.
pub trait UserDirectory: Send + Sync + 'static {
    fn contact(&self, user: UserId) -> Option<Contact>;
}

/// Writes notices to the log instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify_winner(&self, notice: WinnerNotice) -> Result<(), NotifyError> {
        info!(
            email = %notice.email,
            winner = %notice.winner_name,
            gift = %notice.gift_name,
            price = notice.gift_price,
            "winner notification"
        );
        Ok(())
    }
}

/// Fixed in-process directory, populated once at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    contacts: HashMap<UserId, Contact>,
}

impl StaticDirectory {
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

impl FromIterator<(UserId, Contact)> for StaticDirectory {
    fn from_iter<T: IntoIterator<Item = (UserId, Contact)>>(iter: T) -> Self {
        Self {
            contacts: iter.into_iter().collect(),
        }
    }
}

impl UserDirectory for StaticDirectory {
    fn contact(&self, user: UserId) -> Option<Contact> {
        self.contacts.get(&user).cloned()
    }
}
