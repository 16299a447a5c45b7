//! Raffle records: gifts, ticket line-items, and draw results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;


pub type GiftId = u64;
pub type UserId = u64;
pub type PurchaseId = u64;
pub type ResultId = u64;

/// Money in minor currency units (e.g. cents).
pub type Amount = u64;

/// Milliseconds since the unix epoch.
pub type TimestampMs = u64;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown ticket status: {0}")]
    TicketStatus(String),
    #[error("unknown role: {0}")]
    Role(String),
}

/// Lifecycle of a ticket line-item. `Paid` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Cart,
    Paid,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Cart => "cart",
            TicketStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cart" => Ok(TicketStatus::Cart),
            "paid" => Ok(TicketStatus::Paid),
            other => Err(ParseError::TicketStatus(other.to_string())),
        }
    }
}

/// Role asserted by the identity provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Manager,
}

impl Role {
    pub fn is_manager(&self) -> bool {
        matches!(self, Role::Manager)
    }
}

impl FromStr for Role {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "manager" => Ok(Role::Manager),
            _ => Err(ParseError::Role(s.to_string())),
        }
    }
}

/// Direction of a single-step cart quantity change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityAction {
    Increase,
    Decrease,
}

/// A donated item that participants buy tickets against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gift {
    pub id: GiftId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub donor: String,
    /// Unit ticket price.
    pub price: Amount,
    /// Set once by the draw engine, never cleared.
    #[serde(default)]
    pub lottery_completed: bool,
}

impl Gift {
    pub fn new(id: GiftId, name: impl Into<String>, price: Amount) -> Self {
        Self {
            id,
            name: name.into(),
            category: String::new(),
            donor: String::new(),
            price,
            lottery_completed: false,
        }
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum PurchaseInvariantError {
    #[error("purchase {id} has zero quantity")]
    ZeroQuantity { id: PurchaseId },
    #[error("purchase {id} is paid but has no paid_at timestamp")]
    PaidWithoutTimestamp { id: PurchaseId },
    #[error("purchase {id} is in cart but carries a paid_at timestamp")]
    CartWithTimestamp { id: PurchaseId },
}

/// A ticket line-item: one user's claim of `quantity` tickets on one gift.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub gift_id: GiftId,
    pub user_id: UserId,
    pub quantity: u32,
    pub status: TicketStatus,
    pub paid_at_ms: Option<TimestampMs>,
}

impl Purchase {
    /// A fresh cart row holding a single ticket.
    pub fn cart(id: PurchaseId, user_id: UserId, gift_id: GiftId) -> Self {
        Self {
            id,
            gift_id,
            user_id,
            quantity: 1,
            status: TicketStatus::Cart,
            paid_at_ms: None,
        }
    }

    pub fn is_cart(&self) -> bool {
        self.status == TicketStatus::Cart
    }

    pub fn is_paid(&self) -> bool {
        self.status == TicketStatus::Paid
    }

    /// Copy of this row moved to `Paid` at `now_ms`.
    pub fn paid(&self, now_ms: TimestampMs) -> Self {
        Self {
            status: TicketStatus::Paid,
            paid_at_ms: Some(now_ms),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), PurchaseInvariantError> {
        if self.quantity == 0 {
            return Err(PurchaseInvariantError::ZeroQuantity { id: self.id });
        }
        match (self.status, self.paid_at_ms) {
            (TicketStatus::Paid, None) => {
                Err(PurchaseInvariantError::PaidWithoutTimestamp { id: self.id })
            }
            (TicketStatus::Cart, Some(_)) => {
                Err(PurchaseInvariantError::CartWithTimestamp { id: self.id })
            }
            _ => Ok(()),
        }
    }
}

/// The single winner recorded for a gift.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryResult {
    pub id: ResultId,
    pub gift_id: GiftId,
    pub winner: UserId,
    pub drawn_at_ms: TimestampMs,
}

/// Contact details supplied by the user directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}
