//! Records and read-side projections for the raffle engine.
//!
//! The [`raffle`] module holds the persisted records (gifts, ticket line-items, draw results);
//! [`api`] holds the derived views handed to reporting callers.

pub mod api;
pub mod raffle;

pub use raffle::{
    Amount, Contact, Gift, GiftId, LotteryResult, ParseError, Purchase, PurchaseId,
    PurchaseInvariantError, QuantityAction, ResultId, Role, TicketStatus, TimestampMs, UserId,
};
