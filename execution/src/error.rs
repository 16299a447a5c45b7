use raffle_types::{GiftId, PurchaseId, TicketStatus};
use thiserror::Error as ThisError;

use crate::gate::GateError;
use crate::locks::LockTimeout;
use crate::state::StoreError;

/// Every failure the cart and draw engine can surface.
#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum RaffleError {
    #[error("the lottery has already taken place; ticket sales are closed")]
    LotteryLocked,
    #[error("gift {0} has already been drawn")]
    GiftUnavailable(GiftId),
    #[error("a winner has already been drawn for gift {0}")]
    AlreadyDrawn(GiftId),
    #[error("gift {0} not found")]
    GiftNotFound(GiftId),
    #[error("purchase {0} not found")]
    NotFound(PurchaseId),
    #[error("purchase {purchase} is {status}, expected cart")]
    WrongState {
        purchase: PurchaseId,
        status: TicketStatus,
    },
    #[error("cart is empty")]
    EmptyCart,
    #[error("gift {0} has no paid tickets")]
    NoParticipants(GiftId),
    #[error("quantity cannot drop below 1; remove the ticket instead")]
    BelowMinimum,
    /// Lock wait exceeded its bound; safe to retry.
    #[error("resource busy, retry later")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RaffleError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RaffleError::LotteryLocked => "lottery_locked",
            RaffleError::GiftUnavailable(_) => "gift_unavailable",
            RaffleError::AlreadyDrawn(_) => "already_drawn",
            RaffleError::GiftNotFound(_) => "gift_not_found",
            RaffleError::NotFound(_) => "not_found",
            RaffleError::WrongState { .. } => "wrong_state",
            RaffleError::EmptyCart => "empty_cart",
            RaffleError::NoParticipants(_) => "no_participants",
            RaffleError::BelowMinimum => "below_minimum",
            RaffleError::Busy => "busy",
            RaffleError::Store(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RaffleError::Busy => true,
            RaffleError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<LockTimeout> for RaffleError {
    fn from(_: LockTimeout) -> Self {
        RaffleError::Busy
    }
}

impl From<GateError> for RaffleError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Locked => RaffleError::LotteryLocked,
            GateError::Timeout => RaffleError::Busy,
        }
    }
}
