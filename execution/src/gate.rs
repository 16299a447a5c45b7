//! The process-wide lottery gate.
//!
//! Once tripped, every cart mutation is refused. Cart mutations run inside a
//! [`CommerceGuard`] (a shared hold on the gate). Locking flips the flag first, so new
//! mutations fail fast, then takes the exclusive side of the lane: [`LotteryGate::set_locked`]
//! returns only after in-flight mutations have committed or aborted. A lock that times out
//! while draining stays locked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::info;

use crate::locks::LockTimeout;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateError {
    Locked,
    Timeout,
}

impl From<LockTimeout> for GateError {
    fn from(_: LockTimeout) -> Self {
        GateError::Timeout
    }
}

pub struct LotteryGate {
    lane: RwLock<()>,
    locked: AtomicBool,
    timeout: Duration,
}

/// Shared hold on an open gate; commerce stays open while any guard lives.
pub struct CommerceGuard<'a> {
    _lane: RwLockReadGuard<'a, ()>,
}

impl LotteryGate {
    /// A fresh, open gate.
    pub fn new(timeout: Duration) -> Self {
        Self {
            lane: RwLock::new(()),
            locked: AtomicBool::new(false),
            timeout,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub async fn set_locked(&self, locked: bool) -> Result<(), LockTimeout> {
        let previous = self.locked.swap(locked, Ordering::SeqCst);
        if previous != locked {
            info!(from = previous, to = locked, "lottery gate changed");
        }
        if locked {
            self.drain().await?;
        }
        Ok(())
    }

    /// Waits until every guard taken before the flag flipped has been dropped.
    async fn drain(&self) -> Result<(), LockTimeout> {
        let _exclusive = tokio::time::timeout(self.timeout, self.lane.write())
            .await
            .map_err(|_| LockTimeout)?;
        Ok(())
    }

    /// Enters the commerce lane, failing fast if the gate is already tripped.
    pub async fn enter(&self) -> Result<CommerceGuard<'_>, GateError> {
        if self.is_locked() {
            return Err(GateError::Locked);
        }
        let lane = tokio::time::timeout(self.timeout, self.lane.read())
            .await
            .map_err(|_| GateError::Timeout)?;
        // Re-check under the lane: a writer may have flipped the flag while we waited.
        if self.is_locked() {
            return Err(GateError::Locked);
        }
        Ok(CommerceGuard { _lane: lane })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn starts_open_and_locks() {
        let gate = LotteryGate::new(Duration::from_millis(50));
        assert!(!gate.is_locked());
        assert!(gate.enter().await.is_ok());

        gate.set_locked(true).await.expect("lock");
        assert!(gate.is_locked());
        assert_eq!(gate.enter().await.err(), Some(GateError::Locked));

        gate.set_locked(false).await.expect("unlock");
        assert!(gate.enter().await.is_ok());
    }

    #[tokio::test]
    async fn set_locked_waits_for_in_flight_mutations() {
        let gate = Arc::new(LotteryGate::new(Duration::from_secs(2)));
        let guard = gate.enter().await.expect("enter");

        let writer = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.set_locked(true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.is_locked(), "flag flips before draining");
        assert!(!writer.is_finished(), "writer waits for the in-flight mutation");
        assert_eq!(gate.enter().await.err(), Some(GateError::Locked));

        drop(guard);
        writer.await.expect("join").expect("lock");
        assert!(gate.is_locked());
    }

    #[tokio::test]
    async fn stuck_mutation_times_out_but_gate_stays_locked() {
        let gate = LotteryGate::new(Duration::from_millis(20));
        let _guard = gate.enter().await.expect("enter");
        assert_eq!(gate.set_locked(true).await, Err(LockTimeout));
        assert!(gate.is_locked());
        assert_eq!(gate.enter().await.err(), Some(GateError::Locked));
    }

    #[tokio::test]
    async fn unlocking_does_not_wait_for_guards() {
        let gate = LotteryGate::new(Duration::from_millis(20));
        gate.set_locked(true).await.expect("lock");
        gate.set_locked(false).await.expect("unlock");
        let _guard = gate.enter().await.expect("enter");
        gate.set_locked(false).await.expect("unlock again");
    }

    #[tokio::test]
    async fn independent_gates_do_not_interfere() {
        let first = LotteryGate::new(Duration::from_millis(20));
        let second = LotteryGate::new(Duration::from_millis(20));
        first.set_locked(true).await.expect("lock");
        assert!(first.is_locked());
        assert!(!second.is_locked());
    }
}
