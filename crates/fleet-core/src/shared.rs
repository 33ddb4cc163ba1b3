use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::error::CommandError;
use crate::fleet::{AdvanceReport, CommandOutcome, Fleet};
use crate::machine::MachineAction;
use crate::snapshot::FleetSnapshot;

/// Cloneable handle to the process's single [`Fleet`].
///
/// Every operation holds the lock for its whole duration, so an advance is
/// never observed half-applied by a snapshot or command on another thread.
#[derive(Clone)]
pub struct SharedFleet {
    inner: Arc<Mutex<Fleet>>,
}

impl SharedFleet {
    pub fn new(fleet: Fleet) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fleet)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Fleet> {
        // A panic mid-update can at worst leave one machine's readings stale.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn advance(&self) -> AdvanceReport {
        self.lock().advance()
    }

    pub fn advance_to(&self, now: Instant) -> AdvanceReport {
        self.lock().advance_to(now)
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        self.lock().snapshot()
    }

    /// Advance and read back under a single lock acquisition.
    pub fn advance_and_snapshot(&self) -> (AdvanceReport, FleetSnapshot) {
        let mut fleet = self.lock();
        let report = fleet.advance();
        (report, fleet.snapshot())
    }

    pub fn command(
        &self,
        index: usize,
        action: MachineAction,
    ) -> Result<CommandOutcome, CommandError> {
        self.lock().command(index, action)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
