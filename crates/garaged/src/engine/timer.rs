//! One-shot recheck timers, at most one per door.
//!
//! Each timer is a spawned task that sleeps until its deadline and then sends
//! a [`RecheckEvent`] back to the engine. Arming a door's timer aborts the
//! previous one. An event that was already in flight when its timer got
//! replaced carries a stale generation and is dropped by [`RecheckTimers::fire`].

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::state::DoorId;

/// Capacity for the timer→engine channel
pub(super) const RECHECK_CHANNEL_SIZE: usize = 64;

/// A recheck deadline was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecheckEvent {
    pub door_id: DoorId,
    generation: u64,
}

struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

pub struct RecheckTimers {
    timers: HashMap<DoorId, ArmedTimer>,
    next_generation: u64,
    tx: mpsc::Sender<RecheckEvent>,
}

impl RecheckTimers {
    pub fn new(tx: mpsc::Sender<RecheckEvent>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            tx,
        }
    }

    /// Arm the door's timer for `deadline`, replacing any pending one.
    pub fn arm(&mut self, door_id: &DoorId, deadline: Instant) {
        self.cancel(door_id);

        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.tx.clone();
        let event = RecheckEvent {
            door_id: door_id.clone(),
            generation,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Engine gone means nothing left to recheck.
            let _ = tx.send(event).await;
        });

        debug!("[{}] Recheck armed (generation {})", door_id, generation);
        self.timers.insert(
            door_id.clone(),
            ArmedTimer {
                generation,
                deadline,
                handle,
            },
        );
    }

    /// Cancel the door's pending timer, if any.
    pub fn cancel(&mut self, door_id: &DoorId) {
        if let Some(timer) = self.timers.remove(door_id) {
            timer.handle.abort();
            debug!(
                "[{}] Recheck {} cancelled, was due in {:?}",
                door_id,
                timer.generation,
                timer.deadline.saturating_duration_since(Instant::now())
            );
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }

    /// Accept a fired event. Returns false for events of a timer that was
    /// cancelled or replaced after it fired.
    pub fn fire(&mut self, event: &RecheckEvent) -> bool {
        match self.timers.get(&event.door_id) {
            Some(timer) if timer.generation == event.generation => {
                self.timers.remove(&event.door_id);
                true
            }
            _ => {
                debug!(
                    "[{}] Dropping stale recheck (generation {})",
                    event.door_id, event.generation
                );
                false
            }
        }
    }

    /// Deadline of the door's pending timer.
    #[cfg(test)]
    pub fn deadline(&self, door_id: &DoorId) -> Option<Instant> {
        self.timers.get(door_id).map(|t| t.deadline)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for RecheckTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
