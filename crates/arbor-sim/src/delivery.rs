//! Fault-injecting delivery of lifecycle events to the projection.
//!
//! Events are never lost: the real event source does not drop notifications,
//! so the modelled faults are delay, duplication and reordering only.

use arbor_core::LifecycleEvent;
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFaults {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of enqueued events delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance of shuffling the batch that becomes ready each round.
    pub reorder_rate_percent: u8,
}

impl Default for DeliveryFaults {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 10,
        }
    }
}

impl DeliveryFaults {
    /// In-order, immediate, exactly-once delivery.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_delay_rounds: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingEvent {
    deliver_at_round: u64,
    event: LifecycleEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub duplicated: bool,
    pub delay_rounds: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverOutcome {
    /// Events to apply this round, in order.
    pub delivered: Vec<LifecycleEvent>,
    /// Whether the ready batch was shuffled.
    pub reordered: bool,
}

/// Deterministic in-flight event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryQueue {
    pending: Vec<PendingEvent>,
    faults: DeliveryFaults,
}

impl DeliveryQueue {
    #[must_use]
    pub const fn new(faults: DeliveryFaults) -> Self {
        Self {
            pending: Vec::new(),
            faults,
        }
    }

    #[must_use]
    pub const fn faults(&self) -> DeliveryFaults {
        self.faults
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue `event` published during `round`.
    pub fn enqueue(
        &mut self,
        event: LifecycleEvent,
        round: u64,
        rng: &mut DeterministicRng,
    ) -> EnqueueOutcome {
        let delay_bound = u64::from(self.faults.max_delay_rounds).saturating_add(1);
        let delay_rounds =
            u8::try_from(rng.next_bounded(delay_bound)).unwrap_or(self.faults.max_delay_rounds);
        let deliver_at_round = round.saturating_add(u64::from(delay_rounds));
        self.pending.push(PendingEvent {
            deliver_at_round,
            event,
        });

        let duplicated = rng.hit_rate_percent(self.faults.duplicate_rate_percent);
        if duplicated {
            // The copy gets its own delay; it may land before the first one.
            let extra = rng.next_bounded(delay_bound);
            self.pending.push(PendingEvent {
                deliver_at_round: round.saturating_add(extra),
                event,
            });
        }

        EnqueueOutcome {
            duplicated,
            delay_rounds,
        }
    }

    /// Take every event due by `round`, possibly shuffled.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome {
        let (ready, future): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|pending| pending.deliver_at_round <= round);
        self.pending = future;

        let mut delivered: Vec<LifecycleEvent> = ready.into_iter().map(|p| p.event).collect();
        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.faults.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut delivered);
        }

        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Take everything still in flight, regardless of delay.
    pub fn drain_all(&mut self, rng: &mut DeterministicRng) -> DeliverOutcome {
        self.deliver_ready(u64::MAX, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::NodeHandle;

    fn added(raw: u64) -> LifecycleEvent {
        LifecycleEvent::Added(NodeHandle::from_raw(raw))
    }

    #[test]
    fn fault_free_queue_is_fifo_and_immediate() {
        let mut queue = DeliveryQueue::new(DeliveryFaults::none());
        let mut rng = DeterministicRng::new(1);
        for raw in 1..=5 {
            let outcome = queue.enqueue(added(raw), 0, &mut rng);
            assert_eq!(outcome, EnqueueOutcome { duplicated: false, delay_rounds: 0 });
        }

        let out = queue.deliver_ready(0, &mut rng);
        assert!(!out.reordered);
        assert_eq!(out.delivered, (1..=5).map(added).collect::<Vec<_>>());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn delayed_events_wait_for_their_round() {
        let faults = DeliveryFaults {
            max_delay_rounds: 3,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
        };
        let mut queue = DeliveryQueue::new(faults);
        let mut rng = DeterministicRng::new(2);
        let delays: Vec<u8> = (0..20)
            .map(|raw| queue.enqueue(added(raw), 0, &mut rng).delay_rounds)
            .collect();
        assert!(delays.iter().all(|&d| d <= 3));

        let mut seen = 0;
        for round in 0..=3 {
            let due = delays.iter().filter(|&&d| u64::from(d) == round).count();
            assert_eq!(queue.deliver_ready(round, &mut rng).delivered.len(), due);
            seen += due;
        }
        assert_eq!(seen, 20);
    }

    #[test]
    fn duplicates_are_eventually_delivered_twice() {
        let faults = DeliveryFaults {
            max_delay_rounds: 1,
            duplicate_rate_percent: 100,
            reorder_rate_percent: 0,
        };
        let mut queue = DeliveryQueue::new(faults);
        let mut rng = DeterministicRng::new(3);
        assert!(queue.enqueue(added(7), 0, &mut rng).duplicated);
        let out = queue.drain_all(&mut rng);
        assert_eq!(out.delivered, vec![added(7), added(7)]);
    }

    #[test]
    fn nothing_is_ever_lost() {
        let mut queue = DeliveryQueue::new(DeliveryFaults {
            max_delay_rounds: 4,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 100,
        });
        let mut rng = DeterministicRng::new(4);
        for raw in 0..40 {
            let _ = queue.enqueue(added(raw), raw / 10, &mut rng);
        }
        let mut delivered = Vec::new();
        for round in 0..8 {
            delivered.extend(queue.deliver_ready(round, &mut rng).delivered);
        }
        delivered.extend(queue.drain_all(&mut rng).delivered);
        delivered.sort_by_key(|event| event.node());
        assert_eq!(delivered, (0..40).map(added).collect::<Vec<_>>());
    }
}
