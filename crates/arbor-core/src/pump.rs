//! Delivery of queued lifecycle events into a projection.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, info};

use crate::engine::TreeProjection;
use crate::source::{LifecycleEvent, SourceGraph};

/// Counts from one pump session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    /// Events handed to the engine.
    pub applied: u64,
    /// Of those, events that changed the projection.
    pub structural: u64,
}

impl PumpReport {
    fn absorb(&mut self, other: Self) {
        self.applied += other.applied;
        self.structural += other.structural;
    }
}

/// Feeds events from a channel into a [`TreeProjection`], in channel order.
pub struct EventPump<S> {
    engine: Arc<TreeProjection<S>>,
    events: Receiver<LifecycleEvent>,
}

impl<S: SourceGraph + 'static> EventPump<S> {
    pub const fn new(engine: Arc<TreeProjection<S>>, events: Receiver<LifecycleEvent>) -> Self {
        Self { engine, events }
    }

    /// Apply everything already queued without blocking.
    pub fn drain(&self) -> PumpReport {
        let mut report = PumpReport::default();
        for event in self.events.try_iter() {
            report.absorb(self.apply(event));
        }
        report
    }

    /// Block, applying events until every sender has hung up.
    pub fn run(self) -> PumpReport {
        let mut report = PumpReport::default();
        while let Ok(event) = self.events.recv() {
            report.absorb(self.apply(event));
        }
        info!(applied = report.applied, structural = report.structural, "event source closed");
        report
    }

    /// Run the pump on a dedicated named thread.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to spawn the thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<PumpReport>> {
        thread::Builder::new()
            .name("arbor-pump".to_string())
            .spawn(move || self.run())
    }

    fn apply(&self, event: LifecycleEvent) -> PumpReport {
        let outcome = self.engine.apply(event);
        debug!(%event, %outcome, "pumped");
        PumpReport {
            applied: 1,
            structural: u64::from(outcome.is_structural()),
        }
    }
}
