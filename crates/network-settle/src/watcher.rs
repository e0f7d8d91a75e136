//! Settle watcher: drives an [`InflightTracker`] from an event source and races the quiet timer,
//! the stalled-request sweep and the global timeout guard. Returning from [`SettleWatcher::run`]
//! drops every timer, so exactly one of them resolves the wait.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::PageEvents;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info};

use crate::config::SettleConfig;
use crate::events::NetworkEvent;
use crate::tracker::{InflightTracker, Transition};

/// Ordered stream of network events for one page.
#[async_trait]
pub trait NetworkEventSource: Send {
    /// Next relevant event, or `None` once the source is closed.
    async fn next_event(&mut self) -> Option<NetworkEvent>;
}

#[async_trait]
impl NetworkEventSource for PageEvents {
    async fn next_event(&mut self) -> Option<NetworkEvent> {
        loop {
            let raw = self.next().await?;
            if let Some(event) = NetworkEvent::from_cdp(&raw.method, &raw.params) {
                return Some(event);
            }
        }
    }
}

#[async_trait]
impl NetworkEventSource for mpsc::Receiver<NetworkEvent> {
    async fn next_event(&mut self) -> Option<NetworkEvent> {
        self.recv().await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The quiet window elapsed with nothing in flight.
    Settled,
    /// The global guard fired first.
    TimedOut { outstanding: usize },
    /// The event source ended before the page settled.
    SourceClosed,
}

impl SettleOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled)
    }
}

pub struct SettleWatcher {
    config: SettleConfig,
    tracker: InflightTracker,
    quiet_timer: Option<Pin<Box<Sleep>>>,
}

impl SettleWatcher {
    pub fn new(config: SettleConfig) -> Self {
        Self {
            config,
            tracker: InflightTracker::new(),
            quiet_timer: None,
        }
    }

    pub async fn run<S>(mut self, source: &mut S, timeout: Duration) -> SettleOutcome
    where
        S: NetworkEventSource + ?Sized,
    {
        let started = Instant::now();
        let sweep_every = self.config.sweep_interval();
        let mut sweep = interval_at(started + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let guard = sleep(timeout);
        tokio::pin!(guard);

        // an idle page settles after one quiet window
        self.arm_quiet_timer();

        loop {
            tokio::select! {
                maybe_event = source.next_event() => match maybe_event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!(target: "network-settle", outstanding = self.tracker.len(), "event source closed before settle");
                        return SettleOutcome::SourceClosed;
                    }
                },
                _ = quiet_elapsed(&mut self.quiet_timer) => {
                    debug!(
                        target: "network-settle",
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "network quiet; page settled"
                    );
                    return SettleOutcome::Settled;
                }
                _ = sweep.tick() => self.sweep_stalled(),
                _ = &mut guard => {
                    let outstanding = self.tracker.len();
                    info!(
                        target: "network-settle",
                        outstanding,
                        timeout_ms = timeout.as_millis() as u64,
                        "settle timeout reached; continuing with current page state"
                    );
                    for (request_id, meta) in self.tracker.outstanding() {
                        debug!(target: "network-settle", request_id, url = %meta.url, "still in flight at timeout");
                    }
                    return SettleOutcome::TimedOut { outstanding };
                }
            }
        }
    }

    fn on_event(&mut self, event: NetworkEvent) {
        match self.tracker.apply(event, Instant::now()) {
            Transition::Started => self.quiet_timer = None,
            Transition::Completed { idle: true } => self.arm_quiet_timer(),
            Transition::Completed { idle: false } | Transition::Ignored => {}
        }
    }

    fn sweep_stalled(&mut self) {
        let removed = self
            .tracker
            .sweep_stalled(Instant::now(), self.config.stall_threshold());
        if removed.is_empty() {
            return;
        }
        for (request_id, meta) in &removed {
            debug!(
                target: "network-settle",
                request_id = %request_id,
                url = %meta.url,
                age_ms = meta.started_at.elapsed().as_millis() as u64,
                "forcing completion of stalled request"
            );
        }
        if self.tracker.is_empty() {
            self.arm_quiet_timer();
        }
    }

    fn arm_quiet_timer(&mut self) {
        if self.tracker.is_empty() {
            self.quiet_timer = Some(Box::pin(sleep(self.config.quiet_window())));
        }
    }
}

async fn quiet_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(timer) => timer.as_mut().await,
        None => future::pending().await,
    }
}
