//! Protocol traffic metrics, labelled by CDP domain (`Accessibility`, `Runtime`, `Network`, ...).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{core::Collector, histogram_opts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::error;

/// Process-wide totals, readable without a prometheus registry.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub failures: u64,
    pub events: u64,
    pub avg_command_us: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static FAILURES: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static LATENCY_US: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref COMMANDS_BY_DOMAIN: IntCounterVec = IntCounterVec::new(
        Opts::new("observe_cdp_commands_total", "CDP commands sent, by domain and outcome"),
        &["domain", "outcome"]
    )
    .unwrap();
    static ref COMMAND_SECONDS: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "observe_cdp_command_seconds",
            "CDP command round-trip latency",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
        ),
        &["domain"]
    )
    .unwrap();
    static ref EVENTS_BY_DOMAIN: IntCounterVec = IntCounterVec::new(
        Opts::new("observe_cdp_events_total", "CDP events republished on the bus"),
        &["domain"]
    )
    .unwrap();
}

/// `Accessibility.getFullAXTree` -> `Accessibility`. Keeps label cardinality bounded.
fn domain_of(method: &str) -> &str {
    method.split_once('.').map_or(method, |(domain, _)| domain)
}

/// Registers the adapter collectors with an externally owned prometheus registry.
pub fn register_metrics(registry: &Registry) {
    register(registry, COMMANDS_BY_DOMAIN.clone());
    register(registry, COMMAND_SECONDS.clone());
    register(registry, EVENTS_BY_DOMAIN.clone());
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    match registry.register(Box::new(collector)) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
        Err(err) => error!(target: "cdp-adapter", ?err, "failed to register cdp metric"),
    }
}

pub fn record_command(method: &str, elapsed: Duration, ok: bool) {
    let domain = domain_of(method);
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    LATENCY_US.fetch_add(
        elapsed.as_micros().min(u64::MAX as u128) as u64,
        Ordering::Relaxed,
    );
    COMMAND_SECONDS
        .with_label_values(&[domain])
        .observe(elapsed.as_secs_f64());
    let outcome = if ok {
        "ok"
    } else {
        FAILURES.fetch_add(1, Ordering::Relaxed);
        "error"
    };
    COMMANDS_BY_DOMAIN
        .with_label_values(&[domain, outcome])
        .inc();
}

pub fn record_event(method: &str) {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    EVENTS_BY_DOMAIN.with_label_values(&[domain_of(method)]).inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    let commands = COMMANDS.load(Ordering::Relaxed);
    AdapterMetricsSnapshot {
        commands,
        failures: FAILURES.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        avg_command_us: LATENCY_US
            .load(Ordering::Relaxed)
            .checked_div(commands)
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_grouped_by_domain() {
        assert_eq!(domain_of("Accessibility.getFullAXTree"), "Accessibility");
        assert_eq!(domain_of("Runtime.evaluate"), "Runtime");
        assert_eq!(domain_of("heartbeat"), "heartbeat");
    }

    #[test]
    fn commands_are_counted_per_outcome() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        let before = snapshot();

        record_command("DOM.describeNode", Duration::from_millis(2), true);
        record_command("DOM.describeNode", Duration::from_millis(4), false);

        let after = snapshot();
        assert!(after.commands >= before.commands + 2);
        assert!(after.failures > before.failures);
        let families = registry.gather();
        let commands = families
            .iter()
            .find(|family| family.get_name() == "observe_cdp_commands_total")
            .expect("commands family");
        assert!(commands.get_metric().iter().any(|metric| metric
            .get_label()
            .iter()
            .any(|label| label.get_value() == "DOM")));
    }
}
