//! SoulBrowser network settle detection.
//!
//! Decides when a page has stopped loading: zero in-flight requests (streaming connections
//! excluded) held for a full quiet window. Requests stuck for longer than the stall threshold are
//! force-completed by a periodic sweep, and a global guard bounds the whole wait. Settling is
//! best-effort: [`await_settled`] never fails, it reports how the wait ended.

pub mod config;
pub mod events;
pub mod tracker;
pub mod watcher;

use std::time::Duration;

use cdp_adapter::PageDriver;
use serde_json::json;
use tracing::{debug, instrument};

pub use config::SettleConfig;
pub use events::{NetworkEvent, ResourceType};
pub use tracker::{InflightTracker, RequestMeta, Transition};
pub use watcher::{NetworkEventSource, SettleOutcome, SettleWatcher};

/// Waits until `page` is network-quiet or `timeout` (default `config.default_timeout_ms`) elapses.
#[instrument(level = "debug", skip_all, fields(page = %page.page_id()))]
pub async fn await_settled<P>(
    page: &P,
    config: &SettleConfig,
    timeout: Option<Duration>,
) -> SettleOutcome
where
    P: PageDriver + ?Sized,
{
    let timeout = config.timeout_or_default(timeout);

    match page.has_document().await {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            debug!(target: "network-settle", "no document committed yet; waiting for DOMContentLoaded");
            if let Err(err) = page.wait_for_dom_ready(timeout).await {
                debug!(target: "network-settle", %err, "DOMContentLoaded wait failed");
            }
        }
    }

    // subscribe before enabling so no event emitted in between is lost
    let mut events = page.subscribe();
    enable_domains(page).await;

    SettleWatcher::new(config.clone())
        .run(&mut events, timeout)
        .await
}

async fn enable_domains<P: PageDriver + ?Sized>(page: &P) {
    let commands = [
        ("Network.enable", json!({})),
        ("Page.enable", json!({})),
        (
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
                "filter": [
                    { "type": "worker", "exclude": true },
                    { "type": "shared_worker", "exclude": true },
                ],
            }),
        ),
    ];
    for (method, params) in commands {
        if let Err(err) = page.send_command(method, params).await {
            debug!(target: "network-settle", method, %err, "failed to enable domain before settle wait");
        }
    }
}
