//! Settle-then-snapshot observation of a single page.

use std::collections::HashSet;
use std::time::Duration;

use cdp_adapter::PageDriver;
use network_settle::{await_settled, SettleConfig, SettleOutcome};
use perceiver_structural::{
    get_accessibility_tree_with, inject_urls, injection, xpath_for_backend_node, SnapshotOptions,
    TreeResult, UrlPath,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::ObserveConfig;
use crate::errors::ObserveError;

/// A page snapshot together with how the preceding settle wait ended.
#[derive(Clone, Debug)]
pub struct Observation {
    pub settle: SettleOutcome,
    pub tree: TreeResult,
    pub elapsed: Duration,
}

impl Observation {
    pub fn settled(&self) -> bool {
        matches!(self.settle, SettleOutcome::Settled)
    }
}

/// Locator for an element picked from the simplified tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSelector {
    pub element_id: i64,
    /// `xpath=` prefixed locator.
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub struct Observer<P: PageDriver> {
    page: P,
    settle: SettleConfig,
    snapshot: SnapshotOptions,
}

impl<P: PageDriver> Observer<P> {
    pub fn new(page: P, config: &ObserveConfig) -> Self {
        Self {
            page,
            settle: config.settle.clone(),
            snapshot: config.snapshot.clone(),
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    /// Waits for the page to go network-quiet. `timeout` overrides the configured guard.
    pub async fn settle(&self, timeout: Option<Duration>) -> SettleOutcome {
        let outcome = await_settled(&self.page, &self.settle, timeout).await;
        match &outcome {
            SettleOutcome::Settled => {
                debug!(target: "observe", page = %self.page.page_id(), "page settled");
            }
            SettleOutcome::TimedOut { outstanding } => {
                info!(
                    target: "observe",
                    page = %self.page.page_id(),
                    outstanding = *outstanding,
                    "settle wait timed out; observing anyway"
                );
            }
            SettleOutcome::SourceClosed => {
                warn!(
                    target: "observe",
                    page = %self.page.page_id(),
                    "page event stream closed during settle wait"
                );
            }
        }
        outcome
    }

    /// Settles the page, then takes a structural snapshot.
    ///
    /// Settling is best effort; only a failed snapshot is an error.
    #[instrument(level = "debug", skip_all, fields(page = %self.page.page_id()))]
    pub async fn observe(&self) -> Result<Observation, ObserveError> {
        let started = Instant::now();
        let settle = self.settle(None).await;
        let tree = get_accessibility_tree_with(&self.page, &self.snapshot).await?;
        Ok(Observation {
            settle,
            tree,
            elapsed: started.elapsed(),
        })
    }

    /// Maps element ids chosen from `observation` (plus every iframe it listed) to selectors.
    ///
    /// Ids are treated as backend node ids. Ids that do not resolve to an xpath are skipped.
    pub async fn element_selectors(
        &self,
        observation: &Observation,
        element_ids: &[i64],
    ) -> Vec<ElementSelector> {
        let iframe_ids = observation
            .tree
            .iframes
            .iter()
            .filter_map(|stub| stub.node_id.parse::<i64>().ok());

        let mut seen = HashSet::new();
        let mut selectors = Vec::new();
        for element_id in element_ids.iter().copied().chain(iframe_ids) {
            if element_id <= 0 || !seen.insert(element_id) {
                continue;
            }
            let xpath = xpath_for_backend_node(&self.page, element_id).await;
            if xpath.is_empty() {
                info!(target: "observe", element_id, "empty xpath for element; skipping");
                continue;
            }
            let node = observation.tree.find(&element_id.to_string());
            selectors.push(ElementSelector {
                element_id,
                selector: format!("xpath={xpath}"),
                role: node.map(|node| node.role.clone()),
                name: node.and_then(|node| node.name.clone()),
            });
        }
        selectors
    }

    /// Replaces link ids at `paths` inside extracted `value` with the URLs recorded in `tree`.
    pub fn restore_urls(&self, value: &mut Value, paths: &[UrlPath], tree: &TreeResult) {
        inject_urls(value, paths, &tree.id_to_url);
    }

    /// Drops per-page bookkeeping and hands the page back.
    pub fn release(self) -> P {
        injection::forget_page(&self.page.page_id());
        self.page
    }
}
