use std::collections::HashSet;
use std::time::Instant;

use cdp_adapter::PageDriver;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::builder::build_hierarchical_tree;
use crate::errors::PerceiverError;
use crate::metrics;
use crate::model::{AxRecord, TreeResult};
use crate::ports::{NoopTagResolver, PageTagResolver, TagNameResolver};
use crate::scrollable::{annotate_scrollable, find_scrollable_backend_ids};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Look up scrollable elements and prefix their roles.
    pub detect_scrollable: bool,
    /// Replace surviving `generic`/`none` roles with the DOM tag name.
    pub resolve_roles: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            detect_scrollable: true,
            resolve_roles: true,
        }
    }
}

/// Fetches the full accessibility tree of `page` and builds its [`TreeResult`].
pub async fn get_accessibility_tree<P>(page: &P) -> Result<TreeResult, PerceiverError>
where
    P: PageDriver + ?Sized,
{
    get_accessibility_tree_with(page, &SnapshotOptions::default()).await
}

#[instrument(level = "debug", skip_all, fields(page = %page.page_id()))]
pub async fn get_accessibility_tree_with<P>(
    page: &P,
    options: &SnapshotOptions,
) -> Result<TreeResult, PerceiverError>
where
    P: PageDriver + ?Sized,
{
    let started = Instant::now();
    let scrollable = if options.detect_scrollable {
        find_scrollable_backend_ids(page).await
    } else {
        HashSet::new()
    };

    let result = fetch_and_build(page, options, &scrollable, started).await;

    if let Err(err) = page.send_command("Accessibility.disable", json!({})).await {
        debug!(target: "perceiver", %err, "failed to disable Accessibility domain on cleanup");
    }
    if let Err(err) = &result {
        error!(target: "perceiver", %err, "error getting accessibility tree");
    }
    metrics::record_snapshot(result.is_ok(), started.elapsed());
    result
}

async fn fetch_and_build<P>(
    page: &P,
    options: &SnapshotOptions,
    scrollable: &HashSet<i64>,
    started: Instant,
) -> Result<TreeResult, PerceiverError>
where
    P: PageDriver + ?Sized,
{
    page.send_command("Accessibility.enable", json!({}))
        .await
        .map_err(PerceiverError::AxFetch)?;
    let response = page
        .send_command("Accessibility.getFullAXTree", json!({}))
        .await
        .map_err(PerceiverError::AxFetch)?;

    let processing_started = Instant::now();
    let mut records = AxRecord::parse_all(&response);
    annotate_scrollable(&mut records, scrollable);

    let page_resolver = PageTagResolver::new(page);
    let resolver: &dyn TagNameResolver = if options.resolve_roles {
        &page_resolver
    } else {
        &NoopTagResolver
    };
    let raw_count = records.len();
    let tree = build_hierarchical_tree(records, resolver).await;

    debug!(
        target: "perceiver",
        raw_nodes = raw_count,
        roots = tree.tree.len(),
        scrollable = scrollable.len(),
        total_ms = started.elapsed().as_millis() as u64,
        processing_ms = processing_started.elapsed().as_millis() as u64,
        "got accessibility tree"
    );
    Ok(tree)
}
