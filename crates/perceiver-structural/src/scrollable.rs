//! Scrollable element detection and role annotation.

use std::collections::HashSet;

use cdp_adapter::{AdapterError, DebugSession, PageDriver, ProtocolSession};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::injection::ensure_injection;
use crate::metrics;
use crate::model::{is_structural_role, AxRecord};

/// Backend ids of every scrollable element on the page. Best effort: failures yield fewer ids,
/// never an error.
pub async fn find_scrollable_backend_ids<P>(page: &P) -> HashSet<i64>
where
    P: PageDriver + ?Sized,
{
    let xpaths = scrollable_xpaths(page).await;
    if xpaths.is_empty() {
        return HashSet::new();
    }

    let session = match page.open_session().await {
        Ok(session) => session,
        Err(err) => {
            warn!(target: "perceiver", %err, "could not open session for scrollable lookup");
            return HashSet::new();
        }
    };

    let ids = collect_backend_ids(session.as_ref(), &xpaths).await;

    if let Err(err) = session.detach().await {
        debug!(target: "perceiver", %err, "failed to detach scrollable lookup session");
    }
    metrics::record_scrollable(ids.len());
    ids
}

async fn scrollable_xpaths<P>(page: &P) -> Vec<String>
where
    P: PageDriver + ?Sized,
{
    if let Err(err) = ensure_injection(page).await {
        warn!(target: "perceiver", %err, "dom helpers unavailable; skipping scrollable detection");
        return Vec::new();
    }
    match page.evaluate("window.getScrollableElementXpaths()").await {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(xpath) if !xpath.is_empty() => Some(xpath),
                _ => None,
            })
            .collect(),
        Ok(other) => {
            warn!(target: "perceiver", result = %other, "getScrollableElementXpaths did not return a list");
            Vec::new()
        }
        Err(err) => {
            warn!(target: "perceiver", %err, "getScrollableElementXpaths failed");
            Vec::new()
        }
    }
}

async fn collect_backend_ids(session: &dyn DebugSession, xpaths: &[String]) -> HashSet<i64> {
    let mut ids = HashSet::new();
    for xpath in xpaths {
        match backend_id_for_xpath(session, xpath).await {
            Ok(Some(id)) => {
                ids.insert(id);
            }
            Ok(None) => debug!(target: "perceiver", xpath, "scrollable xpath matched nothing"),
            Err(err) => debug!(target: "perceiver", xpath, %err, "scrollable xpath lookup failed"),
        }
    }
    ids
}

async fn backend_id_for_xpath(
    session: &dyn DebugSession,
    xpath: &str,
) -> Result<Option<i64>, AdapterError> {
    let literal = Value::String(xpath.to_string()).to_string();
    let expression = format!(
        "(function() {{ try {{ return document.evaluate({literal}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; }} catch (e) {{ return null; }} }})()"
    );
    let evaluated = session
        .send_command(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": false,
                "awaitPromise": false,
            }),
        )
        .await?;
    let Some(object_id) = evaluated.pointer("/result/objectId").and_then(Value::as_str) else {
        return Ok(None);
    };

    let described = session
        .send_command("DOM.describeNode", json!({ "objectId": object_id }))
        .await?;
    Ok(described
        .pointer("/node/backendNodeId")
        .and_then(Value::as_i64)
        .filter(|id| *id != 0))
}

/// Prefixes the role of every record whose backend id is scrollable.
pub fn annotate_scrollable(records: &mut [AxRecord], scrollable: &HashSet<i64>) {
    if scrollable.is_empty() {
        return;
    }
    for record in records {
        let Some(backend_id) = record.backend_dom_node_id else {
            continue;
        };
        if !scrollable.contains(&backend_id) {
            continue;
        }
        record.role = if record.role.is_empty() || is_structural_role(&record.role) {
            "scrollable".to_string()
        } else {
            format!("scrollable, {}", record.role)
        };
    }
}
