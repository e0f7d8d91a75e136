//! Absolute XPath for live DOM objects, computed in the page.

use cdp_adapter::{PageDriver, ProtocolSession};
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::debug;

use crate::ports::resolve_object_id;

/// Defines `soulNodePath(node)`. Element segments get a 1-based index only when the parent has
/// more than one child of the same tag; text nodes never emit a segment. Stops at `html`.
pub(crate) const NODE_PATH_FUNCTION: &str = r#"
function soulNodePath(node) {
  if (!node || (node.nodeType !== Node.ELEMENT_NODE && node.nodeType !== Node.TEXT_NODE)) {
    return "";
  }
  const parts = [];
  let current = node;
  while (current && (current.nodeType === Node.ELEMENT_NODE || current.nodeType === Node.TEXT_NODE)) {
    if (!current.parentNode) break;
    const tag = current.nodeName.toLowerCase();
    if (tag === "html") {
      parts.unshift("html");
      break;
    }
    if (current.nodeType === Node.ELEMENT_NODE) {
      let sameType = 0;
      let position = 0;
      const siblings = current.parentElement ? current.parentElement.childNodes : [];
      for (const sibling of siblings) {
        if (sibling.nodeType === current.nodeType && sibling.nodeName === current.nodeName) {
          sameType += 1;
          if (sibling === current) position = sameType;
        }
      }
      parts.unshift(sameType > 1 ? `${tag}[${position}]` : tag);
    }
    current = current.parentElement;
  }
  return parts.length ? `/${parts.join("/")}` : "";
}
"#;

static XPATH_DECLARATION: Lazy<String> =
    Lazy::new(|| format!("function() {{ {NODE_PATH_FUNCTION} return soulNodePath(this); }}"));

/// XPath of the object behind `object_id`, or an empty string when it cannot be computed.
pub async fn resolve_xpath<S>(session: &S, object_id: &str) -> String
where
    S: ProtocolSession + ?Sized,
{
    match session
        .call_function_on(object_id, XPATH_DECLARATION.as_str(), true)
        .await
    {
        Ok(result) => result
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Err(err) => {
            debug!(target: "perceiver", object_id, %err, "xpath evaluation failed");
            String::new()
        }
    }
}

/// XPath of the DOM node with `backend_node_id`, or an empty string when the node is gone.
pub async fn xpath_for_backend_node<P>(page: &P, backend_node_id: i64) -> String
where
    P: PageDriver + ?Sized,
{
    match resolve_object_id(page, backend_node_id).await {
        Ok(Some(object_id)) => resolve_xpath(page, &object_id).await,
        Ok(None) => {
            debug!(target: "perceiver", backend_node_id, "no remote object for backend node");
            String::new()
        }
        Err(err) => {
            debug!(target: "perceiver", backend_node_id, %err, "DOM.resolveNode failed");
            String::new()
        }
    }
}
