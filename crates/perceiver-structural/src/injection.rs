//! Page-side helper scripts.
//!
//! The helpers are installed into the current document on demand and registered as an init
//! script so later navigations get them too. Registration happens at most once per page; the
//! registry entry is dropped with [`forget_page`] when the page goes away.

use cdp_adapter::{PageDriver, PageId};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::debug;

use crate::errors::PerceiverError;
use crate::xpath::NODE_PATH_FUNCTION;

const SCROLLABLE_HELPERS: &str = r#"
  const scrollsOnAxis = (overflow, scrollSize, clientSize) =>
    (overflow === "auto" || overflow === "scroll" || overflow === "overlay") && scrollSize > clientSize;

  const isScrollable = (el) => {
    const style = window.getComputedStyle(el);
    return scrollsOnAxis(style.overflowY, el.scrollHeight, el.clientHeight)
      || scrollsOnAxis(style.overflowX, el.scrollWidth, el.clientWidth);
  };

  window.getScrollableElementXpaths = (topN) => {
    const root = document.scrollingElement || document.documentElement;
    const found = [];
    if (root && root.scrollHeight > root.clientHeight) {
      found.push(root);
    }
    for (const el of document.querySelectorAll("body *")) {
      if (el !== root && isScrollable(el)) {
        found.push(el);
      }
    }
    found.sort((a, b) => b.scrollHeight - a.scrollHeight);
    const picked = typeof topN === "number" ? found.slice(0, topN) : found;
    return picked.map((el) => soulNodePath(el)).filter((path) => path.length > 0);
  };
"#;

/// Installs `window.getScrollableElementXpaths` unless the document already has it.
pub static DOM_SCRIPT: Lazy<String> = Lazy::new(|| {
    format!(
        "(() => {{\n  if (typeof window.getScrollableElementXpaths === \"function\") return;\n{NODE_PATH_FUNCTION}{SCROLLABLE_HELPERS}}})();"
    )
});

const PRESENCE_CHECK: &str = "typeof window.getScrollableElementXpaths === 'function'";

static INIT_SCRIPT_PAGES: Lazy<DashMap<PageId, ()>> = Lazy::new(DashMap::new);

/// Makes sure the page helpers exist in the current document and in every future one.
pub async fn ensure_injection<P>(page: &P) -> Result<(), PerceiverError>
where
    P: PageDriver + ?Sized,
{
    let present = page.evaluate(PRESENCE_CHECK).await?;
    if present == Value::Bool(true) {
        return Ok(());
    }

    page.evaluate(DOM_SCRIPT.as_str())
        .await
        .map_err(|err| PerceiverError::injection(err.to_string()))?;

    let page_id = page.page_id();
    if INIT_SCRIPT_PAGES.insert(page_id, ()).is_none() {
        if let Err(err) = page.add_init_script(DOM_SCRIPT.as_str()).await {
            INIT_SCRIPT_PAGES.remove(&page_id);
            return Err(PerceiverError::injection(err.to_string()));
        }
        debug!(target: "perceiver", page = %page_id, "dom helpers registered for future documents");
    }
    Ok(())
}

/// Whether the init script was registered for `page`.
pub fn is_registered(page: &PageId) -> bool {
    INIT_SCRIPT_PAGES.contains_key(page)
}

/// Drops the registration record of a closed page.
pub fn forget_page(page: &PageId) {
    INIT_SCRIPT_PAGES.remove(page);
}
