//! Contract tests that drive a real Chromium binary through `CdpPage`. Ignored by default because
//! they need Chrome/Chromium on the host.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{event_bus, CdpAdapter, CdpConfig, DebugSession, PageDriver, ProtocolSession};
use serde_json::json;
use tokio::time::timeout;

fn contract_enabled() -> bool {
    env::var("SOULBROWSER_CDP_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

async fn setup_adapter() -> Arc<CdpAdapter> {
    let (bus, _rx) = event_bus(256);
    let adapter = Arc::new(CdpAdapter::new(CdpConfig::default(), bus));
    Arc::clone(&adapter).start().await.expect("adapter start");
    adapter
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set SOULBROWSER_CDP_CONTRACT=1"]
async fn contract_evaluate_and_debug_session() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (SOULBROWSER_CDP_CONTRACT not enabled)");
        return;
    }

    let adapter = setup_adapter().await;
    let page = adapter
        .create_page("data:text/html,<title>contract</title><p>hello</p>")
        .await
        .expect("create page");
    page.wait_for_dom_ready(Duration::from_secs(10))
        .await
        .expect("dom ready");

    let title = page.evaluate("document.title").await.expect("evaluate");
    assert_eq!(title, json!("contract"));
    assert!(page.has_document().await.expect("has document"));

    let session = page.open_session().await.expect("open session");
    let doc = session
        .send_command("DOM.getDocument", json!({ "depth": 1 }))
        .await
        .expect("getDocument on debug session");
    assert!(doc.get("root").is_some());
    session.detach().await.expect("detach");

    adapter.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set SOULBROWSER_CDP_CONTRACT=1"]
async fn contract_receives_page_events() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (SOULBROWSER_CDP_CONTRACT not enabled)");
        return;
    }

    let adapter = setup_adapter().await;
    let page = adapter
        .create_page("about:blank")
        .await
        .expect("create page");
    let mut events = page.subscribe();

    page.send_command("Page.enable", json!({}))
        .await
        .expect("Page.enable");
    page.navigate("https://example.com").await.expect("navigate");

    let seen = timeout(Duration::from_secs(15), async {
        while let Some(event) = events.next().await {
            if event.method == "Page.loadEventFired" {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(seen, "expected Page.loadEventFired for the navigated page");
    adapter.shutdown().await;
}
