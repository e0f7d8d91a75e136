use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use soulbrowser_observe::cdp_adapter::{
    event_bus, AdapterError, AdapterErrorKind, DebugSession, EventBus, PageDriver, PageEvents,
    PageId, ProtocolSession, RawEvent,
};
use soulbrowser_observe::network_settle::SettleOutcome;
use soulbrowser_observe::perceiver_structural::injection::is_registered;
use soulbrowser_observe::perceiver_structural::{PerceiverError, UrlPath};
use soulbrowser_observe::{ObserveConfig, ObserveError, Observer};
use tracing::Level;

struct FakePage {
    id: PageId,
    bus: EventBus,
    ax_nodes: Option<Value>,
    node_paths: HashMap<i64, &'static str>,
    stalled_request: bool,
    methods: Mutex<Vec<String>>,
}

impl FakePage {
    fn new() -> Self {
        let (bus, _) = event_bus(16);
        Self {
            id: PageId::new(),
            bus,
            ax_nodes: Some(shop_nodes()),
            node_paths: HashMap::from([
                (2, "/html/body/a"),
                (3, "/html/body/iframe"),
                (4, "/html/body/button"),
            ]),
            stalled_request: false,
            methods: Mutex::new(Vec::new()),
        }
    }

    fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    fn evaluate_reply(&self, expression: &str) -> Value {
        let value = match expression {
            "document.documentElement !== null" => json!(true),
            "typeof window.getScrollableElementXpaths === 'function'" => json!(false),
            "window.getScrollableElementXpaths()" => json!([]),
            _ => Value::Null,
        };
        json!({ "result": { "type": "object", "value": value } })
    }
}

#[async_trait]
impl ProtocolSession for FakePage {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.methods.lock().unwrap().push(method.to_string());
        match method {
            "Runtime.evaluate" => Ok(self.evaluate_reply(params["expression"].as_str().unwrap())),
            "Network.enable" if self.stalled_request => {
                let _ = self.bus.send(RawEvent {
                    page: Some(self.id),
                    session_id: None,
                    method: "Network.requestWillBeSent".into(),
                    params: json!({
                        "requestId": "77.1",
                        "frameId": "F1",
                        "type": "XHR",
                        "request": { "url": "https://shop.example/api/slow", "method": "GET" }
                    }),
                });
                Ok(json!({}))
            }
            "Accessibility.getFullAXTree" => match &self.ax_nodes {
                Some(nodes) => Ok(json!({ "nodes": nodes })),
                None => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint("target closed")
                    .retriable(true)),
            },
            "DOM.resolveNode" => {
                let backend = params["backendNodeId"].as_i64().unwrap();
                if self.node_paths.contains_key(&backend) {
                    Ok(json!({ "object": { "type": "object", "objectId": format!("node-{backend}") } }))
                } else {
                    Err(AdapterError::new(AdapterErrorKind::Protocol)
                        .with_hint("No node with given id found"))
                }
            }
            "Runtime.callFunctionOn" => {
                let object_id = params["objectId"].as_str().unwrap();
                let backend: i64 = object_id.trim_start_matches("node-").parse().unwrap();
                Ok(json!({ "result": { "type": "string", "value": self.node_paths[&backend] } }))
            }
            _ => Ok(json!({})),
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    fn page_id(&self) -> PageId {
        self.id
    }

    fn url(&self) -> Option<String> {
        Some("https://shop.example/".into())
    }

    async fn open_session(&self) -> Result<Box<dyn DebugSession>, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::SessionMissing))
    }

    fn subscribe(&self) -> PageEvents {
        PageEvents::new(self.id, self.bus.subscribe())
    }
}

fn ax(id: &str, role: &str, name: Option<&str>, parent: Option<&str>, children: &[&str]) -> Value {
    let mut node = json!({
        "nodeId": id,
        "role": { "type": "role", "value": role },
        "childIds": children,
    });
    if let Some(name) = name {
        node["name"] = json!({ "type": "computedString", "value": name });
    }
    if let Some(parent) = parent {
        node["parentId"] = json!(parent);
    }
    node
}

fn shop_nodes() -> Value {
    let mut link = ax("2", "link", Some("Docs"), Some("1"), &[]);
    link["properties"] = json!([
        { "name": "url", "value": { "type": "string", "value": "https://shop.example/docs" } }
    ]);
    json!([
        ax("1", "RootWebArea", Some("Shop"), None, &["2", "3", "4"]),
        link,
        ax("3", "Iframe", None, Some("1"), &[]),
        ax("4", "button", Some("Buy"), Some("1"), &[]),
    ])
}

#[tokio::test(start_paused = true)]
async fn observe_settles_then_snapshots() {
    let observer = Observer::new(FakePage::new(), &ObserveConfig::default());

    let observation = observer.observe().await.expect("observation");

    assert!(observation.settled());
    assert!(observation.elapsed >= Duration::from_millis(500));
    assert_eq!(
        observation.tree.simplified,
        [
            "[1] RootWebArea: Shop",
            "  [2] link: Docs",
            "  [3] Iframe",
            "  [4] button: Buy",
        ]
        .join("\n")
    );
    assert_eq!(observation.tree.iframes.len(), 1);

    let methods = observer.page().methods();
    let network = methods.iter().position(|m| m == "Network.enable").unwrap();
    let fetch = methods
        .iter()
        .position(|m| m == "Accessibility.getFullAXTree")
        .unwrap();
    assert!(network < fetch, "snapshot taken before the page settled");
}

#[tokio::test(start_paused = true)]
async fn stalled_request_is_swept_before_settling() {
    let mut page = FakePage::new();
    page.stalled_request = true;
    let observer = Observer::new(page, &ObserveConfig::default());

    let observation = observer.observe().await.expect("observation");

    assert_eq!(observation.settle, SettleOutcome::Settled);
    assert!(observation.elapsed >= Duration::from_millis(2_000));
    assert!(observation.elapsed < Duration::from_millis(30_000));
}

#[tokio::test(start_paused = true)]
async fn settle_timeout_can_be_overridden_per_call() {
    let mut page = FakePage::new();
    page.stalled_request = true;
    let observer = Observer::new(page, &ObserveConfig::default());

    let outcome = observer.settle(Some(Duration::from_millis(300))).await;

    assert_eq!(outcome, SettleOutcome::TimedOut { outstanding: 1 });
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn facade_logs_under_its_own_target() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);
    let mut page = FakePage::new();
    page.stalled_request = true;
    let observer = Observer::new(page, &ObserveConfig::default());

    observer.settle(Some(Duration::from_millis(300))).await;

    let output = logs.text();
    assert!(
        output.contains("observe: settle wait timed out"),
        "missing facade log line in: {output}"
    );
    assert!(!output.contains("soulbrowser_observe::observation"));
}

#[tokio::test(start_paused = true)]
async fn snapshot_failure_is_reported_as_retriable() {
    let mut page = FakePage::new();
    page.ax_nodes = None;
    let observer = Observer::new(page, &ObserveConfig::default());

    let err = observer.observe().await.unwrap_err();

    assert!(matches!(err, ObserveError::Perceiver(PerceiverError::AxFetch(_))));
    assert!(err.is_retriable());
    assert_eq!(
        observer.page().methods().last().map(String::as_str),
        Some("Accessibility.disable")
    );
}

#[tokio::test(start_paused = true)]
async fn chosen_elements_and_iframes_map_to_xpath_selectors() {
    let observer = Observer::new(FakePage::new(), &ObserveConfig::default());
    let observation = observer.observe().await.expect("observation");

    let selectors = observer
        .element_selectors(&observation, &[4, 2, 99, -1, 4])
        .await;

    let ids: Vec<i64> = selectors.iter().map(|s| s.element_id).collect();
    assert_eq!(ids, vec![4, 2, 3]);
    assert_eq!(selectors[0].selector, "xpath=/html/body/button");
    assert_eq!(selectors[0].role.as_deref(), Some("button"));
    assert_eq!(selectors[0].name.as_deref(), Some("Buy"));
    assert_eq!(selectors[2].selector, "xpath=/html/body/iframe");
    assert_eq!(selectors[2].role.as_deref(), Some("Iframe"));
}

#[tokio::test(start_paused = true)]
async fn extracted_link_ids_become_urls() {
    let observer = Observer::new(FakePage::new(), &ObserveConfig::default());
    let observation = observer.observe().await.expect("observation");
    let mut extracted = json!({ "links": [ { "title": "Docs", "href": "2" }, { "title": "Buy", "href": "4" } ] });

    observer.restore_urls(
        &mut extracted,
        &[UrlPath::parse("links.*.href")],
        &observation.tree,
    );

    assert_eq!(extracted["links"][0]["href"], "https://shop.example/docs");
    assert_eq!(extracted["links"][1]["href"], "4");
}

#[tokio::test(start_paused = true)]
async fn release_forgets_injected_page() {
    let observer = Observer::new(FakePage::new(), &ObserveConfig::default());
    observer.observe().await.expect("observation");
    let id = observer.page().page_id();
    assert!(is_registered(&id));

    let page = observer.release();

    assert!(!is_registered(&id));
    assert_eq!(
        page.methods()
            .iter()
            .filter(|m| *m == "Page.addScriptToEvaluateOnNewDocument")
            .count(),
        1
    );
}
