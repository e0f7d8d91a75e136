use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    event_bus, AdapterError, AdapterErrorKind, DebugSession, EventBus, PageDriver, PageEvents,
    PageId, ProtocolSession, RawEvent,
};
use network_settle::{await_settled, SettleConfig, SettleOutcome};
use serde_json::{json, Value};
use tokio::time::Instant;

struct FakePage {
    id: PageId,
    bus: EventBus,
    has_document: bool,
    ready_polls: Mutex<u32>,
    commands: Mutex<Vec<(String, Value)>>,
}

impl FakePage {
    fn new(has_document: bool) -> Self {
        let (bus, _) = event_bus(64);
        Self {
            id: PageId::new(),
            bus,
            has_document,
            ready_polls: Mutex::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    fn methods(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    fn emit(&self, method: &str, params: Value) {
        self.bus
            .send(RawEvent {
                page: Some(self.id),
                session_id: Some("S1".into()),
                method: method.into(),
                params,
            })
            .expect("watcher subscribed");
    }
}

#[async_trait]
impl ProtocolSession for FakePage {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.commands
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        if method != "Runtime.evaluate" {
            return Ok(json!({}));
        }
        let expression = params["expression"].as_str().unwrap_or_default();
        let value = if expression.contains("documentElement") {
            json!(self.has_document)
        } else {
            let mut polls = self.ready_polls.lock().unwrap();
            *polls += 1;
            if *polls >= 2 {
                json!("interactive")
            } else {
                json!("loading")
            }
        };
        Ok(json!({ "result": { "type": "string", "value": value } }))
    }
}

#[async_trait]
impl PageDriver for FakePage {
    fn page_id(&self) -> PageId {
        self.id
    }

    fn url(&self) -> Option<String> {
        Some("https://example.com/".into())
    }

    async fn open_session(&self) -> Result<Box<dyn DebugSession>, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::SessionMissing))
    }

    fn subscribe(&self) -> PageEvents {
        PageEvents::new(self.id, self.bus.subscribe())
    }
}

#[tokio::test(start_paused = true)]
async fn enables_domains_and_settles_idle_page() {
    let page = FakePage::new(true);
    let started = Instant::now();

    let outcome = await_settled(&page, &SettleConfig::default(), None).await;

    assert_eq!(outcome, SettleOutcome::Settled);
    assert_eq!(started.elapsed(), Duration::from_millis(500));
    assert_eq!(
        page.methods(),
        vec![
            "Runtime.evaluate",
            "Network.enable",
            "Page.enable",
            "Target.setAutoAttach"
        ]
    );
    let attach = page.commands.lock().unwrap()[3].1.clone();
    assert_eq!(attach["flatten"], json!(true));
    assert_eq!(attach["filter"][0], json!({ "type": "worker", "exclude": true }));
    assert_eq!(page.bus.receiver_count(), 0, "listener must be released");
}

#[tokio::test(start_paused = true)]
async fn waits_for_dom_ready_when_no_document() {
    let page = FakePage::new(false);

    let outcome = await_settled(&page, &SettleConfig::default(), None).await;

    assert!(outcome.is_settled());
    let evaluations = page
        .methods()
        .iter()
        .filter(|method| method.as_str() == "Runtime.evaluate")
        .count();
    // one document probe plus two readyState polls
    assert_eq!(evaluations, 3);
}

#[tokio::test(start_paused = true)]
async fn page_events_drive_the_watcher() {
    let page = FakePage::new(true);
    let config = SettleConfig::default();
    let started = Instant::now();

    let wait = await_settled(&page, &config, Some(Duration::from_secs(10)));
    let drive = async {
        while page.bus.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }
        page.emit(
            "Network.requestWillBeSent",
            json!({
                "requestId": "r1",
                "frameId": "main",
                "type": "Document",
                "request": { "url": "https://example.com/" }
            }),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        page.emit("Network.loadingFinished", json!({ "requestId": "r1" }));
    };
    let (outcome, ()) = tokio::join!(wait, drive);

    assert_eq!(outcome, SettleOutcome::Settled);
    assert_eq!(started.elapsed(), Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn abandoned_wait_releases_listener() {
    let page = FakePage::new(true);
    let config = SettleConfig::default();

    let wait = await_settled(&page, &config, None);
    let drive = async {
        while page.bus.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }
        page.emit(
            "Network.requestWillBeSent",
            json!({ "requestId": "slow", "type": "XHR", "request": { "url": "https://example.com/api" } }),
        );
    };
    let abandoned = tokio::time::timeout(Duration::from_millis(300), async {
        tokio::join!(wait, drive)
    })
    .await;

    assert!(abandoned.is_err());
    assert_eq!(page.bus.receiver_count(), 0);
}
