use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::select;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::{EventBus, PageEvents, RawEvent};
use crate::ids::PageId;
use crate::metrics;
use crate::page::CdpPage;
use crate::registry::{Registry, SessionRole};
use crate::resolve_chrome_path;
use crate::transport::{
    CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent,
};

const ATTACH_WAIT: Duration = Duration::from_secs(5);
const ATTACH_POLL: Duration = Duration::from_millis(50);

/// Owns the browser connection and hands out [`CdpPage`] handles.
pub struct CdpAdapter {
    cfg: CdpConfig,
    bus: EventBus,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
}

impl CdpAdapter {
    pub fn new(mut cfg: CdpConfig, bus: EventBus) -> Self {
        let transport: Arc<dyn CdpTransport> = if cfg.websocket_url.is_some() {
            info!(target: "cdp-adapter", "connecting to existing browser websocket");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else if let Some(path) = resolve_chrome_path(&cfg) {
            info!(target: "cdp-adapter", executable = %path.display(), "using real Chromium transport");
            cfg.executable = path;
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else {
            warn!(
                target: "cdp-adapter",
                remediation = "install Chrome/Chromium or set SOULBROWSER_CHROME=/path/to/chrome",
                "Chrome executable not found; page commands will fail"
            );
            Arc::new(NoopTransport)
        };
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(
        cfg: CdpConfig,
        bus: EventBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        Self {
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
        }
    }

    pub fn config(&self) -> &CdpConfig {
        &self.cfg
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = tokio::spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-adapter", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    /// Opens a new tab at `url` and waits until its page session is attached.
    pub async fn create_page(self: &Arc<Self>, url: &str) -> Result<CdpPage, AdapterError> {
        let response = self
            .send_browser_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Protocol)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let deadline = Instant::now() + ATTACH_WAIT;
        loop {
            if let Some(page) = self.registry.page_for_target(&target_id) {
                if self.registry.get_cdp_session(&page).is_some() {
                    debug!(target: "cdp-adapter", %page, target_id = %target_id, "page attached");
                    return Ok(CdpPage::new(page, Arc::clone(self)));
                }
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::SessionMissing)
                    .with_hint(format!("timed out waiting for target {target_id} to attach"))
                    .retriable(true));
            }
            sleep(ATTACH_POLL).await;
        }
    }

    pub fn page(self: &Arc<Self>, page: PageId) -> Option<CdpPage> {
        self.registry
            .get(&page)
            .map(|_| CdpPage::new(page, Arc::clone(self)))
    }

    /// Every attached page tab, e.g. after connecting to an already running browser.
    pub fn pages(self: &Arc<Self>) -> Vec<CdpPage> {
        self.registry
            .iter()
            .into_iter()
            .filter(|(_, ctx)| ctx.cdp_session.is_some())
            .map(|(page, _)| CdpPage::new(page, Arc::clone(self)))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_page(&self, page: PageId) -> PageEvents {
        PageEvents::new(page, self.bus.subscribe())
    }

    pub async fn send_browser_command(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Browser, method, params).await
    }

    pub async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.get_cdp_session(&page).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::SessionMissing)
                .with_hint(format!("missing cdp session for page {page}"))
        })?;
        self.dispatch(CommandTarget::Session(session), method, params)
            .await
    }

    pub async fn send_session_command(
        &self,
        session: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.dispatch(CommandTarget::Session(session.to_string()), method, params)
            .await
    }

    pub(crate) async fn attach_session(
        &self,
        page: PageId,
        target_id: &str,
    ) -> Result<String, AdapterError> {
        let response = self
            .send_browser_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session = response
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Protocol)
                    .with_hint("attachToTarget missing sessionId")
            })?
            .to_string();
        self.registry
            .bind_session(page, session.clone(), SessionRole::Auxiliary);
        Ok(session)
    }

    pub(crate) async fn detach_session(&self, session: &str) -> Result<(), AdapterError> {
        self.registry.unbind_session(session);
        self.send_browser_command(
            "Target.detachFromTarget",
            json!({ "sessionId": session }),
        )
        .await
        .map(|_| ())
    }

    async fn dispatch(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        let result = self.transport.send_command(target, method, params).await;
        metrics::record_command(method, start.elapsed(), result.is_ok());
        result
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => {
                            backoff = MIN_BACKOFF;
                            self.handle_event(ev);
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            self.handle_transport_disconnect();
                            warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target: "cdp-adapter", ?err, "transport restart failed");
                            }
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            sleep(backoff).await;
                            backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        let had_pages = !self.registry.iter().is_empty();
        self.registry.clear();
        if had_pages {
            warn!(target: "cdp-adapter", "cdp transport restarted; active pages were reset");
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        metrics::record_event(&event.method);
        if let Err(err) = self.update_registry(&event) {
            warn!(target: "cdp-adapter", method = %event.method, ?err, "failed to process target event");
        }

        let page = event
            .session_id
            .as_deref()
            .and_then(|session| self.registry.page_for_session(session));
        // a send error only means nobody is listening
        let _ = self.bus.send(RawEvent {
            page,
            session_id: event.session_id,
            method: event.method,
            params: event.params,
        });
    }

    fn update_registry(&self, event: &TransportEvent) -> Result<(), AdapterError> {
        match event.method.as_str() {
            "Target.targetCreated" => {
                let payload: TargetInfoParams = decode(&event.params)?;
                let info = payload.target_info;
                if info.target_type == "page" {
                    let page = self.registry.insert_target(&info.target_id, info.url);
                    debug!(target: "cdp-adapter", %page, target_id = %info.target_id, "page target created");
                }
            }
            "Target.targetInfoChanged" => {
                let payload: TargetInfoParams = decode(&event.params)?;
                let info = payload.target_info;
                if let (Some(page), Some(url)) = (
                    self.registry.page_for_target(&info.target_id),
                    info.url.filter(|u| !u.is_empty()),
                ) {
                    self.registry.set_recent_url(&page, url);
                }
            }
            "Target.targetDestroyed" => {
                let payload: TargetDestroyedParams = decode(&event.params)?;
                if let Some(page) = self.registry.remove_target(&payload.target_id) {
                    debug!(target: "cdp-adapter", %page, "page target destroyed");
                }
            }
            "Target.attachedToTarget" => {
                let payload: AttachedToTargetParams = decode(&event.params)?;
                self.on_attached(event.session_id.as_deref(), payload);
            }
            "Target.detachedFromTarget" => {
                let payload: DetachedFromTargetParams = decode(&event.params)?;
                self.registry.unbind_session(&payload.session_id);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_attached(&self, parent_session: Option<&str>, payload: AttachedToTargetParams) {
        let info = payload.target_info;
        match info.target_type.as_str() {
            "page" => {
                let page = self.registry.insert_target(&info.target_id, info.url);
                let role =
                    self.registry
                        .bind_session(page, payload.session_id.clone(), SessionRole::Primary);
                debug!(target: "cdp-adapter", %page, session = %payload.session_id, ?role, "page session attached");
            }
            "iframe" => {
                let owner = parent_session.and_then(|session| self.registry.page_for_session(session));
                match owner {
                    Some(page) => {
                        self.registry
                            .bind_session(page, payload.session_id, SessionRole::Child);
                    }
                    None => {
                        debug!(target: "cdp-adapter", target_id = %info.target_id, "frame attached under unknown session");
                    }
                }
            }
            _ => {}
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(params: &Value) -> Result<T, AdapterError> {
    T::deserialize(params).map_err(AdapterError::decode)
}

#[derive(Debug, Deserialize)]
struct TargetInfoParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: Option<String>,
}
