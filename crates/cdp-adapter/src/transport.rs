use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// Raw protocol event as it left the websocket.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

/// Transport used when no browser is available; every command fails.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("no browser connected; cannot send {method}")))
    }
}

type Responder = oneshot::Sender<Result<Value, AdapterError>>;

type ConnectionFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<Connected>, AdapterError>> + Send + Sync,
>;

/// Transport backed by a chromiumoxide websocket connection. The connection is (re)established
/// lazily; a dead connection is replaced on the next call.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    current: Arc<OnceCell<Mutex<Option<Arc<Connected>>>>>,
    factory: ConnectionFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: ConnectionFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move { Connected::open(cfg).await.map(Arc::new) })
        });
        Self {
            cfg,
            current: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn connected(&self) -> Result<Arc<Connected>, AdapterError> {
        let slot = self.current.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = slot.lock().await;
        if let Some(conn) = guard.as_ref().filter(|conn| conn.is_alive()) {
            return Ok(Arc::clone(conn));
        }
        let conn = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    #[cfg(test)]
    fn with_factory(cfg: CdpConfig, factory: ConnectionFactory) -> Self {
        Self {
            cfg,
            current: Arc::new(OnceCell::new()),
            factory,
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let conn = self.connected().await?;
        let deadline = self.deadline();
        conn.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            deadline,
        )
        .await?;
        conn.call(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
            deadline,
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.connected().await {
            Ok(conn) => conn.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let conn = self.connected().await?;
        conn.call(target, method, params, self.deadline()).await
    }
}

struct Outbound {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: Responder,
}

/// A live websocket connection plus the tasks that service it.
struct Connected {
    outbound: mpsc::Sender<Outbound>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl Connected {
    async fn open(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => {
                let mut child = launch_config(&cfg)?.launch().map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint(format!("failed to launch chromium: {err}"))
                })?;
                let url = extract_ws_url(&mut child).await.map_err(|err| {
                    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
                })?;
                (Some(child), url)
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let pump_alive = Arc::clone(&alive);
        let pump = tokio::spawn(async move {
            if let Err(err) = pump(conn, outbound_rx, events_tx).await {
                error!(target: "cdp-transport", ?err, "connection pump terminated with error");
            }
            pump_alive.store(false, Ordering::Relaxed);
        });

        let heartbeat = spawn_heartbeat(
            outbound_tx.clone(),
            Arc::clone(&alive),
            Duration::from_millis(cfg.heartbeat_interval_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            outbound: outbound_tx,
            events: Mutex::new(events_rx),
            pump,
            heartbeat,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (responder, response) = oneshot::channel();
        self.outbound
            .send(Outbound {
                target,
                method: method.to_string(),
                params,
                responder,
            })
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method}: response channel closed"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method}: no response within {}ms", deadline.as_millis()))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for Connected {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump.abort();
        if let Some(handle) = &self.heartbeat {
            handle.abort();
        }

        let Ok(mut guard) = self.child.try_lock() else {
            return;
        };
        if let Some(mut child) = guard.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                }
                Err(_) => {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

/// Multiplexes outbound commands, responses and events over one connection until it closes.
async fn pump(
    mut conn: Connection<CdpEventMessage>,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let mut pending: HashMap<CallId, Responder> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = outbound.recv() => {
                let session = match cmd.target {
                    CommandTarget::Browser => None,
                    CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
                };
                let method: MethodId = cmd.method.into();
                match conn.submit_command(method, session, cmd.params) {
                    Ok(call_id) => {
                        pending.insert(call_id, cmd.responder);
                    }
                    Err(err) => {
                        let _ = cmd.responder.send(Err(
                            AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()),
                        ));
                    }
                }
            }
            message = conn.next() => match message {
                Some(Ok(Message::Response(resp))) => {
                    if let Some(responder) = pending.remove(&resp.id) {
                        let _ = responder.send(response_payload(resp));
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    let raw: CdpJsonEventMessage = match event.try_into() {
                        Ok(raw) => raw,
                        Err(err) => {
                            warn!(target: "cdp-transport", ?err, "failed to decode cdp event");
                            continue;
                        }
                    };
                    let forwarded = TransportEvent {
                        method: raw.method.into_owned(),
                        params: raw.params,
                        session_id: raw.session_id,
                    };
                    if events.send(forwarded).await.is_err() {
                        debug!(target: "cdp-transport", "event receiver dropped; stopping pump");
                        return Ok(());
                    }
                }
                Some(Err(err)) => {
                    let err = map_cdp_error(err);
                    fail_pending(&mut pending, &err);
                    return Err(err);
                }
                None => {
                    let err = AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("cdp connection closed");
                    fail_pending(&mut pending, &err);
                    return Ok(());
                }
            }
        }
    }
}

fn fail_pending(pending: &mut HashMap<CallId, Responder>, err: &AdapterError) {
    for (_, responder) in pending.drain() {
        let _ = responder.send(Err(err.clone()));
    }
}

fn response_payload(resp: Response) -> Result<Value, AdapterError> {
    if let Some(result) = resp.result {
        return Ok(result);
    }
    match resp.error {
        Some(error) => Err(AdapterError::new(AdapterErrorKind::Protocol)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        None => Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response")),
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::Evaluation).with_hint(hint)
        }
        CdpError::Serde(_) => AdapterError::new(AdapterErrorKind::Internal).with_hint(hint),
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

fn spawn_heartbeat(
    outbound: mpsc::Sender<Outbound>,
    alive: Arc<AtomicBool>,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    let response_deadline = every.min(Duration::from_secs(5));

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let (responder, response) = oneshot::channel();
            let ping = Outbound {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: Value::Object(Default::default()),
                responder,
            };
            if outbound.send(ping).await.is_err() {
                debug!(target: "cdp-transport", "heartbeat channel closed");
                break;
            }
            match tokio::time::timeout(response_deadline, response).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-transport", ?err, "heartbeat command error");
                    break;
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!(target: "cdp-transport", "heartbeat timed out");
                    break;
                }
            }
        }
    }))
}

fn launch_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set SOULBROWSER_CHROME to the full path of chrome/chromium."
            })));
    }

    let profile_dir = absolute_profile_dir(&cfg.user_data_dir)?;
    fs::create_dir_all(&profile_dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20));
    if !cfg.headless {
        builder = builder.with_head();
    }
    if std::env::var("SOULBROWSER_DISABLE_SANDBOX")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-sync",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if let Some(path) = crate::resolve_chrome_path(cfg) {
        builder = builder.chrome_executable(path);
    }
    builder.user_data_dir(profile_dir).build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("browser config error: {err}"))
    })
}

fn absolute_profile_dir(dir: &Path) -> Result<PathBuf, AdapterError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    std::env::current_dir().map(|cwd| cwd.join(dir)).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
    })
}

#[cfg(test)]
impl Connected {
    fn stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (outbound, _outbound_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(futures::future::pending::<()>());
        (
            Arc::new(Self {
                outbound,
                events: Mutex::new(events_rx),
                pump,
                heartbeat: None,
                child: Mutex::new(None),
                alive: Arc::clone(&alive),
            }),
            alive,
        )
    }
}
