//! Page driver contract consumed by the settle watcher and the structural perceiver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::adapter::CdpAdapter;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::PageEvents;
use crate::ids::PageId;

const DOM_READY_POLL: Duration = Duration::from_millis(100);

/// Anything that can carry protocol commands for one page.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError>;

    /// `Runtime.callFunctionOn` against a remote object, returning the `result` remote object.
    async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        return_by_value: bool,
    ) -> Result<Value, AdapterError> {
        let response = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function_declaration,
                    "returnByValue": return_by_value,
                }),
            )
            .await?;
        remote_result(response)
    }
}

/// Dedicated debugging session on a page target. Must be detached by its owner.
#[async_trait]
pub trait DebugSession: ProtocolSession {
    async fn detach(&self) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait PageDriver: ProtocolSession {
    fn page_id(&self) -> PageId;

    fn url(&self) -> Option<String>;

    /// Opens a session separate from the one regular page commands use.
    async fn open_session(&self) -> Result<Box<dyn DebugSession>, AdapterError>;

    /// Events of this page, including its out-of-process frames.
    fn subscribe(&self) -> PageEvents;

    /// Evaluates `expression` in the main frame and returns its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        let result = remote_result(response)?;
        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Registers a script that runs on every future document of this page.
    async fn add_init_script(&self, source: &str) -> Result<(), AdapterError> {
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await
        .map(|_| ())
    }

    /// Whether the main frame has committed a document yet.
    async fn has_document(&self) -> Result<bool, AdapterError> {
        let value = self
            .evaluate("document.documentElement !== null")
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn wait_for_dom_ready(&self, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.evaluate("document.readyState").await?;
            if matches!(state.as_str(), Some("interactive" | "complete")) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Timeout)
                    .with_hint("document never reached DOMContentLoaded")
                    .retriable(true));
            }
            sleep(DOM_READY_POLL).await;
        }
    }
}

/// Pulls `result` out of a Runtime response, turning `exceptionDetails` into an error.
fn remote_result(mut response: Value) -> Result<Value, AdapterError> {
    if let Some(details) = response.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("uncaught exception")
            .to_string();
        return Err(AdapterError::new(AdapterErrorKind::Evaluation)
            .with_hint(text)
            .with_data(details.clone()));
    }
    Ok(response
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

/// A page tab owned by a [`CdpAdapter`].
#[derive(Clone)]
pub struct CdpPage {
    id: PageId,
    adapter: Arc<CdpAdapter>,
}

impl CdpPage {
    pub(crate) fn new(id: PageId, adapter: Arc<CdpAdapter>) -> Self {
        Self { id, adapter }
    }

    pub async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        let response = self
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(reason) = response.get("errorText").and_then(Value::as_str) {
            return Err(AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("navigation to {url} failed: {reason}")));
        }
        self.adapter.registry().set_recent_url(&self.id, url.to_string());
        Ok(())
    }
}

#[async_trait]
impl ProtocolSession for CdpPage {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.adapter.send_page_command(self.id, method, params).await
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    fn page_id(&self) -> PageId {
        self.id
    }

    fn url(&self) -> Option<String> {
        self.adapter
            .registry()
            .get(&self.id)
            .and_then(|ctx| ctx.recent_url)
    }

    async fn open_session(&self) -> Result<Box<dyn DebugSession>, AdapterError> {
        let target_id = self
            .adapter
            .registry()
            .get(&self.id)
            .map(|ctx| ctx.target_id)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::SessionMissing)
                    .with_hint(format!("page {} has no target", self.id))
            })?;
        let session_id = self.adapter.attach_session(self.id, &target_id).await?;
        debug!(target: "cdp-adapter", page = %self.id, session = %session_id, "debug session opened");
        Ok(Box::new(CdpDebugSession {
            page: self.id,
            session_id,
            adapter: Arc::clone(&self.adapter),
        }))
    }

    fn subscribe(&self) -> PageEvents {
        self.adapter.subscribe_page(self.id)
    }
}

/// Flattened session attached through `Target.attachToTarget`.
pub struct CdpDebugSession {
    page: PageId,
    session_id: String,
    adapter: Arc<CdpAdapter>,
}

impl CdpDebugSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn page(&self) -> PageId {
        self.page
    }
}

#[async_trait]
impl ProtocolSession for CdpDebugSession {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.adapter
            .send_session_command(&self.session_id, method, params)
            .await
    }
}

#[async_trait]
impl DebugSession for CdpDebugSession {
    async fn detach(&self) -> Result<(), AdapterError> {
        self.adapter.detach_session(&self.session_id).await
    }
}
