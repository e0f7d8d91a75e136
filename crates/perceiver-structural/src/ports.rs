use async_trait::async_trait;
use cdp_adapter::{PageDriver, ProtocolSession};
use serde_json::{json, Value};

use crate::errors::PerceiverError;

pub(crate) const TAG_NAME_FUNCTION: &str =
    "function() { return this.tagName ? this.tagName.toLowerCase() : \"\"; }";

/// Looks up the DOM tag behind a structural accessibility node.
#[async_trait]
pub trait TagNameResolver: Send + Sync {
    /// Lower-cased tag name, `None` when the node has none (text, document).
    async fn tag_name(&self, backend_node_id: i64) -> Result<Option<String>, PerceiverError>;
}

/// Resolves tags against a live page.
pub struct PageTagResolver<'a, P: ?Sized> {
    page: &'a P,
}

impl<'a, P> PageTagResolver<'a, P>
where
    P: PageDriver + ?Sized,
{
    pub fn new(page: &'a P) -> Self {
        Self { page }
    }
}

#[async_trait]
impl<'a, P> TagNameResolver for PageTagResolver<'a, P>
where
    P: PageDriver + ?Sized,
{
    async fn tag_name(&self, backend_node_id: i64) -> Result<Option<String>, PerceiverError> {
        let Some(object_id) = resolve_object_id(self.page, backend_node_id).await? else {
            return Ok(None);
        };
        let result = self
            .page
            .call_function_on(&object_id, TAG_NAME_FUNCTION, true)
            .await?;
        Ok(result
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .filter(|tag| !tag.is_empty()))
    }
}

/// Never resolves anything; structural roles stay as reported.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTagResolver;

#[async_trait]
impl TagNameResolver for NoopTagResolver {
    async fn tag_name(&self, _backend_node_id: i64) -> Result<Option<String>, PerceiverError> {
        Ok(None)
    }
}

/// `DOM.resolveNode` for a backend id, returning the remote object id if the node is live.
pub(crate) async fn resolve_object_id<S>(
    session: &S,
    backend_node_id: i64,
) -> Result<Option<String>, PerceiverError>
where
    S: ProtocolSession + ?Sized,
{
    let response = session
        .send_command("DOM.resolveNode", json!({ "backendNodeId": backend_node_id }))
        .await?;
    Ok(response
        .pointer("/object/objectId")
        .and_then(Value::as_str)
        .map(str::to_string))
}
