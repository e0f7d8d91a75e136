//! Accessibility records as received from `Accessibility.getFullAXTree`, and the cleaned tree
//! built from them.
//!
//! The protocol wraps most scalar fields in `{ "type": ..., "value": ... }` objects. Those shapes
//! are unwrapped once, in [`AxRecord::from_cdp`]; nothing downstream inspects them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Roles that carry no meaning of their own.
pub const STRUCTURAL_ROLES: [&str; 2] = ["generic", "none"];

pub fn is_structural_role(role: &str) -> bool {
    STRUCTURAL_ROLES.contains(&role)
}

/// True when `node_id` parses as a negative integer. Non-numeric ids are kept.
pub fn is_negative_id(node_id: &str) -> bool {
    node_id.parse::<i64>().map(|id| id < 0).unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxProperty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// One flat accessibility record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AxRecord {
    pub node_id: String,
    /// Empty when the browser reported no role.
    pub role: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
    pub backend_dom_node_id: Option<i64>,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub properties: Vec<AxProperty>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAxNode {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    role: Option<WireAxValue>,
    #[serde(default)]
    name: Option<WireAxValue>,
    #[serde(default)]
    description: Option<WireAxValue>,
    #[serde(default)]
    value: Option<WireAxValue>,
    #[serde(rename = "backendDOMNodeId", default)]
    backend_dom_node_id: Option<i64>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    child_ids: Option<Vec<String>>,
    #[serde(default)]
    properties: Option<Vec<WireAxProperty>>,
}

#[derive(Deserialize)]
struct WireAxValue {
    #[serde(default)]
    value: Option<Value>,
}

impl WireAxValue {
    fn into_text(self) -> Option<String> {
        match self.value? {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct WireAxProperty {
    name: String,
    #[serde(default)]
    value: Option<WireAxValue>,
}

impl AxRecord {
    /// Normalizes one `AXNode`. Returns `None` when the payload has no `nodeId` or is malformed.
    pub fn from_cdp(raw: &Value) -> Option<Self> {
        let wire = match WireAxNode::deserialize(raw) {
            Ok(wire) => wire,
            Err(err) => {
                debug!(target: "perceiver", %err, "skipping malformed ax node");
                return None;
            }
        };
        let node_id = wire.node_id.filter(|id| !id.is_empty())?;
        Some(Self {
            node_id,
            role: wire.role.and_then(WireAxValue::into_text).unwrap_or_default(),
            name: wire.name.and_then(WireAxValue::into_text),
            description: wire.description.and_then(WireAxValue::into_text),
            value: wire.value.and_then(WireAxValue::into_text),
            backend_dom_node_id: wire.backend_dom_node_id,
            parent_id: wire.parent_id,
            child_ids: wire.child_ids.unwrap_or_default(),
            properties: wire
                .properties
                .unwrap_or_default()
                .into_iter()
                .map(|prop| AxProperty {
                    name: prop.name,
                    value: prop.value.and_then(|wrapped| wrapped.value),
                })
                .collect(),
        })
    }

    /// Every record of a `getFullAXTree` response, in protocol order.
    pub fn parse_all(response: &Value) -> Vec<Self> {
        response
            .get("nodes")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().filter_map(Self::from_cdp).collect())
            .unwrap_or_default()
    }

    /// Trimmed `url` property of link-like nodes.
    pub fn url(&self) -> Option<String> {
        self.properties
            .iter()
            .find(|prop| prop.name == "url")
            .and_then(|prop| prop.value.as_ref())
            .and_then(Value::as_str)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }
}

/// Node of the cleaned hierarchical tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityNode {
    pub node_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(
        rename = "backendDOMNodeId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub backend_dom_node_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<AxProperty>,
    /// `None` for leaves; `Some(vec![])` when every child was cleaned away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<AccessibilityNode>>,
}

impl AccessibilityNode {
    pub fn new(node_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_backend_id(mut self, backend_dom_node_id: i64) -> Self {
        self.backend_dom_node_id = Some(backend_dom_node_id);
        self
    }

    pub fn with_children(mut self, children: Vec<AccessibilityNode>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn children(&self) -> &[AccessibilityNode] {
        self.children.as_deref().unwrap_or_default()
    }

    pub fn is_structural(&self) -> bool {
        is_structural_role(&self.role)
    }

    /// Depth-first walk over this node and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a AccessibilityNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeStub {
    pub role: String,
    pub node_id: String,
}

impl IframeStub {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            role: "Iframe".into(),
            node_id: node_id.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeResult {
    pub tree: Vec<AccessibilityNode>,
    pub simplified: String,
    pub iframes: Vec<IframeStub>,
    pub id_to_url: HashMap<String, String>,
}

impl TreeResult {
    pub fn find(&self, node_id: &str) -> Option<&AccessibilityNode> {
        let mut found = None;
        for root in &self.tree {
            root.walk(&mut |node| {
                if found.is_none() && node.node_id == node_id {
                    found = Some(node);
                }
            });
        }
        found
    }
}
