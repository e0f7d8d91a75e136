//! Structural cleaning: prunes and collapses accessibility nodes that carry no information.
//!
//! Children are cleaned before their parent's collapse policy is evaluated. Sibling subtrees
//! share no state and are cleaned concurrently.

use async_recursion::async_recursion;
use futures::future::join_all;
use tracing::debug;

use crate::metrics;
use crate::model::{is_negative_id, AccessibilityNode};
use crate::ports::TagNameResolver;

/// Cleans one subtree. `None` means the whole subtree was dropped.
#[async_recursion]
pub async fn clean_structural_nodes(
    mut node: AccessibilityNode,
    resolver: &dyn TagNameResolver,
) -> Option<AccessibilityNode> {
    if is_negative_id(&node.node_id) {
        return None;
    }

    if node.children().is_empty() {
        return (!node.is_structural()).then_some(node);
    }
    let children = node.children.take().unwrap_or_default();

    let mut cleaned: Vec<AccessibilityNode> = join_all(
        children
            .into_iter()
            .map(|child| clean_structural_nodes(child, resolver)),
    )
    .await
    .into_iter()
    .flatten()
    .collect();

    if node.is_structural() {
        match cleaned.len() {
            0 => return None,
            1 => return cleaned.into_iter().next(),
            _ => resolve_role(&mut node, resolver).await,
        }
    }

    if text_duplicates_name(&node, &cleaned) {
        let remaining = cleaned.iter().filter(|child| !is_named_text(child)).count();
        // structural nodes must keep at least two children
        if !node.is_structural() || remaining >= 2 {
            cleaned.retain(|child| !is_named_text(child));
        }
    }

    node.children = Some(cleaned);
    Some(node)
}

/// Cleans every root independently, keeping the survivors in order.
pub async fn clean_forest(
    roots: Vec<AccessibilityNode>,
    resolver: &dyn TagNameResolver,
) -> Vec<AccessibilityNode> {
    join_all(
        roots
            .into_iter()
            .map(|root| clean_structural_nodes(root, resolver)),
    )
    .await
    .into_iter()
    .flatten()
    .collect()
}

async fn resolve_role(node: &mut AccessibilityNode, resolver: &dyn TagNameResolver) {
    let Some(backend_id) = node.backend_dom_node_id else {
        return;
    };
    match resolver.tag_name(backend_id).await {
        Ok(Some(tag)) => {
            metrics::record_role_resolution(true);
            node.role = tag;
        }
        Ok(None) => metrics::record_role_resolution(false),
        Err(err) => {
            metrics::record_role_resolution(false);
            debug!(
                target: "perceiver",
                backend_id,
                %err,
                "could not resolve tag name for structural node"
            );
        }
    }
}

fn is_named_text(node: &AccessibilityNode) -> bool {
    node.role == "StaticText" && node.name.as_deref().is_some_and(|name| !name.is_empty())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the named `StaticText` children, joined, spell out exactly the parent's name.
fn text_duplicates_name(parent: &AccessibilityNode, children: &[AccessibilityNode]) -> bool {
    let Some(parent_name) = parent.name.as_deref().map(normalize_whitespace) else {
        return false;
    };
    if parent_name.is_empty() {
        return false;
    }

    let combined: String = children
        .iter()
        .filter(|child| is_named_text(child))
        .filter_map(|child| child.name.as_deref())
        .map(normalize_whitespace)
        .collect();
    combined == parent_name
}

/// Drops named `StaticText` children when their joined text is exactly the parent's name.
pub fn remove_redundant_static_text(
    parent: &AccessibilityNode,
    mut children: Vec<AccessibilityNode>,
) -> Vec<AccessibilityNode> {
    if text_duplicates_name(parent, &children) {
        children.retain(|child| !is_named_text(child));
    }
    children
}
