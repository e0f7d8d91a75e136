//! Flat accessibility records to a cleaned hierarchical tree.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::cleaner::clean_forest;
use crate::model::{
    is_negative_id, is_structural_role, AccessibilityNode, AxRecord, IframeStub, TreeResult,
};
use crate::ports::TagNameResolver;
use crate::render::render_forest;

/// Builds the [`TreeResult`] for one snapshot.
///
/// Records without a name, children or an interactive role are dropped before assembly.
/// Children keep the protocol's record order. Every surviving record is reachable from exactly
/// one root.
pub async fn build_hierarchical_tree(
    records: Vec<AxRecord>,
    resolver: &dyn TagNameResolver,
) -> TreeResult {
    let mut id_to_url = HashMap::new();
    let mut candidates: Vec<AccessibilityNode> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        if record.node_id.is_empty() || is_negative_id(&record.node_id) {
            continue;
        }
        if let Some(url) = record.url() {
            id_to_url.insert(record.node_id.clone(), url);
        }
        let Some(node) = candidate(record) else {
            continue;
        };
        match index.get(&node.node_id) {
            Some(&slot) => candidates[slot] = node,
            None => {
                index.insert(node.node_id.clone(), candidates.len());
                candidates.push(node);
            }
        }
    }

    let mut iframes = Vec::new();
    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); candidates.len()];
    let mut roots = Vec::new();
    for (slot, node) in candidates.iter().enumerate() {
        if node.role == "Iframe" {
            iframes.push(IframeStub::new(node.node_id.clone()));
        }
        let parent = node
            .parent_id
            .as_ref()
            .and_then(|parent_id| index.get(parent_id))
            .copied()
            .filter(|&parent| parent != slot);
        match parent {
            Some(parent) => children_of[parent].push(slot),
            None => roots.push(slot),
        }
    }

    let mut assembler = Assembler {
        candidates: candidates.into_iter().map(Some).collect(),
        children_of,
        visited: HashSet::new(),
    };
    let mut forest: Vec<AccessibilityNode> = roots
        .into_iter()
        .filter_map(|slot| assembler.assemble(slot))
        .collect();

    // parent cycles leave records unreachable; promote the first of each cycle to a root
    for slot in 0..assembler.children_of.len() {
        if let Some(node) = assembler.assemble(slot) {
            debug!(target: "perceiver", node_id = %node.node_id, "ax parent cycle; promoting node to root");
            forest.push(node);
        }
    }

    let tree = clean_forest(forest, resolver).await;
    let simplified = render_forest(&tree);

    TreeResult {
        tree,
        simplified,
        iframes,
        id_to_url,
    }
}

/// First-pass filter: copies only the populated optional fields.
fn candidate(record: AxRecord) -> Option<AccessibilityNode> {
    let has_children = !record.child_ids.is_empty();
    let name = record.name.filter(|name| !name.trim().is_empty());
    let is_interactive = !is_structural_role(&record.role) && record.role != "InlineTextBox";
    if name.is_none() && !has_children && !is_interactive {
        return None;
    }

    Some(AccessibilityNode {
        node_id: record.node_id,
        role: record.role,
        name,
        description: record.description.filter(|text| !text.is_empty()),
        value: record.value.filter(|text| !text.is_empty()),
        backend_dom_node_id: record.backend_dom_node_id,
        parent_id: record.parent_id,
        child_ids: record.child_ids,
        properties: record.properties,
        children: None,
    })
}

struct Assembler {
    candidates: Vec<Option<AccessibilityNode>>,
    children_of: Vec<Vec<usize>>,
    visited: HashSet<usize>,
}

impl Assembler {
    fn assemble(&mut self, slot: usize) -> Option<AccessibilityNode> {
        if !self.visited.insert(slot) {
            return None;
        }
        let mut node = self.candidates[slot].take()?;
        let child_slots = std::mem::take(&mut self.children_of[slot]);
        let children: Vec<AccessibilityNode> = child_slots
            .into_iter()
            .filter_map(|child| self.assemble(child))
            .collect();
        if !children.is_empty() {
            node.children = Some(children);
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::NoopTagResolver;

    fn record(id: &str, role: &str, name: Option<&str>, parent: Option<&str>, children: &[&str]) -> AxRecord {
        AxRecord {
            node_id: id.into(),
            role: role.into(),
            name: name.map(str::to_string),
            parent_id: parent.map(str::to_string),
            child_ids: children.iter().map(|id| id.to_string()).collect(),
            ..AxRecord::default()
        }
    }

    #[test]
    fn decorative_leaves_are_filtered_before_assembly() {
        assert!(candidate(record("1", "generic", None, None, &[])).is_none());
        assert!(candidate(record("2", "InlineTextBox", Some("  "), None, &[])).is_none());
        assert!(candidate(record("3", "none", None, None, &["4"])).is_some());
        assert!(candidate(record("5", "generic", Some("Label"), None, &[])).is_some());

        let button = candidate(record("6", "button", Some(""), None, &[])).expect("interactive");
        assert_eq!(button.name, None);
    }

    #[tokio::test]
    async fn children_follow_record_order_and_iframes_are_listed() {
        let records = vec![
            record("1", "RootWebArea", Some("Page"), None, &["3", "2"]),
            record("2", "Iframe", None, Some("1"), &[]),
            record("3", "heading", Some("Title"), Some("1"), &[]),
        ];

        let result = build_hierarchical_tree(records, &NoopTagResolver).await;

        assert_eq!(result.tree.len(), 1);
        let order: Vec<&str> = result.tree[0]
            .children()
            .iter()
            .map(|child| child.node_id.as_str())
            .collect();
        assert_eq!(order, vec!["2", "3"]);
        assert_eq!(result.iframes, vec![IframeStub::new("2")]);
    }

    #[tokio::test]
    async fn unresolvable_parents_and_cycles_become_roots() {
        let records = vec![
            record("1", "main", Some("Main"), None, &[]),
            record("2", "button", Some("Orphan"), Some("404"), &[]),
            record("3", "list", Some("A"), Some("4"), &["4"]),
            record("4", "listitem", Some("B"), Some("3"), &["3"]),
        ];

        let result = build_hierarchical_tree(records, &NoopTagResolver).await;

        let roots: Vec<&str> = result.tree.iter().map(|node| node.node_id.as_str()).collect();
        assert_eq!(roots, vec!["1", "2", "3"]);
        assert_eq!(result.tree[2].children()[0].node_id, "4");
        assert!(result.tree[2].children()[0].children().is_empty());
    }
}
