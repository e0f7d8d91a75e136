//! Compact textual rendering of the cleaned tree, one line per node:
//! `[nodeId] role: name`, indented two spaces per depth level.

use crate::model::AccessibilityNode;

const INDENT: &str = "  ";

pub fn format_simplified_tree(node: &AccessibilityNode, level: usize) -> String {
    let mut lines = Vec::new();
    push_lines(node, level, &mut lines);
    lines.join("\n")
}

pub fn render_forest(tree: &[AccessibilityNode]) -> String {
    let mut lines = Vec::new();
    for root in tree {
        push_lines(root, 0, &mut lines);
    }
    lines.join("\n")
}

fn push_lines(node: &AccessibilityNode, level: usize, lines: &mut Vec<String>) {
    let mut line = format!("{}[{}] {}", INDENT.repeat(level), node.node_id, node.role);
    if let Some(name) = node.name.as_deref().filter(|name| !name.is_empty()) {
        line.push_str(": ");
        line.push_str(&name.replace(['\r', '\n'], " "));
    }
    lines.push(line);
    for child in node.children() {
        push_lines(child, level + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_depth_first_with_indentation() {
        let tree = vec![
            AccessibilityNode::new("1", "RootWebArea")
                .with_name("Example")
                .with_children(vec![
                    AccessibilityNode::new("4", "navigation").with_children(vec![
                        AccessibilityNode::new("5", "link").with_name("Home"),
                    ]),
                    AccessibilityNode::new("6", "scrollable, list"),
                ]),
            AccessibilityNode::new("9", "dialog").with_name("Cookies"),
        ];

        assert_eq!(
            render_forest(&tree),
            "[1] RootWebArea: Example\n  [4] navigation\n    [5] link: Home\n  [6] scrollable, list\n[9] dialog: Cookies"
        );
        assert_eq!(
            format_simplified_tree(&tree[0].children()[0], 1),
            "  [4] navigation\n    [5] link: Home"
        );
        assert_eq!(render_forest(&[]), "");
    }

    #[test]
    fn multiline_names_stay_on_one_line() {
        let tree = vec![AccessibilityNode::new("1", "code").with_children(vec![
            AccessibilityNode::new("2", "StaticText").with_name("fn main() {\r\n}\n"),
        ])];

        let rendered = render_forest(&tree);

        assert_eq!(rendered.lines().count(), 2);
        assert_eq!(rendered, "[1] code\n  [2] StaticText: fn main() {  } ");
    }
}
