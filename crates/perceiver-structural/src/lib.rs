//! Structural perceiver: turns a page's accessibility tree into a compact, cleaned snapshot.
//!
//! [`get_accessibility_tree`] fetches the raw records, annotates scrollable regions, assembles
//! the hierarchy and strips structural noise, producing a [`TreeResult`] with a textual
//! rendering for prompts and an id to URL index. [`xpath_for_backend_node`] maps node ids the
//! caller picked back to locators.

pub mod builder;
pub mod cleaner;
pub mod errors;
pub mod injection;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod render;
pub mod scrollable;
pub mod snapshot;
pub mod urls;
pub mod xpath;

pub use builder::build_hierarchical_tree;
pub use cleaner::{clean_forest, clean_structural_nodes};
pub use errors::PerceiverError;
pub use injection::ensure_injection;
pub use model::{AccessibilityNode, AxProperty, AxRecord, IframeStub, TreeResult};
pub use ports::{NoopTagResolver, PageTagResolver, TagNameResolver};
pub use render::{format_simplified_tree, render_forest};
pub use scrollable::{annotate_scrollable, find_scrollable_backend_ids};
pub use snapshot::{get_accessibility_tree, get_accessibility_tree_with, SnapshotOptions};
pub use urls::{inject_urls, UrlPath};
pub use xpath::{resolve_xpath, xpath_for_backend_node};
