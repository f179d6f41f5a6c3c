//! Snapshot serializer: a bounded, filtered tree of the visible DOM.
//!
//! The serializer is a pure function over a [`RawDomNode`] dump; it never
//! reads the live page itself. Filtering happens per node, in order: hidden
//! tag set, visibility checks (fail closed on an unreadable computed style),
//! then node construction with the attribute allow-list and text bound.
//! Skipped nodes take their whole subtree with them.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::dom::RawDomNode;
use crate::xpath::{self, PathStep};
use crate::{RENDER_MAX_CHILDREN, RENDER_MAX_DEPTH};

/// Attributes worth shipping to the classifier.
const ATTR_ALLOWLIST: &[&str] = &[
    "id",
    "class",
    "href",
    "src",
    "alt",
    "title",
    "type",
    "value",
    "placeholder",
    "aria-label",
    "role",
    "name",
    "data-testid",
];

/// Attribute values longer than this are dropped outright.
const ATTR_VALUE_MAX_CHARS: usize = 200;

/// Direct text is truncated to this many characters.
const TEXT_MAX_CHARS: usize = 100;

/// Subtrees never descended into.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "svg", "iframe"];

/// Tags whose non-default color/background/font-size are recorded.
const STYLED_TAGS: &[&str] = &[
    "a", "button", "input", "textarea", "select", "h1", "h2", "h3", "h4", "h5", "h6", "nav",
    "header", "footer",
];

/// Browser defaults; only deviations are interesting.
const STYLE_DEFAULTS: &[(&str, &str)] = &[
    ("color", "rgb(0, 0, 0)"),
    ("background-color", "rgba(0, 0, 0, 0)"),
    ("font-size", "16px"),
];

/// One node of the serialized tree. Never mutated in place; a recapture
/// supersedes the whole tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub style: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
    pub xpath: String,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    /// Total node count, the payload-size signal logged by the relay.
    pub fn count_nodes(&self) -> usize {
        1 + self.children.iter().map(SnapshotNode::count_nodes).sum::<usize>()
    }
}

/// A serialized tree plus its capture instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: SnapshotNode,
    pub captured_at: SystemTime,
}

impl Snapshot {
    pub fn new(tree: SnapshotNode) -> Self {
        Self {
            tree,
            captured_at: SystemTime::now(),
        }
    }

    /// Staleness relative to `now`. Surfaced to the interpreter; enforcement
    /// lives in [`crate::cache::StalenessPolicy`].
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.captured_at).unwrap_or_default()
    }

    /// Milliseconds since the Unix epoch, the wire form of `captured_at`.
    pub fn timestamp_ms(&self) -> u64 {
        self.captured_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Serialize a raw dump into the bounded snapshot tree.
///
/// Returns `None` when the root itself is filtered out (hidden tag, not
/// visible, or `max_depth` of zero).
pub fn serialize(raw: &RawDomNode, max_depth: usize) -> Option<SnapshotNode> {
    let mut steps = vec![PathStep::new(raw.tag.clone(), 1)];
    build(raw, max_depth, &mut steps)
}

fn build(raw: &RawDomNode, depth_left: usize, steps: &mut Vec<PathStep>) -> Option<SnapshotNode> {
    if depth_left == 0 {
        return None;
    }
    if HIDDEN_TAGS.contains(&raw.tag.as_str()) {
        return None;
    }
    if !is_visible(raw) {
        return None;
    }

    let xpath = xpath::locate(raw.attr("id"), steps);

    let mut children = Vec::new();
    let mut seen_tags: BTreeMap<&str, usize> = BTreeMap::new();
    for child in &raw.children {
        let preceding = seen_tags.entry(child.tag.as_str()).or_insert(0);
        *preceding += 1;
        steps.push(PathStep::new(child.tag.clone(), *preceding));
        if let Some(node) = build(child, depth_left - 1, steps) {
            children.push(node);
        }
        steps.pop();
    }

    Some(SnapshotNode {
        tag: raw.tag.clone(),
        attrs: filtered_attrs(raw),
        style: filtered_style(raw),
        text: truncate_chars(&raw.text, TEXT_MAX_CHARS),
        xpath,
        children,
    })
}

/// Visibility check, fail closed: an absent computed style drops the node.
fn is_visible(raw: &RawDomNode) -> bool {
    let Some(style) = raw.style.as_ref() else {
        return false;
    };
    if style.get("display").map(String::as_str) == Some("none") {
        return false;
    }
    if style.get("visibility").map(String::as_str) == Some("hidden") {
        return false;
    }
    if let Some(opacity) = style.get("opacity") {
        if opacity.trim().parse::<f64>().map(|o| o == 0.0).unwrap_or(false) {
            return false;
        }
    }
    if raw.attr("aria-hidden") == Some("true") {
        return false;
    }
    true
}

fn filtered_attrs(raw: &RawDomNode) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    for name in ATTR_ALLOWLIST {
        if let Some(value) = raw.attr(name) {
            if value.chars().count() <= ATTR_VALUE_MAX_CHARS {
                attrs.insert(name.to_string(), value.to_string());
            }
        }
    }
    attrs
}

fn filtered_style(raw: &RawDomNode) -> BTreeMap<String, String> {
    let mut style = BTreeMap::new();
    if !STYLED_TAGS.contains(&raw.tag.as_str()) {
        return style;
    }
    for (name, default) in STYLE_DEFAULTS {
        if let Some(value) = raw.style_value(name) {
            if value != *default {
                style.insert(name.to_string(), value.to_string());
            }
        }
    }
    style
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Render a snapshot tree as indented text for the classifier prompt.
///
/// Depth is capped at [`RENDER_MAX_DEPTH`]; at most [`RENDER_MAX_CHILDREN`]
/// children appear literally per node, the overflow collapsing into a single
/// count line.
pub fn render_text(node: &SnapshotNode) -> String {
    let mut out = String::new();
    render_node(node, 0, &mut out);
    out
}

fn render_node(node: &SnapshotNode, depth: usize, out: &mut String) {
    if depth >= RENDER_MAX_DEPTH {
        return;
    }
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&node.tag);
    for (name, value) in &node.attrs {
        out.push_str(&format!(" {}=\"{}\"", name, value));
    }
    for (name, value) in &node.style {
        out.push_str(&format!(" {}:{}", name, value));
    }
    out.push('>');
    if !node.text.is_empty() {
        out.push_str(&format!(" \"{}\"", node.text));
    }
    out.push_str(&format!(" [{}]", node.xpath));
    out.push('\n');

    for child in node.children.iter().take(RENDER_MAX_CHILDREN) {
        render_node(child, depth + 1, out);
    }
    if node.children.len() > RENDER_MAX_CHILDREN {
        let remaining = node.children.len() - RENDER_MAX_CHILDREN;
        out.push_str(&format!("{}  ... {} more children\n", indent, remaining));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::test_support::{el, with_attr, with_style, with_text};

    #[test]
    fn hidden_tag_subtrees_are_not_descended() {
        let root = el(
            "body",
            vec![
                el("script", vec![el("div", vec![])]),
                el("svg", vec![]),
                el("iframe", vec![]),
                el("p", vec![]),
            ],
        );
        let node = serialize(&root, 10).unwrap();
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].tag, "p");
    }

    #[test]
    fn invisible_elements_and_their_subtrees_are_excluded() {
        let hidden_children = vec![
            with_style(el("div", vec![el("span", vec![])]), "display", "none"),
            with_style(el("div", vec![]), "visibility", "hidden"),
            with_style(el("div", vec![]), "opacity", "0"),
            with_attr(el("div", vec![]), "aria-hidden", "true"),
        ];
        let root = el("body", hidden_children);
        let node = serialize(&root, 10).unwrap();
        assert!(node.children.is_empty());
    }

    #[test]
    fn unreadable_computed_style_drops_the_node_silently() {
        let mut broken = el("div", vec![]);
        broken.style = None;
        let root = el("body", vec![broken, el("p", vec![])]);
        let node = serialize(&root, 10).unwrap();
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].tag, "p");
    }

    #[test]
    fn id_elements_get_the_short_xpath() {
        let root = el("body", vec![with_attr(el("button", vec![]), "id", "send")]);
        let node = serialize(&root, 10).unwrap();
        assert_eq!(node.children[0].xpath, "//*[@id=\"send\"]");
    }

    #[test]
    fn positional_xpath_counts_preceding_same_tag_siblings() {
        // Hidden siblings still occupy positions in the live DOM.
        let root = el(
            "body",
            vec![
                el("div", vec![]),
                with_style(el("div", vec![]), "display", "none"),
                el("div", vec![]),
                el("span", vec![]),
            ],
        );
        let node = serialize(&root, 10).unwrap();
        let xpaths: Vec<&str> = node.children.iter().map(|c| c.xpath.as_str()).collect();
        assert_eq!(xpaths, vec!["/body/div", "/body/div[3]", "/body/span"]);
    }

    #[test]
    fn attrs_follow_the_allow_list_and_length_bound() {
        let button = with_attr(
            with_attr(
                with_attr(el("button", vec![]), "aria-label", "Send mail"),
                "onclick",
                "launch()",
            ),
            "class",
            &"x".repeat(201),
        );
        let root = el("body", vec![button]);
        let node = serialize(&root, 10).unwrap();
        let attrs = &node.children[0].attrs;
        assert_eq!(attrs.get("aria-label").map(String::as_str), Some("Send mail"));
        assert!(!attrs.contains_key("onclick"));
        assert!(!attrs.contains_key("class"));
    }

    #[test]
    fn text_is_truncated_to_one_hundred_chars() {
        let root = el("body", vec![with_text(el("p", vec![]), &"a".repeat(150))]);
        let node = serialize(&root, 10).unwrap();
        assert_eq!(node.children[0].text.len(), 100);
    }

    #[test]
    fn style_recorded_only_for_interactive_tags_and_only_non_defaults() {
        let link = with_style(el("a", vec![]), "color", "rgb(255, 0, 0)");
        let div = with_style(el("div", vec![]), "color", "rgb(255, 0, 0)");
        let root = el("body", vec![link, div]);
        let node = serialize(&root, 10).unwrap();
        assert_eq!(
            node.children[0].style.get("color").map(String::as_str),
            Some("rgb(255, 0, 0)")
        );
        // Default font-size was present in the dump but is not recorded.
        assert!(!node.children[0].style.contains_key("font-size"));
        assert!(node.children[1].style.is_empty());
    }

    #[test]
    fn depth_cap_prunes_deep_branches() {
        let deep = el("div", vec![el("div", vec![el("div", vec![])])]);
        let root = el("body", vec![deep]);
        let node = serialize(&root, 2).unwrap();
        assert_eq!(node.children.len(), 1);
        assert!(node.children[0].children.is_empty());
    }

    #[test]
    fn repeated_serialization_is_structurally_identical() {
        let root = el(
            "body",
            vec![
                with_attr(el("a", vec![el("span", vec![])]), "href", "/inbox"),
                el("div", vec![with_text(el("p", vec![]), "hello")]),
            ],
        );
        let first = serialize(&root, 10).unwrap();
        let second = serialize(&root, 10).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn render_caps_children_at_twenty_with_a_count_line() {
        let children: Vec<_> = (0..25).map(|_| el("li", vec![])).collect();
        let root = el("ul", children);
        let node = serialize(&root, 10).unwrap();
        let text = render_text(&node);
        let literal = text.matches("<li>").count();
        assert_eq!(literal, 20);
        assert!(text.contains("... 5 more children"));
    }

    #[test]
    fn render_respects_the_depth_cap() {
        fn nest(depth: usize) -> crate::dom::RawDomNode {
            if depth == 0 {
                el("div", vec![])
            } else {
                el("div", vec![nest(depth - 1)])
            }
        }
        let node = serialize(&nest(12), 20).unwrap();
        let text = render_text(&node);
        assert_eq!(text.lines().count(), RENDER_MAX_DEPTH);
    }

    #[test]
    fn snapshot_age_is_now_minus_capture() {
        let snap = Snapshot::new(el_node());
        let later = snap.captured_at + std::time::Duration::from_secs(5);
        assert_eq!(snap.age(later).as_secs(), 5);
    }

    fn el_node() -> SnapshotNode {
        serialize(&el("body", vec![]), 10).unwrap()
    }
}
