//! Raw DOM capture: the unfiltered element-tree dump read out of the page.
//!
//! Capture is a pure read; the injected script never touches styles or
//! layout. Filtering, bounding and xpath assignment happen in
//! [`crate::snapshot`] so the policy stays testable outside a browser.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use headless_chrome::Tab;
use serde::{Deserialize, Serialize};

use crate::CAPTURE_MAX_DEPTH;

/// One element as dumped by the page, before any filtering.
///
/// Every element child is recorded, hidden or not: positional xpath indices
/// must count the siblings the serializer later drops. `style` is `None`
/// when `getComputedStyle` threw inside the page; the serializer treats that
/// as not visible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDomNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    #[serde(default)]
    pub style: Option<HashMap<String, String>>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<RawDomNode>,
}

impl RawDomNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn style_value(&self, name: &str) -> Option<&str> {
        self.style.as_ref()?.get(name).map(String::as_str)
    }
}

/// JavaScript injected into the page to dump the element tree as JSON.
///
/// Records per element: lower-cased tag, full attribute map, the computed
/// style subset the serializer filters on, and the element's own direct text
/// (not descendants'). Depth is capped to match the capture bound.
const CAPTURE_JS: &str = r#"
(() => {
  const MAX_DEPTH = __MAX_DEPTH__;

  function ownText(el) {
    let t = '';
    for (const n of el.childNodes) {
      if (n.nodeType === Node.TEXT_NODE) t += n.textContent;
    }
    return t.trim();
  }

  function dump(el, depth) {
    const node = { tag: el.tagName.toLowerCase(), attrs: {}, style: null, text: ownText(el), children: [] };
    for (const a of el.attributes) node.attrs[a.name] = a.value;
    try {
      const s = getComputedStyle(el);
      node.style = {
        'display': s.display,
        'visibility': s.visibility,
        'opacity': s.opacity,
        'color': s.color,
        'background-color': s.backgroundColor,
        'font-size': s.fontSize
      };
    } catch (e) {
      node.style = null;
    }
    if (depth < MAX_DEPTH) {
      for (const child of el.children) {
        node.children.push(dump(child, depth + 1));
      }
    }
    return node;
  }

  return JSON.stringify(dump(document.documentElement, 0));
})()
"#;

/// Dump the live element tree from the given tab.
pub fn capture_raw(tab: &Arc<Tab>) -> Result<RawDomNode> {
    let js = CAPTURE_JS.replace("__MAX_DEPTH__", &CAPTURE_MAX_DEPTH.to_string());
    let result = tab.evaluate(&js, false)?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let node: RawDomNode = serde_json::from_str(&raw)?;
    Ok(node)
}

/// Get the current page URL.
pub fn current_url(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("window.location.href", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string()))
}

/// Get the current page title.
pub fn page_title(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("document.title", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "untitled".to_string()))
}

/// Truncated body text, the single-phase interpreter's page context.
pub fn page_text(tab: &Arc<Tab>, max_chars: usize) -> Result<String> {
    let result = tab.evaluate("document.body ? document.body.innerText : ''", false)?;
    let text = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    Ok(text.chars().take(max_chars).collect())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::RawDomNode;
    use std::collections::HashMap;

    /// Visible element with default computed style.
    pub fn el(tag: &str, children: Vec<RawDomNode>) -> RawDomNode {
        RawDomNode {
            tag: tag.to_string(),
            attrs: HashMap::new(),
            style: Some(default_style()),
            text: String::new(),
            children,
        }
    }

    pub fn default_style() -> HashMap<String, String> {
        [
            ("display", "block"),
            ("visibility", "visible"),
            ("opacity", "1"),
            ("color", "rgb(0, 0, 0)"),
            ("background-color", "rgba(0, 0, 0, 0)"),
            ("font-size", "16px"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    pub fn with_attr(mut node: RawDomNode, name: &str, value: &str) -> RawDomNode {
        node.attrs.insert(name.to_string(), value.to_string());
        node
    }

    pub fn with_text(mut node: RawDomNode, text: &str) -> RawDomNode {
        node.text = text.to_string();
        node
    }

    pub fn with_style(mut node: RawDomNode, name: &str, value: &str) -> RawDomNode {
        node.style
            .get_or_insert_with(HashMap::new)
            .insert(name.to_string(), value.to_string());
        node
    }
}
