//! XPath locator: a stable-ish path string for re-locating an element.
//!
//! Deterministic for a static tree. Not guaranteed stable across DOM
//! mutations; callers that hold an xpath across a recapture get whatever the
//! new tree says.

/// One ancestry level, ordered root-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub tag: String,
    /// 1-based position among same-tag siblings at this level, i.e.
    /// 1 + the number of *preceding* siblings sharing the tag.
    pub index: usize,
}

impl PathStep {
    pub fn new(tag: impl Into<String>, index: usize) -> Self {
        Self {
            tag: tag.into(),
            index,
        }
    }
}

/// Compute the locator string for an element.
///
/// If the element carries an id the short form `//*[@id="..."]` is returned
/// directly; id uniqueness is assumed, not verified. Otherwise each ancestry
/// level emits `tag` (index 1) or `tag[index]`, joined with `/` and prefixed
/// with a leading `/`.
pub fn locate(id: Option<&str>, steps: &[PathStep]) -> String {
    if let Some(id) = id {
        if !id.is_empty() {
            return format!("//*[@id=\"{}\"]", id);
        }
    }

    let mut path = String::new();
    for step in steps {
        path.push('/');
        path.push_str(&step.tag);
        if step.index > 1 {
            path.push_str(&format!("[{}]", step.index));
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_short_circuits_ancestry() {
        let steps = vec![
            PathStep::new("html", 1),
            PathStep::new("body", 1),
            PathStep::new("div", 3),
        ];
        assert_eq!(locate(Some("submit"), &steps), "//*[@id=\"submit\"]");
    }

    #[test]
    fn empty_id_falls_through_to_positions() {
        let steps = vec![PathStep::new("html", 1), PathStep::new("body", 1)];
        assert_eq!(locate(Some(""), &steps), "/html/body");
    }

    #[test]
    fn positional_index_is_one_plus_preceding_same_tag() {
        // Third div among divs at its level, first span below it.
        let steps = vec![
            PathStep::new("html", 1),
            PathStep::new("body", 1),
            PathStep::new("div", 3),
            PathStep::new("span", 1),
        ];
        assert_eq!(locate(None, &steps), "/html/body/div[3]/span");
    }

    #[test]
    fn index_one_omits_brackets() {
        let steps = vec![PathStep::new("ul", 1), PathStep::new("li", 2)];
        assert_eq!(locate(None, &steps), "/ul/li[2]");
    }
}
