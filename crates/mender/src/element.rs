//! Element descriptions captured from a page.
//!
//! [`ElementInfo`] is the common currency between the browser seam, the
//! fingerprint store, and the candidate generator: the original detection
//! produces one for the targeted element, and live DOM queries produce one per
//! matched node.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::locator::BoundingBox;

/// Compact description of a neighbouring node (ancestor or sibling)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Tag name (lowercase)
    pub tag: String,
    /// `id` attribute, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Class list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
}

impl NodeDescriptor {
    /// Create a descriptor for a tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            id: None,
            classes: Vec::new(),
        }
    }

    /// Set the id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a class
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)?;
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        Ok(())
    }
}

/// Everything known about one element on a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
    /// Tag name (lowercase)
    pub tag: String,
    /// Attributes
    pub attributes: BTreeMap<String, String>,
    /// Visible text, whitespace-collapsed
    pub text: String,
    /// Ancestors, nearest first
    pub ancestors: Vec<NodeDescriptor>,
    /// Element siblings in document order, excluding the element itself
    pub siblings: Vec<NodeDescriptor>,
    /// 1-based position among siblings with the same tag
    pub nth_of_type: usize,
    /// Structural path from the root, e.g. `html > body > form > button:nth-of-type(2)`
    pub path: String,
    /// Rendered position
    pub bounding_box: Option<BoundingBox>,
    /// Whether the element was visible when captured
    pub visible: bool,
    /// Digest of the element screenshot, if one was taken
    pub visual_hash: Option<String>,
}

impl ElementInfo {
    /// Create an element description for a tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            nth_of_type: 1,
            visible: true,
            ..Self::default()
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the visible text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = normalize_text(&text.into());
        self
    }

    /// Set the ancestors (nearest first)
    #[must_use]
    pub fn with_ancestors(mut self, ancestors: Vec<NodeDescriptor>) -> Self {
        self.ancestors = ancestors;
        self
    }

    /// Set the structural path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the bounding box
    #[must_use]
    pub const fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    /// Whether nothing usable was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tag.trim().is_empty()
            && self.attributes.values().all(|v| v.trim().is_empty())
            && self.text.trim().is_empty()
    }

    /// Non-empty attribute value
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Class list from the `class` attribute
    #[must_use]
    pub fn classes(&self) -> Vec<&str> {
        self.attr("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Collapse runs of whitespace and trim
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Heuristic for identifiers produced by frameworks at runtime
/// (`ember123`, `react-select-4-input`, `:r1:`, `css-1q2w3e`, UUIDs).
#[must_use]
pub fn looks_generated(token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() || token.starts_with(':') {
        return true;
    }
    let digits = token.chars().filter(char::is_ascii_digit).count();
    let mut longest_digit_run = 0;
    let mut run = 0;
    for c in token.chars() {
        if c.is_ascii_digit() {
            run += 1;
            longest_digit_run = longest_digit_run.max(run);
        } else {
            run = 0;
        }
    }
    let hex_like = token.len() >= 16 && token.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    let hashed_class = token
        .split_once('-')
        .is_some_and(|(prefix, rest)| {
            matches!(prefix, "css" | "sc" | "jsx" | "emotion")
                && rest.chars().any(|c| c.is_ascii_digit())
        });
    longest_digit_run >= 4 || hex_like || hashed_class || (digits * 2 > token.len() && token.len() > 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_attr_lookup() {
        let el = ElementInfo::new("BUTTON")
            .with_attr("id", "new-login-btn")
            .with_attr("class", "btn  primary")
            .with_attr("title", "   ")
            .with_text("  Log \n in ");
        assert_eq!(el.tag, "button");
        assert_eq!(el.attr("id"), Some("new-login-btn"));
        assert_eq!(el.attr("title"), None);
        assert_eq!(el.classes(), vec!["btn", "primary"]);
        assert_eq!(el.text, "Log in");
    }

    #[test]
    fn test_is_empty() {
        assert!(ElementInfo::default().is_empty());
        assert!(ElementInfo::default().with_attr("id", " ").is_empty());
        assert!(!ElementInfo::new("div").is_empty());
    }

    #[test]
    fn test_descriptor_display() {
        let d = NodeDescriptor::new("form").with_id("login").with_class("card");
        assert_eq!(d.to_string(), "form#login.card");
    }

    #[test]
    fn test_looks_generated() {
        assert!(looks_generated("ember1234"));
        assert!(looks_generated(":r1:"));
        assert!(looks_generated("css-1q2w3e"));
        assert!(looks_generated("3f2a9c1e-77b0-4c1d"));
        assert!(!looks_generated("new-login-btn"));
        assert!(!looks_generated("step2"));
        assert!(!looks_generated("h1"));
    }
}
