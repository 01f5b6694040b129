//! Typed hints distilled from untrusted free-text element descriptions.
//!
//! Suggestion services return prose like `the blue "Log in" button in the
//! header`. That text never becomes a locator. [`ElementHint::sanitize`] pulls
//! out a quoted visible text, a role keyword and an id-like token, and
//! [`ElementHint::probes`] turns those into DOM probes whose matched node feeds
//! the candidate generator.

use serde::{Deserialize, Serialize};

use crate::locator::Locator;

/// Longest input considered
pub const MAX_HINT_CHARS: usize = 256;

const ROLE_KEYWORDS: &[(&str, &str)] = &[
    ("button", "button"),
    ("link", "link"),
    ("checkbox", "checkbox"),
    ("textbox", "textbox"),
    ("input", "textbox"),
    ("field", "textbox"),
    ("heading", "heading"),
    ("title", "heading"),
    ("dropdown", "combobox"),
    ("select", "combobox"),
    ("image", "img"),
];

/// Sanitized, typed element hint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementHint {
    /// Quoted visible text, if the description contained one
    pub text: Option<String>,
    /// ARIA role inferred from a keyword
    pub role: Option<String>,
    /// Token that looks like an id or test id (`login-btn`, `submit_form`)
    pub id_like: Option<String>,
}

impl ElementHint {
    /// Sanitize free text into a hint
    #[must_use]
    pub fn sanitize(free_text: &str) -> Self {
        let cleaned: String = free_text
            .chars()
            .filter(|c| !c.is_control() || *c == ' ')
            .take(MAX_HINT_CHARS)
            .collect();

        let text = quoted(&cleaned);
        let unquoted = text
            .as_ref()
            .map_or_else(|| cleaned.clone(), |t| cleaned.replacen(t.as_str(), " ", 1));

        let words: Vec<String> = unquoted
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';' | ':' | '(' | ')'))
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let role = words.iter().find_map(|w| {
            let lower = w.to_ascii_lowercase();
            ROLE_KEYWORDS
                .iter()
                .find(|(kw, _)| *kw == lower)
                .map(|(_, role)| (*role).to_string())
        });

        let id_like = words
            .iter()
            .map(|w| w.trim_matches(|c: char| c == '\'' || c == '"' || c == '#'))
            .find(|w| {
                w.len() >= 3
                    && w.len() <= 64
                    && (w.contains('-') || w.contains('_'))
                    && w.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            })
            .map(str::to_string);

        Self { text, role, id_like }
    }

    /// Whether nothing usable was extracted
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.text.is_none() && self.role.is_none() && self.id_like.is_none()
    }

    /// DOM probes, most specific first
    #[must_use]
    pub fn probes(&self) -> Vec<Locator> {
        let mut probes = Vec::new();
        if let Some(id) = &self.id_like {
            probes.push(Locator::id(id.clone()));
            probes.push(Locator::test_id(id.clone()));
        }
        match (&self.role, &self.text) {
            (Some(role), Some(text)) => {
                probes.push(Locator::role(role.clone(), Some(text.clone())));
                probes.push(Locator::TextContains(text.clone()));
            }
            (None, Some(text)) => probes.push(Locator::TextContains(text.clone())),
            (Some(role), None) => probes.push(Locator::role(role.clone(), None)),
            (None, None) => {}
        }
        probes
    }
}

/// First double- or single-quoted run, trimmed
fn quoted(text: &str) -> Option<String> {
    for quote in ['"', '\'', '\u{201c}'] {
        let close = if quote == '\u{201c}' { '\u{201d}' } else { quote };
        if let Some(start) = text.find(quote) {
            let rest = &text[start + quote.len_utf8()..];
            if let Some(end) = rest.find(close) {
                let inner = rest[..end].trim();
                if !inner.is_empty() {
                    return Some(inner.split_whitespace().collect::<Vec<_>>().join(" "));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_text_and_role() {
        let hint = ElementHint::sanitize(r#"The blue "Log in" button in the header"#);
        assert_eq!(hint.text.as_deref(), Some("Log in"));
        assert_eq!(hint.role.as_deref(), Some("button"));
        assert_eq!(hint.id_like, None);
        assert_eq!(
            hint.probes(),
            vec![
                Locator::role("button", Some("Log in".into())),
                Locator::TextContains("Log in".into()),
            ]
        );
    }

    #[test]
    fn test_extracts_id_like_token() {
        let hint = ElementHint::sanitize("probably the submit_form element, id #login-btn");
        assert_eq!(hint.id_like.as_deref(), Some("submit_form"));
        assert_eq!(hint.probes()[0], Locator::id("submit_form"));
    }

    #[test]
    fn test_strips_control_chars_and_truncates() {
        let noisy = format!("\u{0007}\"Pay\u{0000}\" {}", "x".repeat(1000));
        let hint = ElementHint::sanitize(&noisy);
        assert_eq!(hint.text.as_deref(), Some("Pay"));
    }

    #[test]
    fn test_free_text_never_becomes_a_locator() {
        let hint = ElementHint::sanitize("css=#admin > button; drop table");
        assert!(hint.probes().iter().all(|p| !matches!(p, Locator::Css(_))));
    }

    #[test]
    fn test_empty_input() {
        let hint = ElementHint::sanitize("   ");
        assert!(hint.is_empty());
        assert!(hint.probes().is_empty());
    }
}
