//! Tiered locator-candidate generation.
//!
//! Generation is a fixed, ordered set of strategies. Each strategy is a pure
//! function from element attributes to zero or more candidates, and the
//! generator runs them in tier order:
//!
//! 1. native identity: `id`, explicit test-id attributes
//! 2. semantic: `name`, `aria-label`, role + accessible name, `title`, `placeholder`
//! 3. content: exact visible text, text fragment
//! 4. structural: stable ancestor + position, full path, attribute combination, classes
//!
//! Tier 4 is always emitted after tiers 1-3 as a safety net. The output is
//! deduplicated, never contains the failing locator, and is capped with earlier
//! tiers taking precedence.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::element::{looks_generated, ElementInfo};
use crate::fingerprint::ElementFingerprint;
use crate::locator::{css_string, implicit_role, Locator, TEST_ID_ATTRIBUTES};

/// Longest visible text used for an exact-text candidate
const MAX_EXACT_TEXT: usize = 80;

/// Length of the fragment used for a text-contains candidate
const TEXT_FRAGMENT_CHARS: usize = 32;

/// Attributes stable enough to combine into a CSS selector
const COMBINABLE_ATTRIBUTES: &[&str] = &["type", "name", "href", "alt", "for", "role", "aria-label", "title", "placeholder"];

/// A proposed replacement locator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorCandidate {
    /// Proposed locator
    pub locator: Locator,
    /// Generation tier (1 = most stable)
    pub tier: u8,
    /// Strategy that produced the candidate
    pub strategy: Strategy,
    /// Attribute(s) the candidate was derived from
    pub derived_from: Vec<String>,
}

impl LocatorCandidate {
    fn new(locator: Locator, strategy: Strategy, derived_from: &[&str]) -> Self {
        Self {
            locator,
            tier: strategy.tier(),
            strategy,
            derived_from: derived_from.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Rendered locator expression
    #[must_use]
    pub fn expression(&self) -> String {
        self.locator.to_string()
    }
}

/// Candidate-generation strategies, in fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `id` attribute
    Id,
    /// Explicit test-id attribute
    TestId,
    /// `name` attribute
    Name,
    /// `aria-label`
    AriaLabel,
    /// Role plus accessible name
    RoleName,
    /// `title` attribute
    Title,
    /// `placeholder` attribute
    Placeholder,
    /// Exact visible text
    ExactText,
    /// Visible-text fragment
    TextContains,
    /// Nearest ancestor with a stable id, plus position
    AncestorAnchor,
    /// Full structural path
    StructuralPath,
    /// Tag plus a combination of stable attributes
    AttributeCombination,
    /// Tag plus stable classes
    ClassSelector,
}

impl Strategy {
    /// Every strategy in generation order
    pub const ALL: [Self; 13] = [
        Self::Id,
        Self::TestId,
        Self::Name,
        Self::AriaLabel,
        Self::RoleName,
        Self::Title,
        Self::Placeholder,
        Self::ExactText,
        Self::TextContains,
        Self::AncestorAnchor,
        Self::StructuralPath,
        Self::AttributeCombination,
        Self::ClassSelector,
    ];

    /// Tier of this strategy
    #[must_use]
    pub const fn tier(self) -> u8 {
        match self {
            Self::Id | Self::TestId => 1,
            Self::Name | Self::AriaLabel | Self::RoleName | Self::Title | Self::Placeholder => 2,
            Self::ExactText | Self::TextContains => 3,
            Self::AncestorAnchor
            | Self::StructuralPath
            | Self::AttributeCombination
            | Self::ClassSelector => 4,
        }
    }

    /// Candidates this strategy derives from `el`
    #[must_use]
    pub fn generate(self, el: &ElementInfo) -> Vec<LocatorCandidate> {
        let one = |locator: Locator, from: &[&str]| vec![LocatorCandidate::new(locator, self, from)];
        match self {
            Self::Id => match el.attr("id") {
                Some(id) if !looks_generated(id) => one(Locator::id(id), &["id"]),
                _ => Vec::new(),
            },
            Self::TestId => TEST_ID_ATTRIBUTES
                .iter()
                .filter_map(|attr| {
                    el.attr(attr).map(|value| {
                        LocatorCandidate::new(
                            Locator::TestId {
                                attribute: (*attr).to_string(),
                                value: value.to_string(),
                            },
                            self,
                            &[attr],
                        )
                    })
                })
                .collect(),
            Self::Name => el
                .attr("name")
                .map(|v| one(Locator::Name(v.to_string()), &["name"]))
                .unwrap_or_default(),
            Self::AriaLabel => el
                .attr("aria-label")
                .map(|v| one(Locator::Label(v.to_string()), &["aria-label"]))
                .unwrap_or_default(),
            Self::RoleName => {
                let role = el
                    .attr("role")
                    .or_else(|| implicit_role(&el.tag, el.attr("type")));
                let name = el.attr("aria-label").or_else(|| non_empty(&el.text));
                match (role, name) {
                    (Some(role), Some(name)) => one(
                        Locator::role(role, Some(name.to_string())),
                        &["role", "accessible-name"],
                    ),
                    _ => Vec::new(),
                }
            }
            Self::Title => el
                .attr("title")
                .map(|v| one(Locator::Title(v.to_string()), &["title"]))
                .unwrap_or_default(),
            Self::Placeholder => el
                .attr("placeholder")
                .map(|v| one(Locator::Placeholder(v.to_string()), &["placeholder"]))
                .unwrap_or_default(),
            Self::ExactText => match non_empty(&el.text) {
                Some(text) if text.chars().count() <= MAX_EXACT_TEXT => {
                    one(Locator::text(text), &["text"])
                }
                _ => Vec::new(),
            },
            Self::TextContains => match non_empty(&el.text) {
                Some(text) => {
                    let fragment = text_fragment(text);
                    one(Locator::TextContains(fragment), &["text"])
                }
                None => Vec::new(),
            },
            Self::AncestorAnchor => ancestor_anchor(el)
                .map(|css| one(Locator::css(css), &["ancestor-id", "nth-of-type"]))
                .unwrap_or_default(),
            Self::StructuralPath => non_empty(&el.path)
                .map(|p| one(Locator::css(p), &["path"]))
                .unwrap_or_default(),
            Self::AttributeCombination => attribute_combination(el)
                .map(|(css, keys)| {
                    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                    one(Locator::css(css), &keys)
                })
                .unwrap_or_default(),
            Self::ClassSelector => {
                let classes: Vec<&str> = el
                    .classes()
                    .into_iter()
                    .filter(|c| !looks_generated(c))
                    .take(3)
                    .collect();
                if classes.is_empty() || el.tag.is_empty() {
                    Vec::new()
                } else {
                    one(
                        Locator::css(format!("{}.{}", el.tag, classes.join("."))),
                        &["class"],
                    )
                }
            }
        }
    }
}

/// Produces ordered, capped candidate lists
#[derive(Debug, Clone)]
pub struct CandidateGenerator {
    max_candidates: usize,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::new(8)
    }
}

impl CandidateGenerator {
    /// Create a generator with a cap
    #[must_use]
    pub const fn new(max_candidates: usize) -> Self {
        Self { max_candidates }
    }

    /// Configured cap
    #[must_use]
    pub const fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// Generate candidates from the current attributes of the element.
    ///
    /// When `fingerprint` is given, its structural data (ancestors, position,
    /// path) fills in anything the live attributes lack. `exclude` is the
    /// failing locator.
    #[must_use]
    pub fn generate(
        &self,
        fingerprint: Option<&ElementFingerprint>,
        element: &ElementInfo,
        exclude: Option<&Locator>,
    ) -> Vec<LocatorCandidate> {
        self.run(fingerprint, element, exclude, &Strategy::ALL)
    }

    /// Generate tier-4 candidates only (no fingerprint available)
    #[must_use]
    pub fn generate_structural(
        &self,
        element: &ElementInfo,
        exclude: Option<&Locator>,
    ) -> Vec<LocatorCandidate> {
        let structural: Vec<Strategy> = Strategy::ALL
            .into_iter()
            .filter(|s| s.tier() == 4)
            .collect();
        self.run(None, element, exclude, &structural)
    }

    fn run(
        &self,
        fingerprint: Option<&ElementFingerprint>,
        element: &ElementInfo,
        exclude: Option<&Locator>,
        strategies: &[Strategy],
    ) -> Vec<LocatorCandidate> {
        let merged = merge_structure(element, fingerprint);
        let mut seen: HashSet<String> = exclude.map(ToString::to_string).into_iter().collect();
        let mut out = Vec::with_capacity(self.max_candidates);

        for strategy in strategies {
            for candidate in strategy.generate(&merged) {
                if out.len() >= self.max_candidates {
                    return out;
                }
                if seen.insert(candidate.expression()) {
                    out.push(candidate);
                }
            }
        }
        out
    }
}

/// Fill structural fields missing from the live element with fingerprint data
fn merge_structure(element: &ElementInfo, fingerprint: Option<&ElementFingerprint>) -> ElementInfo {
    let mut merged = element.clone();
    if let Some(fp) = fingerprint {
        if merged.tag.is_empty() {
            merged.tag.clone_from(&fp.tag);
        }
        if merged.ancestors.is_empty() {
            merged.ancestors.clone_from(&fp.ancestors);
        }
        if merged.path.is_empty() {
            merged.path.clone_from(&fp.path);
        }
        if merged.text.is_empty() {
            merged.text.clone_from(&fp.text);
        }
        if merged.nth_of_type == 0 {
            merged.nth_of_type = fp.nth_of_type;
        }
    }
    merged
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn text_fragment(text: &str) -> String {
    if text.chars().count() <= TEXT_FRAGMENT_CHARS {
        return text.to_string();
    }
    // Cut on a word boundary inside the limit
    let cut: String = text.chars().take(TEXT_FRAGMENT_CHARS).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > 0 => cut[..idx].to_string(),
        _ => cut,
    }
}

fn ancestor_anchor(el: &ElementInfo) -> Option<String> {
    if el.tag.is_empty() {
        return None;
    }
    let (depth, anchor) = el.ancestors.iter().enumerate().find_map(|(i, a)| {
        a.id.as_deref()
            .filter(|id| !looks_generated(id))
            .map(|id| (i, id))
    })?;
    let combinator = if depth == 0 { " > " } else { " " };
    Some(format!(
        "{}{combinator}{}:nth-of-type({})",
        css_id(anchor),
        el.tag,
        el.nth_of_type.max(1)
    ))
}

fn attribute_combination(el: &ElementInfo) -> Option<(String, Vec<String>)> {
    if el.tag.is_empty() {
        return None;
    }
    let picked: Vec<(&str, &str)> = COMBINABLE_ATTRIBUTES
        .iter()
        .filter_map(|k| el.attr(k).map(|v| (*k, v)))
        .take(2)
        .collect();
    if picked.len() < 2 {
        return None;
    }
    let mut css = el.tag.clone();
    for (k, v) in &picked {
        css.push_str(&format!("[{k}={}]", css_string(v)));
    }
    Some((css, picked.iter().map(|(k, _)| (*k).to_string()).collect()))
}

fn css_id(id: &str) -> String {
    let simple = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !id.starts_with(|c: char| c.is_ascii_digit());
    if simple {
        format!("#{id}")
    } else {
        format!("[id={}]", css_string(id))
    }
}
