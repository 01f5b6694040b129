//! In-memory DOM and mock driver.
//!
//! [`MockDom`] evaluates every [`Locator`] engine against an element tree held
//! in memory, with a small CSS matcher covering the selectors this crate
//! generates (`tag`, `#id`, `.class`, `[attr]`, `[attr="v"]`,
//! `:nth-of-type(n)`, `:not(..)`, descendant and child combinators, selector
//! lists). [`MockDriver`] wraps it behind [`BrowserDriver`] and can inject
//! latency, query errors and resource usage. Recorded DOMs can be loaded from
//! JSON to replay a healing session offline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::driver::{BrowserDriver, DriverFactory, ResourceUsage};
use crate::element::{normalize_text, ElementInfo, NodeDescriptor};
use crate::locator::{implicit_role_selector, BoundingBox, Locator};
use crate::result::{HealError, HealResult};

/// Index of a node in a [`MockDom`]
pub type NodeId = usize;

/// One element in a recorded DOM tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomNode {
    /// Tag name
    pub tag: String,
    /// Attributes
    pub attributes: BTreeMap<String, String>,
    /// Own text (children contribute their text separately)
    pub text: String,
    /// Whether the element itself is rendered visibly
    pub visible: bool,
    /// Rendered position
    pub bounding_box: Option<BoundingBox>,
    /// Child elements
    pub children: Vec<DomNode>,
}

impl Default for DomNode {
    fn default() -> Self {
        Self {
            tag: String::new(),
            attributes: BTreeMap::new(),
            text: String::new(),
            visible: true,
            bounding_box: None,
            children: Vec::new(),
        }
    }
}

impl DomNode {
    /// Create a visible node
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            ..Self::default()
        }
    }

    /// Add an attribute
    #[must_use]
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Mark hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Set the bounding box
    #[must_use]
    pub const fn bbox(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    bounding_box: Option<BoundingBox>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Element tree stored as an arena in document order
#[derive(Debug, Clone)]
pub struct MockDom {
    nodes: Vec<Node>,
}

impl MockDom {
    /// Build from a root node
    #[must_use]
    pub fn from_tree(root: DomNode) -> Self {
        let mut dom = Self { nodes: Vec::new() };
        dom.push(root, None);
        dom
    }

    /// Wrap body children in `html > body`
    #[must_use]
    pub fn page(body_children: Vec<DomNode>) -> Self {
        let mut body = DomNode::new("body");
        body.children = body_children;
        Self::from_tree(DomNode::new("html").child(body))
    }

    /// Parse a recorded DOM from JSON (a root node, or a list of body children)
    pub fn from_json(json: &str) -> HealResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.is_array() {
            let children: Vec<DomNode> = serde_json::from_value(value)?;
            Ok(Self::page(children))
        } else {
            let root: DomNode = serde_json::from_value(value)?;
            Ok(Self::from_tree(root))
        }
    }

    fn push(&mut self, node: DomNode, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            tag: node.tag.to_ascii_lowercase(),
            attributes: node.attributes,
            text: node.text,
            visible: node.visible,
            bounding_box: node.bounding_box,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        for child in node.children {
            self.push(child, Some(id));
        }
        id
    }

    /// Number of nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes matching the locator, in document order
    pub fn query(&self, locator: &Locator) -> HealResult<Vec<NodeId>> {
        let fail = |message: &str| HealError::ValidationQuery {
            locator: locator.to_string(),
            message: message.to_string(),
        };
        let by_attr = |name: &str, value: &str| -> Vec<NodeId> {
            (0..self.nodes.len())
                .filter(|&i| self.nodes[i].attributes.get(name).map(String::as_str) == Some(value))
                .collect()
        };
        let found = match locator {
            Locator::Id(v) => by_attr("id", v),
            Locator::TestId { attribute, value } => by_attr(attribute, value),
            Locator::Name(v) => by_attr("name", v),
            Locator::Label(v) => by_attr("aria-label", v),
            Locator::Title(v) => by_attr("title", v),
            Locator::Placeholder(v) => by_attr("placeholder", v),
            Locator::Css(s) => self.select(s).map_err(|m| fail(&m))?,
            Locator::XPath(_) => return Err(fail("xpath is not supported by the in-memory DOM")),
            Locator::Text(t) => self.deepest_text_match(|txt| txt == t.as_str()),
            Locator::TextContains(t) => self.deepest_text_match(|txt| txt.contains(t.as_str())),
            Locator::Role { role, name } => {
                let implicit = implicit_role_selector(role);
                let mut selector = format!("[role=\"{role}\"]");
                if !implicit.is_empty() {
                    selector.push_str(", ");
                    selector.push_str(implicit);
                }
                let base = self.select(&selector).map_err(|m| fail(&m))?;
                match name {
                    None => base,
                    Some(n) => base
                        .into_iter()
                        .filter(|&i| {
                            let label = self.nodes[i]
                                .attributes
                                .get("aria-label")
                                .cloned()
                                .unwrap_or_else(|| self.inner_text(i));
                            label.trim() == n
                        })
                        .collect(),
                }
            }
        };
        Ok(found)
    }

    /// Whether the node and all its ancestors are visible with a non-empty box
    #[must_use]
    pub fn is_visible(&self, id: NodeId) -> bool {
        let has_area = self.nodes[id]
            .bounding_box
            .map_or(true, |b| b.has_area());
        has_area && self.ancestors_or_self(id).all(|n| self.nodes[n].visible)
    }

    /// Bounding box of a node
    #[must_use]
    pub fn bounding_box(&self, id: NodeId) -> Option<BoundingBox> {
        self.nodes.get(id).and_then(|n| n.bounding_box)
    }

    /// Full description of a node
    #[must_use]
    pub fn describe(&self, id: NodeId) -> ElementInfo {
        let node = &self.nodes[id];
        let siblings = node.parent.map_or_else(Vec::new, |p| {
            self.nodes[p]
                .children
                .iter()
                .filter(|&&c| c != id)
                .map(|&c| self.descriptor(c))
                .collect()
        });
        ElementInfo {
            tag: node.tag.clone(),
            attributes: node.attributes.clone(),
            text: self.inner_text(id),
            ancestors: self.ancestors(id).map(|a| self.descriptor(a)).collect(),
            siblings,
            nth_of_type: self.nth_of_type(id),
            path: self.path(id),
            bounding_box: node.bounding_box,
            visible: self.is_visible(id),
            visual_hash: None,
        }
    }

    fn descriptor(&self, id: NodeId) -> NodeDescriptor {
        let node = &self.nodes[id];
        NodeDescriptor {
            tag: node.tag.clone(),
            id: node.attributes.get("id").cloned(),
            classes: node
                .attributes
                .get("class")
                .map(|c| c.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, move |&p| self.nodes[p].parent)
    }

    fn ancestors_or_self(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(id).chain(self.ancestors(id))
    }

    fn nth_of_type(&self, id: NodeId) -> usize {
        let tag = &self.nodes[id].tag;
        self.nodes[id].parent.map_or(1, |p| {
            1 + self.nodes[p]
                .children
                .iter()
                .take_while(|&&c| c != id)
                .filter(|&&c| &self.nodes[c].tag == tag)
                .count()
        })
    }

    fn same_type_siblings(&self, id: NodeId) -> usize {
        let tag = &self.nodes[id].tag;
        self.nodes[id].parent.map_or(1, |p| {
            self.nodes[p]
                .children
                .iter()
                .filter(|&&c| &self.nodes[c].tag == tag)
                .count()
        })
    }

    /// Structural path, e.g. `html > body > form > button:nth-of-type(2)`
    fn path(&self, id: NodeId) -> String {
        let mut chain: Vec<NodeId> = self.ancestors_or_self(id).collect();
        chain.reverse();
        chain
            .into_iter()
            .map(|n| {
                if self.same_type_siblings(n) > 1 {
                    format!("{}:nth-of-type({})", self.nodes[n].tag, self.nth_of_type(n))
                } else {
                    self.nodes[n].tag.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" > ")
    }

    fn inner_text(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        self.collect_text(id, &mut parts);
        normalize_text(&parts.join(" "))
    }

    fn collect_text<'a>(&'a self, id: NodeId, parts: &mut Vec<&'a str>) {
        parts.push(&self.nodes[id].text);
        for &c in &self.nodes[id].children {
            self.collect_text(c, parts);
        }
    }

    fn in_body(&self, id: NodeId) -> bool {
        self.ancestors(id).any(|a| self.nodes[a].tag == "body")
    }

    fn deepest_text_match(&self, pred: impl Fn(&str) -> bool) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&i| self.in_body(i) && pred(&self.inner_text(i)))
            .filter(|&i| {
                !self.nodes[i]
                    .children
                    .iter()
                    .any(|&c| pred(&self.inner_text(c)))
            })
            .collect()
    }

    fn select(&self, selector: &str) -> Result<Vec<NodeId>, String> {
        let list = parse_selector_list(selector)?;
        Ok((0..self.nodes.len())
            .filter(|&i| list.iter().any(|complex| self.matches_complex(i, complex, complex.len() - 1)))
            .collect())
    }

    fn matches_complex(&self, id: NodeId, parts: &[(Combinator, Compound)], k: usize) -> bool {
        if !self.matches_compound(id, &parts[k].1) {
            return false;
        }
        if k == 0 {
            return true;
        }
        match parts[k].0 {
            Combinator::Child => self.nodes[id]
                .parent
                .is_some_and(|p| self.matches_complex(p, parts, k - 1)),
            Combinator::Descendant => self
                .ancestors(id)
                .any(|a| self.matches_complex(a, parts, k - 1)),
        }
    }

    fn matches_compound(&self, id: NodeId, c: &Compound) -> bool {
        let node = &self.nodes[id];
        if c.tag.as_ref().is_some_and(|t| t != &node.tag) {
            return false;
        }
        if c.id.as_ref().is_some_and(|v| node.attributes.get("id") != Some(v)) {
            return false;
        }
        if !c.classes.is_empty() {
            let have: HashSet<&str> = node
                .attributes
                .get("class")
                .map(|s| s.split_whitespace().collect())
                .unwrap_or_default();
            if !c.classes.iter().all(|cl| have.contains(cl.as_str())) {
                return false;
            }
        }
        for (name, value) in &c.attrs {
            match (node.attributes.get(name), value) {
                (None, _) => return false,
                (Some(actual), Some(expected)) if actual != expected => return false,
                _ => {}
            }
        }
        if c.nth_of_type.is_some_and(|n| n != self.nth_of_type(id)) {
            return false;
        }
        !c.not.iter().any(|inner| self.matches_compound(id, inner))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
    nth_of_type: Option<usize>,
    not: Vec<Compound>,
}

/// Split on a top-level delimiter, ignoring brackets, parens and quotes
fn split_top_level(s: &str, is_delim: impl Fn(char) -> bool) -> Vec<(Option<char>, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut delim_before: Option<char> = None;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => {
                escaped = true;
                current.push(c);
            }
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), _) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[' | '(') => {
                depth += 1;
                current.push(c);
            }
            (None, ']' | ')') => {
                depth -= 1;
                current.push(c);
            }
            (None, _) if depth == 0 && is_delim(c) => {
                out.push((delim_before, std::mem::take(&mut current)));
                delim_before = Some(c);
            }
            _ => current.push(c),
        }
    }
    out.push((delim_before, current));
    out
}

fn parse_selector_list(selector: &str) -> Result<Vec<Vec<(Combinator, Compound)>>, String> {
    split_top_level(selector, |c| c == ',')
        .into_iter()
        .map(|(_, part)| parse_complex(part.trim()))
        .collect()
}

fn parse_complex(selector: &str) -> Result<Vec<(Combinator, Compound)>, String> {
    if selector.is_empty() {
        return Err("empty selector".to_string());
    }
    // Normalize `a>b` to `a > b` so whitespace splitting finds every combinator
    let spaced: String = split_top_level(selector, |c| c == '>')
        .into_iter()
        .map(|(_, s)| s)
        .collect::<Vec<_>>()
        .join(" > ");

    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    for (_, token) in split_top_level(&spaced, char::is_whitespace) {
        match token.as_str() {
            "" => {}
            ">" => pending = Combinator::Child,
            compound => {
                parts.push((pending, parse_compound(compound)?));
                pending = Combinator::Descendant;
            }
        }
    }
    if parts.is_empty() {
        return Err(format!("no compound selector in `{selector}`"));
    }
    Ok(parts)
}

fn parse_compound(s: &str) -> Result<Compound, String> {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut c = Compound::default();

    let ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && (chars[*i].is_alphanumeric() || matches!(chars[*i], '-' | '_')) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && chars[i].is_alphabetic() {
        c.tag = Some(ident(&mut i).to_ascii_lowercase());
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                c.id = Some(ident(&mut i));
            }
            '.' => {
                i += 1;
                c.classes.push(ident(&mut i));
            }
            '[' => {
                let end = closing(&chars, i, '[', ']')?;
                c.attrs.push(parse_attr(&chars[i + 1..end].iter().collect::<String>())?);
                i = end + 1;
            }
            ':' => {
                i += 1;
                let pseudo = ident(&mut i);
                if i >= chars.len() || chars[i] != '(' {
                    return Err(format!("unsupported pseudo-class `:{pseudo}`"));
                }
                let end = closing(&chars, i, '(', ')')?;
                let arg: String = chars[i + 1..end].iter().collect();
                match pseudo.as_str() {
                    "nth-of-type" => {
                        let n = arg
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| format!("unsupported nth-of-type argument `{arg}`"))?;
                        c.nth_of_type = Some(n);
                    }
                    "not" => c.not.push(parse_compound(arg.trim())?),
                    other => return Err(format!("unsupported pseudo-class `:{other}`")),
                }
                i = end + 1;
            }
            other => return Err(format!("unexpected `{other}` in `{s}`")),
        }
    }
    Ok(c)
}

fn closing(chars: &[char], open_at: usize, open: char, close: char) -> Result<usize, String> {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut i = open_at;
    while i < chars.len() {
        let ch = chars[i];
        match quote {
            Some(_) if ch == '\\' => i += 1,
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == open => depth += 1,
            None if ch == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            None => {}
        }
        i += 1;
    }
    Err(format!("unclosed `{open}`"))
}

fn parse_attr(inner: &str) -> Result<(String, Option<String>), String> {
    let Some((name, value)) = inner.split_once('=') else {
        let name = inner.trim();
        if name.is_empty() {
            return Err("empty attribute selector".to_string());
        }
        return Ok((name.to_string(), None));
    };
    let value = value.trim();
    let unquoted = match value.chars().next() {
        Some(q @ ('"' | '\'')) => value
            .strip_prefix(q)
            .and_then(|v| v.strip_suffix(q))
            .ok_or_else(|| format!("unterminated string in `[{inner}]`"))?
            .replace(&format!("\\{q}"), &q.to_string())
            .replace("\\\\", "\\"),
        _ => value.to_string(),
    };
    Ok((name.trim().to_string(), Some(unquoted)))
}

/// Fault and latency injection for [`MockDriver`]
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Delay applied to every query
    pub latency: Duration,
    /// Locator expressions whose queries fail
    pub failing_queries: HashSet<String>,
    /// Reported resource usage
    pub usage: ResourceUsage,
    /// Whether navigation fails
    pub failing_navigation: bool,
}

/// Browser driver over an in-memory DOM
#[derive(Debug)]
pub struct MockDriver {
    dom: Arc<MockDom>,
    behavior: MockBehavior,
    current_url: String,
    call_history: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockDriver {
    /// Create a driver over a DOM
    #[must_use]
    pub fn new(dom: Arc<MockDom>) -> Self {
        Self::with_behavior(dom, MockBehavior::default())
    }

    /// Create a driver with injected behavior
    #[must_use]
    pub fn with_behavior(dom: Arc<MockDom>, behavior: MockBehavior) -> Self {
        Self {
            dom,
            behavior,
            current_url: String::from("about:blank"),
            call_history: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_counters(
        mut self,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    ) -> Self {
        self.in_flight = in_flight;
        self.peak_in_flight = peak;
        self.closed = closed;
        self
    }

    /// Current URL
    #[must_use]
    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.history().iter().any(|c| c.starts_with(method))
    }

    fn record(&self, call: String) {
        self.call_history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    async fn run_query(&self, method: &str, locator: &Locator) -> HealResult<Vec<NodeId>> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.record(format!("{method}:{locator}"));
        if !self.behavior.latency.is_zero() {
            tokio::time::sleep(self.behavior.latency).await;
        }
        if self.behavior.failing_queries.contains(&locator.to_string()) {
            Err(HealError::ValidationQuery {
                locator: locator.to_string(),
                message: "injected query failure".to_string(),
            })
        } else {
            self.dom.query(locator)
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&mut self, url: &str) -> HealResult<()> {
        self.record(format!("navigate:{url}"));
        if self.behavior.failing_navigation {
            return Err(HealError::Navigation {
                url: url.to_string(),
                message: "injected navigation failure".to_string(),
            });
        }
        self.current_url = url.to_string();
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> HealResult<usize> {
        Ok(self.run_query("count", locator).await?.len())
    }

    async fn visible(&self, locator: &Locator) -> HealResult<bool> {
        let found = self.run_query("visible", locator).await?;
        Ok(found.first().is_some_and(|&id| self.dom.is_visible(id)))
    }

    async fn bounding_box(&self, locator: &Locator) -> HealResult<Option<BoundingBox>> {
        let found = self.run_query("bounding_box", locator).await?;
        Ok(found.first().and_then(|&id| self.dom.bounding_box(id)))
    }

    async fn describe_all(&self, locator: &Locator) -> HealResult<Vec<ElementInfo>> {
        let found = self.run_query("describe_all", locator).await?;
        Ok(found.into_iter().map(|id| self.dom.describe(id)).collect())
    }

    async fn resource_usage(&self) -> HealResult<ResourceUsage> {
        Ok(self.behavior.usage)
    }

    async fn close(&mut self) -> HealResult<()> {
        self.record("close".to_string());
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`MockDriver`]s over a shared DOM
#[derive(Debug)]
pub struct MockDriverFactory {
    dom: Arc<MockDom>,
    behavior: MockBehavior,
    launch_delay: Duration,
    created: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockDriverFactory {
    /// Create a factory over a DOM
    #[must_use]
    pub fn new(dom: MockDom) -> Self {
        Self {
            dom: Arc::new(dom),
            behavior: MockBehavior::default(),
            launch_delay: Duration::ZERO,
            created: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every query
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.behavior.latency = latency;
        self
    }

    /// Delay every session launch
    #[must_use]
    pub const fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Make queries for `locator` fail
    #[must_use]
    pub fn with_failing_query(mut self, locator: &Locator) -> Self {
        self.behavior.failing_queries.insert(locator.to_string());
        self
    }

    /// Report this resource usage from every session
    #[must_use]
    pub const fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.behavior.usage = usage;
        self
    }

    /// Make every navigation fail
    #[must_use]
    pub const fn with_failing_navigation(mut self) -> Self {
        self.behavior.failing_navigation = true;
        self
    }

    /// Number of sessions closed so far
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of sessions launched so far
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous in-flight queries observed
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn create(&self) -> HealResult<Box<dyn BrowserDriver>> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let driver = MockDriver::with_behavior(Arc::clone(&self.dom), self.behavior.clone())
            .with_counters(
                Arc::clone(&self.in_flight),
                Arc::clone(&self.peak_in_flight),
                Arc::clone(&self.closed),
            );
        Ok(Box::new(driver))
    }
}
