//! Locator expressions: parsing, rendering, and browser queries.
//!
//! A locator expression is a string of the form `<engine>=<value>`:
//!
//! ```text
//! id=new-login-btn              testid=login-btn
//! testid:data-qa=submit         name=email
//! label=Close dialog            role=button[name="Log in"]
//! title=Settings                placeholder=Search
//! text=Log in                   text*=Log
//! css=form#login > button       xpath=//button[1]
//! ```
//!
//! Expressions without a known engine prefix are treated as CSS, or XPath when
//! they start with `/` or `(`. Parsing and rendering are lossless for every
//! expression this crate produces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::result::{HealError, HealResult};

/// Attribute names treated as explicit test identifiers, in preference order
pub const TEST_ID_ATTRIBUTES: &[&str] = &["data-testid", "data-test-id", "data-test", "data-qa", "data-cy"];

/// Default test-id attribute
pub const DEFAULT_TEST_ID_ATTRIBUTE: &str = "data-testid";

/// A point in 2D space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Bounding box for an element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the center point
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Check if a point is inside this bounding box
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    /// Whether the centers of two boxes lie within `tolerance` pixels
    #[must_use]
    pub fn near(&self, other: &Self, tolerance: f32) -> bool {
        self.center().distance(&other.center()) <= tolerance
    }

    /// Whether the box has a renderable area
    #[must_use]
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// A typed locator expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    /// Element id attribute
    Id(String),
    /// Explicit test identifier attribute
    TestId {
        /// Attribute name (e.g. `data-testid`)
        attribute: String,
        /// Attribute value
        value: String,
    },
    /// Form `name` attribute
    Name(String),
    /// Accessible label (`aria-label`)
    Label(String),
    /// ARIA role with optional accessible name
    Role {
        /// Role name
        role: String,
        /// Accessible name
        name: Option<String>,
    },
    /// `title` attribute
    Title(String),
    /// `placeholder` attribute
    Placeholder(String),
    /// Exact visible text
    Text(String),
    /// Visible text containing a fragment
    TextContains(String),
    /// CSS selector
    Css(String),
    /// XPath expression
    XPath(String),
}

impl Locator {
    /// Create a CSS locator
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an id locator
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    /// Create a `data-testid` locator
    #[must_use]
    pub fn test_id(value: impl Into<String>) -> Self {
        Self::TestId {
            attribute: DEFAULT_TEST_ID_ATTRIBUTE.to_string(),
            value: value.into(),
        }
    }

    /// Create an exact text locator
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a role locator
    #[must_use]
    pub fn role(role: impl Into<String>, name: Option<String>) -> Self {
        Self::Role {
            role: role.into(),
            name,
        }
    }

    /// Parse a locator expression
    pub fn parse(expression: &str) -> HealResult<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(invalid(expression, "empty expression"));
        }
        if trimmed.starts_with('/') || trimmed.starts_with('(') {
            return Ok(Self::XPath(trimmed.to_string()));
        }

        let Some((engine, value)) = trimmed.split_once('=') else {
            return Ok(Self::Css(trimmed.to_string()));
        };
        let engine = engine.trim();

        let locator = match engine {
            "id" => Self::Id(non_empty(expression, value)?),
            "testid" => Self::test_id(non_empty(expression, value)?),
            "name" => Self::Name(non_empty(expression, value)?),
            "label" => Self::Label(non_empty(expression, value)?),
            "title" => Self::Title(non_empty(expression, value)?),
            "placeholder" => Self::Placeholder(non_empty(expression, value)?),
            "text" => Self::Text(non_empty(expression, value)?),
            "text*" => Self::TextContains(non_empty(expression, value)?),
            "css" => Self::Css(non_empty(expression, value)?),
            "xpath" => Self::XPath(non_empty(expression, value)?),
            "role" => parse_role(expression, value)?,
            other => match other.strip_prefix("testid:") {
                Some(attribute) if !attribute.is_empty() => Self::TestId {
                    attribute: attribute.to_string(),
                    value: non_empty(expression, value)?,
                },
                // `button[name=x]` and friends are plain CSS
                _ => Self::Css(trimmed.to_string()),
            },
        };
        Ok(locator)
    }

    /// Short engine name used in reports
    #[must_use]
    pub const fn engine(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::TestId { .. } => "testid",
            Self::Name(_) => "name",
            Self::Label(_) => "label",
            Self::Role { .. } => "role",
            Self::Title(_) => "title",
            Self::Placeholder(_) => "placeholder",
            Self::Text(_) => "text",
            Self::TextContains(_) => "text*",
            Self::Css(_) => "css",
            Self::XPath(_) => "xpath",
        }
    }

    /// JavaScript expression evaluating to an array of matching elements
    #[must_use]
    pub fn to_collect_query(&self) -> String {
        match self {
            Self::Id(id) => all_css(&format!("[id={}]", css_string(id))),
            Self::TestId { attribute, value } => {
                all_css(&format!("[{attribute}={}]", css_string(value)))
            }
            Self::Name(v) => all_css(&format!("[name={}]", css_string(v))),
            Self::Label(v) => all_css(&format!("[aria-label={}]", css_string(v))),
            Self::Title(v) => all_css(&format!("[title={}]", css_string(v))),
            Self::Placeholder(v) => all_css(&format!("[placeholder={}]", css_string(v))),
            Self::Css(s) => all_css(s),
            Self::XPath(x) => format!(
                "(() => {{ const r = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                 return Array.from({{ length: r.snapshotLength }}, (_, i) => r.snapshotItem(i)); }})()",
                js_string(x)
            ),
            Self::Text(t) => format!(
                "(() => {{ const t = {}; const txt = el => (el.innerText || el.textContent || '').trim(); \
                 return Array.from(document.querySelectorAll('body *')).filter(el => txt(el) === t \
                 && !Array.from(el.children).some(c => txt(c) === t)); }})()",
                js_string(t)
            ),
            Self::TextContains(t) => format!(
                "(() => {{ const t = {}; const txt = el => (el.innerText || el.textContent || ''); \
                 return Array.from(document.querySelectorAll('body *')).filter(el => txt(el).includes(t) \
                 && !Array.from(el.children).some(c => txt(c).includes(t))); }})()",
                js_string(t)
            ),
            Self::Role { role, name } => {
                let implicit = implicit_role_selector(role);
                let base = if implicit.is_empty() {
                    format!("[role={}]", css_string(role))
                } else {
                    format!("[role={}], {implicit}", css_string(role))
                };
                match name {
                    None => all_css(&base),
                    Some(n) => format!(
                        "{}.filter(el => (el.getAttribute('aria-label') || (el.innerText || el.textContent || '')).trim() === {})",
                        all_css(&base),
                        js_string(n)
                    ),
                }
            }
        }
    }

    /// JavaScript expression evaluating to the number of matches
    #[must_use]
    pub fn to_count_query(&self) -> String {
        format!("{}.length", self.to_collect_query())
    }

    /// JavaScript expression: whether the first match is rendered and visible
    #[must_use]
    pub fn to_visible_query(&self) -> String {
        format!(
            "(() => {{ const el = {}[0]; if (!el) return false; const s = window.getComputedStyle(el); \
             const r = el.getBoundingClientRect(); return s.visibility !== 'hidden' && s.display !== 'none' \
             && parseFloat(s.opacity || '1') > 0 && r.width > 0 && r.height > 0; }})()",
            self.to_collect_query()
        )
    }

    /// JavaScript expression: bounding box of the first match or `null`
    #[must_use]
    pub fn to_bounding_box_query(&self) -> String {
        format!(
            "(() => {{ const el = {}[0]; if (!el) return null; const r = el.getBoundingClientRect(); \
             return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()",
            self.to_collect_query()
        )
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(v) => write!(f, "id={v}"),
            Self::TestId { attribute, value } if attribute == DEFAULT_TEST_ID_ATTRIBUTE => {
                write!(f, "testid={value}")
            }
            Self::TestId { attribute, value } => write!(f, "testid:{attribute}={value}"),
            Self::Name(v) => write!(f, "name={v}"),
            Self::Label(v) => write!(f, "label={v}"),
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Role {
                role,
                name: Some(n),
            } => write!(f, "role={role}[name={}]", css_string(n)),
            Self::Title(v) => write!(f, "title={v}"),
            Self::Placeholder(v) => write!(f, "placeholder={v}"),
            Self::Text(v) => write!(f, "text={v}"),
            Self::TextContains(v) => write!(f, "text*={v}"),
            Self::Css(v) => write!(f, "css={v}"),
            Self::XPath(v) => write!(f, "xpath={v}"),
        }
    }
}

impl FromStr for Locator {
    type Err = HealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Locator {
    type Error = HealError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

fn invalid(expression: &str, message: &str) -> HealError {
    HealError::InvalidLocator {
        expression: expression.to_string(),
        message: message.to_string(),
    }
}

fn non_empty(expression: &str, value: &str) -> HealResult<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(invalid(expression, "missing value after `=`"))
    } else {
        Ok(value.to_string())
    }
}

fn parse_role(expression: &str, value: &str) -> HealResult<Locator> {
    let value = value.trim();
    let Some(open) = value.find('[') else {
        return Ok(Locator::Role {
            role: non_empty(expression, value)?,
            name: None,
        });
    };
    let role = non_empty(expression, &value[..open])?;
    let inner = value[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| invalid(expression, "unterminated role filter"))?;
    let quoted = inner
        .trim()
        .strip_prefix("name=")
        .ok_or_else(|| invalid(expression, "role filter must be `name=\"...\"`"))?;
    let name = quoted
        .strip_prefix('"')
        .and_then(|q| q.strip_suffix('"'))
        .ok_or_else(|| invalid(expression, "role name must be double-quoted"))?
        .replace("\\\"", "\"")
        .replace("\\\\", "\\");
    Ok(Locator::Role {
        role,
        name: Some(name),
    })
}

/// Double-quoted CSS string with `\` and `"` escaped
#[must_use]
pub fn css_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn all_css(selector: &str) -> String {
    format!("Array.from(document.querySelectorAll({}))", js_string(selector))
}

/// CSS selector for elements carrying a role implicitly
#[must_use]
pub fn implicit_role_selector(role: &str) -> &'static str {
    match role {
        "button" => "button, input[type=\"button\"], input[type=\"submit\"]",
        "link" => "a[href]",
        "textbox" => "input:not([type]), input[type=\"text\"], input[type=\"email\"], textarea",
        "checkbox" => "input[type=\"checkbox\"]",
        "heading" => "h1, h2, h3, h4, h5, h6",
        "combobox" => "select",
        "img" => "img[alt]",
        _ => "",
    }
}

/// Implicit ARIA role for a tag, if any
#[must_use]
pub fn implicit_role(tag: &str, input_type: Option<&str>) -> Option<&'static str> {
    match (tag, input_type) {
        ("button", _) | ("input", Some("button" | "submit")) => Some("button"),
        ("a", _) => Some("link"),
        ("textarea", _) | ("input", None | Some("text" | "email")) => Some("textbox"),
        ("input", Some("checkbox")) => Some("checkbox"),
        ("h1" | "h2" | "h3" | "h4" | "h5" | "h6", _) => Some("heading"),
        ("select", _) => Some("combobox"),
        ("img", _) => Some("img"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_engine_prefixes() {
            assert_eq!(Locator::parse("id=old-login-btn").unwrap(), Locator::id("old-login-btn"));
            assert_eq!(Locator::parse("testid=login-btn").unwrap(), Locator::test_id("login-btn"));
            assert_eq!(
                Locator::parse("testid:data-qa=submit").unwrap(),
                Locator::TestId {
                    attribute: "data-qa".into(),
                    value: "submit".into()
                }
            );
            assert_eq!(Locator::parse("text*=Log").unwrap(), Locator::TextContains("Log".into()));
            assert_eq!(Locator::parse("xpath=//div").unwrap(), Locator::XPath("//div".into()));
        }

        #[test]
        fn test_unprefixed_css_and_xpath() {
            assert_eq!(
                Locator::parse("button[name=go]").unwrap(),
                Locator::css("button[name=go]")
            );
            assert_eq!(Locator::parse("#login").unwrap(), Locator::css("#login"));
            assert_eq!(
                Locator::parse("//button[@id='x']").unwrap(),
                Locator::XPath("//button[@id='x']".into())
            );
        }

        #[test]
        fn test_role_with_name() {
            let loc = Locator::parse(r#"role=button[name="Log in"]"#).unwrap();
            assert_eq!(loc, Locator::role("button", Some("Log in".into())));
            assert_eq!(loc.to_string(), r#"role=button[name="Log in"]"#);
        }

        #[test]
        fn test_empty_values_rejected() {
            assert!(Locator::parse("").is_err());
            assert!(Locator::parse("   ").is_err());
            assert!(Locator::parse("id=").is_err());
            assert!(Locator::parse("role=button[name=unquoted]").is_err());
        }

        #[test]
        fn test_render_roundtrip_for_generated_shapes() {
            for expr in [
                "id=new-login-btn",
                "testid=login-btn",
                "testid:data-cy=cart",
                "name=email",
                "label=Close",
                r#"role=link[name="Say \"hi\""]"#,
                "title=Settings",
                "placeholder=Search",
                "text=Log in",
                "text*=Log",
                "css=#form > button:nth-of-type(2)",
                "xpath=//a",
            ] {
                let loc = Locator::parse(expr).unwrap();
                assert_eq!(Locator::parse(&loc.to_string()).unwrap(), loc, "{expr}");
            }
        }

        #[test]
        fn test_serde_as_string() {
            let loc = Locator::id("a");
            let json = serde_json::to_string(&loc).unwrap();
            assert_eq!(json, "\"id=a\"");
            let back: Locator = serde_json::from_str(&json).unwrap();
            assert_eq!(back, loc);
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_count_query_uses_attribute_selector() {
            let q = Locator::id("new-login-btn").to_count_query();
            assert!(q.contains("querySelectorAll"));
            assert!(q.contains(r#"[id=\"new-login-btn\"]"#));
            assert!(q.ends_with(".length"));
        }

        #[test]
        fn test_text_query_escapes_quotes() {
            let q = Locator::text("say \"hi\"").to_collect_query();
            assert!(q.contains(r#""say \"hi\"""#));
        }

        #[test]
        fn test_role_query_includes_implicit_tags() {
            let q = Locator::role("button", Some("Go".into())).to_collect_query();
            assert!(q.contains("input[type="));
            assert!(q.contains("aria-label"));
        }

        #[test]
        fn test_visible_and_bbox_queries_wrap_collect() {
            let loc = Locator::css("button");
            assert!(loc.to_visible_query().contains("getComputedStyle"));
            assert!(loc.to_bounding_box_query().contains("getBoundingClientRect"));
        }
    }

    mod geometry_tests {
        use super::*;

        #[test]
        fn test_bounding_box_center_and_near() {
            let a = BoundingBox::new(0.0, 0.0, 100.0, 40.0);
            let b = BoundingBox::new(10.0, 5.0, 100.0, 40.0);
            assert_eq!(a.center(), Point::new(50.0, 20.0));
            assert!(a.near(&b, 12.0));
            assert!(!a.near(&b, 5.0));
        }

        #[test]
        fn test_bounding_box_contains_edges() {
            let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
            assert!(bbox.contains(&Point::new(0.0, 0.0)));
            assert!(bbox.contains(&Point::new(100.0, 100.0)));
            assert!(!bbox.contains(&Point::new(101.0, 50.0)));
        }

        #[test]
        fn test_implicit_role() {
            assert_eq!(implicit_role("button", None), Some("button"));
            assert_eq!(implicit_role("input", Some("submit")), Some("button"));
            assert_eq!(implicit_role("input", Some("checkbox")), Some("checkbox"));
            assert_eq!(implicit_role("div", None), None);
        }
    }
}
