//! Element fingerprints: creation, storage, and similarity matching.
//!
//! A fingerprint is captured once per healable failure from the element that
//! the test originally targeted. It is immutable; storing a new fingerprint
//! under the same `(script_id, step_id)` key replaces the old one wholesale.
//!
//! Matching weights:
//!
//! | signal            | weight |
//! |-------------------|--------|
//! | tag name (veto)   | 0.30   |
//! | attribute overlap | 0.35   |
//! | visible text      | 0.25   |
//! | structural path   | 0.10   |

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::element::{normalize_text, ElementInfo, NodeDescriptor};
use crate::keyed::KeyedLocks;
use crate::locator::BoundingBox;
use crate::result::{HealError, HealResult};

const TAG_WEIGHT: f64 = 0.30;
const ATTRIBUTE_WEIGHT: f64 = 0.35;
const TEXT_WEIGHT: f64 = 0.25;
const PATH_WEIGHT: f64 = 0.10;

/// Attributes that change between renders and carry no identity
const VOLATILE_ATTRIBUTES: &[&str] = &["style", "tabindex", "aria-expanded", "aria-selected", "value"];

/// Key under which a fingerprint is stored
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintKey {
    /// Script identifier
    pub script_id: String,
    /// Step identifier within the script
    pub step_id: String,
}

impl FingerprintKey {
    /// Create a key
    #[must_use]
    pub fn new(script_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            step_id: step_id.into(),
        }
    }

    /// Stable file name for this key
    #[must_use]
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.script_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.step_id.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{hex}.json")
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.script_id, self.step_id)
    }
}

/// Durable signature of the originally targeted element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementFingerprint {
    /// Tag name
    pub tag: String,
    /// Attributes (order irrelevant)
    pub attributes: BTreeMap<String, String>,
    /// Visible text
    pub text: String,
    /// Ancestor descriptors, nearest first
    pub ancestors: Vec<NodeDescriptor>,
    /// Sibling descriptors in document order
    pub siblings: Vec<NodeDescriptor>,
    /// 1-based position among same-tag siblings
    pub nth_of_type: usize,
    /// Structural path string
    pub path: String,
    /// Position of the element when it was captured
    pub bounding_box: Option<BoundingBox>,
    /// Visual hash
    pub visual_hash: Option<String>,
    /// Capture time (RFC 3339)
    pub created_at: String,
}

impl ElementFingerprint {
    /// Reconstruct an element description from the fingerprint
    #[must_use]
    pub fn to_element_info(&self) -> ElementInfo {
        ElementInfo {
            tag: self.tag.clone(),
            attributes: self.attributes.clone(),
            text: self.text.clone(),
            ancestors: self.ancestors.clone(),
            siblings: self.siblings.clone(),
            nth_of_type: self.nth_of_type,
            path: self.path.clone(),
            bounding_box: self.bounding_box,
            visible: true,
            visual_hash: self.visual_hash.clone(),
        }
    }
}

/// Digest of a screenshot, usable as [`ElementFingerprint::visual_hash`]
#[must_use]
pub fn visual_hash(png: &[u8]) -> String {
    let digest = Sha256::digest(png);
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// Creates, persists, and matches fingerprints
#[derive(Debug, Default)]
pub struct FingerprintStore {
    entries: DashMap<FingerprintKey, Arc<ElementFingerprint>>,
    io_locks: KeyedLocks<FingerprintKey>,
    dir: Option<PathBuf>,
}

impl FingerprintStore {
    /// In-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that also persists one JSON file per key under `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> HealResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            ..Self::default()
        })
    }

    /// Build a fingerprint from captured element information
    pub fn create(&self, element: &ElementInfo) -> HealResult<ElementFingerprint> {
        if element.is_empty() {
            return Err(HealError::FingerprintUnavailable {
                key: "<empty element info>".to_string(),
            });
        }
        let attributes = element
            .attributes
            .iter()
            .filter(|(k, v)| !v.trim().is_empty() && !VOLATILE_ATTRIBUTES.contains(&k.as_str()))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        Ok(ElementFingerprint {
            tag: element.tag.to_ascii_lowercase(),
            attributes,
            text: normalize_text(&element.text),
            ancestors: element.ancestors.clone(),
            siblings: element.siblings.clone(),
            nth_of_type: element.nth_of_type.max(1),
            path: element.path.clone(),
            bounding_box: element.bounding_box,
            visual_hash: element.visual_hash.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Store a fingerprint, replacing any previous one for the key
    pub async fn store(
        &self,
        key: FingerprintKey,
        fingerprint: ElementFingerprint,
    ) -> HealResult<Arc<ElementFingerprint>> {
        let _guard = self.io_locks.lock(&key).await;
        let fingerprint = Arc::new(fingerprint);
        if let Some(dir) = &self.dir {
            write_atomic(&dir.join(key.file_name()), &serde_json::to_vec_pretty(&*fingerprint)?)?;
        }
        self.entries.insert(key.clone(), Arc::clone(&fingerprint));
        tracing::debug!(key = %key, tag = %fingerprint.tag, "fingerprint stored");
        Ok(fingerprint)
    }

    /// Look up a fingerprint, loading it from disk on first access
    pub async fn get(&self, key: &FingerprintKey) -> HealResult<Option<Arc<ElementFingerprint>>> {
        if let Some(found) = self.cached(key) {
            return Ok(Some(found));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let _guard = self.io_locks.lock(key).await;
        if let Some(found) = self.cached(key) {
            return Ok(Some(found));
        }
        let path = dir.join(key.file_name());
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let fingerprint: Arc<ElementFingerprint> = Arc::new(serde_json::from_slice(&bytes)?);
        self.entries.insert(key.clone(), Arc::clone(&fingerprint));
        Ok(Some(fingerprint))
    }

    fn cached(&self, key: &FingerprintKey) -> Option<Arc<ElementFingerprint>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the stored fingerprint, or create and store one from `element`
    pub async fn get_or_create(
        &self,
        key: &FingerprintKey,
        element: Option<&ElementInfo>,
    ) -> HealResult<Arc<ElementFingerprint>> {
        if let Some(element) = element.filter(|e| !e.is_empty()) {
            let fingerprint = self.create(element)?;
            return self.store(key.clone(), fingerprint).await;
        }
        self.get(key)
            .await?
            .ok_or_else(|| HealError::FingerprintUnavailable {
                key: key.to_string(),
            })
    }

    /// Number of fingerprints held in memory
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no fingerprint is held in memory
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Similarity of a live DOM node to a fingerprint, in `[0, 1]`
    #[must_use]
    pub fn match_score(node: &ElementInfo, fingerprint: &ElementFingerprint) -> f64 {
        if !node.tag.eq_ignore_ascii_case(&fingerprint.tag) {
            return 0.0;
        }
        let score = TAG_WEIGHT
            + ATTRIBUTE_WEIGHT * attribute_overlap(&node.attributes, &fingerprint.attributes)
            + TEXT_WEIGHT * text_similarity(&node.text, &fingerprint.text)
            + PATH_WEIGHT * path_similarity(&node.path, &fingerprint.path);
        score.clamp(0.0, 1.0)
    }

    /// Best-scoring node at or above `min_score`
    #[must_use]
    pub fn best_match<'a>(
        nodes: &'a [ElementInfo],
        fingerprint: &ElementFingerprint,
        min_score: f64,
    ) -> Option<(&'a ElementInfo, f64)> {
        nodes
            .iter()
            .map(|n| (n, Self::match_score(n, fingerprint)))
            .filter(|(_, s)| *s >= min_score)
            .fold(None, |best: Option<(&ElementInfo, f64)>, (n, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((n, s)),
            })
    }
}

/// Shared keys with equal values over the union of keys
fn attribute_overlap(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> f64 {
    let relevant = |m: &BTreeMap<String, String>| -> BTreeSet<String> {
        m.iter()
            .filter(|(k, v)| !v.trim().is_empty() && !VOLATILE_ATTRIBUTES.contains(&k.as_str()))
            .map(|(k, _)| k.clone())
            .collect()
    };
    let keys_a = relevant(a);
    let keys_b = relevant(b);
    let union = keys_a.union(&keys_b).count();
    if union == 0 {
        return 1.0;
    }
    let equal = keys_a
        .intersection(&keys_b)
        .filter(|k| a.get(*k).map(|v| v.trim()) == b.get(*k).map(|v| v.trim()))
        .count();
    equal as f64 / union as f64
}

/// 1 - normalized edit distance over case-folded, whitespace-collapsed text
fn text_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize_text(a).to_lowercase().chars().collect();
    let b: Vec<char> = normalize_text(b).to_lowercase().chars().collect();
    normalized_similarity(&a, &b)
}

fn path_similarity(a: &str, b: &str) -> f64 {
    let segments = |p: &str| -> Vec<String> {
        p.split('>')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };
    normalized_similarity(&segments(a), &segments(b))
}

fn normalized_similarity<T: PartialEq>(a: &[T], b: &[T]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Edit distance between two sequences
pub(crate) fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let cost = usize::from(x != y);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Write `bytes` to `path` through a temp file in the same directory and a rename
///
/// An existing file keeps its permissions.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> HealResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| HealError::Io(e.error))?;
    Ok(())
}

#[cfg(feature = "proptest")]
pub mod strategies {
    //! Proptest strategies for element descriptions

    use super::ElementInfo;
    use proptest::prelude::*;

    /// Arbitrary element with a small attribute set and text
    pub fn element_info() -> impl Strategy<Value = ElementInfo> {
        (
            prop::sample::select(vec!["button", "input", "a", "div", "span"]),
            prop::option::of("[a-z][a-z0-9-]{0,12}"),
            prop::option::of("[a-z]{1,8}"),
            "[A-Za-z ]{0,20}",
        )
            .prop_map(|(tag, id, name, text)| {
                let mut el = ElementInfo::new(tag).with_text(text);
                if let Some(id) = id {
                    el = el.with_attr("id", id);
                }
                if let Some(name) = name {
                    el = el.with_attr("name", name);
                }
                el
            })
    }
}
