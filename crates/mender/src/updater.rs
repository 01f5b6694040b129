//! Guarded rewriting of test scripts.
//!
//! Every update backs the script up first, rewrites all requested locators in
//! one pass, writes the result to a temporary file in the same directory and
//! renames it over the original. The rewritten file is then re-parsed for its
//! format; if that fails the backup is restored. Updates to the same path are
//! serialized; different paths proceed in parallel.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use crate::fingerprint::write_atomic;
use crate::keyed::KeyedLocks;
use crate::locator::Locator;
use crate::result::{HealError, HealResult};

/// Script formats with a post-write syntax check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFormat {
    /// Rust source (parsed with `syn`)
    Rust,
    /// JSON document
    Json,
    /// YAML document
    Yaml,
    /// Python source (`#` comments, triple-quoted strings)
    Python,
    /// JavaScript, TypeScript and other C-like sources
    Script,
}

impl ScriptFormat {
    /// Format for a path, by extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rs") => Self::Rust,
            Some("json") => Self::Json,
            Some("yaml" | "yml") => Self::Yaml,
            Some("py") => Self::Python,
            _ => Self::Script,
        }
    }

    /// Check that `content` is well-formed for this format
    pub fn check(self, content: &str) -> Result<(), String> {
        match self {
            Self::Rust => syn::parse_file(content)
                .map(drop)
                .map_err(|e| format!("rust syntax error: {e}")),
            Self::Json => serde_json::from_str::<serde_json::Value>(content)
                .map(drop)
                .map_err(|e| format!("json syntax error: {e}")),
            Self::Yaml => serde_yaml_ng::from_str::<serde_yaml_ng::Value>(content)
                .map(drop)
                .map_err(|e| format!("yaml syntax error: {e}")),
            Self::Python => check_balance(content, true),
            Self::Script => check_balance(content, false),
        }
    }
}

/// Outcome of one update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Script path
    pub path: PathBuf,
    /// Backup taken before the update
    pub backup_path: PathBuf,
    /// Number of literals rewritten
    pub replacements_applied: usize,
    /// Whether the rewritten script is in place
    pub success: bool,
    /// Why the update was rolled back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A rewritten script written to a temporary file but not yet renamed into place
#[derive(Debug)]
pub struct StagedUpdate {
    path: PathBuf,
    temp: NamedTempFile,
    content: String,
    replacements_applied: usize,
}

impl StagedUpdate {
    /// Rewritten content
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Literals rewritten
    #[must_use]
    pub const fn replacements_applied(&self) -> usize {
        self.replacements_applied
    }

    /// Rename the temporary file over the script
    pub fn commit(self) -> HealResult<()> {
        self.temp
            .persist(&self.path)
            .map_err(|e| HealError::FileUpdate {
                path: self.path.clone(),
                message: e.error.to_string(),
            })?;
        Ok(())
    }
}

/// Backs up and rewrites test scripts
#[derive(Debug, Default)]
pub struct ScriptUpdater {
    backup_dir: Option<PathBuf>,
    locks: KeyedLocks<PathBuf>,
}

impl ScriptUpdater {
    /// Keep backups next to each script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep backups in `dir`
    #[must_use]
    pub fn with_backup_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: Some(dir.into()),
            locks: KeyedLocks::new(),
        }
    }

    /// Copy the script to a timestamped backup
    pub fn backup(&self, path: &Path) -> HealResult<PathBuf> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| HealError::FileUpdate {
                path: path.to_path_buf(),
                message: "script path has no file name".to_string(),
            })?;
        let dir = match &self.backup_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        };
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let mut backup = dir.join(format!("{file_name}.{stamp}.bak"));
        let mut n = 1;
        while backup.exists() {
            backup = dir.join(format!("{file_name}.{stamp}-{n}.bak"));
            n += 1;
        }
        write_atomic(&backup, &bytes)?;
        Ok(backup)
    }

    /// Restore a backup over the script
    pub async fn restore(&self, backup: &Path, path: &Path) -> HealResult<()> {
        let _guard = self.locks.lock(&lock_key(path)).await;
        let bytes = std::fs::read(backup)?;
        write_atomic(path, &bytes)?;
        info!(script = %path.display(), backup = %backup.display(), "script restored from backup");
        Ok(())
    }

    /// Rewrite locator literals to a temporary file beside the script
    ///
    /// `replacements` maps original locator to healed locator. Dropping the
    /// returned value without committing leaves the script untouched.
    pub fn stage(&self, path: &Path, replacements: &BTreeMap<String, String>) -> HealResult<StagedUpdate> {
        let original = std::fs::read_to_string(path)?;
        let (content, replacements_applied) = replace_literals(&original, replacements);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.as_file()
            .set_permissions(std::fs::metadata(path)?.permissions())?;
        temp.write_all(content.as_bytes())?;
        temp.as_file().sync_all()?;
        Ok(StagedUpdate {
            path: path.to_path_buf(),
            temp,
            content,
            replacements_applied,
        })
    }

    /// Back up, rewrite, verify, and roll back on a failed verification
    ///
    /// A failed verification yields `Ok` with `success == false`; only a
    /// failed rollback is an error.
    pub async fn apply(
        &self,
        path: &Path,
        replacements: &BTreeMap<String, String>,
    ) -> HealResult<UpdateResult> {
        self.apply_with_snapshot(path, replacements, None).await
    }

    /// Like [`apply`](Self::apply), reusing `snapshot` as the backup when the
    /// script still matches it byte-for-byte
    pub async fn apply_with_snapshot(
        &self,
        path: &Path,
        replacements: &BTreeMap<String, String>,
        snapshot: Option<&Path>,
    ) -> HealResult<UpdateResult> {
        let _guard = self.locks.lock(&lock_key(path)).await;
        let backup_path = match snapshot {
            Some(snapshot) if snapshot != path && same_bytes(snapshot, path) => snapshot.to_path_buf(),
            _ => self.backup(path)?,
        };
        let failed = |message: String, applied: usize| UpdateResult {
            path: path.to_path_buf(),
            backup_path: backup_path.clone(),
            replacements_applied: applied,
            success: false,
            error: Some(message),
        };

        let staged = match self.stage(path, replacements) {
            Ok(staged) => staged,
            Err(e) => return Ok(failed(e.to_string(), 0)),
        };
        let applied = staged.replacements_applied();
        if applied == 0 {
            warn!(script = %path.display(), "no quoted occurrence of the locator found");
            return Ok(failed("locator literal not found in script".to_string(), 0));
        }
        let format = ScriptFormat::from_path(path);
        let verdict = format.check(staged.content());
        if let Err(e) = staged.commit() {
            return Ok(failed(e.to_string(), 0));
        }

        match verdict {
            Ok(()) => {
                info!(script = %path.display(), applied, "script updated");
                Ok(UpdateResult {
                    path: path.to_path_buf(),
                    backup_path,
                    replacements_applied: applied,
                    success: true,
                    error: None,
                })
            }
            Err(parse_error) => {
                warn!(script = %path.display(), error = %parse_error, "rewritten script failed to parse; rolling back");
                roll_back(path, &backup_path, &parse_error)?;
                Ok(failed(parse_error, applied))
            }
        }
    }
}

/// Put the backup back over the script; failure here is fatal
fn roll_back(path: &Path, backup: &Path, cause: &str) -> HealResult<()> {
    let restored = std::fs::read(backup)
        .map_err(HealError::from)
        .and_then(|bytes| write_atomic(path, &bytes));
    if let Err(e) = restored {
        error!(script = %path.display(), backup = %backup.display(), error = %e, "ROLLBACK FAILED");
        return Err(HealError::Rollback {
            path: path.to_path_buf(),
            message: format!("{cause}; restore failed: {e}"),
        });
    }
    Ok(())
}

fn same_bytes(a: &Path, b: &Path) -> bool {
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn lock_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn literal_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`(?:[^`\\]|\\.)*`"#).ok()
        })
        .as_ref()
}

/// Rewrite every complete quoted literal equal to an original locator
///
/// A literal matches when its text equals the key, or when both parse to the
/// same locator (`"#old"` matches `css=#old`).
#[must_use]
pub fn replace_literals(content: &str, replacements: &BTreeMap<String, String>) -> (String, usize) {
    let Some(pattern) = literal_pattern() else {
        return (content.to_string(), 0);
    };
    let parsed: Vec<(Option<Locator>, &String, &String)> = replacements
        .iter()
        .map(|(from, to)| (Locator::parse(from).ok(), from, to))
        .collect();

    let mut applied = 0;
    let rewritten = pattern.replace_all(content, |caps: &regex::Captures<'_>| {
        let literal = &caps[0];
        let quote = literal.chars().next().unwrap_or('"');
        let inner = unescape(&literal[1..literal.len() - 1], quote);
        let healed = parsed.iter().find_map(|(locator, from, to)| {
            let same = inner == from.as_str()
                || locator
                    .as_ref()
                    .is_some_and(|l| Locator::parse(&inner).ok().as_ref() == Some(l));
            same.then_some(*to)
        });
        match healed {
            Some(to) => {
                applied += 1;
                format!("{quote}{}{quote}", escape(to, quote))
            }
            None => literal.to_string(),
        }
    });
    (rewritten.into_owned(), applied)
}

fn unescape(s: &str, quote: char) -> String {
    s.replace(&format!("\\{quote}"), &quote.to_string())
        .replace("\\\\", "\\")
}

fn escape(s: &str, quote: char) -> String {
    s.replace('\\', "\\\\")
        .replace(quote, &format!("\\{quote}"))
}

/// Delimiter and string-literal balance check for C-like and Python sources
fn check_balance(content: &str, python: bool) -> Result<(), String> {
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => line += 1,
            '#' if python => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if !python && next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if !python && next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(format!("unterminated block comment (line {line})"));
                }
                i += 2;
                continue;
            }
            '"' | '\'' | '`' => {
                let triple = python
                    && chars.get(i + 1) == Some(&c)
                    && chars.get(i + 2) == Some(&c);
                let start_line = line;
                i += if triple { 3 } else { 1 };
                let multiline = triple || c == '`';
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(format!("unterminated string starting on line {start_line}"));
                    };
                    if ch == '\\' {
                        i += 2;
                        continue;
                    }
                    if ch == '\n' {
                        if !multiline {
                            return Err(format!("unterminated string on line {start_line}"));
                        }
                        line += 1;
                    }
                    if ch == c {
                        if !triple {
                            i += 1;
                            break;
                        }
                        if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                            i += 3;
                            break;
                        }
                    }
                    i += 1;
                }
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "`{c}` on line {line} does not close `{open}` from line {open_line}"
                        ))
                    }
                    None => return Err(format!("unmatched `{c}` on line {line}")),
                }
            }
            _ => {}
        }
        i += 1;
    }
    match stack.pop() {
        Some((open, open_line)) => Err(format!("unclosed `{open}` from line {open_line}")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SPEC_TS: &str = r##"import { test } from '@playwright/test';

test('login', async ({ page }) => {
  await page.goto('/login');
  // the old locator: #old-login-btn
  await page.locator("#old-login-btn").click();
  await page.locator('#old-login-btn-extra').hover();
  await expect(page.locator("text=Welcome")).toBeVisible();
});
"##;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
            .collect()
    }

    fn script(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    mod literal_tests {
        use super::*;

        #[test]
        fn test_only_whole_literals_replaced() {
            let (out, n) = replace_literals(SPEC_TS, &map(&[("css=#old-login-btn", "id=new-login-btn")]));
            assert_eq!(n, 1);
            assert!(out.contains(r#"page.locator("id=new-login-btn")"#));
            assert!(out.contains("// the old locator: #old-login-btn"));
            assert!(out.contains("'#old-login-btn-extra'"));
        }

        #[test]
        fn test_multiple_replacements_single_pass() {
            let (out, n) = replace_literals(
                SPEC_TS,
                &map(&[("#old-login-btn", "id=new-login-btn"), ("text=Welcome", "testid=welcome")]),
            );
            assert_eq!(n, 2);
            assert!(out.contains(r#""testid=welcome""#));
        }

        #[test]
        fn test_escapes_for_quote_style() {
            let (out, n) = replace_literals(
                "find('#old')",
                &map(&[("#old", r#"role=button[name="It's"]"#)]),
            );
            assert_eq!(n, 1);
            assert_eq!(out, r#"find('role=button[name="It\'s"]')"#);
        }
    }

    mod format_tests {
        use super::*;

        #[test]
        fn test_format_by_extension() {
            assert_eq!(ScriptFormat::from_path(Path::new("a.rs")), ScriptFormat::Rust);
            assert_eq!(ScriptFormat::from_path(Path::new("a.yml")), ScriptFormat::Yaml);
            assert_eq!(ScriptFormat::from_path(Path::new("a.py")), ScriptFormat::Python);
            assert_eq!(ScriptFormat::from_path(Path::new("a.spec.ts")), ScriptFormat::Script);
        }

        #[test]
        fn test_checks() {
            assert!(ScriptFormat::Script.check(SPEC_TS).is_ok());
            assert!(ScriptFormat::Script.check("foo(\"unterminated);").is_err());
            assert!(ScriptFormat::Script.check("a = [1, 2;").is_err());
            assert!(ScriptFormat::Python.check("x = '''multi\nline'''  # (unbalanced in comment\n").is_ok());
            assert!(ScriptFormat::Rust.check("fn main() { let s = \"#x\"; }").is_ok());
            assert!(ScriptFormat::Rust.check("fn main() {").is_err());
            assert!(ScriptFormat::Json.check(r##"{"locator": "#x"}"##).is_ok());
            assert!(ScriptFormat::Yaml.check("steps:\n  - click: \"#x\"\n").is_ok());
        }
    }

    mod apply_tests {
        use super::*;

        #[tokio::test]
        async fn test_apply_rewrites_and_backs_up() {
            let dir = TempDir::new().unwrap();
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            let updater = ScriptUpdater::new();
            let result = updater
                .apply(&path, &map(&[("#old-login-btn", "id=new-login-btn")]))
                .await
                .unwrap();
            assert!(result.success, "{:?}", result.error);
            assert_eq!(result.replacements_applied, 1);
            assert_eq!(std::fs::read_to_string(&result.backup_path).unwrap(), SPEC_TS);
            assert!(std::fs::read_to_string(&path).unwrap().contains("id=new-login-btn"));
        }

        #[tokio::test]
        async fn test_snapshot_reused_only_when_unchanged() {
            let dir = TempDir::new().unwrap();
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            let updater = ScriptUpdater::new();
            let snapshot = updater.backup(&path).unwrap();
            let result = updater
                .apply_with_snapshot(&path, &map(&[("#old-login-btn", "id=new-login-btn")]), Some(&snapshot))
                .await
                .unwrap();
            assert_eq!(result.backup_path, snapshot);

            // The script changed since the snapshot, so a fresh backup is taken
            let result = updater
                .apply_with_snapshot(&path, &map(&[("text=Welcome", "testid=welcome")]), Some(&snapshot))
                .await
                .unwrap();
            assert!(result.success, "{:?}", result.error);
            assert_ne!(result.backup_path, snapshot);
            assert!(std::fs::read_to_string(&result.backup_path).unwrap().contains("id=new-login-btn"));
        }

        #[tokio::test]
        async fn test_missing_literal_leaves_script_untouched() {
            let dir = TempDir::new().unwrap();
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            let result = ScriptUpdater::new()
                .apply(&path, &map(&[("#nope", "id=x")]))
                .await
                .unwrap();
            assert!(!result.success);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), SPEC_TS);
            assert!(result.backup_path.exists());
        }

        #[tokio::test]
        async fn test_parse_failure_rolls_back() {
            let dir = TempDir::new().unwrap();
            let broken = "{\"steps\": [\"#old\", }";
            let path = script(&dir, "flow.json", broken);
            let result = ScriptUpdater::new()
                .apply(&path, &map(&[("#old", "id=new")]))
                .await
                .unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("json"));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);
        }

        #[test]
        fn test_rollback_without_backup_is_fatal() {
            let dir = TempDir::new().unwrap();
            let path = script(&dir, "flow.json", "{\"steps\": [\"id=new\", }");
            let err = roll_back(&path, &dir.path().join("gone.bak"), "json: expected value").unwrap_err();
            assert!(err.is_fatal());
            assert!(matches!(err, HealError::Rollback { .. }));
            assert!(err.to_string().contains("expected value"));
        }

        #[cfg(unix)]
        #[tokio::test]
        async fn test_rewrite_keeps_file_mode() {
            use std::os::unix::fs::PermissionsExt;

            let dir = TempDir::new().unwrap();
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
            let updater = ScriptUpdater::new();
            let result = updater
                .apply(&path, &map(&[("#old-login-btn", "id=new-login-btn")]))
                .await
                .unwrap();
            assert!(result.success);
            let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode(&path), 0o644);

            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            updater.restore(&result.backup_path, &path).await.unwrap();
            assert_eq!(mode(&path), 0o755);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), SPEC_TS);
        }

        #[tokio::test]
        async fn test_backup_dir_used() {
            let dir = TempDir::new().unwrap();
            let backups = dir.path().join("backups");
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            let backup = ScriptUpdater::with_backup_dir(&backups).backup(&path).unwrap();
            assert_eq!(backup.parent(), Some(backups.as_path()));
        }

        #[tokio::test]
        async fn test_crash_before_rename_leaves_original_intact() {
            let dir = TempDir::new().unwrap();
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            let staged = ScriptUpdater::new()
                .stage(&path, &map(&[("#old-login-btn", "id=new-login-btn")]))
                .unwrap();
            assert!(staged.content().contains("id=new-login-btn"));
            drop(staged);
            assert_eq!(std::fs::read_to_string(&path).unwrap(), SPEC_TS);
            let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
            assert_eq!(leftovers, 1);
        }

        #[tokio::test]
        async fn test_same_file_updates_serialize() {
            let dir = TempDir::new().unwrap();
            let path = script(&dir, "login.spec.ts", SPEC_TS);
            let updater = Arc::new(ScriptUpdater::new());
            let a = {
                let (u, p) = (Arc::clone(&updater), path.clone());
                tokio::spawn(async move { u.apply(&p, &map(&[("#old-login-btn", "id=new-login-btn")])).await })
            };
            let b = {
                let (u, p) = (Arc::clone(&updater), path.clone());
                tokio::spawn(async move { u.apply(&p, &map(&[("text=Welcome", "testid=welcome")])).await })
            };
            assert!(a.await.unwrap().unwrap().success);
            assert!(b.await.unwrap().unwrap().success);
            let final_text = std::fs::read_to_string(&path).unwrap();
            assert!(final_text.contains("id=new-login-btn"));
            assert!(final_text.contains("testid=welcome"));
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn prop_restore_of_backup_is_identity(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let dir = TempDir::new().unwrap();
                let path = dir.path().join("script.ts");
                std::fs::write(&path, &bytes).unwrap();
                let updater = ScriptUpdater::new();
                let backup = updater.backup(&path).unwrap();
                std::fs::write(&path, b"clobbered").unwrap();
                rt.block_on(updater.restore(&backup, &path)).unwrap();
                prop_assert_eq!(std::fs::read(&path).unwrap(), bytes);
            }
        }
    }
}
