//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce the rules the session
//! controller depends on:
//! - One event timeline: no locks, no blocking waits in the core
//! - Recover, never panic: no `unwrap()` / `expect()` in core production code
//!
//! The scanning helpers live here so every test file applies the same notion
//! of "production code".

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden pattern and why it is forbidden
#[derive(Clone, Copy, Debug)]
pub struct Rule {
    /// Substring that must not appear in production code
    pub pattern: &'static str,
    /// Shown next to each violation
    pub reason: &'static str,
}

/// Root of the workspace, independent of the test's working directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Production lines of one source file as `(line_number, code)`
///
/// Everything from the first `#[cfg(test)]` onward is test code. Comments and
/// doc comments are dropped, and trailing `//` comments are cut off.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        if !code.trim().is_empty() {
            lines.push((idx + 1, code.to_string()));
        }
    }
    lines
}

/// Scan every `.rs` file under `dir` for `rules`
///
/// # Panics
///
/// Panics if `dir` does not exist, so a moved crate cannot make a scan pass
/// vacuously.
#[must_use]
pub fn find_violations(dir: &Path, rules: &[Rule]) -> Vec<String> {
    assert!(dir.exists(), "source directory not found: {}", dir.display());

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
    {
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        for (number, code) in production_lines(&content) {
            for rule in rules {
                if code.contains(rule.pattern) {
                    violations.push(format!(
                        "{}:{} - {}: {}",
                        entry.path().display(),
                        number,
                        rule.reason,
                        code.trim()
                    ));
                }
            }
        }
    }
    violations
}

/// Print violations and fail the test if there are any
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(title: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {title}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_module_is_excluded() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}".to_string())]);
    }

    #[test]
    fn test_comments_are_excluded() {
        let source = "/// calls .unwrap()\nlet x = y; // .unwrap() here\n    // Mutex\n";
        let lines = production_lines(source);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, 2);
        assert!(!lines[0].1.contains("unwrap"));
    }

    #[test]
    fn test_workspace_root_has_core() {
        assert!(workspace_root().join("streamer/core/src/lib.rs").exists());
    }
}
