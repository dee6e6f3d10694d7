//! Unified diff parsing and application
//!
//! Model-produced diffs are close to correct but not byte-perfect: hunk
//! offsets drift and whitespace gets normalized. Application therefore
//! anchors each hunk by content, preferring an exact line match near the
//! declared position and falling back to a whitespace-trimmed match
//! before giving up.

use regex::Regex;

use crate::{Error, Result};

/// A parsed unified diff for a single file.
#[derive(Debug, Clone)]
pub struct Patch {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<Hunk>,
}

/// One `@@` hunk.
#[derive(Debug, Clone)]
pub struct Hunk {
    pub old_start: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Removed(String),
    Added(String),
}

impl Patch {
    /// Repository-relative path of the file this patch targets.
    pub fn target_path(&self) -> &str {
        // Prefer the new side; "/dev/null" means a deletion.
        if self.new_path != "/dev/null" {
            &self.new_path
        } else {
            &self.old_path
        }
    }
}

/// Parse one unified diff (one file, `---`/`+++` headers, `@@` hunks).
pub fn parse(diff: &str) -> Result<Patch> {
    let hunk_header = Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .map_err(|e| Error::Patch(format!("invalid hunk header pattern: {e}")))?;

    let mut old_path: Option<String> = None;
    let mut new_path: Option<String> = None;
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            old_path = Some(strip_prefix(rest));
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            new_path = Some(strip_prefix(rest));
            continue;
        }
        if let Some(caps) = hunk_header.captures(line) {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let old_start = caps[1]
                .parse()
                .map_err(|_| Error::Patch(format!("bad hunk header: {line}")))?;
            current = Some(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            // Preamble (diff --git, index lines) before the first hunk.
            continue;
        };

        if line == "\\ No newline at end of file" {
            continue;
        }
        if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Added(text.to_string()));
        } else if let Some(text) = line.strip_prefix('-') {
            hunk.lines.push(HunkLine::Removed(text.to_string()));
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_string()));
        } else if line.is_empty() {
            // Some producers emit empty context lines without the space.
            hunk.lines.push(HunkLine::Context(String::new()));
        } else {
            return Err(Error::Patch(format!("unrecognized hunk line: {line}")));
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }

    let (Some(old_path), Some(new_path)) = (old_path, new_path) else {
        return Err(Error::Patch("missing ---/+++ file headers".to_string()));
    };
    if hunks.is_empty() {
        return Err(Error::Patch(format!("no hunks in diff for {new_path}")));
    }

    Ok(Patch {
        old_path,
        new_path,
        hunks,
    })
}

/// Apply a parsed patch to file content, returning the new content.
pub fn apply(content: &str, patch: &Patch) -> Result<String> {
    let lines: Vec<&str> = content.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(lines.len());
    let mut cursor = 0usize; // next source line not yet copied

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let expected: Vec<&str> = hunk
            .lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(t) | HunkLine::Removed(t) => Some(t.as_str()),
                HunkLine::Added(_) => None,
            })
            .collect();

        let position = locate(&lines, cursor, hunk.old_start.saturating_sub(1), &expected)
            .ok_or_else(|| {
                Error::Patch(format!(
                    "hunk {} of {} does not match {}",
                    index + 1,
                    patch.hunks.len(),
                    patch.target_path()
                ))
            })?;

        for line in &lines[cursor..position] {
            result.push((*line).to_string());
        }

        // Walk the hunk against the source, emitting the new side.
        let mut source = position;
        for line in &hunk.lines {
            match line {
                HunkLine::Context(_) => {
                    result.push(lines[source].to_string());
                    source += 1;
                }
                HunkLine::Removed(_) => source += 1,
                HunkLine::Added(text) => result.push(text.clone()),
            }
        }
        cursor = source;
    }

    for line in &lines[cursor..] {
        result.push((*line).to_string());
    }

    let mut output = result.join("\n");
    if content.ends_with('\n') {
        output.push('\n');
    }
    Ok(output)
}

/// Parse and apply every patch in `diffs` against `read`, returning
/// `(path, new_content)` pairs.
pub fn apply_all<'a, F>(diffs: &'a [String], mut read: F) -> Result<Vec<(String, String)>>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut applied = Vec::with_capacity(diffs.len());
    for diff in diffs {
        let patch = parse(diff)?;
        let content = read(patch.target_path())?;
        let updated = apply(&content, &patch)?;
        applied.push((patch.target_path().to_string(), updated));
    }
    Ok(applied)
}

/// Find where `expected` matches `lines`, at or after `cursor`.
///
/// The declared position is tried first, then the rest of the file with
/// exact comparison, then again with trimmed comparison.
fn locate(lines: &[&str], cursor: usize, hint: usize, expected: &[&str]) -> Option<usize> {
    if expected.is_empty() {
        return Some(hint.max(cursor).min(lines.len()));
    }

    let matches_at = |at: usize, trim: bool| -> bool {
        if at + expected.len() > lines.len() {
            return false;
        }
        expected.iter().enumerate().all(|(i, want)| {
            let got = lines[at + i];
            if trim {
                got.trim() == want.trim()
            } else {
                got == *want
            }
        })
    };

    let start = hint.max(cursor);
    if matches_at(start, false) {
        return Some(start);
    }
    for at in cursor..lines.len() {
        if matches_at(at, false) {
            return Some(at);
        }
    }
    for at in cursor..lines.len() {
        if matches_at(at, true) {
            return Some(at);
        }
    }
    None
}

fn strip_prefix(path: &str) -> String {
    let path = path.split('\t').next().unwrap_or(path).trim();
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}
