//! Multi-file unified diff parser.
//!
//! Accepts the output of `git diff` and friends: optional `diff --git` and
//! extended header lines, a `---`/`+++` file header pair, then one or more
//! `@@ -a,b +c,d @@` hunks. Hunk bodies are delimited by the line counts in
//! their header, so removed lines that happen to start with `--` are never
//! mistaken for a new file header.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::error::DiffError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Added, changed and deleted line counts.
///
/// A removed line directly followed by an added line (or the reverse) is
/// counted once as `changed` rather than once in each of the other buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub added: i32,
    pub changed: i32,
    pub deleted: i32,
}

impl DiffStat {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.deleted == 0
    }
}

impl Add for DiffStat {
    type Output = DiffStat;

    fn add(self, rhs: DiffStat) -> DiffStat {
        DiffStat {
            added: self.added + rhs.added,
            changed: self.changed + rhs.changed,
            deleted: self.deleted + rhs.deleted,
        }
    }
}

impl AddAssign for DiffStat {
    fn add_assign(&mut self, rhs: DiffStat) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for DiffStat {
    fn sum<I: Iterator<Item = DiffStat>>(iter: I) -> DiffStat {
        iter.fold(DiffStat::default(), Add::add)
    }
}

/// One `@@` section of a file diff.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hunk {
    /// 1-based start line in the original file (0 for an empty original).
    pub orig_start: u32,
    pub orig_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// Text following the closing `@@`, usually the enclosing function.
    pub section: String,
    /// Body lines including their leading marker (` `, `-`, `+`).
    pub lines: Vec<String>,
    /// `\ No newline at end of file` followed the last original-side line.
    pub orig_no_newline: bool,
    /// `\ No newline at end of file` followed the last new-side line.
    pub new_no_newline: bool,
}

impl Hunk {
    pub fn stat(&self) -> DiffStat {
        let mut stat = DiffStat::default();
        let mut last = None;
        for line in &self.lines {
            match line.as_bytes().first() {
                Some(b'-') => {
                    if last == Some(b'+') {
                        stat.added -= 1;
                        stat.changed += 1;
                        last = None;
                    } else {
                        stat.deleted += 1;
                        last = Some(b'-');
                    }
                }
                Some(b'+') => {
                    if last == Some(b'-') {
                        stat.deleted -= 1;
                        stat.changed += 1;
                        last = None;
                    } else {
                        stat.added += 1;
                        last = Some(b'+');
                    }
                }
                _ => last = None,
            }
        }
        stat
    }
}

/// All hunks touching one file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileDiff {
    /// Original path with any `a/` prefix stripped; `/dev/null` for new files.
    pub orig_name: String,
    /// New path with any `b/` prefix stripped; `/dev/null` for deleted files.
    pub new_name: String,
    /// Extended header lines (`diff --git`, `index`, mode lines).
    pub extended: Vec<String>,
    pub hunks: Vec<Hunk>,
}

pub const DEV_NULL: &str = "/dev/null";

impl FileDiff {
    pub fn stat(&self) -> DiffStat {
        self.hunks.iter().map(Hunk::stat).sum()
    }

    pub fn is_new_file(&self) -> bool {
        self.orig_name == DEV_NULL
    }

    pub fn is_deleted_file(&self) -> bool {
        self.new_name == DEV_NULL
    }

    /// Path the file has after the diff is applied (or before, if deleted).
    pub fn path(&self) -> &str {
        if self.is_deleted_file() {
            &self.orig_name
        } else {
            &self.new_name
        }
    }
}

/// Sum of per-file stats across a whole multi-file diff.
pub fn total_stat(files: &[FileDiff]) -> DiffStat {
    files.iter().map(FileDiff::stat).sum()
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Split unified diff text into per-file hunk sets.
pub fn parse_multi_file_diff(input: &str) -> Result<Vec<FileDiff>, DiffError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    // (header line number, original lines left, new lines left)
    let mut open_hunk: Option<(usize, u32, u32)> = None;
    let mut last_marker = b' ';

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;

        if let Some((start, orig_left, new_left)) = open_hunk {
            if orig_left > 0 || new_left > 0 {
                let (orig_left, new_left) = match raw.as_bytes().first() {
                    Some(b' ') | None => (orig_left.saturating_sub(1), new_left.saturating_sub(1)),
                    Some(b'-') => (orig_left.saturating_sub(1), new_left),
                    Some(b'+') => (orig_left, new_left.saturating_sub(1)),
                    Some(b'\\') => {
                        mark_no_newline(&mut current, last_marker);
                        continue;
                    }
                    Some(_) => {
                        return Err(DiffError::UnexpectedLine {
                            line: line_no,
                            content: raw.to_string(),
                        })
                    }
                };
                last_marker = raw.as_bytes().first().copied().unwrap_or(b' ');
                if let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) {
                    hunk.lines.push(raw.to_string());
                }
                open_hunk = Some((start, orig_left, new_left));
                continue;
            }
        }

        if raw.starts_with('\\') {
            // Trailing marker after the final body line of a hunk.
            mark_no_newline(&mut current, last_marker);
            continue;
        }

        if raw.starts_with("@@") {
            let hunk = parse_hunk_header(raw, line_no)?;
            let file = current
                .as_mut()
                .ok_or(DiffError::HunkWithoutFile { line: line_no })?;
            open_hunk = Some((line_no, hunk.orig_lines, hunk.new_lines));
            last_marker = b' ';
            file.hunks.push(hunk);
            continue;
        }

        open_hunk = None;

        let after_hunk = current.as_ref().map(|f| !f.hunks.is_empty()).unwrap_or(false);
        if after_hunk && is_stray_body_line(raw) {
            // More body lines than the hunk header counted.
            return Err(DiffError::UnexpectedLine {
                line: line_no,
                content: raw.to_string(),
            });
        }

        if raw.starts_with("diff ") {
            if let Some(done) = current.take() {
                files.push(done);
            }
            current = Some(FileDiff {
                extended: vec![raw.to_string()],
                ..FileDiff::default()
            });
        } else if let Some(name) = raw.strip_prefix("--- ") {
            let starts_new = current
                .as_ref()
                .map(|f| !f.hunks.is_empty() || !f.orig_name.is_empty())
                .unwrap_or(true);
            if starts_new {
                if let Some(done) = current.take() {
                    files.push(done);
                }
                current = Some(FileDiff::default());
            }
            if let Some(file) = current.as_mut() {
                file.orig_name = strip_path_prefix(name, "a/");
            }
        } else if let Some(name) = raw.strip_prefix("+++ ") {
            if let Some(file) = current.as_mut() {
                file.new_name = strip_path_prefix(name, "b/");
            }
        } else if let Some(file) = current.as_mut() {
            if file.hunks.is_empty() {
                file.extended.push(raw.to_string());
            }
        }
    }

    if let Some((start, orig_left, new_left)) = open_hunk {
        if orig_left > 0 || new_left > 0 {
            return Err(DiffError::TruncatedHunk { line: start });
        }
    }
    if let Some(done) = current.take() {
        files.push(done);
    }
    Ok(files)
}

fn is_stray_body_line(raw: &str) -> bool {
    matches!(raw.as_bytes().first(), Some(b' ' | b'-' | b'+'))
        && !raw.starts_with("--- ")
        && !raw.starts_with("+++ ")
}

fn mark_no_newline(current: &mut Option<FileDiff>, last_marker: u8) {
    let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) else {
        return;
    };
    match last_marker {
        b'-' => hunk.orig_no_newline = true,
        b'+' => hunk.new_no_newline = true,
        _ => {
            hunk.orig_no_newline = true;
            hunk.new_no_newline = true;
        }
    }
}

fn strip_path_prefix(name: &str, prefix: &str) -> String {
    // Drop a trailing tab-separated timestamp as emitted by `diff -u`.
    let name = name.split('\t').next().unwrap_or(name).trim_end();
    if name == DEV_NULL {
        return name.to_string();
    }
    name.strip_prefix(prefix).unwrap_or(name).to_string()
}

fn parse_hunk_header(raw: &str, line: usize) -> Result<Hunk, DiffError> {
    let malformed = || DiffError::MalformedHunkHeader {
        line,
        header: raw.to_string(),
    };

    let rest = raw.strip_prefix("@@ ").ok_or_else(malformed)?;
    let (ranges, section) = rest.split_once(" @@").ok_or_else(malformed)?;
    let (orig, new) = ranges.split_once(' ').ok_or_else(malformed)?;
    let (orig_start, orig_lines) =
        parse_range(orig.strip_prefix('-').ok_or_else(malformed)?).ok_or_else(malformed)?;
    let (new_start, new_lines) =
        parse_range(new.strip_prefix('+').ok_or_else(malformed)?).ok_or_else(malformed)?;

    Ok(Hunk {
        orig_start,
        orig_lines,
        new_start,
        new_lines,
        section: section.trim_start().to_string(),
        ..Hunk::default()
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
