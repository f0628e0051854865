//! Patch applier: rebuild the new side of a file from its original text.
//!
//! Used to render preview content for changesets that have not been pushed
//! yet, and the "new file" pane of a diff viewer.

use std::collections::BTreeMap;

use crate::parse::{FileDiff, Hunk};

/// Apply `hunks` to `original` and return the new text.
///
/// Hunks must be sorted by `orig_start`. Out-of-order or out-of-range hunks
/// produce wrong output but never panic.
pub fn apply_patch(original: &str, hunks: &[Hunk]) -> String {
    let lines: Vec<&str> = original.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    // 1-based cursor into `lines`.
    let mut last_line = 1usize;

    for hunk in hunks {
        let start = hunk.orig_start as usize;
        if start != 0 && start > last_line {
            let hole_end = (start - 1).min(lines.len());
            if last_line - 1 < hole_end {
                out.extend_from_slice(&lines[last_line - 1..hole_end]);
            }
            last_line = start;
        }

        for line in &hunk.lines {
            match line.as_bytes().first() {
                None => {}
                Some(b'-') => last_line += 1,
                Some(b'+') => out.push(&line[1..]),
                Some(_) => {
                    if let Some(orig) = lines.get(last_line - 1).copied() {
                        out.push(orig);
                    }
                    last_line += 1;
                }
            }
        }
    }

    if last_line <= lines.len() {
        out.extend_from_slice(&lines[last_line - 1..]);
    }

    // Reconcile a newline-at-EOF change carried by the final hunk.
    if let Some(tail) = hunks.last() {
        if tail.orig_no_newline && !tail.new_no_newline {
            out.push("");
        } else if tail.new_no_newline && !tail.orig_no_newline && out.last() == Some(&"") {
            out.pop();
        }
    }

    out.join("\n")
}

/// Apply one file's hunks, sorting them by original start line first.
pub fn apply_file_diff(original: &str, diff: &FileDiff) -> String {
    let mut hunks = diff.hunks.clone();
    hunks.sort_by_key(|h| h.orig_start);
    apply_patch(original, &hunks)
}

/// Materialize the post-diff content of every file a diff touches.
///
/// `originals` maps a path to its current content; files absent from the map
/// are treated as empty. Deleted files map to `None`.
pub fn preview_files(
    originals: &BTreeMap<String, String>,
    diffs: &[FileDiff],
) -> BTreeMap<String, Option<String>> {
    let mut out = BTreeMap::new();
    for diff in diffs {
        if diff.is_deleted_file() {
            out.insert(diff.orig_name.clone(), None);
            continue;
        }
        let original = if diff.is_new_file() {
            ""
        } else {
            originals
                .get(&diff.orig_name)
                .map(String::as_str)
                .unwrap_or("")
        };
        out.insert(diff.new_name.clone(), Some(apply_file_diff(original, diff)));
    }
    out
}
