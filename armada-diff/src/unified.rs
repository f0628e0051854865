//! Unified diff rendering between two texts.

use similar::TextDiff;

/// Render a `--- a/<path>` / `+++ b/<path>` unified diff with three lines of
/// context. Returns an empty string when the texts are equal.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(old, new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}
