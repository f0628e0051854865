//! Per-repository publication rules.

use armada_core::types::{PublishIntent, PublishedRule};

/// Publication intent for `repo_name` under `rule`.
///
/// Per-repository rules are evaluated in order and the last matching pattern
/// wins; no match means unpublished.
pub fn resolve(rule: &PublishedRule, repo_name: &str) -> PublishIntent {
    match rule {
        PublishedRule::Static(intent) => *intent,
        PublishedRule::PerRepository(rules) => rules
            .iter()
            .flat_map(|entry| entry.iter())
            .filter(|(pattern, _)| wildcard_match(pattern, repo_name))
            .map(|(_, intent)| *intent)
            .last()
            .unwrap_or_default(),
    }
}

/// `*` matches any run of characters; everything else is literal.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let (mut p_idx, mut v_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);
    let pattern_bytes = pattern.as_bytes();
    let value_bytes = value.as_bytes();

    while v_idx < value_bytes.len() {
        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = v_idx;
            p_idx += 1;
            continue;
        }
        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == value_bytes[v_idx] {
            p_idx += 1;
            v_idx += 1;
            continue;
        }
        if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            v_idx = match_idx;
            continue;
        }
        return false;
    }

    while p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
        p_idx += 1;
    }
    p_idx == pattern_bytes.len()
}
