//! Deterministic name generation.
//!
//! Centralises name sanitisation and synthetic-block naming so that two
//! runs over the same graph produce byte-identical names. Dot-separated
//! segments keep the names readable in logs and serialized filters.

/// Maximum length of a fused block's readable name before it is compacted.
const FUSED_NAME_BUDGET: usize = 48;

pub(crate) fn sanitize_segment(value: &str) -> String {
    let mut out = String::new();
    let mut last_was_dot = false;
    for ch in value.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '.'
        };
        if mapped == '.' {
            if !last_was_dot && !out.is_empty() {
                out.push('.');
            }
            last_was_dot = true;
        } else {
            out.push(mapped);
            last_was_dot = false;
        }
    }
    while out.ends_with('.') {
        out.pop();
    }
    out
}

pub(crate) fn stable_short_suffix(value: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    let sanitized = sanitize_segment(value);
    let compact: String = sanitized.chars().filter(|c| *c != '.').collect();
    if compact.is_empty() {
        return String::new();
    }
    let keep = compact.len().min(max_len);
    compact[compact.len() - keep..].to_string()
}

/// Readable, deterministic name for a fused block: the sanitized member
/// names joined under an `optimized` prefix, compacted with a stable
/// suffix when the joined form runs long.
pub(crate) fn fused_block_name(member_names: &[&str]) -> String {
    let joined = member_names
        .iter()
        .map(|n| sanitize_segment(n))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");
    let base = if joined.is_empty() { "group".to_string() } else { joined };

    if base.len() <= FUSED_NAME_BUDGET {
        return format!("optimized.{base}");
    }
    let suffix = stable_short_suffix(&base, 6);
    let head: String = base.chars().take(FUSED_NAME_BUDGET - suffix.len() - 1).collect();
    let head = head.trim_end_matches('.');
    format!("optimized.{head}.{suffix}")
}
