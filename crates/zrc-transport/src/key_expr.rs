// key_expr.rs — Hierarchical key expressions and wildcard matching.
//
// Keys are `/`-separated chunks: `zrc/action/goal/navigate`. Subscriptions
// and queryables may use two wildcards:
//   `*`  matches exactly one chunk
//   `**` matches zero or more chunks
// Published keys and query targets are matched against declared expressions.

use crate::error::TransportError;

/// Validate a key expression.
///
/// A valid expression is non-empty, has no leading or trailing `/`, no empty
/// chunks, and only uses `*`/`**` as whole chunks.
pub fn validate(key: &str) -> Result<(), TransportError> {
    let invalid = |reason: &str| TransportError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("leading or trailing '/'"));
    }
    for chunk in key.split('/') {
        if chunk.is_empty() {
            return Err(invalid("empty chunk"));
        }
        if chunk.contains('*') && chunk != "*" && chunk != "**" {
            return Err(invalid("wildcards must span a whole chunk"));
        }
    }
    Ok(())
}

/// Whether `expr` contains a wildcard chunk.
pub fn is_wildcard(expr: &str) -> bool {
    expr.split('/').any(|chunk| chunk == "*" || chunk == "**")
}

/// Check whether the concrete `key` is matched by the expression `expr`.
pub fn matches(expr: &str, key: &str) -> bool {
    let pattern: Vec<&str> = expr.split('/').collect();
    let chunks: Vec<&str> = key.split('/').collect();
    matches_chunks(&pattern, &chunks)
}

fn matches_chunks(pattern: &[&str], chunks: &[&str]) -> bool {
    match (pattern.first(), chunks.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            // Zero chunks consumed, or one chunk consumed and stay on `**`.
            matches_chunks(&pattern[1..], chunks)
                || (!chunks.is_empty() && matches_chunks(pattern, &chunks[1..]))
        }
        (Some(&"*"), Some(_)) => matches_chunks(&pattern[1..], &chunks[1..]),
        (Some(p), Some(c)) if p == c => matches_chunks(&pattern[1..], &chunks[1..]),
        _ => false,
    }
}
