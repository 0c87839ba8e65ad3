//! Name normalization for merge candidacy and document identity

/// Characters that separate words inside a name
fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '.' | '/' | '\\' | ':')
}

/// Normalize an entity name
///
/// Lowercases, strips surrounding punctuation and whitespace, and collapses
/// runs of internal separators into a single space. Underscores are identifier
/// characters and are preserved, so `__init__` and `_private` keep their
/// markers.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = lowered.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'));

    let mut out = String::with_capacity(stripped.len());
    let mut pending_separator = false;
    for c in stripped.chars() {
        if is_separator(c) {
            pending_separator = true;
            continue;
        }
        if pending_separator && !out.is_empty() {
            out.push(' ');
        }
        pending_separator = false;
        out.push(c);
    }
    out
}
