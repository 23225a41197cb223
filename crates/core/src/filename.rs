//! File name handling shared by the content store and legacy lookups.

/// Longest sanitized name kept in a stored file name.
pub const MAX_NAME_LEN: usize = 100;

/// Lowercased extension of a file name, without the dot.
///
/// Dotfiles such as `.bashrc` have no extension.
pub fn extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reduce a user-supplied file name to a safe single path component.
///
/// Directory parts are dropped and characters outside `[A-Za-z0-9._-]` become `_`.
pub fn sanitize(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mapped: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut cleaned = mapped.trim_start_matches('.').to_string();
    if cleaned.len() > MAX_NAME_LEN {
        // Keep the extension when truncating.
        let ext = extension(&cleaned).map(|e| format!(".{e}")).unwrap_or_default();
        let keep = MAX_NAME_LEN.saturating_sub(ext.len());
        cleaned.truncate(keep);
        cleaned.push_str(&ext);
    }
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Strip a unique prefix segment (`<uuid-like>_rest`) from a file name.
///
/// The segment before the first underscore counts as unique when it is at least
/// eight characters of hex digits and dashes, such as a full UUID or the short
/// `a1b2c3d4` form. Returns `None` when the name carries no such prefix.
pub fn strip_unique_prefix(name: &str) -> Option<&str> {
    let (prefix, rest) = name.split_once('_')?;
    let uuid_like = prefix.len() >= 8
        && prefix.chars().any(|c| c.is_ascii_hexdigit())
        && prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    (uuid_like && !rest.is_empty()).then_some(rest)
}
