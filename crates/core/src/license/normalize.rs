//! Identifier normalisation for policy lookups.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static LICENSE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+licen[cs]e$").unwrap());

/// Suffixes that narrow or widen a base license without changing its policy.
const VERSION_QUALIFIERS: [&str; 3] = ["-or-later", "-only", "+"];

/// Fold an identifier into its lookup key.
///
/// `"MIT"`, `"mit"`, `" MIT  License "` all fold to `"mit"`.
pub fn normalize_key(raw: &str) -> String {
    let collapsed = WHITESPACE.replace_all(raw.trim(), " ");
    let stripped = LICENSE_SUFFIX.replace(&collapsed, "");
    let key = stripped.trim().to_lowercase();
    if key.is_empty() {
        // "License" on its own folds to nothing; keep the word instead.
        collapsed.to_lowercase()
    } else {
        key
    }
}

/// Keys to try for an identifier, most specific first.
pub fn lookup_keys(raw: &str) -> Vec<String> {
    let key = normalize_key(raw);
    let mut keys = vec![key.clone()];
    for qualifier in VERSION_QUALIFIERS {
        if let Some(base) = key.strip_suffix(qualifier) {
            if !base.is_empty() {
                keys.push(base.to_string());
            }
            break;
        }
    }
    keys
}
