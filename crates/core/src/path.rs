//! Resource path helpers. Paths are `/`-separated; empty segments are ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

pub const ROOT: &str = "/";

/// Non-empty segments of `path`.
pub fn split(path: &str) -> SmallVec<[&str; 8]> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Canonical form: a single leading slash, no empty or trailing segments.
pub fn normalize(path: &str) -> String {
    format!("/{}", split(path).join("/"))
}

/// Parent of `path`; the root is its own parent.
pub fn parent_of(path: &str) -> String {
    let parts = split(path);
    match parts.split_last() {
        Some((_, parent)) => format!("/{}", parent.join("/")),
        None => ROOT.to_string(),
    }
}

pub fn last_segment(path: &str) -> Option<&str> {
    split(path).last().copied()
}

static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^/{}]*\}").expect("static regex"));

/// Replace every `{param}` segment with `*` for use in source ARNs.
pub fn wildcard_params(path: &str) -> String {
    PARAM_RE.replace_all(path, "*").into_owned()
}
