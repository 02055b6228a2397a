//! Path rules and address helpers.
//!
//! Addresses are absolute URLs (`file:///app/lib/a.js`); names are what the
//! configuration maps onto them (`app/a.js`, `npm:pkg@1.0.0/index.js`). Path
//! rules map names to addresses; the reverse direction is what produces
//! canonical names.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

/// One `paths` entry with its target resolved against the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PathRule {
    pattern: String,
    target: String,
}

impl PathRule {
    fn wildcard(&self) -> bool {
        self.pattern.contains('*')
    }
}

/// Ordered path rules plus the base URL they are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRules {
    base_url: String,
    rules: Vec<PathRule>,
}

impl PathRules {
    pub fn new<'a>(
        base_url: impl Into<String>,
        paths: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let base_url = base_url.into();
        let rules = paths
            .into_iter()
            .map(|(pattern, target)| PathRule {
                pattern: pattern.clone(),
                target: join_url(&base_url, target),
            })
            .collect();
        Self { base_url, rules }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Map an address back onto a name.
    ///
    /// Exact rules are tried first in declaration order (a target ending in
    /// `/` matches the whole directory). Wildcard rules come next; the one
    /// whose target prefix has the most path segments wins and a later rule
    /// wins a tie. Finally the base URL is stripped. Returns `None` when nothing
    /// applies.
    pub fn reverse(&self, address: &str) -> Option<String> {
        for rule in self.rules.iter().filter(|rule| !rule.wildcard()) {
            if rule.target == address {
                return Some(rule.pattern.clone());
            }
            if rule.target.ends_with('/') && rule.pattern.ends_with('/') {
                if let Some(rest) = address.strip_prefix(rule.target.as_str()) {
                    return Some(format!("{}{}", rule.pattern, rest));
                }
            }
        }

        let mut best: Option<(usize, String)> = None;
        for rule in self.rules.iter().filter(|rule| rule.wildcard()) {
            let Some(wildcard) = match_wildcard(&rule.target, address) else {
                continue;
            };
            let (target_prefix, _) = split_wildcard(&rule.target);
            let segments = target_prefix.split('/').count();
            if best.as_ref().is_none_or(|(count, _)| segments >= *count) {
                best = Some((segments, rule.pattern.replacen('*', wildcard, 1)));
            }
        }
        if let Some((_, name)) = best {
            return Some(name);
        }

        address
            .strip_prefix(self.base_url.as_str())
            .map(|rest| rest.to_string())
    }

    /// Map a name onto its address.
    ///
    /// Exact rules first, then the wildcard rule with the longest literal
    /// prefix, then a plain join onto the base URL. Absolute URLs pass through.
    pub fn apply(&self, name: &str) -> String {
        if is_absolute_url(name) {
            return name.to_string();
        }

        for rule in self.rules.iter().filter(|rule| !rule.wildcard()) {
            if rule.pattern == name {
                return rule.target.clone();
            }
            if rule.pattern.ends_with('/') && rule.target.ends_with('/') {
                if let Some(rest) = name.strip_prefix(rule.pattern.as_str()) {
                    return format!("{}{}", rule.target, rest);
                }
            }
        }

        let mut best: Option<(usize, String)> = None;
        for rule in self.rules.iter().filter(|rule| rule.wildcard()) {
            let Some(wildcard) = match_wildcard(&rule.pattern, name) else {
                continue;
            };
            let prefix_len = split_wildcard(&rule.pattern).0.len();
            if best.as_ref().is_none_or(|(len, _)| prefix_len >= *len) {
                best = Some((prefix_len, rule.target.replacen('*', wildcard, 1)));
            }
        }
        if let Some((_, address)) = best {
            return address;
        }

        join_url(&self.base_url, name)
    }
}

fn split_wildcard(pattern: &str) -> (&str, &str) {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => (prefix, suffix),
        None => (pattern, ""),
    }
}

/// Match `value` against a single-`*` pattern, returning the wildcard part.
fn match_wildcard<'a>(pattern: &str, value: &'a str) -> Option<&'a str> {
    let (prefix, suffix) = split_wildcard(pattern);
    if value.len() < prefix.len() + suffix.len() {
        return None;
    }
    value
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
}

/// `scheme://...`
pub fn is_absolute_url(name: &str) -> bool {
    let Some((scheme, rest)) = name.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    let valid_scheme = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid_scheme && rest.starts_with("//")
}

/// Resolve `relative` against `base_url`. Absolute URLs pass through and a
/// leading `/` resolves against the origin.
pub fn join_url(base_url: &str, relative: &str) -> String {
    if is_absolute_url(relative) {
        return relative.to_string();
    }
    if relative.starts_with('/') {
        return format!("{}{}", url_origin(base_url), relative);
    }
    let relative = relative.strip_prefix("./").unwrap_or(relative);
    format!("{}{}", base_url, relative)
}

fn url_origin(url: &str) -> &str {
    match url.find("://") {
        Some(index) => {
            let after = index + 3;
            match url[after..].find('/') {
                Some(slash) => &url[..after + slash],
                None => url,
            }
        }
        None => "",
    }
}

/// Resolve a `./` or `../` specifier against the address of its parent.
pub fn resolve_relative(parent_address: &str, specifier: &str) -> String {
    let origin = url_origin(parent_address);
    let parent_path = &parent_address[origin.len()..];
    let parent_dir = match parent_path.rfind('/') {
        Some(index) => &parent_path[..=index],
        None => "/",
    };

    let joined = format!("{}{}", parent_dir, specifier);
    let mut cleaned = Path::new(&joined).clean().to_string_lossy().into_owned();
    if specifier.ends_with('/') && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    format!("{}{}", origin, cleaned)
}

/// Convert a `file:` URL to a file system path.
pub fn file_url_to_path(address: &str) -> Option<PathBuf> {
    address.strip_prefix("file://").map(PathBuf::from)
}

/// Convert an absolute file system path to a `file:` URL.
pub fn path_to_file_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}
