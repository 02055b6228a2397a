//! Canonical names.
//!
//! A canonical name is the configuration-relative identity of a module and the
//! only node key used by the trace cache and resolved trees. The
//! [`Canonicalizer`] maps normalized addresses onto canonical names and back.
//!
//! Four syntax layers are recognised, outermost first:
//!
//! | Syntax | Example |
//! |--------|---------|
//! | boolean conditional | `impl.js#?env.js\|browser` |
//! | plugin | `style.css!css` (or `css!style.css` in plugin-first mode) |
//! | package environment | `npm:pkg@1.0.0/#:./fs.js` |
//! | interpolation | `locale-#{env.js\|lang}.js` |

use knit_config::{LoaderConfig, PackageConfig};

use crate::error::{GraphError, Result};
use crate::paths::{PathRules, is_absolute_url};

/// Modules always provided by the runtime. They take part in tracing but are
/// never part of a resolved tree.
pub const SYSTEM_MODULES: [&str; 6] = [
    "@empty",
    "@system-env",
    "@@cjs-helpers",
    "@@global-helpers",
    "@@amd-helpers",
    "@@esm-helpers",
];

/// The universal empty module a false boolean conditional resolves to.
pub const EMPTY_MODULE: &str = "@empty";

/// Module whose exports hold the environment flags (`browser`, `node`, ...).
pub const SYSTEM_ENV_MODULE: &str = "@system-env";

pub fn is_system_module(name: &str) -> bool {
    SYSTEM_MODULES.contains(&name)
}

/// Maps between normalized addresses and canonical names for one
/// configuration snapshot.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    rules: PathRules,
    /// Packages by canonical root with their resolved address, longest address first.
    packages: Vec<(String, String, PackageConfig)>,
    plugin_first: bool,
    default_extension: Option<String>,
}

impl Canonicalizer {
    pub fn new(config: &LoaderConfig) -> Self {
        let rules = PathRules::new(config.base_url.clone(), &config.paths);
        let mut packages: Vec<(String, String, PackageConfig)> = config
            .packages
            .iter()
            .map(|(root, package)| (root.clone(), rules.apply(root), package.clone()))
            .collect();
        packages.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        Self {
            rules,
            packages,
            plugin_first: config.plugin_first,
            default_extension: config.default_extension.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.rules.base_url()
    }

    pub fn default_extension(&self) -> Option<&str> {
        self.default_extension.as_deref()
    }

    pub fn plugin_first(&self) -> bool {
        self.plugin_first
    }

    /// Canonicalize a normalized name.
    ///
    /// `is_plugin` marks the plugin side of a plugin name; plugin names drop
    /// the default extension (`css.js` → `css`).
    pub fn canonicalize(&self, normalized: &str, is_plugin: bool) -> Result<String> {
        if let Some(index) = normalized.rfind("#?") {
            let module = self.canonicalize(&normalized[..index], is_plugin)?;
            let condition = self.canonicalize_condition(&normalized[index + 2..])?;
            return Ok(format!("{}#?{}", module, condition));
        }

        let plugin_index = if self.plugin_first {
            normalized.find('!')
        } else {
            normalized.rfind('!')
        };
        if let Some(index) = plugin_index {
            let (left, right) = (&normalized[..index], &normalized[index + 1..]);
            return Ok(if self.plugin_first {
                format!(
                    "{}!{}",
                    self.canonicalize(left, true)?,
                    self.canonicalize(right, false)?
                )
            } else {
                format!(
                    "{}!{}",
                    self.canonicalize(left, false)?,
                    self.canonicalize(right, true)?
                )
            });
        }

        if let Some(index) = normalized.find("#:") {
            let package = self.canonicalize(&normalized[..index], false)?;
            return Ok(format!("{}{}", package, &normalized[index..]));
        }

        if let Some((before, condition, after)) = split_interpolation(normalized) {
            let placeholder = format!("{}#{{}}{}", before, after);
            let canonical = self.canonicalize_plain(&placeholder, is_plugin)?;
            let condition = self.canonicalize_condition(condition)?;
            return Ok(canonical.replacen("#{}", &format!("#{{{}}}", condition), 1));
        }

        self.canonicalize_plain(normalized, is_plugin)
    }

    fn canonicalize_plain(&self, normalized: &str, is_plugin: bool) -> Result<String> {
        if is_system_module(normalized) {
            return Ok(normalized.to_string());
        }

        let address = self.strip_base_path(normalized);
        let canonical = match self.rules.reverse(&address) {
            Some(name) => name,
            None if is_absolute_url(&address) => {
                return Err(GraphError::Canonicalization {
                    name: normalized.to_string(),
                });
            }
            None => address,
        };

        if is_plugin {
            if let Some(ext) = self.default_extension.as_deref() {
                if let Some(stripped) = canonical.strip_suffix(ext) {
                    if !stripped.is_empty() {
                        return Ok(stripped.to_string());
                    }
                }
            }
        }
        Ok(canonical)
    }

    /// Drop a package's `base_path` directory from an address inside it.
    fn strip_base_path(&self, normalized: &str) -> String {
        for (_, address, package) in &self.packages {
            let Some(subpath) = normalized
                .strip_prefix(address.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };
            if let Some(base_path) = package.base_path.as_deref() {
                if let Some(rest) = subpath
                    .strip_prefix(base_path)
                    .and_then(|rest| rest.strip_prefix('/'))
                {
                    return format!("{}/{}", address, rest);
                }
            }
            break;
        }
        normalized.to_string()
    }

    /// Canonicalize a condition (`[~]<module>[|<export>]`). The export defaults
    /// to `default`.
    pub fn canonicalize_condition(&self, condition: &str) -> Result<String> {
        let (negate, condition) = match condition.strip_prefix('~') {
            Some(rest) => ("~", rest),
            None => ("", condition),
        };
        let (module, export) = condition.split_once('|').unwrap_or((condition, "default"));
        let module = if is_absolute_url(module) {
            self.canonicalize(module, false)?
        } else {
            self.canonicalize(&self.decanonicalize(module), false)?
        };
        Ok(format!("{}{}|{}", negate, module, export))
    }

    /// Map a canonical name back onto its normalized address.
    pub fn decanonicalize(&self, canonical: &str) -> String {
        if let Some(index) = canonical.rfind("#?") {
            return format!(
                "{}#?{}",
                self.decanonicalize(&canonical[..index]),
                self.decanonicalize_condition(&canonical[index + 2..])
            );
        }

        let plugin_index = if self.plugin_first {
            canonical.find('!')
        } else {
            canonical.rfind('!')
        };
        if let Some(index) = plugin_index {
            let (left, right) = (&canonical[..index], &canonical[index + 1..]);
            return if self.plugin_first {
                format!("{}!{}", self.decanonicalize_plugin(left), self.decanonicalize(right))
            } else {
                format!("{}!{}", self.decanonicalize(left), self.decanonicalize_plugin(right))
            };
        }

        if let Some(index) = canonical.find("#:") {
            return format!(
                "{}{}",
                self.decanonicalize(&canonical[..index]),
                &canonical[index..]
            );
        }

        if let Some((before, condition, after)) = split_interpolation(canonical) {
            let address = self.decanonicalize_plain(&format!("{}#{{}}{}", before, after));
            let condition = self.decanonicalize_condition(condition);
            return address.replacen("#{}", &format!("#{{{}}}", condition), 1);
        }

        self.decanonicalize_plain(canonical)
    }

    fn decanonicalize_plugin(&self, canonical: &str) -> String {
        match self.default_extension.as_deref() {
            Some(ext) if !is_system_module(canonical) && !has_extension(canonical) => {
                self.decanonicalize(&format!("{}{}", canonical, ext))
            }
            _ => self.decanonicalize(canonical),
        }
    }

    fn decanonicalize_condition(&self, condition: &str) -> String {
        let (negate, condition) = match condition.strip_prefix('~') {
            Some(rest) => ("~", rest),
            None => ("", condition),
        };
        match condition.split_once('|') {
            Some((module, export)) => {
                format!("{}{}|{}", negate, self.decanonicalize(module), export)
            }
            None => format!("{}{}", negate, self.decanonicalize(condition)),
        }
    }

    fn decanonicalize_plain(&self, canonical: &str) -> String {
        if is_system_module(canonical) {
            return canonical.to_string();
        }

        for (root, address, package) in &self.packages {
            let Some(rest) = canonical
                .strip_prefix(root.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };
            return match package.base_path.as_deref() {
                Some(base_path) if !rest.is_empty() => {
                    format!("{}/{}/{}", address, base_path, rest)
                }
                _ => format!("{}/{}", address, rest),
            };
        }

        self.rules.apply(canonical)
    }

    /// The package containing a normalized address, as `(canonical root,
    /// address, config)`. The longest package address wins.
    pub fn package_for(&self, normalized: &str) -> Option<(&str, &str, &PackageConfig)> {
        self.packages
            .iter()
            .find(|(_, address, _)| {
                normalized == address
                    || normalized
                        .strip_prefix(address.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .map(|(root, address, package)| (root.as_str(), address.as_str(), package))
    }

    /// Lookup a package by canonical root.
    pub fn package(&self, root: &str) -> Option<&PackageConfig> {
        self.packages
            .iter()
            .find(|(name, _, _)| name == root)
            .map(|(_, _, package)| package)
    }
}

/// Split `a#{cond}b` into `(a, cond, b)`.
pub fn split_interpolation(name: &str) -> Option<(&str, &str, &str)> {
    let start = name.find("#{")?;
    let end = start + name[start..].find('}')?;
    Some((&name[..start], &name[start + 2..end], &name[end + 1..]))
}

fn has_extension(name: &str) -> bool {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.contains('.')
}
