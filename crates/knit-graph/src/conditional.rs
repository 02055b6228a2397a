//! Conditional resolution.
//!
//! Conditional records depend on a different module depending on the build
//! environment. A [`ConditionalEnv`] pins some condition keys
//! (`<module>|<export>`, `~`-prefixed for the negation); keys it does not pin
//! follow the `trace_all` default: include everything when tracing all
//! variations, nothing when committing to a concrete build.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use knit_config::ConditionValue;

use crate::canonical::{Canonicalizer, EMPTY_MODULE, SYSTEM_ENV_MODULE};
use crate::error::{GraphError, Result};
use crate::record::{Conditional, LoadRecord, ModuleFormat, TreeEntry};
use crate::tree::ResolvedTree;

/// Module half of a condition: `~mod|export` → `mod`.
pub fn condition_module(condition: &str) -> &str {
    let condition = condition.strip_prefix('~').unwrap_or(condition);
    condition.split_once('|').map_or(condition, |(module, _)| module)
}

/// Toggle the `~` prefix of a condition key.
pub fn negate(condition: &str) -> String {
    match condition.strip_prefix('~') {
        Some(positive) => positive.to_string(),
        None => format!("~{}", condition),
    }
}

/// Expand shorthand keys: `browser` → `@system-env|browser`.
pub fn expand_condition_key(key: &str) -> String {
    let (negate, condition) = match key.strip_prefix('~') {
        Some(rest) => ("~", rest),
        None => ("", key),
    };
    if condition.contains('|') {
        key.to_string()
    } else {
        format!("{}{}|{}", negate, SYSTEM_ENV_MODULE, condition)
    }
}

/// Condition key → resolution value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalEnv {
    entries: IndexMap<String, ConditionValue>,
}

impl ConditionalEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a canonical environment from user supplied keys.
    ///
    /// Shorthand keys are expanded, every key's module is canonicalized and
    /// each boolean entry gets its negation derived. A key and its negation
    /// holding the same boolean is a contradiction.
    pub fn canonicalize(
        raw: &IndexMap<String, ConditionValue>,
        canonicalizer: &Canonicalizer,
    ) -> Result<Self> {
        let mut entries: IndexMap<String, ConditionValue> = IndexMap::new();
        for (key, value) in raw {
            let key = canonicalizer.canonicalize_condition(&expand_condition_key(key))?;
            if let Some(existing) = entries.get(&key) {
                if existing != value {
                    return Err(GraphError::ConditionalInconsistency(format!(
                        "condition {} is given conflicting values",
                        key
                    )));
                }
            }
            entries.insert(key, value.clone());
        }

        let env = Self { entries };
        env.validate()?;

        let mut derived = env.entries.clone();
        for (key, value) in &env.entries {
            if let ConditionValue::Bool(value) = value {
                derived
                    .entry(negate(key))
                    .or_insert(ConditionValue::Bool(!value));
            }
        }
        Ok(Self { entries: derived })
    }

    /// Reject environments holding the same boolean for a key and its negation.
    ///
    /// An explicit pair with opposite values agrees and is accepted; every
    /// canonicalized environment holds such pairs for its derived negations.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.entries {
            if key.starts_with('~') {
                continue;
            }
            let (ConditionValue::Bool(positive), Some(ConditionValue::Bool(negative))) =
                (value, self.entries.get(&negate(key)))
            else {
                continue;
            };
            if positive == negative {
                return Err(GraphError::ConditionalInconsistency(format!(
                    "condition {} and its negation are both {}",
                    key, positive
                )));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConditionValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConditionValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConditionValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the condition key resolves truthy.
    ///
    /// An explicit entry decides; a non-empty label list counts as included.
    /// Without one, a boolean entry for the opposite key decides. Otherwise
    /// `trace_all` does.
    pub fn includes(&self, key: &str, trace_all: bool) -> bool {
        match self.entries.get(key) {
            Some(ConditionValue::Bool(value)) => *value,
            Some(ConditionValue::List(labels)) => !labels.is_empty(),
            None => match self.entries.get(&negate(key)) {
                Some(ConditionValue::Bool(value)) => !value,
                _ => trace_all,
            },
        }
    }
}

impl From<IndexMap<String, ConditionValue>> for ConditionalEnv {
    fn from(entries: IndexMap<String, ConditionValue>) -> Self {
        Self { entries }
    }
}

impl<K: Into<String>, V: Into<ConditionValue>> FromIterator<(K, V)> for ConditionalEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// The branches a conditional resolves to.
pub fn resolve_branches(
    conditional: &Conditional,
    env: &ConditionalEnv,
    trace_all: bool,
) -> Vec<String> {
    match conditional {
        Conditional::Boolean { condition, branch } => {
            if env.includes(condition, trace_all) {
                vec![branch.clone()]
            } else {
                vec![EMPTY_MODULE.to_string()]
            }
        }
        Conditional::Environment { envs, fallback } => {
            let mut branches = Vec::new();
            let mut include_fallback = true;
            for entry in envs {
                if env.includes(&entry.condition, trace_all) {
                    push_unique(&mut branches, &entry.branch);
                }
                if !env.includes(&negate(&entry.condition), trace_all) {
                    include_fallback = false;
                }
            }
            if include_fallback {
                if let Some(fallback) = fallback {
                    push_unique(&mut branches, fallback);
                }
            }
            branches
        }
        Conditional::Interpolation {
            condition,
            branches,
        } => {
            let include_all = match env.get(condition) {
                Some(ConditionValue::List(labels)) => {
                    return branches
                        .iter()
                        .filter(|(label, _)| labels.contains(*label))
                        .map(|(_, name)| name.clone())
                        .collect();
                }
                Some(ConditionValue::Bool(value)) => *value,
                None => trace_all,
            };
            if include_all {
                branches.values().cloned().collect()
            } else {
                Vec::new()
            }
        }
    }
}

/// Everything a conditional record contributes to a trace: its condition
/// modules, then the resolved branches unless only conditions are traced.
pub fn conditional_dependencies(
    conditional: &Conditional,
    env: &ConditionalEnv,
    trace_all: bool,
    conditions_only: bool,
) -> Vec<String> {
    let mut deps = Vec::new();
    match conditional {
        Conditional::Boolean { condition, .. } | Conditional::Interpolation { condition, .. } => {
            push_unique(&mut deps, condition_module(condition));
        }
        Conditional::Environment { envs, .. } => {
            for entry in envs {
                push_unique(&mut deps, condition_module(&entry.condition));
            }
        }
    }
    if !conditions_only {
        for branch in resolve_branches(conditional, env, trace_all) {
            push_unique(&mut deps, &branch);
        }
    }
    deps
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// Possible values of one condition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionVariations {
    /// `true` / `false`.
    Boolean,
    /// One of the interpolation labels.
    Labels(Vec<String>),
}

/// The condition keys a tree is sensitive to, with their possible values.
pub fn conditional_variations(tree: &ResolvedTree) -> BTreeMap<String, ConditionVariations> {
    fn add_boolean(key: &str, variations: &mut BTreeMap<String, ConditionVariations>) {
        let key = key.strip_prefix('~').unwrap_or(key).to_string();
        variations.entry(key).or_insert(ConditionVariations::Boolean);
    }

    let mut variations: BTreeMap<String, ConditionVariations> = BTreeMap::new();

    for (_, entry) in tree.iter() {
        let Some(conditional) = entry.record().and_then(|record| record.conditional.as_ref())
        else {
            continue;
        };
        match conditional {
            Conditional::Boolean { condition, .. } => add_boolean(condition, &mut variations),
            Conditional::Environment { envs, .. } => {
                for env in envs {
                    add_boolean(&env.condition, &mut variations);
                }
            }
            Conditional::Interpolation {
                condition,
                branches,
            } => {
                let slot = variations
                    .entry(condition.clone())
                    .or_insert_with(|| ConditionVariations::Labels(Vec::new()));
                if let ConditionVariations::Boolean = slot {
                    *slot = ConditionVariations::Labels(Vec::new());
                }
                if let ConditionVariations::Labels(labels) = slot {
                    for label in branches.keys() {
                        if !labels.contains(label) {
                            labels.push(label.clone());
                        }
                    }
                    labels.sort();
                }
            }
        }
    }

    variations
}

/// Replace every conditional record with a `defined` alias of the single
/// branch `env` selects. Unpinned keys resolve as excluded.
///
/// The input tree is left untouched; any conditional resolving to zero or
/// several branches fails the whole operation.
pub fn inline_conditionals(tree: &ResolvedTree, env: &ConditionalEnv) -> Result<ResolvedTree> {
    env.validate()?;

    let mut inlined = tree.clone();
    for (name, entry) in tree.iter() {
        let Some(record) = entry.record() else {
            continue;
        };
        let Some(conditional) = record.conditional.as_ref() else {
            continue;
        };

        let branches = resolve_branches(conditional, env, false);
        let [branch] = branches.as_slice() else {
            return Err(GraphError::ConditionalInconsistency(format!(
                "{} resolves to {} branches under the given environment, expected exactly one",
                name,
                branches.len()
            )));
        };

        let alias = LoadRecord::builder(name.clone())
            .format(ModuleFormat::Defined)
            .dep(branch.clone(), branch.clone())
            .config_hash(record.config_hash.clone())
            .build();
        inlined.insert(name.clone(), TreeEntry::Present(alias));
    }

    Ok(inlined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EnvBranch;
    use knit_config::LoaderConfig;

    fn boolean() -> Conditional {
        Conditional::Boolean {
            condition: "env|browser".to_string(),
            branch: "browser-impl".to_string(),
        }
    }

    fn environment() -> Conditional {
        Conditional::Environment {
            envs: vec![
                EnvBranch {
                    condition: "@system-env|browser".to_string(),
                    branch: "pkg/fs-browser.js".to_string(),
                },
                EnvBranch {
                    condition: "@system-env|electron".to_string(),
                    branch: "pkg/fs-electron.js".to_string(),
                },
            ],
            fallback: Some("pkg/fs.js".to_string()),
        }
    }

    fn interpolation() -> Conditional {
        Conditional::Interpolation {
            condition: "app/env.js|lang".to_string(),
            branches: BTreeMap::from([
                ("de".to_string(), "app/locale-de.js".to_string()),
                ("en".to_string(), "app/locale-en.js".to_string()),
                ("fr".to_string(), "app/locale-fr.js".to_string()),
            ]),
        }
    }

    #[test]
    fn test_boolean_inclusion() {
        let env: ConditionalEnv = [("env|browser", true)].into_iter().collect();
        assert_eq!(resolve_branches(&boolean(), &env, true), vec!["browser-impl"]);

        let env: ConditionalEnv = [("env|browser", false)].into_iter().collect();
        assert_eq!(resolve_branches(&boolean(), &env, true), vec!["@empty"]);
    }

    #[test]
    fn test_boolean_default_follows_trace_all() {
        let env = ConditionalEnv::new();
        assert_eq!(resolve_branches(&boolean(), &env, true), vec!["browser-impl"]);
        assert_eq!(resolve_branches(&boolean(), &env, false), vec!["@empty"]);
    }

    #[test]
    fn test_negated_boolean_derives_from_positive() {
        let conditional = Conditional::Boolean {
            condition: "~env|browser".to_string(),
            branch: "node-impl".to_string(),
        };
        let env: ConditionalEnv = [("env|browser", true)].into_iter().collect();
        assert_eq!(resolve_branches(&conditional, &env, true), vec!["@empty"]);
    }

    #[test]
    fn test_environment_map_untargeted_includes_everything() {
        let env = ConditionalEnv::new();
        assert_eq!(
            resolve_branches(&environment(), &env, true),
            vec!["pkg/fs-browser.js", "pkg/fs-electron.js", "pkg/fs.js"]
        );
    }

    #[test]
    fn test_environment_map_pinned_branch_drops_fallback() {
        let env: ConditionalEnv = [("@system-env|browser", true)].into_iter().collect();
        // electron is unpinned and traced; browser's negation is false
        assert_eq!(
            resolve_branches(&environment(), &env, true),
            vec!["pkg/fs-browser.js", "pkg/fs-electron.js"]
        );
    }

    #[test]
    fn test_environment_map_falls_back_when_all_excluded() {
        let env: ConditionalEnv = [
            ("@system-env|browser", false),
            ("@system-env|electron", false),
        ]
        .into_iter()
        .collect();
        assert_eq!(resolve_branches(&environment(), &env, true), vec!["pkg/fs.js"]);
    }

    #[test]
    fn test_environment_map_partial_exclusion_keeps_fallback() {
        let env: ConditionalEnv = [("@system-env|browser", false)].into_iter().collect();
        assert_eq!(
            resolve_branches(&environment(), &env, true),
            vec!["pkg/fs-electron.js", "pkg/fs.js"]
        );
        // without trace-all, unpinned negations are excluded and so is the fallback
        assert!(resolve_branches(&environment(), &env, false).is_empty());
    }

    #[test]
    fn test_interpolation_labels() {
        let mut env = ConditionalEnv::new();
        env.insert("app/env.js|lang", ["en", "fr", "es"]);
        assert_eq!(
            resolve_branches(&interpolation(), &env, false),
            vec!["app/locale-en.js", "app/locale-fr.js"]
        );

        let env: ConditionalEnv = [("app/env.js|lang", true)].into_iter().collect();
        assert_eq!(resolve_branches(&interpolation(), &env, false).len(), 3);

        let env: ConditionalEnv = [("app/env.js|lang", false)].into_iter().collect();
        assert!(resolve_branches(&interpolation(), &env, true).is_empty());

        assert_eq!(
            resolve_branches(&interpolation(), &ConditionalEnv::new(), true).len(),
            3
        );
    }

    #[test]
    fn test_dependencies_include_condition_module() {
        let env: ConditionalEnv = [("env|browser", true)].into_iter().collect();
        assert_eq!(
            conditional_dependencies(&boolean(), &env, true, false),
            vec!["env", "browser-impl"]
        );
        assert_eq!(conditional_dependencies(&boolean(), &env, true, true), vec!["env"]);
        assert_eq!(
            conditional_dependencies(&environment(), &ConditionalEnv::new(), true, true),
            vec!["@system-env"]
        );
    }

    #[test]
    fn test_canonicalize_env() {
        let canonicalizer = Canonicalizer::new(&LoaderConfig::new("file:///project/"));
        let raw: IndexMap<String, ConditionValue> = IndexMap::from([
            ("browser".to_string(), ConditionValue::Bool(true)),
            (
                "file:///project/app/env.js|lang".to_string(),
                ConditionValue::from(["en"]),
            ),
        ]);

        let env = ConditionalEnv::canonicalize(&raw, &canonicalizer).unwrap();

        assert_eq!(
            env.get("@system-env|browser"),
            Some(&ConditionValue::Bool(true))
        );
        assert_eq!(
            env.get("~@system-env|browser"),
            Some(&ConditionValue::Bool(false))
        );
        assert_eq!(env.get("app/env.js|lang"), Some(&ConditionValue::from(["en"])));
    }

    #[test]
    fn test_contradictory_env_is_rejected() {
        let canonicalizer = Canonicalizer::new(&LoaderConfig::new("file:///project/"));
        let raw: IndexMap<String, ConditionValue> = IndexMap::from([
            ("browser".to_string(), ConditionValue::Bool(true)),
            ("~browser".to_string(), ConditionValue::Bool(true)),
        ]);

        assert!(matches!(
            ConditionalEnv::canonicalize(&raw, &canonicalizer),
            Err(GraphError::ConditionalInconsistency(_))
        ));

        let consistent: IndexMap<String, ConditionValue> = IndexMap::from([
            ("browser".to_string(), ConditionValue::Bool(true)),
            ("~browser".to_string(), ConditionValue::Bool(false)),
        ]);
        assert!(ConditionalEnv::canonicalize(&consistent, &canonicalizer).is_ok());
    }

    #[test]
    fn test_agreeing_negation_pair_is_accepted() {
        let mut env = ConditionalEnv::new();
        env.insert("env|browser", true);
        env.insert("~env|browser", false);
        assert!(env.validate().is_ok());
        assert!(env.includes("env|browser", false));
        assert!(!env.includes("~env|browser", true));

        env.insert("~env|browser", true);
        assert!(matches!(
            env.validate(),
            Err(GraphError::ConditionalInconsistency(_))
        ));
    }

    #[test]
    fn test_derived_negations_validate() {
        let canonicalizer = Canonicalizer::new(&LoaderConfig::new("file:///project/"));
        let raw: IndexMap<String, ConditionValue> =
            IndexMap::from([("browser".to_string(), ConditionValue::Bool(true))]);

        let env = ConditionalEnv::canonicalize(&raw, &canonicalizer).unwrap();
        assert_eq!(env.len(), 2);
        assert!(env.validate().is_ok());
    }

    fn conditional_tree() -> ResolvedTree {
        let mut tree = ResolvedTree::new();
        tree.insert(
            "impl#?env|browser",
            TreeEntry::Present(LoadRecord::conditional("impl#?env|browser", boolean(), "h")),
        );
        tree.insert(
            "app/locale-#{app/env.js|lang}.js",
            TreeEntry::Present(LoadRecord::conditional(
                "app/locale-#{app/env.js|lang}.js",
                interpolation(),
                "h",
            )),
        );
        tree.insert(
            "browser-impl",
            TreeEntry::Present(LoadRecord::builder("browser-impl").source("").build()),
        );
        tree
    }

    #[test]
    fn test_conditional_variations() {
        let variations = conditional_variations(&conditional_tree());

        assert_eq!(variations["env|browser"], ConditionVariations::Boolean);
        assert_eq!(
            variations["app/env.js|lang"],
            ConditionVariations::Labels(vec!["de".into(), "en".into(), "fr".into()])
        );
        assert_eq!(variations.len(), 2);
    }

    #[test]
    fn test_inline_conditionals() {
        let tree = conditional_tree();
        let mut env: ConditionalEnv = [("env|browser", true)].into_iter().collect();
        env.insert("app/env.js|lang", ["de"]);

        let inlined = inline_conditionals(&tree, &env).unwrap();

        let alias = inlined.get("impl#?env|browser").and_then(TreeEntry::record).unwrap();
        assert_eq!(alias.format, Some(ModuleFormat::Defined));
        assert!(!alias.is_conditional());
        assert_eq!(alias.dependencies(false), vec!["browser-impl"]);
        let locale = inlined
            .get("app/locale-#{app/env.js|lang}.js")
            .and_then(TreeEntry::record)
            .unwrap();
        assert_eq!(locale.dependencies(false), vec!["app/locale-de.js"]);

        // the input tree is untouched
        assert!(tree.get("impl#?env|browser").unwrap().record().unwrap().is_conditional());
    }

    #[test]
    fn test_inline_requires_single_branch() {
        let tree = conditional_tree();
        let mut env: ConditionalEnv = [("env|browser", true)].into_iter().collect();
        env.insert("app/env.js|lang", ["de", "en"]);

        assert!(matches!(
            inline_conditionals(&tree, &env),
            Err(GraphError::ConditionalInconsistency(_))
        ));

        // no label pinned: zero branches
        let env: ConditionalEnv = [("env|browser", true)].into_iter().collect();
        assert!(inline_conditionals(&tree, &env).is_err());
    }
}
