//! Resolved trees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::order::{TreeVisitor, Visit, traverse};
use crate::record::{LoadRecord, TreeEntry};

/// A fully expanded dependency graph: canonical name → entry, iterated in
/// name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedTree {
    entries: BTreeMap<String, TreeEntry>,
}

impl ResolvedTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TreeEntry) -> Option<TreeEntry> {
        self.entries.insert(name.into(), entry)
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TreeEntry> {
        self.entries.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    /// The tree's own copy of `name`.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.entries.get_key_value(name).map(|(key, _)| key.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TreeEntry)> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Present records only.
    pub fn records(&self) -> impl Iterator<Item = &LoadRecord> {
        self.entries.values().filter_map(TreeEntry::record)
    }

    /// Outgoing edges of `name` that stay inside this tree.
    ///
    /// Ordinary records yield their runtime plugin then `deps` in declaration
    /// order. Conditional records yield their condition modules then every
    /// branch and the fallback. Sentinel entries have no edges.
    pub fn edges(&self, name: &str) -> Vec<&str> {
        let Some(record) = self.entries.get(name).and_then(TreeEntry::record) else {
            return Vec::new();
        };
        let targets = match &record.conditional {
            Some(conditional) => conditional.all_targets(),
            None => record.dependencies(true),
        };
        targets
            .into_iter()
            .filter(|target| self.entries.contains_key(*target))
            .collect()
    }

    /// Whether `from` transitively depends on `to`.
    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        struct Finder<'a> {
            tree: &'a ResolvedTree,
            target: &'a str,
            found: bool,
        }

        impl TreeVisitor for Finder<'_> {
            fn enter(&mut self, name: &str, _parent: Option<&str>) -> Visit {
                if self.tree.edges(name).contains(&self.target) {
                    self.found = true;
                    return Visit::Abort;
                }
                Visit::Continue
            }
        }

        let mut finder = Finder {
            tree: self,
            target: to,
            found: false,
        };
        traverse(self, &[from], &mut finder);
        finder.found
    }

    /// The records for `names`, in order.
    ///
    /// Modules only satisfied by a prebuilt bundle cannot be compiled; excluded
    /// and missing names are skipped.
    pub fn compile_records<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&LoadRecord>> {
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            match self.entries.get(name.as_ref()) {
                Some(TreeEntry::Present(record)) => records.push(record),
                Some(TreeEntry::SatisfiedElsewhere) => {
                    return Err(GraphError::BundleMembership {
                        name: name.as_ref().to_string(),
                    });
                }
                Some(TreeEntry::Excluded) | None => {}
            }
        }
        Ok(records)
    }
}

impl FromIterator<(String, TreeEntry)> for ResolvedTree {
    fn from_iter<I: IntoIterator<Item = (String, TreeEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ResolvedTree {
    type Item = (String, TreeEntry);
    type IntoIter = std::collections::btree_map::IntoIter<String, TreeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Extend<(String, TreeEntry)> for ResolvedTree {
    fn extend<I: IntoIterator<Item = (String, TreeEntry)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}
