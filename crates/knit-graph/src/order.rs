//! Tree traversal and compile order.
//!
//! [`order`] linearizes a resolved tree so every module comes after the
//! modules it depends on. Ties are broken the same way on every run: explicit
//! entry points in the order given, then structural roots by name, then
//! anything only reachable through a rootless cycle, by name. Children are
//! visited in declaration order.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GraphError, Result};
use crate::record::TreeEntry;
use crate::tree::ResolvedTree;

/// What a traversal does after entering a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Descend into the node's dependencies.
    Continue,
    /// Do not descend; the node still completes.
    SkipChildren,
    /// Stop the whole traversal.
    Abort,
}

/// Callbacks for [`traverse`].
pub trait TreeVisitor {
    /// Called once per node, the first time it is reached.
    fn enter(&mut self, name: &str, parent: Option<&str>) -> Visit;

    /// Called once all of the node's dependencies have completed.
    fn leave(&mut self, _name: &str) {}
}

struct Frame<'a> {
    name: &'a str,
    children: Vec<&'a str>,
    next: usize,
}

/// Depth-first traversal from `roots` in order.
///
/// Every node is entered at most once; reaching a node that was already
/// entered (including one still on the stack) does nothing. Roots missing from
/// the tree are ignored. Returns `false` if the visitor aborted.
pub fn traverse<S: AsRef<str>>(
    tree: &ResolvedTree,
    roots: &[S],
    visitor: &mut dyn TreeVisitor,
) -> bool {
    let mut visited: FxHashSet<&str> = FxHashSet::default();

    for root in roots {
        let Some(root) = tree.key(root.as_ref()) else {
            continue;
        };
        if !visited.insert(root) {
            continue;
        }

        let mut stack: Vec<Frame<'_>> = Vec::new();
        match visitor.enter(root, None) {
            Visit::Abort => return false,
            Visit::SkipChildren => {
                visitor.leave(root);
                continue;
            }
            Visit::Continue => stack.push(Frame {
                name: root,
                children: tree.edges(root),
                next: 0,
            }),
        }

        while let Some(frame) = stack.last_mut() {
            let Some(&child) = frame.children.get(frame.next) else {
                let name = frame.name;
                stack.pop();
                visitor.leave(name);
                continue;
            };
            frame.next += 1;
            let parent = frame.name;

            if !visited.insert(child) {
                continue;
            }
            match visitor.enter(child, Some(parent)) {
                Visit::Abort => return false,
                Visit::SkipChildren => visitor.leave(child),
                Visit::Continue => stack.push(Frame {
                    name: child,
                    children: tree.edges(child),
                    next: 0,
                }),
            }
        }
    }

    true
}

/// Compile order of a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOrder {
    /// Present modules, dependencies first.
    pub modules: Vec<String>,
    /// Explicit entry points followed by the structural roots.
    pub entry_points: Vec<String>,
}

struct PostOrder<'a> {
    tree: &'a ResolvedTree,
    modules: Vec<String>,
}

impl TreeVisitor for PostOrder<'_> {
    fn enter(&mut self, _name: &str, _parent: Option<&str>) -> Visit {
        Visit::Continue
    }

    fn leave(&mut self, name: &str) {
        if matches!(self.tree.get(name), Some(TreeEntry::Present(_))) {
            self.modules.push(name.to_string());
        }
    }
}

/// Order `tree` for compilation.
///
/// `explicit` entries are always entry points. An explicit entry known only
/// as a prebuilt bundle member is an error; one that is missing or excluded
/// is skipped.
pub fn order<S: AsRef<str>>(tree: &ResolvedTree, explicit: &[S]) -> Result<CompileOrder> {
    let mut entry_points: Vec<String> = Vec::new();
    for name in explicit {
        let name = name.as_ref();
        match tree.get(name) {
            Some(TreeEntry::Present(_)) => {
                if !entry_points.iter().any(|entry| entry == name) {
                    entry_points.push(name.to_string());
                }
            }
            Some(TreeEntry::SatisfiedElsewhere) => {
                return Err(GraphError::BundleMembership {
                    name: name.to_string(),
                });
            }
            Some(TreeEntry::Excluded) | None => {
                warn!(entry = name, "entry point is not part of the tree, skipping");
            }
        }
    }

    let mut has_incoming: FxHashSet<&str> = FxHashSet::default();
    for name in tree.names() {
        has_incoming.extend(tree.edges(name));
    }

    let explicit_count = entry_points.len();
    for (name, entry) in tree.iter() {
        if entry.is_present()
            && !has_incoming.contains(name.as_str())
            && !entry_points[..explicit_count].contains(name)
        {
            entry_points.push(name.clone());
        }
    }

    // Remaining present nodes sit on rootless cycles.
    let roots: Vec<&str> = entry_points
        .iter()
        .map(String::as_str)
        .chain(
            tree.iter()
                .filter(|(_, entry)| entry.is_present())
                .map(|(name, _)| name.as_str()),
        )
        .collect();

    let mut visitor = PostOrder {
        tree,
        modules: Vec::with_capacity(tree.len()),
    };
    traverse(tree, &roots, &mut visitor);

    Ok(CompileOrder {
        modules: visitor.modules,
        entry_points,
    })
}
