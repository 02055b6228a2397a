//! Set operations over resolved trees.

use crate::tree::ResolvedTree;

/// Key-wise union. On collision the right-hand entry wins, so later operands
/// of an expression take precedence.
pub fn add(left: &ResolvedTree, right: &ResolvedTree) -> ResolvedTree {
    let mut result = left.clone();
    result.extend(
        right
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone())),
    );
    result
}

/// Entries of `left` whose name is absent from `right`.
pub fn subtract(left: &ResolvedTree, right: &ResolvedTree) -> ResolvedTree {
    left.iter()
        .filter(|(name, _)| !right.contains(name))
        .map(|(name, entry)| (name.clone(), entry.clone()))
        .collect()
}

/// Entries of `left` whose name is also in `right`.
pub fn intersect(left: &ResolvedTree, right: &ResolvedTree) -> ResolvedTree {
    left.iter()
        .filter(|(name, _)| right.contains(name))
        .map(|(name, entry)| (name.clone(), entry.clone()))
        .collect()
}
