//! # knit-graph
//!
//! Pure data structures and algorithms of the knit trace engine. Nothing in
//! this crate performs I/O; loading lives in `knit-trace`.
//!
//! - [`Canonicalizer`]: normalized addresses ↔ canonical names
//! - [`LoadRecord`] / [`TreeEntry`] / [`ResolvedTree`]: the graph model
//! - [`conditional`]: resolving conditional records under an environment
//! - [`algebra`]: `add`, `subtract`, `intersect`
//! - [`order`]: deterministic compile order and tree traversal
//! - [`link`]: the compiler interface
//!
//! ```
//! use knit_graph::{LoadRecord, ResolvedTree, TreeEntry, order};
//!
//! let mut tree = ResolvedTree::new();
//! tree.insert(
//!     "first",
//!     TreeEntry::Present(LoadRecord::builder("first").dep("./second", "second").build()),
//! );
//! tree.insert("second", TreeEntry::Present(LoadRecord::builder("second").build()));
//!
//! let compile = order(&tree, &["first"]).unwrap();
//! assert_eq!(compile.modules, vec!["second", "first"]);
//! ```

pub mod algebra;
pub mod canonical;
pub mod conditional;
pub mod error;
pub mod link;
pub mod order;
pub mod paths;
pub mod record;
pub mod tree;

pub use algebra::{add, intersect, subtract};
pub use canonical::{
    Canonicalizer, EMPTY_MODULE, SYSTEM_ENV_MODULE, SYSTEM_MODULES, is_system_module,
    split_interpolation,
};
pub use conditional::{
    ConditionVariations, ConditionalEnv, condition_module, conditional_dependencies,
    conditional_variations, expand_condition_key, inline_conditionals, negate, resolve_branches,
};
pub use error::{GraphError, Result};
pub use link::{CompileOptions, CompiledModule, Compiler, LinkedBundle, link};
pub use order::{CompileOrder, TreeVisitor, Visit, order, traverse};
pub use record::{Conditional, EnvBranch, LoadRecord, LoadRecordBuilder, ModuleFormat, TreeEntry};
pub use tree::ResolvedTree;

pub use knit_config::ConditionValue;
