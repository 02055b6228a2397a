//! Error types for graph-level operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A normalized name matches no path rule and is an absolute URL.
    #[error(
        "Unable to calculate canonical name to bundle {name}. Ensure that this module sits within the baseURL or a wildcard path config."
    )]
    Canonicalization { name: String },

    /// A conditional cannot be resolved consistently under an environment.
    #[error("Conditional inconsistency: {0}")]
    ConditionalInconsistency(String),

    /// Malformed bundle expression or invalid tree operation.
    #[error("Tree algebra error: {0}")]
    Algebra(String),

    /// A module only known as a member of a prebuilt bundle was asked to compile.
    #[error("{name} is only provided by a prebuilt bundle and cannot be compiled")]
    BundleMembership { name: String },

    /// The external compiler rejected a module.
    #[error("Unable to compile {name}: {message}")]
    Compile { name: String, message: String },
}
