//! Error types for graph operators and processor construction.

use thiserror::Error;

/// Precondition violations raised by [`crate::graph::Graph`] operators.
///
/// Every operator validates its operands before appending a node, so a failed
/// call leaves the graph exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("`{op}`: shape mismatch, {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("`{op}`: expected a rank-{expected} operand, got shape {shape:?}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        shape: Vec<usize>,
    },

    #[error("`{op}` requires at least one operand")]
    EmptyOperandList { op: &'static str },

    #[error("`{op}`: index {index} is out of bounds for length {len}")]
    IndexOutOfBounds {
        op: &'static str,
        index: usize,
        len: usize,
    },

    #[error("node {node} belongs to graph {node_graph}, not to graph {graph}")]
    ForeignNode {
        node: usize,
        node_graph: u64,
        graph: u64,
    },
}

/// Result type of graph operators.
pub type GraphResult<T> = Result<T, GraphError>;

/// Structural errors detected while instantiating a processor tree.
///
/// These signal a malformed model composition. They are returned instead of
/// aborting so the caller's bootstrap decides whether to stop the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{model}: sub-model at index {index} does not provide the `{capability}` capability")]
    MissingCapability {
        model: &'static str,
        index: usize,
        capability: &'static str,
    },

    #[error("{model}: {reason}")]
    InvalidStructure { model: &'static str, reason: String },
}
