//! Models, processors and the generic layers built from them.
//!
//! A [`Model`] owns learned parameters and structural configuration and never
//! holds per-request state. For each evaluation the caller opens a
//! [`Context`] over a fresh [`Graph`] and asks the root model for a
//! [`Processor`]. Composite models recursively instantiate their children with
//! the same context, so the processor tree mirrors the model tree and writes
//! into a single graph.
//!
//! ```text
//! Stack ─────────────► StackProcessor
//!  ├─ Linear           ├─ LinearProcessor      ┐
//!  ├─ Activation  ──►  ├─ ActivationProcessor  ├─ all bound to one Graph + Mode
//!  └─ Linear           └─ LinearProcessor      ┘
//! ```
//!
//! Processors borrow both the model and the graph, so a processor can never
//! outlive the graph it writes into or be moved to another graph.

pub mod activation;
pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod init;
pub mod layer;
pub mod layer_norm;
pub mod linear;
pub mod stack;
pub mod transformer;

#[cfg(test)]
mod tests;

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

pub use activation::{Activation, ActivationKind, ActivationProcessor};
pub use attention::{MultiHeadAttention, MultiHeadAttentionProcessor};
pub use dropout::{Dropout, DropoutProcessor};
pub use embedding::{Embedding, EmbeddingProcessor, TokenIndex};
pub use layer::{Layer, LayerProcessor, WordsEncoder};
pub use layer_norm::{LayerNorm, LayerNormProcessor};
pub use linear::{Linear, LinearProcessor};
pub use stack::{Stack, StackProcessor};
pub use transformer::{TransformerBlock, TransformerBlockConfig, TransformerBlockProcessor};

/// Execution mode of a processor tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Training,
    #[default]
    Inference,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Training => write!(f, "training"),
            Mode::Inference => write!(f, "inference"),
        }
    }
}

/// The graph and mode a processor tree is instantiated with.
#[derive(Clone, Copy)]
pub struct Context<'g> {
    pub graph: &'g Graph,
    pub mode: Mode,
}

impl<'g> Context<'g> {
    pub fn new(graph: &'g Graph, mode: Mode) -> Self {
        Self { graph, mode }
    }

    pub fn inference(graph: &'g Graph) -> Self {
        Self::new(graph, Mode::Inference)
    }

    pub fn training(graph: &'g Graph) -> Self {
        Self::new(graph, Mode::Training)
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("graph", &self.graph.id())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Persistent, parameter-owning description of a layer or composite structure.
pub trait Model: Send + Sync {
    type Processor<'g>: Processor<'g>
    where
        Self: 'g;

    /// Instantiates the processor tree for one graph and mode.
    ///
    /// Composite models pass the same `ctx` to every child. A child that does
    /// not provide a capability the parent depends on yields a [`ConfigError`].
    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError>;

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()>;

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()>;
}

/// A model bound to one graph and one mode.
pub trait Processor<'g> {
    fn graph(&self) -> &'g Graph;

    fn mode(&self) -> Mode;

    /// Updates the mode of this processor and every child. Nodes that already
    /// exist are not affected.
    fn set_mode(&mut self, mode: Mode);

    /// Applies the layer to `xs`, appending the resulting nodes to the graph.
    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>>;
}

/// State every processor carries: its model, its graph and its mode.
pub struct BaseProcessor<'g, M> {
    pub model: &'g M,
    pub graph: &'g Graph,
    pub mode: Mode,
}

impl<'g, M> BaseProcessor<'g, M> {
    pub fn new(model: &'g M, ctx: Context<'g>) -> Self {
        Self {
            model,
            graph: ctx.graph,
            mode: ctx.mode,
        }
    }

    /// A context over the same graph and mode, for instantiating children.
    pub fn context(&self) -> Context<'g> {
        Context::new(self.graph, self.mode)
    }
}

impl<M> Clone for BaseProcessor<'_, M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model,
            graph: self.graph,
            mode: self.mode,
        }
    }
}
