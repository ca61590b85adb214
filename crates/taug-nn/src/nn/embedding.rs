//! Lookup-table word embeddings.

use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

use anyhow::{ensure, Result};
use ndarray::{Array2, ArrayD, IxDyn};

use super::layer::WordsEncoder;
use super::{BaseProcessor, Context, Mode, Model, Processor};
use crate::error::ConfigError;
use crate::graph::{Graph, Node};
use crate::param::{Param, ParamVisitor, ParamVisitorMut};

/// Maps tokens to rows of an embedding table.
pub trait TokenIndex: Send + Sync {
    fn index(&self, word: &str) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: BuildHasher + Send + Sync> TokenIndex for HashMap<String, usize, S> {
    fn index(&self, word: &str) -> Option<usize> {
        self.get(word).copied()
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }
}

/// An embedding table of shape `[vocab, dim]` addressed through a [`TokenIndex`].
pub struct Embedding {
    pub table: Param,
    index: Arc<dyn TokenIndex>,
    unknown: Option<String>,
}

impl Embedding {
    /// Creates a zero-initialized table with one row per indexed token.
    pub fn new(index: Arc<dyn TokenIndex>, dim: usize) -> Self {
        Self {
            table: Param::zeros(&[index.len(), dim]),
            index,
            unknown: None,
        }
    }

    pub fn from_array(index: Arc<dyn TokenIndex>, table: Array2<f32>) -> Result<Self> {
        ensure!(
            table.nrows() >= index.len(),
            "embedding table has {} rows but the index holds {} tokens",
            table.nrows(),
            index.len()
        );
        Ok(Self {
            table: Param::new(table.into_dyn()),
            index,
            unknown: None,
        })
    }

    /// Token substituted for words the index does not know, e.g. `[UNK]`.
    pub fn with_unknown(mut self, token: impl Into<String>) -> Self {
        self.unknown = Some(token.into());
        self
    }

    pub fn dim(&self) -> usize {
        self.table.shape()[1]
    }

    pub fn vocab_size(&self) -> usize {
        self.table.shape()[0]
    }

    pub fn token_index(&self) -> &Arc<dyn TokenIndex> {
        &self.index
    }

    fn lookup(&self, word: &str) -> Option<usize> {
        self.index
            .index(word)
            .or_else(|| self.unknown.as_deref().and_then(|u| self.index.index(u)))
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("vocab_size", &self.vocab_size())
            .field("dim", &self.dim())
            .field("unknown", &self.unknown)
            .finish()
    }
}

pub struct EmbeddingProcessor<'g> {
    base: BaseProcessor<'g, Embedding>,
    table: Node,
}

impl Model for Embedding {
    type Processor<'g> = EmbeddingProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(EmbeddingProcessor {
            base: BaseProcessor::new(self, ctx),
            table: ctx.graph.param(&self.table),
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.param("weight", &self.table)
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.param("weight", &mut self.table)
    }
}

impl EmbeddingProcessor<'_> {
    /// One embedding node per row id.
    pub fn encode_ids(&self, ids: &[usize]) -> Result<Vec<Node>> {
        ids.iter().map(|id| self.encode_id(*id)).collect()
    }

    fn encode_id(&self, id: usize) -> Result<Node> {
        Ok(self.base.graph.row(self.table, id)?)
    }

    fn zeros(&self) -> Node {
        let dim = self.base.model.dim();
        self.base.graph.constant_array(ArrayD::zeros(IxDyn(&[dim])))
    }
}

impl<'g> Processor<'g> for EmbeddingProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
    }

    /// Looks up each input scalar as a row id.
    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        let g = self.base.graph;
        xs.iter()
            .map(|x| {
                let id = g.scalar(*x)?;
                ensure!(
                    id >= 0.0 && id.fract() == 0.0,
                    "embedding id must be a non-negative integer, got {id}"
                );
                self.encode_id(id as usize)
            })
            .collect()
    }
}

impl<'g> WordsEncoder<'g> for EmbeddingProcessor<'g> {
    /// One embedding node per word.
    ///
    /// A word missing from the index falls back to the unknown token, and to a
    /// zero vector when that is missing too.
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>> {
        let model = self.base.model;
        words
            .iter()
            .map(|word| match model.lookup(word) {
                Some(id) => self.encode_id(id),
                None => {
                    log::warn!("no embedding for '{word}', using a zero vector");
                    Ok(self.zeros())
                }
            })
            .collect()
    }
}
