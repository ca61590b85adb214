//! Multi-head scaled dot-product self-attention over a sequence of vectors.
//!
//! For every head the keys of the sequence are stacked into a `[n, d]` matrix
//! and the values into its `[d, n]` transpose, so each position needs only two
//! matrix-vector products:
//!
//! ```text
//! a_i = softmax(K_h · q_ih / sqrt(d))
//! c_ih = V_hᵀ · a_i
//! ```
//!
//! The per-head contexts are concatenated and projected by the output layer.

use anyhow::{ensure, Result};
use ndarray_rand::rand::Rng;

use super::{BaseProcessor, Context, Linear, LinearProcessor, Mode, Model, Processor};
use crate::error::{ConfigError, GraphResult};
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

#[derive(Debug)]
pub struct MultiHeadAttention {
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
    pub output: Linear,
    heads: usize,
}

impl MultiHeadAttention {
    /// Zero-initialized attention over vectors of size `hidden`.
    pub fn new(hidden: usize, heads: usize) -> Result<Self> {
        check_heads(hidden, heads)?;
        Ok(Self {
            query: Linear::new(hidden, hidden),
            key: Linear::new(hidden, hidden),
            value: Linear::new(hidden, hidden),
            output: Linear::new(hidden, hidden),
            heads,
        })
    }

    pub fn xavier<R: Rng + ?Sized>(hidden: usize, heads: usize, rng: &mut R) -> Result<Self> {
        check_heads(hidden, heads)?;
        Ok(Self {
            query: Linear::xavier(hidden, hidden, rng),
            key: Linear::xavier(hidden, hidden, rng),
            value: Linear::xavier(hidden, hidden, rng),
            output: Linear::xavier(hidden, hidden, rng),
            heads,
        })
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn hidden_size(&self) -> usize {
        self.query.out_features()
    }

    pub fn head_size(&self) -> usize {
        self.hidden_size() / self.heads
    }
}

fn check_heads(hidden: usize, heads: usize) -> Result<()> {
    ensure!(heads > 0, "attention needs at least one head");
    ensure!(
        hidden % heads == 0,
        "hidden size {hidden} is not divisible by {heads} heads"
    );
    Ok(())
}

pub struct MultiHeadAttentionProcessor<'g> {
    base: BaseProcessor<'g, MultiHeadAttention>,
    query: LinearProcessor<'g>,
    key: LinearProcessor<'g>,
    value: LinearProcessor<'g>,
    output: LinearProcessor<'g>,
}

impl Model for MultiHeadAttention {
    type Processor<'g> = MultiHeadAttentionProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(MultiHeadAttentionProcessor {
            base: BaseProcessor::new(self, ctx),
            query: self.query.new_processor(ctx)?,
            key: self.key.new_processor(ctx)?,
            value: self.value.new_processor(ctx)?,
            output: self.output.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.scoped("query", |v| self.query.visit_params(v))?;
        v.scoped("key", |v| self.key.visit_params(v))?;
        v.scoped("value", |v| self.value.visit_params(v))?;
        v.scoped("output", |v| self.output.visit_params(v))
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.scoped("query", |v| self.query.visit_params_mut(v))?;
        v.scoped("key", |v| self.key.visit_params_mut(v))?;
        v.scoped("value", |v| self.value.visit_params_mut(v))?;
        v.scoped("output", |v| self.output.visit_params_mut(v))
    }
}

impl MultiHeadAttentionProcessor<'_> {
    fn attend(&self, qs: &[Node], ks: &[Node], vs: &[Node]) -> GraphResult<Vec<Node>> {
        let g = self.base.graph;
        let heads = self.base.model.heads;
        let d = self.base.model.head_size();
        let scale = g.constant((d as f32).sqrt());

        let mut contexts: Vec<Vec<Node>> = vec![Vec::with_capacity(heads); qs.len()];
        for h in 0..heads {
            let (start, end) = (h * d, (h + 1) * d);
            let head_of = |x: &Node| g.slice(*x, start, end);
            let k = g.stack(&ks.iter().map(head_of).collect::<GraphResult<Vec<_>>>()?)?;
            let v = g.stack(&vs.iter().map(head_of).collect::<GraphResult<Vec<_>>>()?)?;
            let v_t = g.transpose(v)?;
            for (q, context) in qs.iter().zip(contexts.iter_mut()) {
                let scores = g.div_scalar(g.mul(k, head_of(q)?)?, scale)?;
                let weights = g.softmax(scores)?;
                context.push(g.mul(v_t, weights)?);
            }
        }
        contexts.iter().map(|heads| g.concat(heads)).collect()
    }
}

impl<'g> Processor<'g> for MultiHeadAttentionProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        self.query.set_mode(mode);
        self.key.set_mode(mode);
        self.value.set_mode(mode);
        self.output.set_mode(mode);
    }

    /// Every position attends to the whole input sequence.
    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        if xs.is_empty() {
            return Ok(Vec::new());
        }
        let qs = self.query.forward(xs)?;
        let ks = self.key.forward(xs)?;
        let vs = self.value.forward(xs)?;
        let contexts = self.attend(&qs, &ks, &vs)?;
        self.output.forward(&contexts)
    }
}
