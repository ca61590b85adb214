//! Post-norm transformer encoder block.
//!
//! ```text
//! h = LayerNorm(x + Attention(x))
//! y = LayerNorm(h + Linear(act(Linear(h))))
//! ```

use anyhow::Result;
use ndarray_rand::rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    Activation, ActivationKind, BaseProcessor, Context, LayerNorm, LayerNormProcessor, Linear,
    Mode, Model, MultiHeadAttention, MultiHeadAttentionProcessor, Processor, Stack,
    StackProcessor,
};
use crate::error::ConfigError;
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerBlockConfig {
    pub hidden_size: usize,
    pub num_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_activation")]
    pub activation: ActivationKind,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f32,
}

fn default_activation() -> ActivationKind {
    ActivationKind::Gelu
}

fn default_eps() -> f32 {
    1e-12
}

#[derive(Debug)]
pub struct TransformerBlock {
    pub attention: MultiHeadAttention,
    pub attention_norm: LayerNorm,
    pub feed_forward: Stack,
    pub output_norm: LayerNorm,
}

impl TransformerBlock {
    pub fn new(config: &TransformerBlockConfig) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            attention: MultiHeadAttention::new(h, config.num_heads)?,
            attention_norm: LayerNorm::new(h, config.layer_norm_eps),
            feed_forward: Self::feed_forward(
                Linear::new(h, config.intermediate_size),
                config.activation,
                Linear::new(config.intermediate_size, h),
            ),
            output_norm: LayerNorm::new(h, config.layer_norm_eps),
        })
    }

    pub fn xavier<R: Rng + ?Sized>(config: &TransformerBlockConfig, rng: &mut R) -> Result<Self> {
        let h = config.hidden_size;
        Ok(Self {
            attention: MultiHeadAttention::xavier(h, config.num_heads, rng)?,
            attention_norm: LayerNorm::new(h, config.layer_norm_eps),
            feed_forward: Self::feed_forward(
                Linear::xavier(h, config.intermediate_size, rng),
                config.activation,
                Linear::xavier(config.intermediate_size, h, rng),
            ),
            output_norm: LayerNorm::new(h, config.layer_norm_eps),
        })
    }

    fn feed_forward(up: Linear, activation: ActivationKind, down: Linear) -> Stack {
        Stack::new(vec![up.into(), Activation::new(activation).into(), down.into()])
    }
}

pub struct TransformerBlockProcessor<'g> {
    base: BaseProcessor<'g, TransformerBlock>,
    attention: MultiHeadAttentionProcessor<'g>,
    attention_norm: LayerNormProcessor<'g>,
    feed_forward: StackProcessor<'g>,
    output_norm: LayerNormProcessor<'g>,
}

impl Model for TransformerBlock {
    type Processor<'g> = TransformerBlockProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(TransformerBlockProcessor {
            base: BaseProcessor::new(self, ctx),
            attention: self.attention.new_processor(ctx)?,
            attention_norm: self.attention_norm.new_processor(ctx)?,
            feed_forward: self.feed_forward.new_processor(ctx)?,
            output_norm: self.output_norm.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.scoped("attention", |v| self.attention.visit_params(v))?;
        v.scoped("attention_norm", |v| self.attention_norm.visit_params(v))?;
        v.scoped("feed_forward", |v| self.feed_forward.visit_params(v))?;
        v.scoped("output_norm", |v| self.output_norm.visit_params(v))
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.scoped("attention", |v| self.attention.visit_params_mut(v))?;
        v.scoped("attention_norm", |v| self.attention_norm.visit_params_mut(v))?;
        v.scoped("feed_forward", |v| self.feed_forward.visit_params_mut(v))?;
        v.scoped("output_norm", |v| self.output_norm.visit_params_mut(v))
    }
}

impl TransformerBlockProcessor<'_> {
    fn residual(&self, xs: &[Node], ys: &[Node]) -> Result<Vec<Node>> {
        let g = self.base.graph;
        Ok(xs
            .iter()
            .zip(ys)
            .map(|(x, y)| g.add(*x, *y))
            .collect::<Result<Vec<_>, _>>()?)
    }
}

impl<'g> Processor<'g> for TransformerBlockProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        self.attention.set_mode(mode);
        self.attention_norm.set_mode(mode);
        self.feed_forward.set_mode(mode);
        self.output_norm.set_mode(mode);
    }

    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        let attended = self.attention.forward(xs)?;
        let hidden = self.attention_norm.forward(&self.residual(xs, &attended)?)?;
        let projected = self.feed_forward.forward(&hidden)?;
        self.output_norm.forward(&self.residual(&hidden, &projected)?)
    }
}
