//! Replaced-token detection head.
//!
//! The head emits one raw logit per position. [`DiscriminatorProcessor::discriminate`]
//! thresholds it as `round((sign(x) + 1) / 2)` with `sign(0) = 0`, so positive
//! logits map to 1, negative logits to 0, and a logit of exactly zero (of either
//! sign) rounds half away from zero to 1.

use anyhow::Result;
use taug_nn::nn::{Activation, ActivationKind, BaseProcessor, Linear, Stack, StackProcessor};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatorConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub hidden_activation: ActivationKind,
    pub output_activation: ActivationKind,
}

#[derive(Debug)]
pub struct Discriminator {
    pub layers: Stack,
}

impl Discriminator {
    pub fn new(config: &DiscriminatorConfig) -> Self {
        Self {
            layers: Stack::new(vec![
                Linear::new(config.input_size, config.hidden_size).into(),
                Activation::new(config.hidden_activation).into(),
                Linear::new(config.hidden_size, 1).into(),
                Activation::new(config.output_activation).into(),
            ]),
        }
    }
}

fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Maps a logit to 1 (replaced) or 0 (original).
pub(crate) fn threshold(logit: f32) -> u8 {
    ((sign(logit) + 1.0) / 2.0).round() as u8
}

pub struct DiscriminatorProcessor<'g> {
    base: BaseProcessor<'g, Discriminator>,
    layers: StackProcessor<'g>,
}

impl Model for Discriminator {
    type Processor<'g> = DiscriminatorProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(DiscriminatorProcessor {
            base: BaseProcessor::new(self, ctx),
            layers: self.layers.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        self.layers.visit_params(v)
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        self.layers.visit_params_mut(v)
    }
}

impl DiscriminatorProcessor<'_> {
    /// 0 or 1 for every encoded position, 1 meaning the token looks replaced.
    pub fn discriminate(&self, encoded: &[Node]) -> Result<Vec<u8>> {
        let g = self.base.graph;
        self.layers
            .forward(encoded)?
            .into_iter()
            .map(|y| -> Result<u8> { Ok(threshold(g.scalar(y)?)) })
            .collect()
    }
}

impl<'g> Processor<'g> for DiscriminatorProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        self.layers.set_mode(mode);
    }

    /// Raw logits, one single-element vector per position.
    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        self.layers.forward(xs)
    }
}
