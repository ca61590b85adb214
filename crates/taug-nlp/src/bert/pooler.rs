use anyhow::{Context as _, Result};
use taug_nn::nn::{Activation, ActivationKind, BaseProcessor, Linear, Stack, StackProcessor};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

#[derive(Debug, Clone, PartialEq)]
pub struct PoolerConfig {
    pub input_size: usize,
    pub output_size: usize,
}

/// Dense layer with tanh applied to the `[CLS]` hidden state.
#[derive(Debug)]
pub struct Pooler {
    pub layers: Stack,
}

impl Pooler {
    pub fn new(config: &PoolerConfig) -> Self {
        Self {
            layers: Stack::new(vec![
                Linear::new(config.input_size, config.output_size).into(),
                Activation::new(ActivationKind::Tanh).into(),
            ]),
        }
    }
}

pub struct PoolerProcessor<'g> {
    base: BaseProcessor<'g, Pooler>,
    layers: StackProcessor<'g>,
}

impl Model for Pooler {
    type Processor<'g> = PoolerProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(PoolerProcessor {
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

impl PoolerProcessor<'_> {
    /// Pools a sequence through its first (`[CLS]`) position.
    pub fn pool(&self, transformed: &[Node]) -> Result<Node> {
        let cls = transformed
            .first()
            .context("cannot pool an empty sequence")?;
        Ok(self.layers.forward(&[*cls])?[0])
    }
}

impl<'g> Processor<'g> for PoolerProcessor<'g> {
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

    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        self.layers.forward(xs)
    }
}
