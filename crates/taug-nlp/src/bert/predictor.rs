use std::collections::BTreeMap;

use anyhow::{ensure, Result};
use taug_nn::nn::{
    Activation, ActivationKind, BaseProcessor, LayerNorm, Linear, Stack, StackProcessor,
};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

#[derive(Debug, Clone, PartialEq)]
pub struct PredictorConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: usize,
    pub hidden_activation: ActivationKind,
    pub output_activation: ActivationKind,
    pub layer_norm_eps: f32,
}

/// Masked language modeling head producing one logit per vocabulary entry.
#[derive(Debug)]
pub struct Predictor {
    pub layers: Stack,
}

impl Predictor {
    pub fn new(config: &PredictorConfig) -> Self {
        Self {
            layers: Stack::new(vec![
                Linear::new(config.input_size, config.hidden_size).into(),
                Activation::new(config.hidden_activation).into(),
                LayerNorm::new(config.hidden_size, config.layer_norm_eps).into(),
                Linear::new(config.hidden_size, config.output_size).into(),
                Activation::new(config.output_activation).into(),
            ]),
        }
    }
}

pub struct PredictorProcessor<'g> {
    base: BaseProcessor<'g, Predictor>,
    layers: StackProcessor<'g>,
}

impl Model for Predictor {
    type Processor<'g> = PredictorProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(PredictorProcessor {
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

impl PredictorProcessor<'_> {
    /// Vocabulary logits for each masked position, keyed by position.
    pub fn predict_masked(
        &self,
        transformed: &[Node],
        masked: &[usize],
    ) -> Result<BTreeMap<usize, Node>> {
        let mut predictions = BTreeMap::new();
        for &position in masked {
            ensure!(
                position < transformed.len(),
                "masked position {position} is outside a sequence of {} tokens",
                transformed.len()
            );
            let logits = self.layers.forward(&[transformed[position]])?;
            predictions.insert(position, logits[0]);
        }
        Ok(predictions)
    }
}

impl<'g> Processor<'g> for PredictorProcessor<'g> {
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
