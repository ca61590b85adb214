use anyhow::Result;
use taug_nn::nn::{
    ActivationKind, BaseProcessor, Layer, Stack, StackProcessor, TransformerBlock,
    TransformerBlockConfig,
};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub size: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub intermediate_activation: ActivationKind,
    pub num_layers: usize,
    pub layer_norm_eps: f32,
}

/// A stack of identical transformer blocks.
#[derive(Debug)]
pub struct BertEncoder {
    pub layers: Stack,
}

impl BertEncoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        let block = TransformerBlockConfig {
            hidden_size: config.size,
            num_heads: config.num_attention_heads,
            intermediate_size: config.intermediate_size,
            activation: config.intermediate_activation,
            layer_norm_eps: config.layer_norm_eps,
        };
        let layers = (0..config.num_layers)
            .map(|_| TransformerBlock::new(&block).map(Layer::from))
            .collect::<Result<Stack>>()?;
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

pub struct BertEncoderProcessor<'g> {
    base: BaseProcessor<'g, BertEncoder>,
    layers: StackProcessor<'g>,
}

impl Model for BertEncoder {
    type Processor<'g> = BertEncoderProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(BertEncoderProcessor {
            base: BaseProcessor::new(self, ctx),
            layers: self.layers.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.scoped("layers", |v| self.layers.visit_params(v))
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.scoped("layers", |v| self.layers.visit_params_mut(v))
    }
}

impl<'g> Processor<'g> for BertEncoderProcessor<'g> {
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
