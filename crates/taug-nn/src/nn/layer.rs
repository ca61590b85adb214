//! The closed set of generic layers and their processors.
//!
//! Composite models hold children as [`Layer`] values and instantiate them as
//! [`LayerProcessor`]s with a shared context. Optional capabilities are
//! queried on the model side (for example [`Layer::is_words_encoder`]) so a
//! composite can reject an unsuitable child before any node is appended.

use anyhow::Result;

use super::{
    Activation, ActivationProcessor, Context, Dropout, DropoutProcessor, Embedding,
    EmbeddingProcessor, LayerNorm, LayerNormProcessor, Linear, LinearProcessor, Mode, Model,
    Processor, Stack, StackProcessor, TransformerBlock, TransformerBlockProcessor,
};
use crate::error::ConfigError;
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

/// Capability of turning a sequence of words into one node per word.
pub trait WordsEncoder<'g> {
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>>;
}

#[derive(Debug)]
pub enum Layer {
    Linear(Linear),
    Activation(Activation),
    Dropout(Dropout),
    LayerNorm(LayerNorm),
    Embedding(Embedding),
    Stack(Stack),
    Transformer(Box<TransformerBlock>),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Linear(_) => "linear",
            Layer::Activation(_) => "activation",
            Layer::Dropout(_) => "dropout",
            Layer::LayerNorm(_) => "layer_norm",
            Layer::Embedding(_) => "embedding",
            Layer::Stack(_) => "stack",
            Layer::Transformer(_) => "transformer",
        }
    }

    /// True when the processor of this layer implements [`WordsEncoder`].
    pub fn is_words_encoder(&self) -> bool {
        match self {
            Layer::Embedding(_) => true,
            Layer::Stack(stack) => stack.is_words_encoder(),
            _ => false,
        }
    }
}

macro_rules! impl_from_layer {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Layer {
                fn from(layer: $ty) -> Self {
                    Layer::$variant(layer.into())
                }
            }
        )*
    };
}

impl_from_layer!(
    Linear(Linear),
    Activation(Activation),
    Dropout(Dropout),
    LayerNorm(LayerNorm),
    Embedding(Embedding),
    Stack(Stack),
    Transformer(TransformerBlock),
);

pub enum LayerProcessor<'g> {
    Linear(LinearProcessor<'g>),
    Activation(ActivationProcessor<'g>),
    Dropout(DropoutProcessor<'g>),
    LayerNorm(LayerNormProcessor<'g>),
    Embedding(EmbeddingProcessor<'g>),
    Stack(StackProcessor<'g>),
    Transformer(Box<TransformerBlockProcessor<'g>>),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            LayerProcessor::Linear($p) => $body,
            LayerProcessor::Activation($p) => $body,
            LayerProcessor::Dropout($p) => $body,
            LayerProcessor::LayerNorm($p) => $body,
            LayerProcessor::Embedding($p) => $body,
            LayerProcessor::Stack($p) => $body,
            LayerProcessor::Transformer($p) => $body,
        }
    };
}

impl Model for Layer {
    type Processor<'g> = LayerProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(match self {
            Layer::Linear(m) => LayerProcessor::Linear(m.new_processor(ctx)?),
            Layer::Activation(m) => LayerProcessor::Activation(m.new_processor(ctx)?),
            Layer::Dropout(m) => LayerProcessor::Dropout(m.new_processor(ctx)?),
            Layer::LayerNorm(m) => LayerProcessor::LayerNorm(m.new_processor(ctx)?),
            Layer::Embedding(m) => LayerProcessor::Embedding(m.new_processor(ctx)?),
            Layer::Stack(m) => LayerProcessor::Stack(m.new_processor(ctx)?),
            Layer::Transformer(m) => LayerProcessor::Transformer(Box::new(m.new_processor(ctx)?)),
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        match self {
            Layer::Linear(m) => m.visit_params(v),
            Layer::Activation(m) => m.visit_params(v),
            Layer::Dropout(m) => m.visit_params(v),
            Layer::LayerNorm(m) => m.visit_params(v),
            Layer::Embedding(m) => m.visit_params(v),
            Layer::Stack(m) => m.visit_params(v),
            Layer::Transformer(m) => m.visit_params(v),
        }
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        match self {
            Layer::Linear(m) => m.visit_params_mut(v),
            Layer::Activation(m) => m.visit_params_mut(v),
            Layer::Dropout(m) => m.visit_params_mut(v),
            Layer::LayerNorm(m) => m.visit_params_mut(v),
            Layer::Embedding(m) => m.visit_params_mut(v),
            Layer::Stack(m) => m.visit_params_mut(v),
            Layer::Transformer(m) => m.visit_params_mut(v),
        }
    }
}

impl<'g> Processor<'g> for LayerProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        dispatch!(self, p => p.graph())
    }

    fn mode(&self) -> Mode {
        dispatch!(self, p => p.mode())
    }

    fn set_mode(&mut self, mode: Mode) {
        dispatch!(self, p => p.set_mode(mode))
    }

    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        dispatch!(self, p => p.forward(xs))
    }
}

impl<'g> WordsEncoder<'g> for LayerProcessor<'g> {
    /// # Panics
    ///
    /// Panics when the underlying layer is not a words encoder; check
    /// [`Layer::is_words_encoder`] before building the processor.
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>> {
        match self {
            LayerProcessor::Embedding(p) => p.encode(words),
            LayerProcessor::Stack(p) => p.encode(words),
            _ => panic!("layer processor does not encode words"),
        }
    }
}
