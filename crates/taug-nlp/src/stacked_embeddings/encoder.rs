//! Sub-models a [`StackedEmbeddings`] can hold.

use anyhow::Result;
use taug_nn::nn::WordsEncoder;
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Layer, LayerProcessor, Mode, Model, Node, Processor};

use super::{StackedEmbeddings, StackedEmbeddingsProcessor};
use crate::bert::embeddings::{BertEmbeddings, BertEmbeddingsProcessor};
use crate::bert::{BertModel, BertProcessor};

#[derive(Debug)]
pub enum Encoder {
    Layer(Layer),
    Bert(Box<BertModel>),
    BertEmbeddings(Box<BertEmbeddings>),
    Stacked(Box<StackedEmbeddings>),
}

impl Encoder {
    /// True when the processor of this encoder can encode words. Only generic
    /// layers may lack the capability.
    pub fn is_words_encoder(&self) -> bool {
        match self {
            Encoder::Layer(layer) => layer.is_words_encoder(),
            _ => true,
        }
    }
}

impl From<Layer> for Encoder {
    fn from(layer: Layer) -> Self {
        Encoder::Layer(layer)
    }
}

impl From<BertModel> for Encoder {
    fn from(model: BertModel) -> Self {
        Encoder::Bert(Box::new(model))
    }
}

impl From<BertEmbeddings> for Encoder {
    fn from(model: BertEmbeddings) -> Self {
        Encoder::BertEmbeddings(Box::new(model))
    }
}

impl From<StackedEmbeddings> for Encoder {
    fn from(model: StackedEmbeddings) -> Self {
        Encoder::Stacked(Box::new(model))
    }
}

pub enum EncoderProcessor<'g> {
    Layer(LayerProcessor<'g>),
    Bert(Box<BertProcessor<'g>>),
    BertEmbeddings(Box<BertEmbeddingsProcessor<'g>>),
    Stacked(Box<StackedEmbeddingsProcessor<'g>>),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            EncoderProcessor::Layer($p) => $body,
            EncoderProcessor::Bert($p) => $body,
            EncoderProcessor::BertEmbeddings($p) => $body,
            EncoderProcessor::Stacked($p) => $body,
        }
    };
}

impl Model for Encoder {
    type Processor<'g> = EncoderProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(match self {
            Encoder::Layer(m) => EncoderProcessor::Layer(m.new_processor(ctx)?),
            Encoder::Bert(m) => EncoderProcessor::Bert(Box::new(m.new_processor(ctx)?)),
            Encoder::BertEmbeddings(m) => {
                EncoderProcessor::BertEmbeddings(Box::new(m.new_processor(ctx)?))
            }
            Encoder::Stacked(m) => EncoderProcessor::Stacked(Box::new(m.new_processor(ctx)?)),
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        match self {
            Encoder::Layer(m) => m.visit_params(v),
            Encoder::Bert(m) => m.visit_params(v),
            Encoder::BertEmbeddings(m) => m.visit_params(v),
            Encoder::Stacked(m) => m.visit_params(v),
        }
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        match self {
            Encoder::Layer(m) => m.visit_params_mut(v),
            Encoder::Bert(m) => m.visit_params_mut(v),
            Encoder::BertEmbeddings(m) => m.visit_params_mut(v),
            Encoder::Stacked(m) => m.visit_params_mut(v),
        }
    }
}

impl<'g> WordsEncoder<'g> for EncoderProcessor<'g> {
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>> {
        match self {
            EncoderProcessor::Layer(p) => p.encode(words),
            EncoderProcessor::Bert(p) => WordsEncoder::encode(p.as_ref(), words),
            EncoderProcessor::BertEmbeddings(p) => p.encode(words),
            EncoderProcessor::Stacked(p) => p.encode(words),
        }
    }
}

impl<'g> Processor<'g> for EncoderProcessor<'g> {
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
