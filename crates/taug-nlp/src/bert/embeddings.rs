use std::sync::Arc;

use anyhow::{ensure, Result};
use ndarray::Array2;
use taug_nn::nn::{
    BaseProcessor, Embedding, EmbeddingProcessor, LayerNorm, LayerNormProcessor, Linear,
    LinearProcessor, TokenIndex, WordsEncoder,
};
use taug_nn::param::{Param, ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

use super::{SEP_TOKEN, UNK_TOKEN};

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingsConfig {
    pub size: usize,
    /// A projection layer is added when this differs from `size`.
    pub output_size: usize,
    pub max_positions: usize,
    pub token_types: usize,
    pub vocab_size: usize,
    pub layer_norm_eps: f32,
}

/// Word, position and token type embeddings summed and normalized.
#[derive(Debug)]
pub struct BertEmbeddings {
    pub words: Embedding,
    pub positions: Param,
    pub token_types: Param,
    pub norm: LayerNorm,
    pub projection: Option<Linear>,
    config: EmbeddingsConfig,
}

impl BertEmbeddings {
    pub fn new(config: EmbeddingsConfig, vocabulary: Arc<dyn TokenIndex>) -> Result<Self> {
        ensure!(config.token_types > 0, "at least one token type is required");
        let words = Embedding::from_array(
            vocabulary,
            Array2::zeros((config.vocab_size, config.size)),
        )?
        .with_unknown(UNK_TOKEN);
        let projection = (config.output_size != config.size)
            .then(|| Linear::new(config.size, config.output_size));
        Ok(Self {
            words,
            positions: Param::zeros(&[config.max_positions, config.size]),
            token_types: Param::zeros(&[config.token_types, config.size]),
            norm: LayerNorm::new(config.size, config.layer_norm_eps),
            projection,
            config,
        })
    }

    pub fn config(&self) -> &EmbeddingsConfig {
        &self.config
    }
}

pub struct BertEmbeddingsProcessor<'g> {
    base: BaseProcessor<'g, BertEmbeddings>,
    words: EmbeddingProcessor<'g>,
    positions: Node,
    token_types: Node,
    norm: LayerNormProcessor<'g>,
    projection: Option<LinearProcessor<'g>>,
}

impl Model for BertEmbeddings {
    type Processor<'g> = BertEmbeddingsProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(BertEmbeddingsProcessor {
            base: BaseProcessor::new(self, ctx),
            words: self.words.new_processor(ctx)?,
            positions: ctx.graph.param(&self.positions),
            token_types: ctx.graph.param(&self.token_types),
            norm: self.norm.new_processor(ctx)?,
            projection: self
                .projection
                .as_ref()
                .map(|p| p.new_processor(ctx))
                .transpose()?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.scoped("word_embeddings", |v| self.words.visit_params(v))?;
        v.param("position_embeddings", &self.positions)?;
        v.param("token_type_embeddings", &self.token_types)?;
        v.scoped("layer_norm", |v| self.norm.visit_params(v))?;
        match &self.projection {
            Some(projection) => v.scoped("projection", |v| projection.visit_params(v)),
            None => Ok(()),
        }
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.scoped("word_embeddings", |v| self.words.visit_params_mut(v))?;
        v.param("position_embeddings", &mut self.positions)?;
        v.param("token_type_embeddings", &mut self.token_types)?;
        v.scoped("layer_norm", |v| self.norm.visit_params_mut(v))?;
        match &mut self.projection {
            Some(projection) => v.scoped("projection", |v| projection.visit_params_mut(v)),
            None => Ok(()),
        }
    }
}

impl BertEmbeddingsProcessor<'_> {
    /// Token type of every position: the segment counter starts at 0 and
    /// advances after each `[SEP]`, saturating at the last token type.
    fn token_type_ids(&self, tokens: &[&str]) -> Vec<usize> {
        let last = self.base.model.config.token_types - 1;
        let mut segment = 0;
        tokens
            .iter()
            .map(|token| {
                let id = segment;
                if *token == SEP_TOKEN {
                    segment = (segment + 1).min(last);
                }
                id
            })
            .collect()
    }
}

impl<'g> WordsEncoder<'g> for BertEmbeddingsProcessor<'g> {
    fn encode(&self, tokens: &[&str]) -> Result<Vec<Node>> {
        let max = self.base.model.config.max_positions;
        ensure!(
            tokens.len() <= max,
            "sequence of {} tokens exceeds the {max} supported positions",
            tokens.len()
        );
        let g = self.base.graph;
        let words = self.words.encode(tokens)?;
        let summed = words
            .iter()
            .zip(self.token_type_ids(tokens))
            .enumerate()
            .map(|(i, (word, token_type))| {
                let position = g.row(self.positions, i)?;
                let segment = g.row(self.token_types, token_type)?;
                g.add(g.add(*word, position)?, segment)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let normalized = self.norm.forward(&summed)?;
        match &self.projection {
            Some(projection) => projection.forward(&normalized),
            None => Ok(normalized),
        }
    }
}

impl<'g> Processor<'g> for BertEmbeddingsProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        self.words.set_mode(mode);
        self.norm.set_mode(mode);
        if let Some(projection) = &mut self.projection {
            projection.set_mode(mode);
        }
    }

    /// # Panics
    ///
    /// Always panics; embeddings are computed from tokens with
    /// [`WordsEncoder::encode`].
    fn forward(&self, _xs: &[Node]) -> Result<Vec<Node>> {
        panic!("BERT embeddings do not implement forward, use encode instead");
    }
}
