//! Several word representations concatenated per word and projected.
//!
//! Every encoder runs over the same words. For each position the encoder
//! outputs are concatenated in encoder order and the shared projection layer
//! is applied, which both reduces the dimension and lets the combined
//! representation be trained further.
//!
//! Encoders are [`Encoder`] values: any generic layer that encodes words, a
//! whole BERT model, BERT embeddings alone or another stacked embeddings
//! model.

mod encoder;
#[cfg(test)]
mod tests;

pub use encoder::{Encoder, EncoderProcessor};

use anyhow::{ensure, Result};
use taug_nn::nn::{BaseProcessor, Linear, LinearProcessor, WordsEncoder};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

const MODEL: &str = "stacked_embeddings";

#[derive(Debug)]
pub struct StackedEmbeddings {
    pub encoders: Vec<Encoder>,
    pub projection: Linear,
}

impl StackedEmbeddings {
    pub fn new(encoders: Vec<Encoder>, projection: Linear) -> Self {
        Self {
            encoders,
            projection,
        }
    }
}

pub struct StackedEmbeddingsProcessor<'g> {
    base: BaseProcessor<'g, StackedEmbeddings>,
    encoders: Vec<EncoderProcessor<'g>>,
    projection: LinearProcessor<'g>,
}

impl Model for StackedEmbeddings {
    type Processor<'g> = StackedEmbeddingsProcessor<'g>;

    /// Fails when no encoder is configured or when an encoder cannot encode
    /// words.
    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        if self.encoders.is_empty() {
            return Err(ConfigError::InvalidStructure {
                model: MODEL,
                reason: "at least one words encoder is required".to_string(),
            });
        }
        if let Some(index) = self.encoders.iter().position(|e| !e.is_words_encoder()) {
            return Err(ConfigError::MissingCapability {
                model: MODEL,
                index,
                capability: "words_encoder",
            });
        }
        let encoders = self
            .encoders
            .iter()
            .map(|e| e.new_processor(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "stacked embeddings processor with {} encoder(s) on graph {}",
            encoders.len(),
            ctx.graph.id()
        );
        Ok(StackedEmbeddingsProcessor {
            base: BaseProcessor::new(self, ctx),
            encoders,
            projection: self.projection.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.scoped("encoders", |v| {
            for (i, encoder) in self.encoders.iter().enumerate() {
                v.scoped(&i.to_string(), |v| encoder.visit_params(v))?;
            }
            Ok(())
        })?;
        v.scoped("projection", |v| self.projection.visit_params(v))
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        let encoders = &mut self.encoders;
        v.scoped("encoders", |v| {
            for (i, encoder) in encoders.iter_mut().enumerate() {
                v.scoped(&i.to_string(), |v| encoder.visit_params_mut(v))?;
            }
            Ok(())
        })?;
        v.scoped("projection", |v| self.projection.visit_params_mut(v))
    }
}

impl<'g> WordsEncoder<'g> for StackedEmbeddingsProcessor<'g> {
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>> {
        let encodings = self
            .encoders
            .iter()
            .map(|e| e.encode(words))
            .collect::<Result<Vec<_>>>()?;
        for (i, encoded) in encodings.iter().enumerate() {
            ensure!(
                encoded.len() == words.len(),
                "encoder {i} returned {} vectors for {} words",
                encoded.len(),
                words.len()
            );
        }

        let per_word = match encodings.as_slice() {
            [single] => single.clone(),
            _ => {
                let g = self.base.graph;
                (0..words.len())
                    .map(|w| {
                        let parts: Vec<Node> = encodings.iter().map(|e| e[w]).collect();
                        g.concat(&parts)
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        self.projection.forward(&per_word)
    }
}

impl<'g> Processor<'g> for StackedEmbeddingsProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        for encoder in &mut self.encoders {
            encoder.set_mode(mode);
        }
        self.projection.set_mode(mode);
    }

    /// # Panics
    ///
    /// Always panics; stacked embeddings consume words through
    /// [`WordsEncoder::encode`].
    fn forward(&self, _xs: &[Node]) -> Result<Vec<Node>> {
        panic!("stacked embeddings do not implement forward, use encode instead");
    }
}
