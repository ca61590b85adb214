use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Result};
use taug_nn::nn::{ActivationKind, BaseProcessor, Linear, LinearProcessor, WordsEncoder};
use taug_nn::param::{load_params, ParamSource, ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

use super::classifier::{Classifier, ClassifierConfig, ClassifierProcessor};
use super::config::BertConfig;
use super::discriminator::{Discriminator, DiscriminatorConfig, DiscriminatorProcessor};
use super::embeddings::{BertEmbeddings, BertEmbeddingsProcessor, EmbeddingsConfig};
use super::encoder::{BertEncoder, BertEncoderProcessor, EncoderConfig};
use super::pooler::{Pooler, PoolerConfig, PoolerProcessor};
use super::predictor::{Predictor, PredictorConfig, PredictorProcessor};
use super::span_classifier::{
    SpanClassifier, SpanClassifierConfig, SpanClassifierProcessor, SpanLogits,
};
use super::{CONFIG_FILE, VOCAB_FILE};
use crate::vocabulary::Vocabulary;

/// BERT encoder with every task head of the original architecture.
///
/// The heads are independent: a model fine-tuned for one task still carries
/// the others, and their parameters are simply left at their loaded values.
#[derive(Debug)]
pub struct BertModel {
    config: BertConfig,
    vocabulary: Arc<Vocabulary>,
    pub embeddings: BertEmbeddings,
    pub encoder: BertEncoder,
    pub predictor: Predictor,
    pub discriminator: Discriminator,
    pub pooler: Pooler,
    pub seq_relationship: Linear,
    pub span_classifier: SpanClassifier,
    pub classifier: Classifier,
}

impl BertModel {
    /// Builds a zero-initialized model with the default BERT wiring.
    pub fn new(config: BertConfig, vocabulary: Arc<Vocabulary>) -> Result<Self> {
        ensure!(
            vocabulary.len() <= config.vocab_size,
            "vocabulary holds {} tokens but the config allows {}",
            vocabulary.len(),
            config.vocab_size
        );
        let h = config.hidden_size;
        let model = Self {
            embeddings: BertEmbeddings::new(
                EmbeddingsConfig {
                    size: h,
                    output_size: h,
                    max_positions: config.max_position_embeddings,
                    token_types: config.type_vocab_size,
                    vocab_size: config.vocab_size,
                    layer_norm_eps: config.layer_norm_eps,
                },
                vocabulary.clone(),
            )?,
            encoder: BertEncoder::new(&EncoderConfig {
                size: h,
                num_attention_heads: config.num_attention_heads,
                intermediate_size: config.intermediate_size,
                intermediate_activation: config.hidden_act,
                num_layers: config.num_hidden_layers,
                layer_norm_eps: config.layer_norm_eps,
            })?,
            predictor: Predictor::new(&PredictorConfig {
                input_size: h,
                hidden_size: h,
                output_size: config.vocab_size,
                hidden_activation: ActivationKind::Gelu,
                output_activation: ActivationKind::Identity,
                layer_norm_eps: config.layer_norm_eps,
            }),
            discriminator: Discriminator::new(&DiscriminatorConfig {
                input_size: h,
                hidden_size: h,
                hidden_activation: ActivationKind::Gelu,
                output_activation: ActivationKind::Identity,
            }),
            pooler: Pooler::new(&PoolerConfig {
                input_size: h,
                output_size: h,
            }),
            seq_relationship: Linear::new(h, 2),
            span_classifier: SpanClassifier::new(&SpanClassifierConfig { input_size: h }),
            classifier: Classifier::new(ClassifierConfig {
                input_size: h,
                labels: config.labels()?,
            })?,
            config,
            vocabulary,
        };
        log::debug!("built BERT model with {} encoder layer(s)", model.encoder.num_layers());
        Ok(model)
    }

    /// Loads `config.json` and `vocab.txt` from `dir` and binds weights from
    /// `params`.
    pub fn load(dir: impl AsRef<Path>, params: &dyn ParamSource) -> Result<Self> {
        let dir = dir.as_ref();
        log::info!("loading BERT model from {}", dir.display());
        let config = BertConfig::from_file(dir.join(CONFIG_FILE))?;
        let vocabulary = Arc::new(Vocabulary::from_file(dir.join(VOCAB_FILE))?);
        let mut model = Self::new(config, vocabulary)?;
        let report = load_params(&mut model, params)?;
        log::info!(
            "loaded {} parameter(s), {} missing",
            report.loaded.len(),
            report.missing.len()
        );
        Ok(model)
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }
}

pub struct BertProcessor<'g> {
    base: BaseProcessor<'g, BertModel>,
    pub embeddings: BertEmbeddingsProcessor<'g>,
    pub encoder: BertEncoderProcessor<'g>,
    pub predictor: PredictorProcessor<'g>,
    pub discriminator: DiscriminatorProcessor<'g>,
    pub pooler: PoolerProcessor<'g>,
    pub seq_relationship: LinearProcessor<'g>,
    pub span_classifier: SpanClassifierProcessor<'g>,
    pub classifier: ClassifierProcessor<'g>,
}

impl Model for BertModel {
    type Processor<'g> = BertProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        log::debug!("BERT processor on graph {} ({})", ctx.graph.id(), ctx.mode);
        Ok(BertProcessor {
            base: BaseProcessor::new(self, ctx),
            embeddings: self.embeddings.new_processor(ctx)?,
            encoder: self.encoder.new_processor(ctx)?,
            predictor: self.predictor.new_processor(ctx)?,
            discriminator: self.discriminator.new_processor(ctx)?,
            pooler: self.pooler.new_processor(ctx)?,
            seq_relationship: self.seq_relationship.new_processor(ctx)?,
            span_classifier: self.span_classifier.new_processor(ctx)?,
            classifier: self.classifier.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.scoped("embeddings", |v| self.embeddings.visit_params(v))?;
        v.scoped("encoder", |v| self.encoder.visit_params(v))?;
        v.scoped("predictor", |v| self.predictor.visit_params(v))?;
        v.scoped("discriminator", |v| self.discriminator.visit_params(v))?;
        v.scoped("pooler", |v| self.pooler.visit_params(v))?;
        v.scoped("seq_relationship", |v| self.seq_relationship.visit_params(v))?;
        v.scoped("span_classifier", |v| self.span_classifier.visit_params(v))?;
        v.scoped("classifier", |v| self.classifier.visit_params(v))
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.scoped("embeddings", |v| self.embeddings.visit_params_mut(v))?;
        v.scoped("encoder", |v| self.encoder.visit_params_mut(v))?;
        v.scoped("predictor", |v| self.predictor.visit_params_mut(v))?;
        v.scoped("discriminator", |v| self.discriminator.visit_params_mut(v))?;
        v.scoped("pooler", |v| self.pooler.visit_params_mut(v))?;
        v.scoped("seq_relationship", |v| self.seq_relationship.visit_params_mut(v))?;
        v.scoped("span_classifier", |v| self.span_classifier.visit_params_mut(v))?;
        v.scoped("classifier", |v| self.classifier.visit_params_mut(v))
    }
}

impl BertProcessor<'_> {
    /// Contextual vectors for a tokenized sequence, one per token.
    pub fn encode(&self, tokens: &[&str]) -> Result<Vec<Node>> {
        let embedded = self.embeddings.encode(tokens)?;
        self.encoder.forward(&embedded)
    }

    /// Vocabulary logits for the `masked` positions of an encoded sequence.
    pub fn predict_masked(
        &self,
        transformed: &[Node],
        masked: &[usize],
    ) -> Result<BTreeMap<usize, Node>> {
        self.predictor.predict_masked(transformed, masked)
    }

    /// 0 or 1 per position, 1 meaning the token is out of context.
    pub fn discriminate(&self, encoded: &[Node]) -> Result<Vec<u8>> {
        self.discriminator.discriminate(encoded)
    }

    /// Pooled representation taken from the `[CLS]` position.
    pub fn pool(&self, transformed: &[Node]) -> Result<Node> {
        self.pooler.pool(transformed)
    }

    /// Two logits telling whether the second segment follows the first.
    pub fn predict_seq_relationship(&self, pooled: Node) -> Result<Node> {
        Ok(self.seq_relationship.project(pooled)?)
    }

    /// Label logits for every position.
    pub fn token_classification(&self, transformed: &[Node]) -> Result<Vec<Node>> {
        self.classifier.predict(transformed)
    }

    /// Label logits for the whole sequence, classified from the pooled `[CLS]`.
    pub fn sequence_classification(&self, transformed: &[Node]) -> Result<Node> {
        let pooled = self.pool(transformed)?;
        Ok(self.classifier.predict(&[pooled])?[0])
    }

    /// Start and end logits for every position.
    pub fn span_classification(&self, transformed: &[Node]) -> Result<SpanLogits> {
        self.span_classifier.classify(transformed)
    }
}

impl<'g> WordsEncoder<'g> for BertProcessor<'g> {
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>> {
        BertProcessor::encode(self, words)
    }
}

impl<'g> Processor<'g> for BertProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        self.embeddings.set_mode(mode);
        self.encoder.set_mode(mode);
        self.predictor.set_mode(mode);
        self.discriminator.set_mode(mode);
        self.pooler.set_mode(mode);
        self.seq_relationship.set_mode(mode);
        self.span_classifier.set_mode(mode);
        self.classifier.set_mode(mode);
    }

    /// # Panics
    ///
    /// Always panics; use the task methods such as [`BertProcessor::encode`].
    fn forward(&self, _xs: &[Node]) -> Result<Vec<Node>> {
        panic!("BERT does not implement forward, use encode and the task methods instead");
    }
}
