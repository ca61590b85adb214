use anyhow::{ensure, Result};
use taug_nn::nn::{BaseProcessor, Linear, LinearProcessor};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub input_size: usize,
    pub labels: Vec<String>,
}

/// Linear classification layer shared by token and sequence classification.
///
/// Outputs are raw logits, one per label.
#[derive(Debug)]
pub struct Classifier {
    pub projection: Linear,
    labels: Vec<String>,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        ensure!(!config.labels.is_empty(), "a classifier needs at least one label");
        Ok(Self {
            projection: Linear::new(config.input_size, config.labels.len()),
            labels: config.labels,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

pub struct ClassifierProcessor<'g> {
    base: BaseProcessor<'g, Classifier>,
    projection: LinearProcessor<'g>,
}

impl Model for Classifier {
    type Processor<'g> = ClassifierProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(ClassifierProcessor {
            base: BaseProcessor::new(self, ctx),
            projection: self.projection.new_processor(ctx)?,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        self.projection.visit_params(v)
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        self.projection.visit_params_mut(v)
    }
}

impl ClassifierProcessor<'_> {
    /// Label logits for each input vector independently.
    pub fn predict(&self, xs: &[Node]) -> Result<Vec<Node>> {
        self.projection.forward(xs)
    }
}

impl<'g> Processor<'g> for ClassifierProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        self.projection.set_mode(mode);
    }

    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        self.predict(xs)
    }
}
