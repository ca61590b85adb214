//! Extractive question answering head.
//!
//! A single projection maps every position to two logits. Splitting that
//! vector gives the start logit (index 0) and the end logit (index 1), so both
//! share the projection weights.

use anyhow::Result;
use taug_nn::nn::{BaseProcessor, Linear, LinearProcessor};
use taug_nn::param::{ParamVisitor, ParamVisitorMut};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Node, Processor};

#[derive(Debug, Clone, PartialEq)]
pub struct SpanClassifierConfig {
    pub input_size: usize,
}

#[derive(Debug)]
pub struct SpanClassifier {
    pub projection: Linear,
}

impl SpanClassifier {
    pub fn new(config: &SpanClassifierConfig) -> Self {
        Self {
            projection: Linear::new(config.input_size, 2),
        }
    }
}

/// Per-position span logits.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLogits {
    pub start: Vec<Node>,
    pub end: Vec<Node>,
}

pub struct SpanClassifierProcessor<'g> {
    base: BaseProcessor<'g, SpanClassifier>,
    projection: LinearProcessor<'g>,
}

impl Model for SpanClassifier {
    type Processor<'g> = SpanClassifierProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(SpanClassifierProcessor {
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

impl SpanClassifierProcessor<'_> {
    pub fn classify(&self, xs: &[Node]) -> Result<SpanLogits> {
        let g = self.base.graph;
        let mut logits = SpanLogits {
            start: Vec::with_capacity(xs.len()),
            end: Vec::with_capacity(xs.len()),
        };
        for y in self.projection.forward(xs)? {
            let split = g.separate_vec(y)?;
            logits.start.push(split[0]);
            logits.end.push(split[1]);
        }
        Ok(logits)
    }
}

impl<'g> Processor<'g> for SpanClassifierProcessor<'g> {
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
        self.projection.forward(xs)
    }
}
