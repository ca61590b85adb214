//! Layer normalization over a vector, built from graph primitives.

use anyhow::Result;
use ndarray::{Array1, ArrayD, IxDyn};

use super::{BaseProcessor, Context, Mode, Model, Processor};
use crate::error::{ConfigError, GraphResult};
use crate::graph::{Graph, Node};
use crate::param::{Param, ParamVisitor, ParamVisitorMut};

/// `y = (x - mean(x)) / sqrt(var(x) + eps) * gamma + beta`
#[derive(Debug)]
pub struct LayerNorm {
    pub gamma: Param,
    pub beta: Param,
    pub eps: f32,
}

impl LayerNorm {
    /// Unit scale and zero shift.
    pub fn new(size: usize, eps: f32) -> Self {
        Self {
            gamma: Param::new(ArrayD::ones(IxDyn(&[size]))),
            beta: Param::zeros(&[size]),
            eps,
        }
    }

    pub fn from_arrays(gamma: Array1<f32>, beta: Array1<f32>, eps: f32) -> Result<Self> {
        anyhow::ensure!(
            gamma.len() == beta.len(),
            "gamma ({}) and beta ({}) must have the same length",
            gamma.len(),
            beta.len()
        );
        Ok(Self {
            gamma: Param::new(gamma.into_dyn()),
            beta: Param::new(beta.into_dyn()),
            eps,
        })
    }
}

pub struct LayerNormProcessor<'g> {
    base: BaseProcessor<'g, LayerNorm>,
    gamma: Node,
    beta: Node,
    eps: Node,
}

impl Model for LayerNorm {
    type Processor<'g> = LayerNormProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(LayerNormProcessor {
            base: BaseProcessor::new(self, ctx),
            gamma: ctx.graph.param(&self.gamma),
            beta: ctx.graph.param(&self.beta),
            eps: ctx.graph.constant(self.eps),
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.param("gamma", &self.gamma)?;
        v.param("beta", &self.beta)
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.param("gamma", &mut self.gamma)?;
        v.param("beta", &mut self.beta)
    }
}

impl LayerNormProcessor<'_> {
    pub fn normalize(&self, x: Node) -> GraphResult<Node> {
        let g = self.base.graph;
        let mean = g.reduce_mean(x)?;
        let dev = g.sub_scalar(x, mean)?;
        let var = g.reduce_mean(g.square(dev)?)?;
        let std = g.sqrt(g.add_scalar(var, self.eps)?)?;
        let normalized = g.div_scalar(dev, std)?;
        g.add(g.prod(normalized, self.gamma)?, self.beta)
    }
}

impl<'g> Processor<'g> for LayerNormProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
    }

    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        Ok(xs
            .iter()
            .map(|x| self.normalize(*x))
            .collect::<GraphResult<Vec<_>>>()?)
    }
}
