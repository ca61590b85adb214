//! Fully connected layer `y = W x + b`.
//!
//! Weights are stored in the `[OutFeatures, InFeatures]` layout, the same
//! convention used by common checkpoint formats, so a loaded matrix needs no
//! transposition. Every input node is projected independently.

use anyhow::{ensure, Result};
use ndarray::{Array1, Array2};
use ndarray_rand::rand::Rng;

use super::{init, BaseProcessor, Context, Mode, Model, Processor};
use crate::error::{ConfigError, GraphResult};
use crate::graph::{Graph, Node};
use crate::param::{Param, ParamVisitor, ParamVisitorMut};

/// A linear transformation with bias.
#[derive(Debug)]
pub struct Linear {
    pub weight: Param,
    pub bias: Param,
}

impl Linear {
    /// Creates a zero-initialized layer.
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: Param::zeros(&[out_features, in_features]),
            bias: Param::zeros(&[out_features]),
        }
    }

    /// Creates a layer from an `[out, in]` weight matrix and an `[out]` bias.
    pub fn from_arrays(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        ensure!(
            weight.nrows() == bias.len(),
            "bias length ({}) must match weight rows ({})",
            bias.len(),
            weight.nrows()
        );
        Ok(Self {
            weight: Param::new(weight.into_dyn()),
            bias: Param::new(bias.into_dyn()),
        })
    }

    /// Xavier-initialized weights and a zero bias.
    pub fn xavier<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        Self {
            weight: Param::new(init::xavier_uniform(in_features, out_features, rng).into_dyn()),
            bias: Param::zeros(&[out_features]),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }
}

pub struct LinearProcessor<'g> {
    base: BaseProcessor<'g, Linear>,
    w: Node,
    b: Node,
}

impl Model for Linear {
    type Processor<'g> = LinearProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(LinearProcessor {
            base: BaseProcessor::new(self, ctx),
            w: ctx.graph.param(&self.weight),
            b: ctx.graph.param(&self.bias),
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        v.param("weight", &self.weight)?;
        v.param("bias", &self.bias)
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        v.param("weight", &mut self.weight)?;
        v.param("bias", &mut self.bias)
    }
}

impl LinearProcessor<'_> {
    /// Projects a single vector.
    pub fn project(&self, x: Node) -> GraphResult<Node> {
        let g = self.base.graph;
        g.add(g.mul(self.w, x)?, self.b)
    }
}

impl<'g> Processor<'g> for LinearProcessor<'g> {
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
            .map(|x| self.project(*x))
            .collect::<GraphResult<Vec<_>>>()?)
    }
}
