//! Inverted dropout, the mode-sensitive layer of the family.
//!
//! In [`Mode::Inference`] the layer is the identity and appends nothing. In
//! [`Mode::Training`] each input is multiplied by a mask constant whose kept
//! entries are scaled by `1 / (1 - p)`. Masks are drawn from a generator seeded
//! with the layer seed and the input node index, so a given graph is always
//! rebuilt identically; the operators themselves stay deterministic.

use anyhow::{ensure, Result};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{BaseProcessor, Context, Mode, Model, Processor};
use crate::error::ConfigError;
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

#[derive(Debug, Clone, PartialEq)]
pub struct Dropout {
    p: f32,
    seed: u64,
}

impl Dropout {
    /// Creates a layer dropping each element with probability `p` in `[0, 1)`.
    pub fn new(p: f32, seed: u64) -> Result<Self> {
        ensure!(
            (0.0..1.0).contains(&p),
            "dropout probability must be in [0, 1), got {p}"
        );
        Ok(Self { p, seed })
    }

    pub fn p(&self) -> f32 {
        self.p
    }
}

pub struct DropoutProcessor<'g> {
    base: BaseProcessor<'g, Dropout>,
}

impl Model for Dropout {
    type Processor<'g> = DropoutProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(DropoutProcessor {
            base: BaseProcessor::new(self, ctx),
        })
    }

    fn visit_params(&self, _v: &mut ParamVisitor<'_>) -> Result<()> {
        Ok(())
    }

    fn visit_params_mut(&mut self, _v: &mut ParamVisitorMut<'_>) -> Result<()> {
        Ok(())
    }
}

impl DropoutProcessor<'_> {
    fn mask(&self, x: Node) -> Result<ArrayD<f32>> {
        let p = self.base.model.p;
        let keep = 1.0 - p;
        let mut rng = StdRng::seed_from_u64(self.base.model.seed ^ x.index() as u64);
        let shape = self.base.graph.shape(x)?;
        Ok(ArrayD::from_shape_fn(shape, |_| {
            if rng.gen::<f32>() < p {
                0.0
            } else {
                1.0 / keep
            }
        }))
    }
}

impl<'g> Processor<'g> for DropoutProcessor<'g> {
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
        if self.base.mode == Mode::Inference || self.base.model.p == 0.0 {
            return Ok(xs.to_vec());
        }
        let g = self.base.graph;
        xs.iter()
            .map(|x| {
                let mask = g.constant_array(self.mask(*x)?);
                Ok(g.prod(*x, mask)?)
            })
            .collect()
    }
}
