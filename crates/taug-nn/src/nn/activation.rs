//! Parameter-free activation layer.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{BaseProcessor, Context, Mode, Model, Processor};
use crate::error::{ConfigError, GraphResult};
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    #[default]
    #[serde(alias = "linear")]
    Identity,
    Tanh,
    Sigmoid,
    Relu,
    #[serde(alias = "gelu_new")]
    Gelu,
    Elu,
    PositiveElu,
    #[serde(alias = "swish")]
    Silu,
    Softmax,
}

impl FromStr for ActivationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity" | "linear" => Ok(ActivationKind::Identity),
            "tanh" => Ok(ActivationKind::Tanh),
            "sigmoid" => Ok(ActivationKind::Sigmoid),
            "relu" => Ok(ActivationKind::Relu),
            "gelu" | "gelu_new" => Ok(ActivationKind::Gelu),
            "elu" => Ok(ActivationKind::Elu),
            "positive_elu" | "positiveelu" => Ok(ActivationKind::PositiveElu),
            "silu" | "swish" => Ok(ActivationKind::Silu),
            "softmax" => Ok(ActivationKind::Softmax),
            _ => Err(format!("unknown activation function: {}", s)),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationKind::Identity => "identity",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Relu => "relu",
            ActivationKind::Gelu => "gelu",
            ActivationKind::Elu => "elu",
            ActivationKind::PositiveElu => "positive_elu",
            ActivationKind::Silu => "silu",
            ActivationKind::Softmax => "softmax",
        };
        f.write_str(name)
    }
}

/// Applies an activation function independently to every input node.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub kind: ActivationKind,
    /// Scale of the negative branch, only read by [`ActivationKind::Elu`].
    pub alpha: f32,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind, alpha: 1.0 }
    }

    pub fn elu(alpha: f32) -> Self {
        Self {
            kind: ActivationKind::Elu,
            alpha,
        }
    }
}

impl From<ActivationKind> for Activation {
    fn from(kind: ActivationKind) -> Self {
        Self::new(kind)
    }
}

pub struct ActivationProcessor<'g> {
    base: BaseProcessor<'g, Activation>,
}

impl Model for Activation {
    type Processor<'g> = ActivationProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        Ok(ActivationProcessor {
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

impl ActivationProcessor<'_> {
    fn apply(&self, x: Node) -> GraphResult<Node> {
        let g = self.base.graph;
        match self.base.model.kind {
            ActivationKind::Identity => Ok(x),
            ActivationKind::Tanh => g.tanh(x),
            ActivationKind::Sigmoid => g.sigmoid(x),
            ActivationKind::Relu => g.relu(x),
            ActivationKind::Gelu => g.gelu(x),
            ActivationKind::Elu => g.elu(x, g.constant(self.base.model.alpha)),
            ActivationKind::PositiveElu => g.positive_elu(x),
            ActivationKind::Silu => g.silu(x),
            ActivationKind::Softmax => g.softmax(x),
        }
    }
}

impl<'g> Processor<'g> for ActivationProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
    }

    /// The identity activation returns its inputs without appending nodes.
    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        Ok(xs
            .iter()
            .map(|x| self.apply(*x))
            .collect::<GraphResult<Vec<_>>>()?)
    }
}
