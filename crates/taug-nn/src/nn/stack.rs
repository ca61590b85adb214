//! Sequential composition of layers.

use anyhow::Result;

use super::layer::{Layer, LayerProcessor, WordsEncoder};
use super::{BaseProcessor, Context, Mode, Model, Processor};
use crate::error::ConfigError;
use crate::graph::{Graph, Node};
use crate::param::{ParamVisitor, ParamVisitorMut};

/// Applies its layers in order: `Stack([L1, .., Ln]).forward(x) = Ln(..L1(x))`.
///
/// An empty stack is the identity.
#[derive(Debug, Default)]
pub struct Stack {
    pub layers: Vec<Layer>,
}

impl Stack {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn is_words_encoder(&self) -> bool {
        self.layers.first().is_some_and(Layer::is_words_encoder)
    }
}

impl FromIterator<Layer> for Stack {
    fn from_iter<I: IntoIterator<Item = Layer>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

pub struct StackProcessor<'g> {
    base: BaseProcessor<'g, Stack>,
    layers: Vec<LayerProcessor<'g>>,
}

impl Model for Stack {
    type Processor<'g> = StackProcessor<'g>;

    fn new_processor<'g>(&'g self, ctx: Context<'g>) -> Result<Self::Processor<'g>, ConfigError> {
        let layers = self
            .layers
            .iter()
            .map(|layer| layer.new_processor(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "stack processor with {} layer(s) on graph {} ({})",
            layers.len(),
            ctx.graph.id(),
            ctx.mode
        );
        Ok(StackProcessor {
            base: BaseProcessor::new(self, ctx),
            layers,
        })
    }

    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        for (i, layer) in self.layers.iter().enumerate() {
            v.scoped(&i.to_string(), |v| layer.visit_params(v))?;
        }
        Ok(())
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            v.scoped(&i.to_string(), |v| layer.visit_params_mut(v))?;
        }
        Ok(())
    }
}

impl<'g> StackProcessor<'g> {
    pub fn layers(&self) -> &[LayerProcessor<'g>] {
        &self.layers
    }
}

impl<'g> Processor<'g> for StackProcessor<'g> {
    fn graph(&self) -> &'g Graph {
        self.base.graph
    }

    fn mode(&self) -> Mode {
        self.base.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.base.mode = mode;
        for layer in &mut self.layers {
            layer.set_mode(mode);
        }
    }

    fn forward(&self, xs: &[Node]) -> Result<Vec<Node>> {
        let mut out = xs.to_vec();
        for layer in &self.layers {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }
}

impl<'g> WordsEncoder<'g> for StackProcessor<'g> {
    /// Encodes with the first layer and feeds the result through the rest.
    ///
    /// # Panics
    ///
    /// Panics when the first layer is not a words encoder.
    fn encode(&self, words: &[&str]) -> Result<Vec<Node>> {
        let Some((first, rest)) = self.layers.split_first() else {
            panic!("an empty stack cannot encode words");
        };
        let mut out = first.encode(words)?;
        for layer in rest {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }
}
