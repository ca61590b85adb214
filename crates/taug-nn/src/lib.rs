//! Stackable neural layers over an append-only computation graph.
//!
//! The crate separates *what* a layer is from *how* it runs:
//!
//! - [`nn::Model`]s own parameters and structure and are shared read-only.
//! - [`nn::Processor`]s bind a model to one [`graph::Graph`] and one
//!   [`nn::Mode`] and append nodes when applied to inputs.
//!
//! ```no_run
//! use taug_nn::nn::{Activation, ActivationKind, Linear, Stack};
//! use taug_nn::{Context, Graph, Model, Processor};
//! # fn main() -> anyhow::Result<()> {
//! let model = Stack::new(vec![
//!     Linear::new(4, 3).into(),
//!     Activation::new(ActivationKind::Tanh).into(),
//! ]);
//! let graph = Graph::new();
//! let processor = model.new_processor(Context::inference(&graph))?;
//! let x = graph.input(ndarray::arr1(&[1.0, 2.0, 3.0, 4.0]).into_dyn());
//! let y = processor.forward(&[x])?;
//! println!("{:?}", graph.vector(y[0])?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod nn;
pub mod param;

pub use error::{ConfigError, GraphError, GraphResult};
pub use graph::{Graph, Node, Op};
pub use nn::{Context, Layer, LayerProcessor, Mode, Model, Processor, WordsEncoder};
pub use param::{export_params, load_params, LoadReport, Param, ParamSource};
