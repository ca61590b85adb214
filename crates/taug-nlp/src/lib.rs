//! Natural language models built on `taug-nn`.
//!
//! - [`bert`]: a BERT encoder with masked-LM, discriminator, pooling,
//!   classification and span heads, plus a plain-value task API.
//! - [`stacked_embeddings`]: several word encoders concatenated per word and
//!   projected by one linear layer.
//! - [`vocabulary`]: the token/id mapping shared by the embedding layers.

pub mod bert;
pub mod stacked_embeddings;
pub mod vocabulary;

pub use bert::{BertConfig, BertModel, BertProcessor};
pub use stacked_embeddings::{Encoder, StackedEmbeddings, StackedEmbeddingsProcessor};
pub use vocabulary::Vocabulary;
