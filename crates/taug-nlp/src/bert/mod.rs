//! BERT: token embeddings, a transformer encoder and the task heads built on it.
//!
//! ```text
//! tokens ─► BertEmbeddings ─► BertEncoder ─┬─► Predictor        (masked LM logits)
//!                                          ├─► Discriminator    (replaced-token logits)
//!                                          ├─► SpanClassifier   (start/end logits)
//!                                          ├─► Classifier       (per-token labels)
//!                                          └─► Pooler ─┬─► seq_relationship
//!                                                      └─► Classifier (sequence label)
//! ```
//!
//! All heads emit raw logits. Turning them into probabilities is left to the
//! caller; [`tasks`] does it for the plain-value API.

pub mod classifier;
pub mod config;
pub mod discriminator;
pub mod embeddings;
pub mod encoder;
pub mod model;
pub mod pooler;
pub mod predictor;
pub mod span_classifier;
pub mod tasks;


pub use config::BertConfig;
pub use model::{BertModel, BertProcessor};
pub use span_classifier::SpanLogits;

pub const CONFIG_FILE: &str = "config.json";
pub const VOCAB_FILE: &str = "vocab.txt";

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const MASK_TOKEN: &str = "[MASK]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const PAD_TOKEN: &str = "[PAD]";
