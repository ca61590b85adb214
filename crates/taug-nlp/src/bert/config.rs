use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use taug_nn::nn::ActivationKind;

/// Hyperparameters of a BERT model, read from a `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    #[serde(default = "default_hidden_act", alias = "activation_function")]
    pub hidden_act: ActivationKind,

    #[serde(alias = "n_embd")]
    pub hidden_size: usize,

    #[serde(alias = "n_inner")]
    pub intermediate_size: usize,

    #[serde(alias = "n_positions")]
    pub max_position_embeddings: usize,

    #[serde(alias = "n_head")]
    pub num_attention_heads: usize,

    #[serde(alias = "n_layer")]
    pub num_hidden_layers: usize,

    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,

    pub vocab_size: usize,

    #[serde(default = "default_layer_norm_eps", alias = "layer_norm_epsilon")]
    pub layer_norm_eps: f32,

    // Keys are decimal label ids, as written by Hugging Face.
    #[serde(default)]
    pub id2label: HashMap<String, String>,
}

fn default_hidden_act() -> ActivationKind {
    ActivationKind::Gelu
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f32 {
    1e-12
}

impl BertConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("invalid BERT config in {}", path.display()))?;
        log::info!(
            "loaded BERT config: {} layers, hidden size {}, {} heads",
            config.num_hidden_layers,
            config.hidden_size,
            config.num_attention_heads
        );
        Ok(config)
    }

    /// Classification labels ordered by id.
    ///
    /// Without `id2label` a binary task is assumed: `["LABEL_0", "LABEL_1"]`.
    pub fn labels(&self) -> Result<Vec<String>> {
        if self.id2label.is_empty() {
            return Ok(vec!["LABEL_0".to_string(), "LABEL_1".to_string()]);
        }
        let mut labels = vec![None; self.id2label.len()];
        for (key, label) in &self.id2label {
            let id: usize = key
                .parse()
                .with_context(|| format!("label id '{key}' is not an integer"))?;
            match labels.get_mut(id) {
                Some(slot) => *slot = Some(label.clone()),
                None => bail!(
                    "label id {id} is out of range for {} labels",
                    self.id2label.len()
                ),
            }
        }
        labels
            .into_iter()
            .enumerate()
            .map(|(id, label)| label.with_context(|| format!("missing label for id {id}")))
            .collect()
    }
}
