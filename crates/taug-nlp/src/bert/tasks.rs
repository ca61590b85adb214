//! Plain-value entry points for a request layer.
//!
//! Each call opens its own [`Graph`], runs one BERT processor in inference
//! mode and copies the results out, so nothing graph-bound crosses this API
//! and a shared [`BertModel`] can serve concurrent requests.

use anyhow::{ensure, Result};
use rayon::prelude::*;
use serde::Serialize;
use taug_nn::{Context, Graph, Model, Node};

use super::model::{BertModel, BertProcessor};
use super::{CLS_TOKEN, MASK_TOKEN, PAD_TOKEN, SEP_TOKEN};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLabel {
    pub token: String,
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceLabel {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskedPrediction {
    pub position: usize,
    pub word: String,
    pub probability: f32,
}

/// Answer span over token positions, `start..=end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub start: usize,
    pub end: usize,
    pub tokens: Vec<String>,
    pub score: f32,
}

fn with_processor<T>(
    model: &BertModel,
    f: impl FnOnce(&Graph, &BertProcessor<'_>) -> Result<T>,
) -> Result<T> {
    let graph = Graph::new();
    let processor = model.new_processor(Context::inference(&graph))?;
    f(&graph, &processor)
}

fn vectors(g: &Graph, nodes: &[Node]) -> Result<Vec<Vec<f32>>> {
    Ok(nodes
        .iter()
        .map(|n| g.vector(*n))
        .collect::<Result<Vec<_>, _>>()?)
}

/// Index and softmax probability of the largest logit.
fn best(g: &Graph, logits: Node) -> Result<(usize, f32)> {
    let probs = g.vector(g.softmax(logits)?)?;
    probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| anyhow::anyhow!("no logits to choose from"))
}

fn label(model: &BertModel, id: usize) -> String {
    model.labels().get(id).cloned().unwrap_or_default()
}

pub fn encode_tokens(model: &BertModel, tokens: &[&str]) -> Result<Vec<Vec<f32>>> {
    with_processor(model, |g, p| vectors(g, &p.encode(tokens)?))
}

/// Encodes every sequence on its own graph, in parallel.
pub fn encode_batch(model: &BertModel, batch: &[Vec<String>]) -> Result<Vec<Vec<Vec<f32>>>> {
    batch
        .par_iter()
        .map(|tokens| {
            let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
            encode_tokens(model, &tokens)
        })
        .collect()
}

pub fn discriminate_tokens(model: &BertModel, tokens: &[&str]) -> Result<Vec<u8>> {
    with_processor(model, |_, p| p.discriminate(&p.encode(tokens)?))
}

pub fn classify_tokens(model: &BertModel, tokens: &[&str]) -> Result<Vec<TokenLabel>> {
    with_processor(model, |g, p| {
        let logits = p.token_classification(&p.encode(tokens)?)?;
        tokens
            .iter()
            .zip(logits)
            .map(|(token, logits)| -> Result<TokenLabel> {
                let (id, confidence) = best(g, logits)?;
                Ok(TokenLabel {
                    token: token.to_string(),
                    label: label(model, id),
                    confidence,
                })
            })
            .collect()
    })
}

pub fn classify_sequence(model: &BertModel, tokens: &[&str]) -> Result<SequenceLabel> {
    with_processor(model, |g, p| {
        let logits = p.sequence_classification(&p.encode(tokens)?)?;
        let (id, confidence) = best(g, logits)?;
        Ok(SequenceLabel {
            label: label(model, id),
            confidence,
        })
    })
}

/// Most likely vocabulary word for every `[MASK]` token.
pub fn predict_masked_tokens(model: &BertModel, tokens: &[&str]) -> Result<Vec<MaskedPrediction>> {
    let masked: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| **t == MASK_TOKEN)
        .map(|(i, _)| i)
        .collect();
    if masked.is_empty() {
        return Ok(Vec::new());
    }
    with_processor(model, |g, p| {
        let predictions = p.predict_masked(&p.encode(tokens)?, &masked)?;
        predictions
            .into_iter()
            .map(|(position, logits)| -> Result<MaskedPrediction> {
                let (id, probability) = best(g, logits)?;
                let word = match model.vocabulary().word(id) {
                    Some(word) => word.to_string(),
                    None => {
                        log::warn!("predicted id {id} is outside the vocabulary");
                        String::new()
                    }
                };
                Ok(MaskedPrediction {
                    position,
                    word,
                    probability,
                })
            })
            .collect()
    })
}

/// Highest-scoring answer span of at most `max_len` tokens.
///
/// The score of a span is its start logit plus its end logit. Special tokens
/// never start or end an answer. Returns `None` when no position qualifies.
pub fn answer_span(model: &BertModel, tokens: &[&str], max_len: usize) -> Result<Option<Answer>> {
    ensure!(max_len > 0, "maximum answer length must be positive");
    with_processor(model, |g, p| {
        let logits = p.span_classification(&p.encode(tokens)?)?;
        let start = logits
            .start
            .iter()
            .map(|n| g.scalar(*n))
            .collect::<Result<Vec<_>, _>>()?;
        let end = logits
            .end
            .iter()
            .map(|n| g.scalar(*n))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(best_span(tokens, &start, &end, max_len))
    })
}

fn is_special(token: &str) -> bool {
    matches!(token, CLS_TOKEN | SEP_TOKEN | PAD_TOKEN)
}

pub(crate) fn best_span(
    tokens: &[&str],
    start: &[f32],
    end: &[f32],
    max_len: usize,
) -> Option<Answer> {
    let mut best: Option<(usize, usize, f32)> = None;
    for i in (0..tokens.len()).filter(|i| !is_special(tokens[*i])) {
        let last = tokens.len().min(i.saturating_add(max_len));
        for j in (i..last).filter(|j| !is_special(tokens[*j])) {
            let score = start[i] + end[j];
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((i, j, score));
            }
        }
    }
    best.map(|(start, end, score)| Answer {
        start,
        end,
        tokens: tokens[start..=end].iter().map(|t| t.to_string()).collect(),
        score,
    })
}
