//! Learned parameters and the visitors that name, export and load them.
//!
//! A [`Param`] is the persistent storage behind a graph leaf. Graphs bind it by
//! sharing its `Arc`, so evaluating a model never copies or mutates weights.
//! The only mutation path is [`Param::replace`], which needs `&mut` access to
//! the owning model and therefore cannot race with a live processor tree.
//!
//! Parameter names are dotted paths built while visiting a model tree, for
//! example `encoder.layers.0.attention.query.weight`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use ndarray::{ArrayD, IxDyn};

use crate::nn::Model;

static PARAM_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

/// A trainable tensor owned by a model.
pub struct Param {
    id: ParamId,
    value: Arc<ArrayD<f32>>,
}

impl Param {
    pub fn new(value: ArrayD<f32>) -> Self {
        Self {
            id: ParamId(PARAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed)),
            value: Arc::new(value),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Number of scalar weights.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Replaces the stored value, keeping the identity. The shape must not change.
    ///
    /// Graphs created before the call keep observing the previous value.
    pub fn replace(&mut self, value: ArrayD<f32>) -> Result<()> {
        ensure!(
            value.shape() == self.shape(),
            "parameter shape mismatch: expected {:?}, got {:?}",
            self.shape(),
            value.shape()
        );
        self.value = Arc::new(value);
        Ok(())
    }

    pub(crate) fn shared(&self) -> Arc<ArrayD<f32>> {
        Arc::clone(&self.value)
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("id", &self.id)
            .field("shape", &self.shape())
            .finish()
    }
}

#[derive(Default)]
struct ParamPath {
    segments: Vec<String>,
}

impl ParamPath {
    fn push(&mut self, segment: &str) -> Result<()> {
        check_segment(segment)?;
        self.segments.push(segment.to_string());
        Ok(())
    }

    fn pop(&mut self) {
        let _ = self.segments.pop();
    }

    fn join(&self, leaf: &str, out: &mut String) {
        out.clear();
        for seg in &self.segments {
            out.push_str(seg);
            out.push('.');
        }
        out.push_str(leaf);
    }
}

fn check_segment(segment: &str) -> Result<()> {
    ensure!(!segment.is_empty(), "parameter path segments must be non-empty");
    ensure!(
        !segment.contains('.'),
        "parameter path segments must not contain '.', got '{segment}'"
    );
    Ok(())
}

/// Read-only walk over a model's parameters.
pub struct ParamVisitor<'a> {
    path: ParamPath,
    scratch: String,
    f: &'a mut dyn FnMut(&str, &Param) -> Result<()>,
}

impl<'a> ParamVisitor<'a> {
    pub fn new(f: &'a mut dyn FnMut(&str, &Param) -> Result<()>) -> Self {
        Self {
            path: ParamPath::default(),
            scratch: String::new(),
            f,
        }
    }

    /// Runs `inner` with `segment` appended to the current path.
    pub fn scoped(
        &mut self,
        segment: &str,
        inner: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.path.push(segment)?;
        let out = inner(self);
        self.path.pop();
        out
    }

    pub fn param(&mut self, leaf: &str, param: &Param) -> Result<()> {
        check_segment(leaf)?;
        self.path.join(leaf, &mut self.scratch);
        (self.f)(self.scratch.as_str(), param)
    }
}

/// Mutable walk over a model's parameters, used for loading.
pub struct ParamVisitorMut<'a> {
    path: ParamPath,
    scratch: String,
    f: &'a mut dyn FnMut(&str, &mut Param) -> Result<()>,
}

impl<'a> ParamVisitorMut<'a> {
    pub fn new(f: &'a mut dyn FnMut(&str, &mut Param) -> Result<()>) -> Self {
        Self {
            path: ParamPath::default(),
            scratch: String::new(),
            f,
        }
    }

    pub fn scoped(
        &mut self,
        segment: &str,
        inner: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.path.push(segment)?;
        let out = inner(self);
        self.path.pop();
        out
    }

    pub fn param(&mut self, leaf: &str, param: &mut Param) -> Result<()> {
        check_segment(leaf)?;
        self.path.join(leaf, &mut self.scratch);
        (self.f)(self.scratch.as_str(), param)
    }
}

/// Named tensors a model can be loaded from.
///
/// The on-disk format behind a source is not this crate's concern.
pub trait ParamSource {
    fn tensor(&self, name: &str) -> Option<ArrayD<f32>>;
}

impl<S: BuildHasher> ParamSource for HashMap<String, ArrayD<f32>, S> {
    fn tensor(&self, name: &str) -> Option<ArrayD<f32>> {
        self.get(name).cloned()
    }
}

impl ParamSource for BTreeMap<String, ArrayD<f32>> {
    fn tensor(&self, name: &str) -> Option<ArrayD<f32>> {
        self.get(name).cloned()
    }
}

/// Outcome of [`load_params`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Copies every tensor `source` provides into the matching parameter of `model`.
///
/// Parameters absent from the source keep their current value and are listed
/// in [`LoadReport::missing`]. A tensor with the wrong shape is an error.
pub fn load_params<M: Model>(model: &mut M, source: &dyn ParamSource) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let mut load_one = |name: &str, param: &mut Param| -> Result<()> {
        match source.tensor(name) {
            Some(value) => {
                param
                    .replace(value)
                    .map_err(|e| anyhow!("cannot load '{name}': {e}"))?;
                report.loaded.push(name.to_string());
            }
            None => report.missing.push(name.to_string()),
        }
        Ok(())
    };
    let mut visitor = ParamVisitorMut::new(&mut load_one);
    model.visit_params_mut(&mut visitor)?;

    if !report.missing.is_empty() {
        log::warn!(
            "{} parameter(s) not found in source, first: '{}'",
            report.missing.len(),
            report.missing[0]
        );
    }
    log::debug!("loaded {} parameter(s)", report.loaded.len());
    Ok(report)
}

/// Returns a copy of every parameter keyed by its dotted name.
pub fn export_params<M: Model>(model: &M) -> Result<BTreeMap<String, ArrayD<f32>>> {
    let mut out = BTreeMap::new();
    let mut export_one = |name: &str, param: &Param| -> Result<()> {
        ensure!(
            out.insert(name.to_string(), param.value().clone()).is_none(),
            "duplicate parameter name '{name}'"
        );
        Ok(())
    };
    let mut visitor = ParamVisitor::new(&mut export_one);
    model.visit_params(&mut visitor)?;
    Ok(out)
}

/// Returns the dotted names of every parameter, in visiting order.
pub fn param_names<M: Model>(model: &M) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut name_one = |name: &str, _: &Param| -> Result<()> {
        ensure!(
            seen.insert(name.to_string()),
            "duplicate parameter name '{name}'"
        );
        names.push(name.to_string());
        Ok(())
    };
    let mut visitor = ParamVisitor::new(&mut name_one);
    model.visit_params(&mut visitor)?;
    Ok(names)
}

/// Total number of scalar weights in `model`.
pub fn param_count<M: Model>(model: &M) -> Result<usize> {
    let mut count = 0;
    let mut count_one = |_: &str, param: &Param| -> Result<()> {
        count += param.len();
        Ok(())
    };
    let mut visitor = ParamVisitor::new(&mut count_one);
    model.visit_params(&mut visitor)?;
    Ok(count)
}
