//! Operators defined purely in terms of other operators.
//!
//! None of these compute values directly; every node they produce comes from a
//! primitive in `ops.rs`. Operands are validated before the first node is
//! appended, so a failed call leaves the graph unchanged like a primitive does.

use super::{Graph, Node, Op};
use crate::error::{GraphError, GraphResult};

impl Graph {
    /// `ELU(x, 1) + 1`, which is `exp(x)` for `x <= 0`.
    ///
    /// The result is never negative. It is strictly positive only while
    /// `exp(x) - 1` is distinguishable from `-1` in f32; below roughly `-17`
    /// the output rounds to exactly `0.0`.
    pub fn positive_elu(&self, x: Node) -> GraphResult<Node> {
        self.check(x)?;
        let elu = self.elu(x, self.constant(1.0))?;
        self.add_scalar(elu, self.constant(1.0))
    }

    /// `x1 + x2 + ... + xn` through repeated [`Graph::add`].
    ///
    /// A single operand is returned unchanged. Fails on an empty slice.
    pub fn sum(&self, xs: &[Node]) -> GraphResult<Node> {
        let (first, rest) = xs
            .split_first()
            .ok_or(GraphError::EmptyOperandList { op: "sum" })?;
        let shape = self.shape(*first)?;
        for x in rest {
            let other = self.shape(*x)?;
            if other != shape {
                return Err(GraphError::ShapeMismatch {
                    op: Op::Add.name(),
                    lhs: shape,
                    rhs: other,
                });
            }
        }
        rest.iter().try_fold(*first, |acc, x| self.add(acc, *x))
    }

    /// `sum(xs) / n`, with `n` the number of operands. Fails on an empty slice.
    pub fn mean(&self, xs: &[Node]) -> GraphResult<Node> {
        if xs.is_empty() {
            return Err(GraphError::EmptyOperandList { op: "mean" });
        }
        let sum = self.sum(xs)?;
        self.div_scalar(sum, self.constant(xs.len() as f32))
    }

    /// Splits a vector into one scalar node per element, in index order.
    pub fn separate_vec(&self, x: Node) -> GraphResult<Vec<Node>> {
        let len = self.value(x)?.len();
        (0..len).map(|i| self.at(x, i)).collect()
    }
}
