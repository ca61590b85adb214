//! Primitive operators.
//!
//! Each operator validates its operands, computes the output value eagerly and
//! appends exactly one node. Nothing here draws random numbers, so identical
//! inputs always produce bit-identical outputs.

use std::sync::Arc;

use libm::erff;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn};

use super::{Graph, Node, Op};
use crate::error::{GraphError, GraphResult};

const SQRT_2_INV: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[inline(always)]
pub(crate) fn gelu_scalar(x: f32) -> f32 {
    0.5 * x * (1.0 + erff(x * SQRT_2_INV))
}

#[inline(always)]
pub(crate) fn sigmoid_scalar(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline(always)]
pub(crate) fn silu_scalar(x: f32) -> f32 {
    x * sigmoid_scalar(x)
}

#[inline(always)]
pub(crate) fn elu_scalar(x: f32, alpha: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        alpha * (x.exp() - 1.0)
    }
}

fn scalar_value(value: f32) -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(&[]), value)
}

fn as_vector<'a>(op: &'static str, value: &'a ArrayD<f32>) -> GraphResult<ArrayView1<'a, f32>> {
    value
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| GraphError::RankMismatch {
            op,
            expected: 1,
            shape: value.shape().to_vec(),
        })
}

fn as_matrix<'a>(op: &'static str, value: &'a ArrayD<f32>) -> GraphResult<ArrayView2<'a, f32>> {
    value
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| GraphError::RankMismatch {
            op,
            expected: 2,
            shape: value.shape().to_vec(),
        })
}

impl Graph {
    fn values(&self, xs: &[Node]) -> GraphResult<Vec<Arc<ArrayD<f32>>>> {
        xs.iter().map(|x| self.value(*x)).collect()
    }

    fn elementwise(
        &self,
        op: Op,
        a: Node,
        b: Node,
        f: impl Fn(f32, f32) -> f32,
    ) -> GraphResult<Node> {
        let (va, vb) = (self.value(a)?, self.value(b)?);
        if va.shape() != vb.shape() {
            return Err(GraphError::ShapeMismatch {
                op: op.name(),
                lhs: va.shape().to_vec(),
                rhs: vb.shape().to_vec(),
            });
        }
        let mut out = (*va).clone();
        out.zip_mut_with(&*vb, |x, &y| *x = f(*x, y));
        Ok(self.push(op, vec![a, b], out))
    }

    fn with_scalar(
        &self,
        op: Op,
        x: Node,
        scalar: Node,
        f: impl Fn(f32, f32) -> f32,
    ) -> GraphResult<Node> {
        let vx = self.value(x)?;
        let s = self.scalar_operand(op.name(), scalar)?;
        let out = vx.mapv(|v| f(v, s));
        Ok(self.push(op, vec![x, scalar], out))
    }

    fn scalar_operand(&self, op: &'static str, scalar: Node) -> GraphResult<f32> {
        let value = self.value(scalar)?;
        match value.iter().next() {
            Some(v) if value.len() == 1 => Ok(*v),
            _ => Err(GraphError::ShapeMismatch {
                op,
                lhs: value.shape().to_vec(),
                rhs: Vec::new(),
            }),
        }
    }

    fn unary(&self, op: Op, x: Node, f: impl Fn(f32) -> f32) -> GraphResult<Node> {
        let out = self.value(x)?.mapv(f);
        Ok(self.push(op, vec![x], out))
    }

    // --- Element-wise binary ---

    pub fn add(&self, a: Node, b: Node) -> GraphResult<Node> {
        self.elementwise(Op::Add, a, b, |x, y| x + y)
    }

    pub fn sub(&self, a: Node, b: Node) -> GraphResult<Node> {
        self.elementwise(Op::Sub, a, b, |x, y| x - y)
    }

    /// Element-wise (Hadamard) product.
    pub fn prod(&self, a: Node, b: Node) -> GraphResult<Node> {
        self.elementwise(Op::Prod, a, b, |x, y| x * y)
    }

    pub fn div(&self, a: Node, b: Node) -> GraphResult<Node> {
        self.elementwise(Op::Div, a, b, |x, y| x / y)
    }

    // --- Tensor-scalar ---

    pub fn add_scalar(&self, x: Node, scalar: Node) -> GraphResult<Node> {
        self.with_scalar(Op::AddScalar, x, scalar, |v, s| v + s)
    }

    pub fn sub_scalar(&self, x: Node, scalar: Node) -> GraphResult<Node> {
        self.with_scalar(Op::SubScalar, x, scalar, |v, s| v - s)
    }

    pub fn prod_scalar(&self, x: Node, scalar: Node) -> GraphResult<Node> {
        self.with_scalar(Op::ProdScalar, x, scalar, |v, s| v * s)
    }

    pub fn div_scalar(&self, x: Node, scalar: Node) -> GraphResult<Node> {
        self.with_scalar(Op::DivScalar, x, scalar, |v, s| v / s)
    }

    // --- Linear algebra ---

    /// Matrix product of a `[m, k]` matrix with a `[k]` vector or a `[k, n]` matrix.
    pub fn mul(&self, a: Node, b: Node) -> GraphResult<Node> {
        let (va, vb) = (self.value(a)?, self.value(b)?);
        let m = as_matrix("mul", &va)?;
        let mismatch = || GraphError::ShapeMismatch {
            op: "mul",
            lhs: va.shape().to_vec(),
            rhs: vb.shape().to_vec(),
        };
        let out = match vb.ndim() {
            1 => {
                let v = as_vector("mul", &vb)?;
                if m.ncols() != v.len() {
                    return Err(mismatch());
                }
                m.dot(&v).into_dyn()
            }
            2 => {
                let other = as_matrix("mul", &vb)?;
                if m.ncols() != other.nrows() {
                    return Err(mismatch());
                }
                m.dot(&other).into_dyn()
            }
            _ => return Err(mismatch()),
        };
        Ok(self.push(Op::Mul, vec![a, b], out))
    }

    /// Inner product of two tensors of the same shape.
    pub fn dot(&self, a: Node, b: Node) -> GraphResult<Node> {
        let (va, vb) = (self.value(a)?, self.value(b)?);
        if va.shape() != vb.shape() {
            return Err(GraphError::ShapeMismatch {
                op: "dot",
                lhs: va.shape().to_vec(),
                rhs: vb.shape().to_vec(),
            });
        }
        let sum = va.iter().zip(vb.iter()).map(|(x, y)| x * y).sum();
        Ok(self.push(Op::Dot, vec![a, b], scalar_value(sum)))
    }

    pub fn transpose(&self, x: Node) -> GraphResult<Node> {
        let vx = self.value(x)?;
        let out = as_matrix("transpose", &vx)?.t().to_owned().into_dyn();
        Ok(self.push(Op::Transpose, vec![x], out))
    }

    // --- Element-wise unary ---

    pub fn identity(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Identity, x, |v| v)
    }

    pub fn neg(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Neg, x, |v| -v)
    }

    pub fn exp(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Exp, x, f32::exp)
    }

    pub fn sqrt(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Sqrt, x, f32::sqrt)
    }

    pub fn square(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Square, x, |v| v * v)
    }

    pub fn tanh(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Tanh, x, f32::tanh)
    }

    pub fn sigmoid(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::Sigmoid, x, sigmoid_scalar)
    }

    pub fn relu(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::ReLU, x, |v| v.max(0.0))
    }

    /// Exact GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`.
    pub fn gelu(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::GELU, x, gelu_scalar)
    }

    pub fn silu(&self, x: Node) -> GraphResult<Node> {
        self.unary(Op::SiLU, x, silu_scalar)
    }

    /// ELU with the scale `alpha` supplied as a scalar node.
    pub fn elu(&self, x: Node, alpha: Node) -> GraphResult<Node> {
        self.with_scalar(Op::ELU, x, alpha, elu_scalar)
    }

    /// Softmax over a vector, shifted by its maximum for stability.
    pub fn softmax(&self, x: Node) -> GraphResult<Node> {
        let vx = self.value(x)?;
        let v = as_vector("softmax", &vx)?;
        if v.is_empty() {
            return Err(GraphError::EmptyOperandList { op: "softmax" });
        }
        let max = v.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
        let exps = v.mapv(|x| (x - max).exp());
        let total = exps.sum();
        let out = (exps / total).into_dyn();
        Ok(self.push(Op::Softmax, vec![x], out))
    }

    // --- Reductions ---

    pub fn reduce_sum(&self, x: Node) -> GraphResult<Node> {
        let sum = self.value(x)?.sum();
        Ok(self.push(Op::ReduceSum, vec![x], scalar_value(sum)))
    }

    pub fn reduce_mean(&self, x: Node) -> GraphResult<Node> {
        let vx = self.value(x)?;
        if vx.is_empty() {
            return Err(GraphError::EmptyOperandList { op: "reduce_mean" });
        }
        let mean = vx.sum() / vx.len() as f32;
        Ok(self.push(Op::ReduceMean, vec![x], scalar_value(mean)))
    }

    // --- Layout ---

    /// Concatenates vectors end to end.
    pub fn concat(&self, xs: &[Node]) -> GraphResult<Node> {
        if xs.is_empty() {
            return Err(GraphError::EmptyOperandList { op: "concat" });
        }
        let values = self.values(xs)?;
        let views = values
            .iter()
            .map(|v| as_vector("concat", v))
            .collect::<GraphResult<Vec<_>>>()?;
        let out = ndarray::concatenate(Axis(0), &views)
            .map_err(|_| GraphError::RankMismatch {
                op: "concat",
                expected: 1,
                shape: Vec::new(),
            })?
            .into_dyn();
        Ok(self.push(Op::Concat, xs.to_vec(), out))
    }

    /// Stacks `n` vectors of length `d` into a `[n, d]` matrix.
    pub fn stack(&self, xs: &[Node]) -> GraphResult<Node> {
        if xs.is_empty() {
            return Err(GraphError::EmptyOperandList { op: "stack" });
        }
        let values = self.values(xs)?;
        let width = as_vector("stack", &values[0])?.len();
        let mut out = Array2::<f32>::zeros((xs.len(), width));
        for (mut row, value) in out.outer_iter_mut().zip(values.iter()) {
            let v = as_vector("stack", value)?;
            if v.len() != width {
                return Err(GraphError::ShapeMismatch {
                    op: "stack",
                    lhs: values[0].shape().to_vec(),
                    rhs: value.shape().to_vec(),
                });
            }
            row.assign(&v);
        }
        Ok(self.push(Op::Stack, xs.to_vec(), out.into_dyn()))
    }

    /// Extracts element `i` of a vector as a scalar node.
    pub fn at(&self, x: Node, i: usize) -> GraphResult<Node> {
        let vx = self.value(x)?;
        let v = as_vector("at", &vx)?;
        let value = *v.get(i).ok_or(GraphError::IndexOutOfBounds {
            op: "at",
            index: i,
            len: v.len(),
        })?;
        Ok(self.push(Op::At(i), vec![x], scalar_value(value)))
    }

    /// Extracts `x[start..end]` of a vector.
    pub fn slice(&self, x: Node, start: usize, end: usize) -> GraphResult<Node> {
        let vx = self.value(x)?;
        let v = as_vector("slice", &vx)?;
        if start > end || end > v.len() {
            return Err(GraphError::IndexOutOfBounds {
                op: "slice",
                index: end.max(start),
                len: v.len(),
            });
        }
        let out: Array1<f32> = v.slice(ndarray::s![start..end]).to_owned();
        Ok(self.push(Op::Slice { start, end }, vec![x], out.into_dyn()))
    }

    /// Extracts row `i` of a matrix as a vector.
    pub fn row(&self, x: Node, i: usize) -> GraphResult<Node> {
        let vx = self.value(x)?;
        let m = as_matrix("row", &vx)?;
        if i >= m.nrows() {
            return Err(GraphError::IndexOutOfBounds {
                op: "row",
                index: i,
                len: m.nrows(),
            });
        }
        let out = m.row(i).to_owned().into_dyn();
        Ok(self.push(Op::Row(i), vec![x], out))
    }
}
