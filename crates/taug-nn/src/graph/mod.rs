//! Append-only computation graph for a single evaluation session.
//!
//! A [`Graph`] records every value produced while a processor tree runs: leaf
//! values (constants, inputs and parameters) and the outputs of operators
//! applied to earlier nodes. Values are computed eagerly when a node is
//! appended, so the creation order of nodes is also a valid topological order
//! for a later backward pass.
//!
//! ```text
//! Model (params, persistent)
//!    |
//!    | new_processor(Context { graph, mode })
//!    v
//! Processor tree ──► Graph::add / mul / concat / ...  ──► Node handles
//! ```
//!
//! Parameter leaves share the parameter's storage through an `Arc`; the graph
//! never copies or mutates it. All other node values are owned by the graph and
//! released together with it.

mod composite;
mod ops;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};

use crate::error::{GraphError, GraphResult};
use crate::param::{Param, ParamId};

static GRAPH_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Operator tag recorded on every node.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Constant,
    Input,
    Param,
    Add,
    Sub,
    Prod,
    Div,
    AddScalar,
    SubScalar,
    ProdScalar,
    DivScalar,
    Mul,
    Dot,
    Identity,
    Neg,
    Exp,
    Sqrt,
    Square,
    Tanh,
    Sigmoid,
    ReLU,
    GELU,
    SiLU,
    ELU,
    Softmax,
    ReduceSum,
    ReduceMean,
    Concat,
    Stack,
    At(usize),
    Slice { start: usize, end: usize },
    Row(usize),
    Transpose,
}

impl Op {
    /// Returns true for nodes without operands.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Constant | Op::Input | Op::Param)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Constant => "constant",
            Op::Input => "input",
            Op::Param => "param",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Prod => "prod",
            Op::Div => "div",
            Op::AddScalar => "add_scalar",
            Op::SubScalar => "sub_scalar",
            Op::ProdScalar => "prod_scalar",
            Op::DivScalar => "div_scalar",
            Op::Mul => "mul",
            Op::Dot => "dot",
            Op::Identity => "identity",
            Op::Neg => "neg",
            Op::Exp => "exp",
            Op::Sqrt => "sqrt",
            Op::Square => "square",
            Op::Tanh => "tanh",
            Op::Sigmoid => "sigmoid",
            Op::ReLU => "relu",
            Op::GELU => "gelu",
            Op::SiLU => "silu",
            Op::ELU => "elu",
            Op::Softmax => "softmax",
            Op::ReduceSum => "reduce_sum",
            Op::ReduceMean => "reduce_mean",
            Op::Concat => "concat",
            Op::Stack => "stack",
            Op::At(_) => "at",
            Op::Slice { .. } => "slice",
            Op::Row(_) => "row",
            Op::Transpose => "transpose",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to a node of one specific [`Graph`].
///
/// Handles are cheap to copy. They carry the id of the graph that created
/// them, and every graph rejects handles issued by another graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    graph: u64,
    index: usize,
}

impl Node {
    /// Creation position of the node inside its graph.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn graph_id(&self) -> u64 {
        self.graph
    }
}

struct NodeRecord {
    op: Op,
    operands: Vec<Node>,
    value: Arc<ArrayD<f32>>,
    requires_grad: bool,
}

/// One evaluation session's append-only DAG of computation nodes.
///
/// `Graph` is `Send` but deliberately not `Sync`: nodes are appended through a
/// shared reference, so a graph belongs to the single thread evaluating it.
/// Concurrent requests each create their own graph.
pub struct Graph {
    id: u64,
    nodes: RefCell<Vec<NodeRecord>>,
    params: RefCell<HashMap<ParamId, Node>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.len())
            .field("params", &self.params.borrow().len())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        let id = GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            nodes: RefCell::new(Vec::new()),
            params: RefCell::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of nodes appended so far.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All nodes in creation order, which is a dependency-respecting order.
    pub fn nodes(&self) -> Vec<Node> {
        (0..self.len())
            .map(|index| Node {
                graph: self.id,
                index,
            })
            .collect()
    }

    // --- Leaves ---

    /// Creates a scalar literal leaf.
    pub fn constant(&self, value: f32) -> Node {
        self.push_leaf(
            Op::Constant,
            Arc::new(ArrayD::from_elem(IxDyn(&[]), value)),
            false,
        )
    }

    /// Creates a tensor literal leaf.
    pub fn constant_array(&self, value: ArrayD<f32>) -> Node {
        self.push_leaf(Op::Constant, Arc::new(value), false)
    }

    /// Creates a leaf holding a fresh input value owned by this graph.
    pub fn input(&self, value: ArrayD<f32>) -> Node {
        self.push_leaf(Op::Input, Arc::new(value), false)
    }

    /// Binds a model parameter as a leaf.
    ///
    /// The node shares the parameter's storage; repeated calls with the same
    /// parameter return the node created by the first call.
    pub fn param(&self, param: &Param) -> Node {
        if let Some(node) = self.params.borrow().get(&param.id()) {
            return *node;
        }
        let node = self.push_leaf(Op::Param, param.shared(), true);
        self.params.borrow_mut().insert(param.id(), node);
        node
    }

    // --- Accessors ---

    /// Returns the value of `node`.
    pub fn value(&self, node: Node) -> GraphResult<Arc<ArrayD<f32>>> {
        self.check(node)?;
        Ok(Arc::clone(&self.nodes.borrow()[node.index].value))
    }

    /// Returns the single element held by `node`.
    pub fn scalar(&self, node: Node) -> GraphResult<f32> {
        let value = self.value(node)?;
        match value.iter().next() {
            Some(v) if value.len() == 1 => Ok(*v),
            _ => Err(GraphError::ShapeMismatch {
                op: "scalar",
                lhs: value.shape().to_vec(),
                rhs: Vec::new(),
            }),
        }
    }

    /// Returns the value of `node` flattened in logical order.
    pub fn vector(&self, node: Node) -> GraphResult<Vec<f32>> {
        Ok(self.value(node)?.iter().copied().collect())
    }

    pub fn shape(&self, node: Node) -> GraphResult<Vec<usize>> {
        Ok(self.value(node)?.shape().to_vec())
    }

    pub fn op(&self, node: Node) -> GraphResult<Op> {
        self.check(node)?;
        Ok(self.nodes.borrow()[node.index].op.clone())
    }

    pub fn operands(&self, node: Node) -> GraphResult<Vec<Node>> {
        self.check(node)?;
        Ok(self.nodes.borrow()[node.index].operands.clone())
    }

    /// True for parameter leaves and every node derived from one.
    pub fn requires_grad(&self, node: Node) -> GraphResult<bool> {
        self.check(node)?;
        Ok(self.nodes.borrow()[node.index].requires_grad)
    }

    pub fn is_param(&self, node: Node) -> GraphResult<bool> {
        Ok(self.op(node)? == Op::Param)
    }

    // --- Internals ---

    fn check(&self, node: Node) -> GraphResult<()> {
        if node.graph != self.id {
            return Err(GraphError::ForeignNode {
                node: node.index,
                node_graph: node.graph,
                graph: self.id,
            });
        }
        debug_assert!(node.index < self.len());
        Ok(())
    }

    fn push_leaf(&self, op: Op, value: Arc<ArrayD<f32>>, requires_grad: bool) -> Node {
        self.append(NodeRecord {
            op,
            operands: Vec::new(),
            value,
            requires_grad,
        })
    }

    /// Appends an operator node. Operands must already be validated.
    fn push(&self, op: Op, operands: Vec<Node>, value: ArrayD<f32>) -> Node {
        let requires_grad = {
            let nodes = self.nodes.borrow();
            operands.iter().any(|x| nodes[x.index].requires_grad)
        };
        self.append(NodeRecord {
            op,
            operands,
            value: Arc::new(value),
            requires_grad,
        })
    }

    fn append(&self, record: NodeRecord) -> Node {
        let mut nodes = self.nodes.borrow_mut();
        let index = nodes.len();
        nodes.push(record);
        Node {
            graph: self.id,
            index,
        }
    }
}
