use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2};

use super::{Graph, Op};
use crate::error::GraphError;
use crate::param::Param;

fn vector(g: &Graph, values: &[f32]) -> super::Node {
    g.input(arr1(values).into_dyn())
}

#[test]
fn test_nodes_are_indexed_in_creation_order() {
    let g = Graph::new();
    let a = g.constant(1.0);
    let b = g.constant(2.0);
    let c = g.add(a, b).unwrap();

    assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
    assert_eq!(g.len(), 3);
    assert_eq!(g.operands(c).unwrap(), vec![a, b]);
    assert_eq!(g.op(c).unwrap(), Op::Add);
    assert_abs_diff_eq!(g.scalar(c).unwrap(), 3.0);
}

#[test]
fn test_elementwise_ops() {
    let g = Graph::new();
    let a = vector(&g, &[1.0, 2.0, 3.0]);
    let b = vector(&g, &[4.0, 5.0, 6.0]);

    assert_eq!(g.vector(g.add(a, b).unwrap()).unwrap(), vec![5.0, 7.0, 9.0]);
    assert_eq!(g.vector(g.sub(a, b).unwrap()).unwrap(), vec![-3.0, -3.0, -3.0]);
    assert_eq!(g.vector(g.prod(a, b).unwrap()).unwrap(), vec![4.0, 10.0, 18.0]);
    assert_eq!(g.vector(g.div(b, a).unwrap()).unwrap(), vec![4.0, 2.5, 2.0]);
}

#[test]
fn test_shape_mismatch_leaves_graph_unchanged() {
    let g = Graph::new();
    let a = vector(&g, &[1.0, 2.0, 3.0]);
    let b = vector(&g, &[1.0, 2.0]);
    let before = g.len();

    let err = g.add(a, b).unwrap_err();
    assert!(matches!(err, GraphError::ShapeMismatch { op: "add", .. }));
    assert_eq!(g.len(), before);
}

#[test]
fn test_scalar_ops_require_single_element() {
    let g = Graph::new();
    let x = vector(&g, &[2.0, 4.0]);
    let two = g.constant(2.0);

    assert_eq!(g.vector(g.div_scalar(x, two).unwrap()).unwrap(), vec![1.0, 2.0]);
    assert_eq!(g.vector(g.sub_scalar(x, two).unwrap()).unwrap(), vec![0.0, 2.0]);
    assert!(g.add_scalar(x, x).is_err());
}

#[test]
fn test_mul_matrix_vector_and_transpose() {
    let g = Graph::new();
    let m = g.input(arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn());
    let x = vector(&g, &[1.0, 1.0]);

    let y = g.mul(m, x).unwrap();
    assert_eq!(g.vector(y).unwrap(), vec![3.0, 7.0, 11.0]);

    let t = g.transpose(m).unwrap();
    assert_eq!(g.shape(t).unwrap(), vec![2, 3]);
    assert!(g.mul(m, vector(&g, &[1.0, 1.0, 1.0])).is_err());
}

#[test]
fn test_softmax_sums_to_one_and_is_shift_invariant() {
    let g = Graph::new();
    let a = g.softmax(vector(&g, &[1.0, 2.0, 3.0])).unwrap();
    let b = g.softmax(vector(&g, &[1001.0, 1002.0, 1003.0])).unwrap();

    let va = g.vector(a).unwrap();
    let vb = g.vector(b).unwrap();
    assert_abs_diff_eq!(va.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    for (x, y) in va.iter().zip(&vb) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-6);
    }
}

#[test]
fn test_concat_stack_at_slice_row() {
    let g = Graph::new();
    let a = vector(&g, &[1.0, 2.0]);
    let b = vector(&g, &[3.0, 4.0]);

    let c = g.concat(&[a, b]).unwrap();
    assert_eq!(g.vector(c).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

    let s = g.stack(&[a, b]).unwrap();
    assert_eq!(g.shape(s).unwrap(), vec![2, 2]);
    assert_eq!(g.vector(g.row(s, 1).unwrap()).unwrap(), vec![3.0, 4.0]);

    assert_eq!(g.vector(g.slice(c, 1, 3).unwrap()).unwrap(), vec![2.0, 3.0]);
    assert_abs_diff_eq!(g.scalar(g.at(c, 3).unwrap()).unwrap(), 4.0);

    let err = g.at(c, 4).unwrap_err();
    assert_eq!(
        err,
        GraphError::IndexOutOfBounds {
            op: "at",
            index: 4,
            len: 4
        }
    );
    assert!(matches!(g.concat(&[]), Err(GraphError::EmptyOperandList { .. })));
}

#[test]
fn test_mean_equals_sum_divided_by_n() {
    let g = Graph::new();
    let xs = [
        vector(&g, &[1.0, 2.0]),
        vector(&g, &[3.0, 6.0]),
        vector(&g, &[5.0, 1.0]),
    ];

    let sum = g.vector(g.sum(&xs).unwrap()).unwrap();
    let mean = g.vector(g.mean(&xs).unwrap()).unwrap();
    assert_eq!(sum, vec![9.0, 9.0]);
    for (m, s) in mean.iter().zip(&sum) {
        assert_abs_diff_eq!(*m, s / 3.0, epsilon = 1e-6);
    }
}

#[test]
fn test_sum_of_one_operand_is_that_operand() {
    let g = Graph::new();
    let x = vector(&g, &[1.0]);
    let before = g.len();

    assert_eq!(g.sum(&[x]).unwrap(), x);
    assert_eq!(g.len(), before);
}

#[test]
fn test_empty_sum_and_mean_fail() {
    let g = Graph::new();
    assert_eq!(
        g.sum(&[]).unwrap_err(),
        GraphError::EmptyOperandList { op: "sum" }
    );
    assert_eq!(
        g.mean(&[]).unwrap_err(),
        GraphError::EmptyOperandList { op: "mean" }
    );
    assert!(g.is_empty());
}

#[test]
fn test_positive_elu_is_positive_for_moderate_inputs() {
    let g = Graph::new();
    let x = vector(&g, &[0.0, -10.0, -1.0, 3.0]);
    let y = g.vector(g.positive_elu(x).unwrap()).unwrap();

    assert_abs_diff_eq!(y[0], 1.0, epsilon = 1e-6);
    assert!(y.iter().all(|v| *v > 0.0));
    assert_abs_diff_eq!(y[2], (-1.0f32).exp(), epsilon = 1e-6);
    assert_abs_diff_eq!(y[3], 4.0, epsilon = 1e-6);
}

#[test]
fn test_positive_elu_underflows_to_zero_at_large_negative_inputs() {
    let g = Graph::new();
    let x = vector(&g, &[-20.0, -100.0, -1e30]);
    let y = g.vector(g.positive_elu(x).unwrap()).unwrap();

    assert!(y.iter().all(|v| *v >= 0.0));
    assert_eq!(y, vec![0.0, 0.0, 0.0]);
}

#[test]
fn test_failed_composites_leave_graph_unchanged() {
    let other = Graph::new();
    let foreign = other.constant(1.0);
    let g = Graph::new();
    let a = vector(&g, &[1.0, 2.0]);
    let b = vector(&g, &[1.0, 2.0, 3.0]);
    let before = g.len();

    assert!(matches!(
        g.positive_elu(foreign),
        Err(GraphError::ForeignNode { .. })
    ));
    assert!(matches!(
        g.sum(&[a, a, foreign]),
        Err(GraphError::ForeignNode { .. })
    ));
    assert_eq!(
        g.mean(&[a, a, b]).unwrap_err(),
        GraphError::ShapeMismatch {
            op: "add",
            lhs: vec![2],
            rhs: vec![3],
        }
    );
    assert_eq!(g.len(), before);
}

#[test]
fn test_separate_vec_yields_one_scalar_per_element() {
    let g = Graph::new();
    let x = vector(&g, &[0.5, -0.5]);
    let parts = g.separate_vec(x).unwrap();

    assert_eq!(parts.len(), 2);
    assert_abs_diff_eq!(g.scalar(parts[0]).unwrap(), 0.5);
    assert_abs_diff_eq!(g.scalar(parts[1]).unwrap(), -0.5);
}

#[test]
fn test_gelu_matches_reference_values() {
    let g = Graph::new();
    let y = g.vector(g.gelu(vector(&g, &[0.0, 1.0, -1.0])).unwrap()).unwrap();

    assert_abs_diff_eq!(y[0], 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y[1], 0.841_344_7, epsilon = 1e-5);
    assert_abs_diff_eq!(y[2], -0.158_655_3, epsilon = 1e-5);
}

#[test]
fn test_foreign_nodes_are_rejected() {
    let g1 = Graph::new();
    let g2 = Graph::new();
    let a = g1.constant(1.0);
    let b = g2.constant(1.0);

    let err = g2.add(a, b).unwrap_err();
    assert!(matches!(err, GraphError::ForeignNode { .. }));
    assert_eq!(g2.len(), 1);
    assert!(g2.value(a).is_err());
}

#[test]
fn test_param_leaves_are_memoized_and_shared() {
    let p = Param::new(arr1(&[1.0, 2.0]).into_dyn());
    let g = Graph::new();

    let a = g.param(&p);
    let b = g.param(&p);
    assert_eq!(a, b);
    assert_eq!(g.len(), 1);
    assert!(g.is_param(a).unwrap());
    assert!(g.requires_grad(a).unwrap());

    let x = g.constant(2.0);
    assert!(!g.requires_grad(x).unwrap());
    assert!(g.requires_grad(g.prod_scalar(a, x).unwrap()).unwrap());

    let other = Graph::new();
    let c = other.param(&p);
    assert_eq!(c.index(), 0);
    assert_ne!(c, a);
}

#[test]
fn test_identical_inputs_give_identical_outputs() {
    let run = || {
        let g = Graph::new();
        let x = vector(&g, &[0.3, -1.2, 2.5]);
        let y = g.softmax(g.gelu(g.tanh(x).unwrap()).unwrap()).unwrap();
        g.vector(y).unwrap()
    };
    assert_eq!(run(), run());
}
