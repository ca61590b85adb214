use std::collections::HashMap;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::*;
use crate::error::ConfigError;
use crate::graph::Graph;
use crate::param::{export_params, load_params, param_count, param_names};

fn linear(weight: Array2<f32>, bias: &[f32]) -> Linear {
    Linear::from_arrays(weight, arr1(bias)).unwrap()
}

fn token_index(words: &[&str]) -> Arc<dyn TokenIndex> {
    let map: HashMap<String, usize> = words
        .iter()
        .enumerate()
        .map(|(i, w)| (w.to_string(), i))
        .collect();
    Arc::new(map)
}

#[test]
fn test_linear_identity_stack_golden_values() {
    let model = Stack::new(vec![
        linear(
            arr2(&[
                [1.0, 2.0, 3.0, 4.0],
                [0.0, -1.0, 0.0, 1.0],
                [0.5, 0.5, 0.5, 0.5],
            ]),
            &[0.1, 0.2, 0.3],
        )
        .into(),
        Activation::new(ActivationKind::Identity).into(),
    ]);
    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let x = g.input(arr1(&[1.0, 2.0, 3.0, 4.0]).into_dyn());

    let y = p.forward(&[x]).unwrap();
    assert_eq!(y.len(), 1);
    let out = g.vector(y[0]).unwrap();
    assert_abs_diff_eq!(out[0], 30.1, epsilon = 1e-5);
    assert_abs_diff_eq!(out[1], 2.2, epsilon = 1e-5);
    assert_abs_diff_eq!(out[2], 5.3, epsilon = 1e-5);
}

#[test]
fn test_identity_activation_appends_nothing() {
    let act = Activation::new(ActivationKind::Identity);
    let g = Graph::new();
    let p = act.new_processor(Context::inference(&g)).unwrap();
    let x = g.constant(1.5);
    let before = g.len();

    assert_eq!(p.forward(&[x]).unwrap(), vec![x]);
    assert_eq!(g.len(), before);
}

#[test]
fn test_stack_equals_nested_application() {
    let weight = || arr2(&[[0.5, -1.0], [2.0, 0.25]]);
    let stack = Stack::new(vec![
        linear(weight(), &[0.1, -0.1]).into(),
        Activation::new(ActivationKind::Tanh).into(),
        linear(weight(), &[0.0, 0.3]).into(),
    ]);
    let first = linear(weight(), &[0.1, -0.1]);
    let act = Activation::new(ActivationKind::Tanh);
    let last = linear(weight(), &[0.0, 0.3]);

    let g = Graph::new();
    let ctx = Context::inference(&g);
    let x = g.input(arr1(&[0.7, -0.2]).into_dyn());

    let stacked = stack.new_processor(ctx).unwrap().forward(&[x]).unwrap();
    let h = first.new_processor(ctx).unwrap().forward(&[x]).unwrap();
    let h = act.new_processor(ctx).unwrap().forward(&h).unwrap();
    let nested = last.new_processor(ctx).unwrap().forward(&h).unwrap();

    assert_eq!(g.vector(stacked[0]).unwrap(), g.vector(nested[0]).unwrap());
}

#[test]
fn test_stack_order_matters() {
    let flip = || linear(arr2(&[[1.0, 0.0], [0.0, -1.0]]), &[0.0, 0.0]);
    let relu = || Activation::new(ActivationKind::Relu);
    let linear_first = Stack::new(vec![flip().into(), relu().into()]);
    let relu_first = Stack::new(vec![relu().into(), flip().into()]);

    let g = Graph::new();
    let x = g.input(arr1(&[-1.0, 2.0]).into_dyn());
    let a = linear_first
        .new_processor(Context::inference(&g))
        .unwrap()
        .forward(&[x])
        .unwrap();
    let b = relu_first
        .new_processor(Context::inference(&g))
        .unwrap()
        .forward(&[x])
        .unwrap();

    assert_eq!(g.vector(a[0]).unwrap(), vec![0.0, 0.0]);
    assert_eq!(g.vector(b[0]).unwrap(), vec![0.0, -2.0]);
}

#[test]
fn test_empty_stack_is_identity() {
    let stack = Stack::default();
    let g = Graph::new();
    let p = stack.new_processor(Context::inference(&g)).unwrap();
    let xs = [g.constant(1.0), g.constant(2.0)];

    assert_eq!(p.forward(&xs).unwrap(), xs.to_vec());
}

#[test]
fn test_set_mode_propagates_to_nested_children() {
    let inner = Stack::new(vec![Dropout::new(0.5, 7).unwrap().into()]);
    let outer = Stack::new(vec![inner.into(), Dropout::new(0.1, 3).unwrap().into()]);
    let g = Graph::new();
    let mut p = outer.new_processor(Context::inference(&g)).unwrap();
    assert_eq!(p.mode(), Mode::Inference);

    p.set_mode(Mode::Training);

    assert_eq!(p.mode(), Mode::Training);
    for layer in p.layers() {
        assert_eq!(layer.mode(), Mode::Training);
    }
    match &p.layers()[0] {
        LayerProcessor::Stack(inner) => assert_eq!(inner.layers()[0].mode(), Mode::Training),
        _ => panic!("expected a nested stack"),
    }
}

#[test]
fn test_dropout_is_identity_in_inference() {
    let dropout = Dropout::new(0.9, 1).unwrap();
    let g = Graph::new();
    let p = dropout.new_processor(Context::inference(&g)).unwrap();
    let x = g.input(arr1(&[1.0, 2.0, 3.0]).into_dyn());
    let before = g.len();

    assert_eq!(p.forward(&[x]).unwrap(), vec![x]);
    assert_eq!(g.len(), before);
}

#[test]
fn test_dropout_training_mask_is_scaled_and_reproducible() {
    let dropout = Dropout::new(0.5, 42).unwrap();
    let run = || {
        let g = Graph::new();
        let p = dropout.new_processor(Context::training(&g)).unwrap();
        let x = g.input(ndarray::ArrayD::ones(ndarray::IxDyn(&[64])));
        let y = p.forward(&[x]).unwrap();
        g.vector(y[0]).unwrap()
    };

    let first = run();
    assert!(first.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));
    assert!(first.iter().any(|v| *v == 0.0));
    assert!(first.iter().any(|v| *v > 0.0));
    assert_eq!(first, run());
}

#[test]
fn test_dropout_rejects_invalid_probability() {
    assert!(Dropout::new(1.0, 0).is_err());
    assert!(Dropout::new(-0.1, 0).is_err());
}

#[test]
fn test_layer_norm_normalizes_vector() {
    let norm = LayerNorm::new(4, 1e-12);
    let g = Graph::new();
    let p = norm.new_processor(Context::inference(&g)).unwrap();
    let x = g.input(arr1(&[1.0, 2.0, 3.0, 4.0]).into_dyn());

    let y = g.vector(p.forward(&[x]).unwrap()[0]).unwrap();
    let std = 1.25f32.sqrt();
    for (v, expected) in y.iter().zip([-1.5, -0.5, 0.5, 1.5]) {
        assert_abs_diff_eq!(*v, expected / std, epsilon = 1e-5);
    }
}

#[test]
fn test_embedding_encodes_words_with_unknown_fallback() {
    let table = arr2(&[[0.0, 0.0], [1.0, 1.0], [2.0, 3.0]]);
    let with_unk =
        Embedding::from_array(token_index(&["[UNK]", "hello", "world"]), table.clone())
            .unwrap()
            .with_unknown("[UNK]");
    let g = Graph::new();
    let p = with_unk.new_processor(Context::inference(&g)).unwrap();

    let nodes = p.encode(&["world", "nope", "hello"]).unwrap();
    assert_eq!(g.vector(nodes[0]).unwrap(), vec![2.0, 3.0]);
    assert_eq!(g.vector(nodes[1]).unwrap(), vec![0.0, 0.0]);
    assert_eq!(g.vector(nodes[2]).unwrap(), vec![1.0, 1.0]);

    let ids = p.encode_ids(&[2]).unwrap();
    assert_eq!(g.vector(ids[0]).unwrap(), vec![2.0, 3.0]);
    assert!(p.encode_ids(&[3]).is_err());
}

#[test]
fn test_embedding_without_unknown_token_yields_zeros() {
    let model =
        Embedding::from_array(token_index(&["a"]), arr2(&[[5.0, 5.0, 5.0]])).unwrap();
    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();

    let nodes = p.encode(&["b"]).unwrap();
    assert_eq!(g.vector(nodes[0]).unwrap(), vec![0.0, 0.0, 0.0]);
}

#[test]
fn test_words_encoder_capability() {
    let index = token_index(&["x"]);
    let embedding = || Embedding::new(Arc::clone(&index), 2);

    assert!(Layer::from(embedding()).is_words_encoder());
    assert!(Layer::from(Stack::new(vec![embedding().into(), Linear::new(2, 2).into()]))
        .is_words_encoder());
    assert!(!Layer::from(Stack::new(vec![Linear::new(2, 2).into(), embedding().into()]))
        .is_words_encoder());
    assert!(!Layer::from(Stack::default()).is_words_encoder());
    assert!(!Layer::from(Linear::new(2, 2)).is_words_encoder());
}

#[test]
fn test_stack_encodes_through_first_layer() {
    let embedding =
        Embedding::from_array(token_index(&["a", "b"]), arr2(&[[1.0, 0.0], [0.0, 1.0]]))
            .unwrap();
    let stack = Stack::new(vec![
        embedding.into(),
        linear(arr2(&[[2.0, 0.0], [0.0, 3.0]]), &[1.0, 1.0]).into(),
    ]);
    let g = Graph::new();
    let p = stack.new_processor(Context::inference(&g)).unwrap();

    let out = p.encode(&["b", "a"]).unwrap();
    assert_eq!(g.vector(out[0]).unwrap(), vec![1.0, 4.0]);
    assert_eq!(g.vector(out[1]).unwrap(), vec![3.0, 1.0]);
}

#[test]
fn test_attention_requires_divisible_heads() {
    assert!(MultiHeadAttention::new(6, 4).is_err());
    assert!(MultiHeadAttention::new(6, 0).is_err());
    assert_eq!(MultiHeadAttention::new(8, 2).unwrap().head_size(), 4);
}

#[test]
fn test_zero_attention_averages_values() {
    // zero query/key weights give uniform attention, so every position sees the
    // mean of the value projections
    let mut attention = MultiHeadAttention::new(2, 1).unwrap();
    attention.value = linear(arr2(&[[1.0, 0.0], [0.0, 1.0]]), &[0.0, 0.0]);
    attention.output = linear(arr2(&[[1.0, 0.0], [0.0, 1.0]]), &[0.0, 0.0]);
    let g = Graph::new();
    let p = attention.new_processor(Context::inference(&g)).unwrap();
    let xs = [
        g.input(arr1(&[1.0, 2.0]).into_dyn()),
        g.input(arr1(&[3.0, 6.0]).into_dyn()),
    ];

    let ys = p.forward(&xs).unwrap();
    for y in ys {
        let v = g.vector(y).unwrap();
        assert_abs_diff_eq!(v[0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(v[1], 4.0, epsilon = 1e-5);
    }
}

#[test]
fn test_transformer_block_outputs_normalized_vectors() {
    let config = TransformerBlockConfig {
        hidden_size: 8,
        num_heads: 2,
        intermediate_size: 16,
        activation: ActivationKind::Gelu,
        layer_norm_eps: 1e-12,
    };
    let mut rng = StdRng::seed_from_u64(0);
    let block = TransformerBlock::xavier(&config, &mut rng).unwrap();
    let g = Graph::new();
    let p = block.new_processor(Context::inference(&g)).unwrap();
    let xs: Vec<_> = (0..3)
        .map(|i| {
            let x = ndarray::Array1::from_shape_fn(8, |j| (i * 8 + j) as f32 / 10.0);
            g.input(x.into_dyn())
        })
        .collect();

    let ys = p.forward(&xs).unwrap();
    assert_eq!(ys.len(), 3);
    for y in ys {
        let v = g.vector(y).unwrap();
        assert_eq!(v.len(), 8);
        let mean = v.iter().sum::<f32>() / 8.0;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / 8.0;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
    }
}

#[test]
fn test_param_names_follow_model_tree() {
    let stack = Stack::new(vec![
        Linear::new(2, 3).into(),
        Activation::new(ActivationKind::Relu).into(),
        LayerNorm::new(3, 1e-5).into(),
    ]);

    assert_eq!(
        param_names(&stack).unwrap(),
        vec!["0.weight", "0.bias", "2.gamma", "2.beta"]
    );
    assert_eq!(param_count(&stack).unwrap(), 6 + 3 + 3 + 3);
}

#[test]
fn test_export_then_load_restores_weights() {
    let mut rng = StdRng::seed_from_u64(11);
    let trained = Stack::new(vec![
        Linear::xavier(3, 2, &mut rng).into(),
        Activation::new(ActivationKind::Tanh).into(),
    ]);
    let weights = export_params(&trained).unwrap();

    let mut fresh = Stack::new(vec![
        Linear::new(3, 2).into(),
        Activation::new(ActivationKind::Tanh).into(),
    ]);
    let report = load_params(&mut fresh, &weights).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(export_params(&fresh).unwrap(), weights);
}

#[test]
fn test_load_reports_missing_and_rejects_wrong_shapes() {
    let mut model = Stack::new(vec![Linear::new(2, 2).into()]);

    let mut partial = HashMap::new();
    partial.insert("0.bias".to_string(), arr1(&[1.0, 2.0]).into_dyn());
    let report = load_params(&mut model, &partial).unwrap();
    assert_eq!(report.loaded, vec!["0.bias"]);
    assert_eq!(report.missing, vec!["0.weight"]);

    partial.insert("0.weight".to_string(), arr1(&[1.0]).into_dyn());
    assert!(load_params(&mut model, &partial).is_err());
}

#[test]
fn test_graphs_created_before_replace_keep_old_values() {
    let mut model = Linear::new(1, 1);
    let g = Graph::new();
    let x = g.input(arr1(&[1.0]).into_dyn());
    let before = model.new_processor(Context::inference(&g)).unwrap().forward(&[x]).unwrap();

    model.bias.replace(arr1(&[5.0]).into_dyn()).unwrap();
    let g2 = Graph::new();
    let x2 = g2.input(arr1(&[1.0]).into_dyn());
    let after = model.new_processor(Context::inference(&g2)).unwrap().forward(&[x2]).unwrap();

    assert_eq!(g.vector(before[0]).unwrap(), vec![0.0]);
    assert_eq!(g2.vector(after[0]).unwrap(), vec![5.0]);
}

#[test]
fn test_concurrent_graphs_are_isolated() {
    let mut rng = StdRng::seed_from_u64(5);
    let model = Stack::new(vec![
        Linear::xavier(4, 4, &mut rng).into(),
        Activation::new(ActivationKind::Gelu).into(),
        Linear::xavier(4, 2, &mut rng).into(),
    ]);
    let run = |seed: f32| -> Vec<f32> {
        let g = Graph::new();
        let p = model.new_processor(Context::inference(&g)).unwrap();
        let x = g.input(arr1(&[seed, seed + 1.0, seed * 2.0, -seed]).into_dyn());
        g.vector(p.forward(&[x]).unwrap()[0]).unwrap()
    };
    let expected: Vec<_> = (0..8).map(|i| run(i as f32)).collect();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|i| s.spawn(move || run(i as f32))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results, expected);
}

#[test]
fn test_missing_capability_error_message() {
    let err = ConfigError::MissingCapability {
        model: "stacked_embeddings",
        index: 1,
        capability: "words_encoder",
    };
    assert!(err.to_string().contains("index 1"));
}
