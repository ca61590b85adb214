use std::collections::HashMap;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, Array2, ArrayD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use taug_nn::nn::{
    init, Activation, ActivationKind, Embedding, Layer, Linear, Stack, WordsEncoder,
};
use taug_nn::param::{export_params, load_params, param_names};
use taug_nn::{ConfigError, Context, Graph, Mode, Model, Op, Processor};

use super::{Encoder, StackedEmbeddings};
use crate::bert::{tasks, BertConfig, BertModel};
use crate::vocabulary::Vocabulary;

fn vocab() -> Arc<Vocabulary> {
    Arc::new(Vocabulary::new(["[UNK]", "the", "cat"]))
}

fn embedding_layer(table: Array2<f32>) -> Layer {
    Embedding::from_array(vocab(), table)
        .unwrap()
        .with_unknown("[UNK]")
        .into()
}

fn embedding(table: Array2<f32>) -> Encoder {
    embedding_layer(table).into()
}

fn identity(n: usize) -> Linear {
    Linear::from_arrays(Array2::eye(n), ndarray::Array1::zeros(n)).unwrap()
}

#[test]
fn test_single_encoder_skips_concatenation() {
    let table = arr2(&[[0.0, 0.0], [1.0, 2.0], [3.0, 4.0]]);
    let model = StackedEmbeddings::new(vec![embedding(table.clone())], identity(2));
    let direct = Embedding::from_array(vocab(), table).unwrap();

    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let stacked = p.encode(&["cat", "the"]).unwrap();

    let reference = direct.new_processor(Context::inference(&g)).unwrap();
    let expected = reference.encode(&["cat", "the"]).unwrap();
    for (a, b) in stacked.iter().zip(&expected) {
        assert_eq!(g.vector(*a).unwrap(), g.vector(*b).unwrap());
    }
    // only the projection sits between the lookup and the output
    for node in &stacked {
        let product = g.operands(*node).unwrap()[0];
        let lookup = g.operands(product).unwrap()[1];
        assert!(matches!(g.op(lookup).unwrap(), Op::Row(_)));
    }
}

#[test]
fn test_multiple_encoders_concatenate_in_order_then_project() {
    let first = embedding(arr2(&[[0.0], [1.0], [2.0]]));
    let second = embedding(arr2(&[[0.0, 0.0], [10.0, 20.0], [30.0, 40.0]]));
    let projection = Linear::from_arrays(
        arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 1.0]]),
        arr1(&[0.5, 0.0]),
    )
    .unwrap();
    let model = StackedEmbeddings::new(vec![first, second], projection);

    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let out = p.encode(&["the", "cat", "dog"]).unwrap();

    assert_eq!(out.len(), 3);
    assert_eq!(g.vector(out[0]).unwrap(), vec![1.5, 30.0]);
    assert_eq!(g.vector(out[1]).unwrap(), vec![2.5, 70.0]);
    assert_eq!(g.vector(out[2]).unwrap(), vec![0.5, 0.0]);
}

#[test]
fn test_encoder_stacks_are_accepted() {
    let stacked_encoder = Stack::new(vec![
        embedding_layer(arr2(&[[0.0, 0.0], [1.0, -1.0], [2.0, -2.0]])),
        Activation::new(ActivationKind::Relu).into(),
    ]);
    let model = StackedEmbeddings::new(vec![Layer::from(stacked_encoder).into()], identity(2));

    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let out = p.encode(&["cat"]).unwrap();
    assert_eq!(g.vector(out[0]).unwrap(), vec![2.0, 0.0]);
}

#[test]
fn test_non_encoder_is_a_configuration_error() {
    let model = StackedEmbeddings::new(
        vec![
            embedding(arr2(&[[0.0], [1.0], [2.0]])),
            Layer::from(Linear::new(1, 1)).into(),
        ],
        identity(2),
    );
    let g = Graph::new();

    let err = model.new_processor(Context::inference(&g)).err().unwrap();
    assert_eq!(
        err,
        ConfigError::MissingCapability {
            model: "stacked_embeddings",
            index: 1,
            capability: "words_encoder",
        }
    );
    assert!(g.is_empty());
}

#[test]
fn test_no_encoders_is_a_configuration_error() {
    let model = StackedEmbeddings::new(Vec::new(), identity(1));
    let g = Graph::new();

    assert!(matches!(
        model.new_processor(Context::inference(&g)),
        Err(ConfigError::InvalidStructure { .. })
    ));
}

#[test]
#[should_panic(expected = "use encode instead")]
fn test_forward_panics() {
    let model = StackedEmbeddings::new(vec![embedding(arr2(&[[0.0], [1.0], [2.0]]))], identity(1));
    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let _ = p.forward(&[g.constant(1.0)]);
}

#[test]
fn test_param_names() {
    let model = StackedEmbeddings::new(
        vec![
            embedding(arr2(&[[0.0], [1.0], [2.0]])),
            embedding(arr2(&[[0.0], [1.0], [2.0]])),
        ],
        identity(2),
    );

    assert_eq!(
        param_names(&model).unwrap(),
        vec![
            "encoders.0.weight",
            "encoders.1.weight",
            "projection.weight",
            "projection.bias"
        ]
    );
}

const BERT_CONFIG: &str = r#"{
    "hidden_size": 4,
    "intermediate_size": 8,
    "max_position_embeddings": 8,
    "num_attention_heads": 2,
    "num_hidden_layers": 1,
    "vocab_size": 6
}"#;

fn bert_vocab() -> Arc<Vocabulary> {
    Arc::new(Vocabulary::new(["[UNK]", "[CLS]", "[SEP]", "the", "cat", "sat"]))
}

fn random_bert(seed: u64) -> BertModel {
    let config = BertConfig::from_json(BERT_CONFIG).unwrap();
    let mut model = BertModel::new(config, bert_vocab()).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let weights: HashMap<String, ArrayD<f32>> = export_params(&model)
        .unwrap()
        .into_iter()
        .map(|(name, value)| (name, init::normal(value.shape(), 0.5, &mut rng).unwrap()))
        .collect();
    assert!(load_params(&mut model, &weights).unwrap().is_complete());
    model
}

#[test]
fn test_bert_stacks_next_to_a_plain_embedding() {
    let tokens = ["[CLS]", "the", "cat", "[SEP]"];
    let bert = random_bert(3);
    let contextual = tasks::encode_tokens(&bert, &tokens).unwrap();

    let ids = Embedding::from_array(
        bert_vocab(),
        arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]]),
    )
    .unwrap();
    let model = StackedEmbeddings::new(
        vec![bert.into(), Layer::from(ids).into()],
        identity(5),
    );

    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let out = p.encode(&tokens).unwrap();

    assert_eq!(out.len(), tokens.len());
    for (i, node) in out.iter().enumerate() {
        let v = g.vector(*node).unwrap();
        assert_eq!(v.len(), 5);
        for (a, b) in v[..4].iter().zip(&contextual[i]) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(v[4], [1.0, 3.0, 4.0, 2.0][i]);
    }

    let names = param_names(&model).unwrap();
    assert!(names.contains(&"encoders.0.embeddings.word_embeddings.weight".to_string()));
    assert!(names.contains(&"encoders.1.weight".to_string()));
}

#[test]
fn test_stacked_embeddings_nest() {
    let inner = StackedEmbeddings::new(
        vec![embedding(arr2(&[[0.0], [1.0], [2.0]]))],
        Linear::from_arrays(arr2(&[[2.0]]), arr1(&[0.0])).unwrap(),
    );
    let model = StackedEmbeddings::new(
        vec![inner.into(), embedding(arr2(&[[0.0], [10.0], [20.0]]))],
        identity(2),
    );

    let g = Graph::new();
    let mut p = model.new_processor(Context::inference(&g)).unwrap();
    let out = p.encode(&["the", "cat"]).unwrap();
    assert_eq!(g.vector(out[0]).unwrap(), vec![2.0, 10.0]);
    assert_eq!(g.vector(out[1]).unwrap(), vec![4.0, 20.0]);
    assert_eq!(
        param_names(&model).unwrap(),
        vec![
            "encoders.0.encoders.0.weight",
            "encoders.0.projection.weight",
            "encoders.0.projection.bias",
            "encoders.1.weight",
            "projection.weight",
            "projection.bias"
        ]
    );

    p.set_mode(Mode::Training);
    assert_eq!(p.mode(), Mode::Training);
}

#[test]
fn test_bert_embeddings_alone_are_an_encoder() {
    let bert = random_bert(5);
    let tokens = ["[CLS]", "sat", "[SEP]"];
    let reference = {
        let g = Graph::new();
        let p = bert.embeddings.new_processor(Context::inference(&g)).unwrap();
        let nodes = p.encode(&tokens).unwrap();
        nodes.iter().map(|n| g.vector(*n).unwrap()).collect::<Vec<_>>()
    };

    let model = StackedEmbeddings::new(vec![bert.embeddings.into()], identity(4));
    let g = Graph::new();
    let p = model.new_processor(Context::inference(&g)).unwrap();
    let out = p.encode(&tokens).unwrap();
    for (node, expected) in out.iter().zip(&reference) {
        for (a, b) in g.vector(*node).unwrap().iter().zip(expected) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}
