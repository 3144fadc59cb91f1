//! Input layer behaviour over the dummy graph.

mod common;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, VarMap};
use common::*;
use graphstorm_core::{get_feat_size, prepare_batch_input, FeatField, NodeTensors};
use graphstorm_nn::embed::{NodeEncoderConfig, NodeEncoderInputLayer, NodeInputLayer};
use graphstorm_nn::mode::TrainMode;

fn layer(config: NodeEncoderConfig, feat_field: &FeatField) -> (VarMap, NodeEncoderInputLayer) {
    let g = dummy_graph(false);
    let feat_size = get_feat_size(g.as_ref(), feat_field).unwrap();
    let varmap = VarMap::new();
    let layer =
        NodeEncoderInputLayer::new(g.as_ref(), &feat_size, config, var_builder(&varmap)).unwrap();
    (varmap, layer)
}

#[test]
fn test_identity_projection_returns_features() {
    let (mut varmap, mut layer) = layer(NodeEncoderConfig::new(FEAT_DIM), &feat_field());
    varmap.set_one("input_projs.n0", identity(FEAT_DIM)).unwrap();
    varmap.set_one("input_projs.n1", identity(FEAT_DIM)).unwrap();
    layer.set_training(false);

    let g = dummy_graph(false);
    let nodes = node_ids(&[("n0", vec![0, 5, 19]), ("n1", vec![9, 1])]);
    let input = prepare_batch_input(g.as_ref(), &nodes, &Device::Cpu, &feat_field()).unwrap();
    let embs = layer.forward(&input, &nodes).unwrap();
    assert_eq!(embs.len(), 2);
    assert_close(&embs["n0"], &input["n0"], 1e-6);
    assert_close(&embs["n1"], &input["n1"], 1e-6);
}

#[test]
fn test_feature_and_sparse_stages_sum() {
    let config = NodeEncoderConfig::new(FEAT_DIM).with_node_embeddings(true);
    let (mut varmap, layer) = layer(config, &feat_field());
    varmap.set_one("input_projs.n0", identity(FEAT_DIM)).unwrap();
    // [I; I] sends the feature block and the sparse block to the same outputs.
    let stacked = Tensor::cat(&[&identity(FEAT_DIM), &identity(FEAT_DIM)], 0).unwrap();
    varmap.set_one("proj_matrix.n0", stacked).unwrap();

    let ids = vec![3, 0, 7];
    let nodes = node_ids(&[("n0", ids.clone())]);
    let mut input = NodeTensors::new();
    let feat = feats(NUM_N0)
        .index_select(&Tensor::new(&[3u32, 0, 7], &Device::Cpu).unwrap(), 0)
        .unwrap();
    input.insert("n0".into(), feat.clone());
    let embs = layer.forward(&input, &nodes).unwrap();

    let sparse = layer
        .sparse_embed("n0")
        .unwrap()
        .index_select(&Tensor::new(&[3u32, 0, 7], &Device::Cpu).unwrap(), 0)
        .unwrap();
    let expected = (feat + sparse).unwrap();
    assert_close(&embs["n0"], &expected, 1e-5);
}

#[test]
fn test_featureless_type_uses_sparse_embedding() {
    let field = FeatField::per_type([("n0", vec!["feat"])]);
    let (mut varmap, layer) = layer(NodeEncoderConfig::new(4), &field);
    varmap.set_one("proj_matrix.n1", identity(4)).unwrap();
    assert!(layer.input_proj("n1").is_none());

    let nodes = node_ids(&[("n1", vec![2, 8])]);
    let embs = layer.forward(&NodeTensors::new(), &nodes).unwrap();
    let table = layer.sparse_embed("n1").unwrap();
    let expected = table
        .index_select(&Tensor::new(&[2u32, 8], &Device::Cpu).unwrap(), 0)
        .unwrap();
    assert_close(&embs["n1"], &expected, 1e-6);
}

#[test]
fn test_empty_ids_give_zero_rows() {
    let (_varmap, layer) = layer(NodeEncoderConfig::new(4), &feat_field());
    let nodes = node_ids(&[("n0", vec![]), ("n1", vec![1])]);
    let g = dummy_graph(false);
    let input = prepare_batch_input(g.as_ref(), &nodes, &Device::Cpu, &feat_field()).unwrap();
    let embs = layer.forward(&input, &nodes).unwrap();
    assert_eq!(embs["n0"].dims(), &[0, 4]);
    assert_eq!(embs["n1"].dims(), &[1, 4]);
}

#[test]
fn test_absent_type_has_no_entry() {
    let (_varmap, layer) = layer(NodeEncoderConfig::new(4), &feat_field());
    let nodes = node_ids(&[("n1", vec![0])]);
    let mut input = NodeTensors::new();
    input.insert("n1".into(), feats(1));
    let embs = layer.forward(&input, &nodes).unwrap();
    assert!(embs.get("n0").is_none());
}

#[test]
fn test_unknown_type_is_usage_error() {
    let (_varmap, layer) = layer(NodeEncoderConfig::new(4), &feat_field());
    let nodes = node_ids(&[("n0", vec![0]), ("n3", vec![0])]);
    let mut input = NodeTensors::new();
    input.insert("n0".into(), feats(1));
    let err = layer.forward(&input, &nodes).unwrap_err();
    assert!(err.is_usage());
}

#[test]
fn test_out_dtype_is_exact() {
    let config = NodeEncoderConfig::new(4).with_out_dtype(DType::F16);
    let (_varmap, half) = layer(config, &feat_field());
    let (_varmap2, full) = layer(NodeEncoderConfig::new(4), &feat_field());

    let nodes = node_ids(&[("n0", vec![1, 2])]);
    let mut input = NodeTensors::new();
    input.insert("n0".into(), feats(2));
    assert_eq!(half.forward(&input, &nodes).unwrap()["n0"].dtype(), DType::F16);
    assert_eq!(full.forward(&input, &nodes).unwrap()["n0"].dtype(), DType::F32);

    let empty = node_ids(&[("n0", vec![])]);
    assert_eq!(half.forward(&NodeTensors::new(), &empty).unwrap()["n0"].dtype(), DType::F16);
}

#[test]
fn test_activation_is_applied() {
    let config = NodeEncoderConfig::new(FEAT_DIM).with_activation(Activation::Relu);
    let (mut varmap, layer) = layer(config, &feat_field());
    varmap.set_one("input_projs.n0", identity(FEAT_DIM)).unwrap();

    let nodes = node_ids(&[("n0", vec![4])]);
    let mut input = NodeTensors::new();
    input.insert("n0".into(), Tensor::new(&[[4f32, -2.]], &Device::Cpu).unwrap());
    let embs = layer.forward(&input, &nodes).unwrap();
    assert_eq!(embs["n0"].to_vec2::<f32>().unwrap(), vec![vec![4.0, 0.0]]);
}
