//! Shared fixtures for graphstorm-nn integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use graphstorm_core::{FeatField, MemGraph, NodeId, NodeIds, NodeType, ATT_MASK_IDX, TOKEN_IDX};

pub const NUM_N0: usize = 20;
pub const NUM_N1: usize = 10;
pub const FEAT_DIM: usize = 2;
pub const SEQ_LEN: usize = 6;
pub const VOCAB: usize = 32;
pub const NUM_CLASSES: usize = 3;

/// Deterministic token ids `(n, SEQ_LEN)`.
pub fn tokens(n: usize) -> Tensor {
    let ids: Vec<u32> = (0..n * SEQ_LEN)
        .map(|i| ((i / SEQ_LEN) * 7 + (i % SEQ_LEN) * 3 + 1) as u32 % VOCAB as u32)
        .collect();
    Tensor::from_vec(ids, (n, SEQ_LEN), &Device::Cpu).unwrap()
}

/// Valid token counts in `1..=SEQ_LEN`.
pub fn valid_lens(n: usize) -> Tensor {
    let lens: Vec<u32> = (0..n).map(|i| (i % SEQ_LEN) as u32 + 1).collect();
    Tensor::from_vec(lens, n, &Device::Cpu).unwrap()
}

/// Features whose row i is `[i, -i / 2]`.
pub fn feats(n: usize) -> Tensor {
    let values: Vec<f32> = (0..n)
        .flat_map(|i| [i as f32, -(i as f32) / 2.0])
        .collect();
    Tensor::from_vec(values, (n, FEAT_DIM), &Device::Cpu).unwrap()
}

pub fn labels(n: usize) -> Tensor {
    let values: Vec<u32> = (0..n).map(|i| (i % NUM_CLASSES) as u32).collect();
    Tensor::from_vec(values, n, &Device::Cpu).unwrap()
}

/// Two node types, `n0` and `n1`, both with `feat` and `label`. With
/// `text`, `n0` also carries tokens and an attention mask given as valid
/// lengths.
pub fn dummy_graph(text: bool) -> Arc<MemGraph> {
    let g = MemGraph::new();
    g.add_node_type("n0", NUM_N0);
    g.add_node_type("n1", NUM_N1);
    for (ntype, n) in [("n0", NUM_N0), ("n1", NUM_N1)] {
        g.set_node_feat(ntype, "feat", feats(n)).unwrap();
        g.set_node_feat(ntype, "label", labels(n)).unwrap();
    }
    if text {
        g.set_node_feat("n0", TOKEN_IDX, tokens(NUM_N0)).unwrap();
        g.set_node_feat("n0", ATT_MASK_IDX, valid_lens(NUM_N0)).unwrap();
    }
    Arc::new(g)
}

pub fn feat_field() -> FeatField {
    FeatField::from("feat")
}

pub fn var_builder(varmap: &VarMap) -> VarBuilder<'static> {
    VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
}

pub fn node_ids(entries: &[(&str, Vec<NodeId>)]) -> NodeIds {
    entries
        .iter()
        .map(|(t, ids)| (NodeType::new(*t), ids.clone()))
        .collect()
}

pub fn identity(n: usize) -> Tensor {
    let values: Vec<f32> = (0..n * n)
        .map(|i| if i / n == i % n { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_vec(values, (n, n), &Device::Cpu).unwrap()
}

pub fn assert_close(a: &Tensor, b: &Tensor, eps: f32) {
    assert_eq!(a.dims(), b.dims());
    let a = a.to_dtype(DType::F32).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
    let b = b.to_dtype(DType::F32).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
    for (x, y) in a.iter().zip(&b) {
        approx::assert_abs_diff_eq!(x, y, epsilon = eps);
    }
}
