//! Full-graph input embedding computation.

mod common;

use std::thread;

use candle_core::DType;
use candle_nn::VarMap;
use common::*;
use graphstorm_core::{get_feat_size, GraphStore, MemGraph, ProcessGroup};
use graphstorm_nn::compute::{compute_node_input_embeddings, EmbedComputeConfig};
use graphstorm_nn::embed::{NodeEncoderConfig, NodeEncoderInputLayer};
use graphstorm_nn::lm::{LmFusionConfig, LmModels, LmNodeEncoderInputLayer, NodeLmConfig};

const EMBED: usize = 5;

fn encoder(g: &MemGraph, varmap: &VarMap) -> NodeEncoderInputLayer {
    let feat_size = get_feat_size(g, &feat_field()).unwrap();
    NodeEncoderInputLayer::new(g, &feat_size, NodeEncoderConfig::new(EMBED), var_builder(varmap))
        .unwrap()
}

fn config(field: &str) -> EmbedComputeConfig {
    EmbedComputeConfig::default()
        .with_batch_size(3)
        .with_feat_field(feat_field())
        .with_emb_field(field)
}

#[test]
fn test_recompute_gives_same_tables() {
    let g = dummy_graph(false);
    let varmap = VarMap::new();
    let mut layer = encoder(&g, &varmap);
    let pg = ProcessGroup::single();

    let first = compute_node_input_embeddings(g.as_ref(), &mut layer, &config("emb"), &pg).unwrap();
    let second = compute_node_input_embeddings(g.as_ref(), &mut layer, &config("emb"), &pg).unwrap();
    assert_eq!(first["n0"].dims(), &[NUM_N0, EMBED]);
    assert_eq!(first["n1"].dims(), &[NUM_N1, EMBED]);
    for ntype in ["n0", "n1"] {
        assert_eq!(
            first[ntype].to_vec2::<f32>().unwrap(),
            second[ntype].to_vec2::<f32>().unwrap()
        );
    }
    assert_eq!(g.feat_shape(&"n0".into(), "emb"), Some(vec![NUM_N0, EMBED]));
}

#[test]
fn test_workers_match_single_worker() {
    let g = dummy_graph(false);
    let varmap = VarMap::new();
    let mut single = encoder(&g, &varmap);
    let expected = compute_node_input_embeddings(
        g.as_ref(),
        &mut single,
        &config("single"),
        &ProcessGroup::single(),
    )
    .unwrap();

    // Layers built from the same VarMap share their weights.
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = ProcessGroup::local(2)
            .into_iter()
            .map(|pg| {
                let mut layer = encoder(&g, &varmap);
                let g = g.as_ref();
                s.spawn(move || {
                    compute_node_input_embeddings(g, &mut layer, &config("sharded"), &pg)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in results {
        let embs = result.unwrap();
        for ntype in ["n0", "n1"] {
            assert_close(&embs[ntype], &expected[ntype], 1e-5);
        }
    }
}

#[test]
fn test_existing_field_of_other_width() {
    let g = dummy_graph(false);
    let varmap = VarMap::new();
    let mut layer = encoder(&g, &varmap);
    let err = compute_node_input_embeddings(
        g.as_ref(),
        &mut layer,
        &config("feat"),
        &ProcessGroup::single(),
    )
    .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_wrong_width_fails_on_every_worker() {
    let g = dummy_graph(false);
    g.init_node_feat(&"n0".into(), "emb", EMBED + 4, DType::F32)
        .unwrap();
    let varmap = VarMap::new();

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = ProcessGroup::local(2)
            .into_iter()
            .map(|pg| {
                let mut layer = encoder(&g, &varmap);
                let g = g.as_ref();
                s.spawn(move || compute_node_input_embeddings(g, &mut layer, &config("emb"), &pg))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.len(), 2);
    for result in results {
        assert!(result.unwrap_err().is_config());
    }
    assert!(g.feat_shape(&"n1".into(), "emb").is_none());
}

#[test]
fn test_target_types_restrict_output() {
    let g = dummy_graph(false);
    let varmap = VarMap::new();
    let mut layer = encoder(&g, &varmap);
    let config = config("emb").with_target_ntypes(["n1"]);
    let embs =
        compute_node_input_embeddings(g.as_ref(), &mut layer, &config, &ProcessGroup::single())
            .unwrap();
    assert_eq!(embs.len(), 1);
    assert!(g.feat_shape(&"n0".into(), "emb").is_none());
}

#[test]
fn test_lm_layer_embeddings() {
    let g = dummy_graph(true);
    let varmap = VarMap::new();
    let vb = var_builder(&varmap);
    let lm = NodeLmConfig::new("mean_pool", ["n0"])
        .with_vocab_size(VOCAB)
        .with_hidden_size(4);
    let models = LmModels::new(g.as_ref(), &LmFusionConfig::new(vec![lm]), vb.pp("lm")).unwrap();
    let feat_size = get_feat_size(g.as_ref(), &feat_field()).unwrap();
    let mut layer = LmNodeEncoderInputLayer::new(
        g.clone(),
        &feat_size,
        NodeEncoderConfig::new(EMBED),
        models,
        vb,
    )
    .unwrap();
    layer.prepare().unwrap();

    let embs =
        compute_node_input_embeddings(g.as_ref(), &mut layer, &config("emb"), &ProcessGroup::single())
            .unwrap();
    assert_eq!(embs["n0"].dims(), &[NUM_N0, EMBED]);
    assert_eq!(embs["n1"].dims(), &[NUM_N1, EMBED]);
}
