//! Core types for graphstorm.
//!
//! This crate provides the graph-side half of the input-embedding and
//! prediction pipeline:
//!
//! - [`hetero`] - node/edge types, the [`GraphStore`] contract and the
//!   in-memory [`MemGraph`]
//! - [`features`] - feature-size resolution ([`get_feat_size`]) and batch
//!   feature fetching ([`prepare_batch_input`])
//! - [`dist`] - the [`ProcessGroup`] handle and per-worker node splitting
//! - [`dataloading`] - datasets, mini-batches and loaders
//!
//! # Example
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use graphstorm_core::{get_feat_size, FeatField, MemGraph};
//!
//! let g = MemGraph::new();
//! g.add_node_type("paper", 10);
//! g.add_node_type("author", 4);
//! let feat = Tensor::zeros((10, 16), DType::F32, &Device::Cpu).unwrap();
//! g.set_node_feat("paper", "feat", feat).unwrap();
//!
//! let sizes = get_feat_size(&g, &FeatField::per_type([("paper", vec!["feat"])])).unwrap();
//! assert_eq!(sizes["paper"], 16);
//! assert_eq!(sizes["author"], 0);
//! ```

pub mod dataloading;
pub mod dist;
mod error;
pub mod features;
pub mod hetero;

pub use dataloading::{
    Block, MiniBatch, MiniBatchLoader, NodeDataLoader, NodeDataset, NodeInferData,
};
pub use dist::{node_split, ProcessGroup};
pub use error::{Error, Result};
pub use features::{get_feat_size, prepare_batch_input, FeatField, FeatSize};
pub use hetero::{
    check_node_ids, EdgeStore, EdgeTensors, EdgeType, GraphStore, MemGraph, NodeId, NodeIds,
    NodeTensors, NodeType,
};

/// Feature field holding token ids of a node's text.
pub const TOKEN_IDX: &str = "input_ids";
/// Feature field holding an attention mask (2-D) or valid token count (1-D).
pub const ATT_MASK_IDX: &str = "attention_mask";
/// Feature field holding the valid token count of each node's text.
pub const VALID_LEN: &str = "valid_len";
/// Feature field the full-graph compute loop writes input embeddings to.
pub const INPUT_EMB: &str = "input_emb";
