//! `graphstorm` turns heterogeneous graph nodes into embeddings and
//! predictions.
//!
//! The facade re-exports the two workspace crates:
//!
//! - [`graphstorm_core`]: node types, the graph store contract,
//!   feature resolution, the process group and data loading
//! - [`graphstorm_nn`]: input layers, language-model fusion, the
//!   full-graph compute loop, models and mini-batch prediction loops
//!
//! Most programs only need the [`prelude`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use graphstorm::prelude::*;
//!
//! let g = Arc::new(MemGraph::new());
//! g.add_node_type("paper", 6);
//! g.set_node_feat("paper", "feat", Tensor::ones((6, 3), DType::F32, &Device::Cpu)?)?;
//! g.set_node_feat("paper", "label", Tensor::new(&[0u32, 1, 0, 1, 0, 1], &Device::Cpu)?)?;
//!
//! let feat_field = FeatField::from("feat");
//! let feat_size = get_feat_size(g.as_ref(), &feat_field)?;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let config = NodeEncoderConfig::new(4);
//! let layer = NodeEncoderInputLayer::new(g.as_ref(), &feat_size, config, vb.clone())?;
//! let decoder = EntityClassifier::new(4, 2, vb.pp("decoder"))?;
//! let mut model = NodeGnnModel::new(Box::new(layer), Box::new(decoder));
//!
//! let data = NodeInferData::new(g, &["paper".into()], feat_field, Some("label".into()))?;
//! let loader = NodeDataLoader::new(data, 4)?;
//! let out = node_mini_batch_gnn_predict(&mut model, &loader, false, true)?;
//! assert_eq!(out.preds["paper"].dims(), &[6]);
//! assert_eq!(out.embs["paper"].dims(), &[6, 4]);
//! # Ok::<(), graphstorm::Error>(())
//! ```

pub use graphstorm_core;
pub use graphstorm_nn;

pub use graphstorm_core::{Error, Result};

/// The types most programs use.
pub mod prelude {
    pub use graphstorm_core::{
        get_feat_size, prepare_batch_input, FeatField, FeatSize, GraphStore, MemGraph,
        MiniBatch, MiniBatchLoader, NodeDataLoader, NodeDataset, NodeIds, NodeInferData,
        NodeTensors, NodeType, ProcessGroup,
    };
    pub use graphstorm_nn::{
        compute_node_input_embeddings, node_mini_batch_gnn_predict, node_mini_batch_predict,
        Decoder, EmbedComputeConfig, EntityClassifier, LmFusionConfig, LmModels,
        LmNodeEncoderInputLayer, NodeEncoderConfig, NodeEncoderInputLayer, NodeGnnModel,
        NodeInputLayer, NodeLmConfig, NodeModel, PureLmNodeInputLayer, TrainMode,
    };
}
