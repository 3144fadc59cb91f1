//! Input embedding layers, models and prediction loops.
//!
//! `graphstorm-nn` sits on top of `graphstorm-core`: it turns per-type node
//! features into embeddings and embeddings into predictions.
//!
//! # Modules
//!
//! - [`embed`]: Input layers over raw features and sparse node embeddings
//! - [`lm`]: Language-model fusion for text-bearing node types
//! - [`compute`]: Full-graph input embedding computation
//! - [`decoder`]: Prediction heads
//! - [`model`]: The node model contract and a reference model
//! - [`inference`]: Mini-batch prediction loops
//! - [`mode`]: Train/eval mode switching
//!
//! # Example: Embed a Batch
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use graphstorm_core::{get_feat_size, FeatField, MemGraph, NodeIds, NodeTensors};
//! use graphstorm_nn::embed::{NodeEncoderConfig, NodeEncoderInputLayer, NodeInputLayer};
//!
//! let g = MemGraph::new();
//! g.add_node_type("paper", 5);
//! g.add_node_type("author", 3);
//! g.set_node_feat("paper", "feat", Tensor::ones((5, 4), DType::F32, &Device::Cpu)?)?;
//!
//! let feat_field = FeatField::per_type([("paper", vec!["feat"])]);
//! let feat_size = get_feat_size(&g, &feat_field)?;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let layer = NodeEncoderInputLayer::new(&g, &feat_size, NodeEncoderConfig::new(8), vb)?;
//!
//! let mut nodes = NodeIds::new();
//! nodes.insert("paper".into(), vec![0, 3]);
//! nodes.insert("author".into(), vec![2]);
//! let feats = graphstorm_core::prepare_batch_input(&g, &nodes, &Device::Cpu, &feat_field)?;
//! let embs = layer.forward(&feats, &nodes)?;
//! assert_eq!(embs["paper"].dims(), &[2, 8]);
//! assert_eq!(embs["author"].dims(), &[1, 8]);
//! # Ok::<(), graphstorm_nn::Error>(())
//! ```

pub mod compute;
pub mod decoder;
pub mod embed;
pub mod inference;
pub mod lm;
pub mod mode;
pub mod model;

pub use compute::{compute_node_input_embeddings, EmbedComputeConfig};
pub use decoder::{Decoder, EntityClassifier};
pub use embed::{NodeEncoderConfig, NodeEncoderInputLayer, NodeInputLayer};
pub use graphstorm_core::{Error, Result};
pub use inference::{node_mini_batch_gnn_predict, node_mini_batch_predict, PredictOutput};
pub use lm::{
    LanguageModel, LmEmbedCache, LmFusion, LmFusionConfig, LmModels, LmNodeEncoderInputLayer,
    LmState, NodeLmConfig, PureLmNodeInputLayer,
};
pub use mode::{EvalScope, TrainMode};
pub use model::{GnnEncoder, ModelOutput, NodeGnnModel, NodeModel};
