use std::collections::HashMap;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use graphstorm_core::{
    check_node_ids, Error, FeatSize, GraphStore, NodeIds, NodeTensors, NodeType, Result,
};

use super::cache::{LmEmbedCache, LmState};
use super::fusion::LmFusion;
use super::models::LmModels;
use super::NodeLmConfig;
use crate::embed::{NodeEncoderConfig, NodeEncoderInputLayer, NodeInputLayer};
use crate::mode::TrainMode;

/// Configuration of the language models of an input layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmFusionConfig {
    /// One entry per language model.
    pub lm_configs: Vec<NodeLmConfig>,
    /// Rows per batch that receive LM gradients in training mode; `0`
    /// freezes the LMs and caches their outputs.
    pub num_train: usize,
    /// Chunk size when running an LM over all nodes of a type.
    pub infer_batch_size: usize,
}

impl Default for LmFusionConfig {
    fn default() -> Self {
        Self {
            lm_configs: Vec::new(),
            num_train: 0,
            infer_batch_size: 16,
        }
    }
}

impl LmFusionConfig {
    /// Config for `lm_configs` with defaults otherwise.
    pub fn new(lm_configs: Vec<NodeLmConfig>) -> Self {
        Self {
            lm_configs,
            ..Default::default()
        }
    }

    /// Set the number of trained rows per batch.
    pub fn with_num_train(mut self, num_train: usize) -> Self {
        self.num_train = num_train;
        self
    }

    /// Set the LM inference chunk size.
    pub fn with_infer_batch_size(mut self, infer_batch_size: usize) -> Self {
        self.infer_batch_size = infer_batch_size;
        self
    }
}

/// Lifecycle operations shared by the LM-backed input layers.
macro_rules! lm_lifecycle {
    ($ty:ty) => {
        impl $ty {
            /// Freeze or start training the LMs, see [`LmFusion::prepare`].
            pub fn prepare(&mut self) -> Result<()> {
                self.lm.prepare()
            }

            /// See [`LmFusion::warmup`].
            pub fn warmup(&mut self) -> Result<()> {
                self.lm.warmup()
            }

            /// See [`LmFusion::freeze`].
            pub fn freeze(&mut self) -> Result<()> {
                self.lm.freeze()
            }

            /// See [`LmFusion::unfreeze`].
            pub fn unfreeze(&mut self) {
                self.lm.unfreeze()
            }

            /// Current LM lifecycle state.
            pub fn lm_state(&self) -> LmState {
                self.lm.state()
            }

            /// The cache of LM outputs.
            pub fn lm_cache(&self) -> &LmEmbedCache {
                self.lm.cache()
            }

            /// The wrapped language models.
            pub fn lm_models(&self) -> &LmModels {
                self.lm.models()
            }
        }
    };
}

/// Input layer joining LM outputs to the raw features of text-bearing types.
///
/// For an LM type `t` with raw width `d` and LM width `h`, the inner
/// [`NodeEncoderInputLayer`] is built with input width `d + h` and sees
/// `[x_t | lm(text_t)]`.
pub struct LmNodeEncoderInputLayer {
    inner: NodeEncoderInputLayer,
    lm: LmFusion,
}

lm_lifecycle!(LmNodeEncoderInputLayer);

impl LmNodeEncoderInputLayer {
    /// Build the layer.
    ///
    /// # Arguments
    /// - `g`: Graph holding features and token fields
    /// - `feat_size`: Raw input feature width per type
    /// - `config`: Configuration of the inner encoder
    /// - `models`: The language models, see [`LmModels::new`]
    /// - `vb`: Variable builder for the inner encoder
    pub fn new(
        g: Arc<dyn GraphStore>,
        feat_size: &FeatSize,
        config: NodeEncoderConfig,
        models: LmModels,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut adjusted = feat_size.clone();
        for ntype in models.ntypes() {
            let hidden = models.hidden_size(&ntype).unwrap_or(0);
            *adjusted.entry(ntype).or_insert(0) += hidden;
        }
        let inner = NodeEncoderInputLayer::new(g.as_ref(), &adjusted, config, vb)?;
        Ok(Self {
            inner,
            lm: LmFusion::new(g, models),
        })
    }

    /// The encoder applied after the LM outputs are joined in.
    pub fn encoder(&self) -> &NodeEncoderInputLayer {
        &self.inner
    }
}

impl TrainMode for LmNodeEncoderInputLayer {
    fn is_training(&self) -> bool {
        self.inner.is_training()
    }

    fn set_training(&mut self, training: bool) {
        self.inner.set_training(training);
    }
}

impl NodeInputLayer for LmNodeEncoderInputLayer {
    fn forward(&self, input_feats: &NodeTensors, input_nodes: &NodeIds) -> Result<NodeTensors> {
        self.inner.check_input_nodes(input_nodes)?;
        let lm_feats = self.lm.embed(input_nodes, self.is_training())?;
        let mut feats = input_feats.clone();
        for (ntype, lm_feat) in lm_feats {
            if lm_feat.dim(0)? == 0 {
                continue;
            }
            let merged = match feats.remove(&ntype) {
                Some(feat) => {
                    let feat = feat.to_device(lm_feat.device())?.to_dtype(lm_feat.dtype())?;
                    Tensor::cat(&[&feat, &lm_feat], 1)?
                }
                None => lm_feat,
            };
            feats.insert(ntype, merged);
        }
        self.inner.forward(&feats, input_nodes)
    }

    fn out_dims(&self) -> usize {
        self.inner.out_dims()
    }

    fn device(&self) -> &Device {
        self.inner.device()
    }
}

/// Input layer whose node representation is the LM output alone.
///
/// Raw features are ignored. Every node type of the graph must be embedded
/// by an LM and all LMs must share one hidden size.
pub struct PureLmNodeInputLayer {
    lm: LmFusion,
    num_nodes: HashMap<NodeType, usize>,
    out_dims: usize,
    out_dtype: Option<DType>,
    device: Device,
    training: bool,
}

lm_lifecycle!(PureLmNodeInputLayer);

impl PureLmNodeInputLayer {
    /// Build the layer.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if a graph node type has no LM, or the LMs differ
    /// in hidden size.
    pub fn new(g: Arc<dyn GraphStore>, models: LmModels, device: Device) -> Result<Self> {
        let mut num_nodes = HashMap::new();
        let mut out_dims = None;
        for ntype in g.node_types() {
            let hidden = models.hidden_size(&ntype).ok_or_else(|| {
                Error::config(format!(
                    "node type {ntype} has no language model; every node type needs one"
                ))
            })?;
            match out_dims {
                Some(dims) if dims != hidden => {
                    return Err(Error::config(format!(
                        "all language models must share one hidden size, got {dims} and {hidden}"
                    )))
                }
                _ => out_dims = Some(hidden),
            }
            num_nodes.insert(ntype.clone(), g.num_nodes(&ntype)?);
        }
        let out_dims = out_dims.ok_or_else(|| Error::config("the graph has no node types"))?;
        Ok(Self {
            lm: LmFusion::new(g, models),
            num_nodes,
            out_dims,
            out_dtype: None,
            device,
            training: true,
        })
    }

    /// Cast every output to `dtype`.
    pub fn with_out_dtype(mut self, dtype: DType) -> Self {
        self.out_dtype = Some(dtype);
        self
    }
}

impl TrainMode for PureLmNodeInputLayer {
    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl NodeInputLayer for PureLmNodeInputLayer {
    fn forward(&self, _input_feats: &NodeTensors, input_nodes: &NodeIds) -> Result<NodeTensors> {
        for (ntype, ids) in input_nodes {
            let num_nodes = *self.num_nodes.get(ntype).ok_or_else(|| {
                Error::usage(format!("node type {ntype} is not known to the input layer"))
            })?;
            check_node_ids(ntype, ids, num_nodes)?;
        }
        let embs = self.lm.embed(input_nodes, self.training)?;
        embs.into_iter()
            .map(|(ntype, emb)| -> Result<(NodeType, Tensor)> {
                let emb = emb.to_device(&self.device)?;
                let emb = match self.out_dtype {
                    Some(dtype) => emb.to_dtype(dtype)?,
                    None => emb,
                };
                Ok((ntype, emb))
            })
            .collect()
    }

    fn out_dims(&self) -> usize {
        self.out_dims
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
