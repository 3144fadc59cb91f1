//! Node input embedding layers.
//!
//! An input layer turns whatever a node type has (raw features, a trainable
//! per-node table, text run through a language model) into one fixed-width
//! vector per node:
//!
//! ```text
//! h_t = act(x_t W_t)                       features only
//! h_t = act([x_t W_t | E_t[ids]] P_t)      features + sparse embedding
//! h_t = act(E_t[ids] P_t)                  featureless
//! ```
//!
//! Where `W_t` is `input_projs.<t>`, `E_t` is `sparse_embeds.<t>` and `P_t` is
//! `proj_matrix.<t>`. Dropout follows the activation in training mode.

use std::collections::HashMap;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::init::Init;
use candle_nn::{Activation, Dropout, VarBuilder};
use graphstorm_core::{
    check_node_ids, Error, FeatSize, GraphStore, NodeId, NodeIds, NodeTensors, NodeType, Result,
};

use crate::mode::TrainMode;

/// Gain of Xavier initialisation for layers followed by a ReLU.
const RELU_GAIN: f64 = std::f64::consts::SQRT_2;

/// A layer mapping per-type input features to per-type embeddings.
pub trait NodeInputLayer: TrainMode {
    /// Embed a batch.
    ///
    /// # Arguments
    /// - `input_feats`: Raw features per type, row-aligned with `input_nodes`.
    ///   Types without features are simply absent.
    /// - `input_nodes`: Node ids per type.
    ///
    /// # Returns
    /// - One `(len(ids), out_dims)` tensor per type of `input_nodes`.
    fn forward(&self, input_feats: &NodeTensors, input_nodes: &NodeIds) -> Result<NodeTensors>;

    /// Output embedding width.
    fn out_dims(&self) -> usize;

    /// Device the parameters live on.
    fn device(&self) -> &Device;
}

/// Configuration for [`NodeEncoderInputLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEncoderConfig {
    /// Output width `H`.
    pub embed_size: usize,
    /// Activation applied after projection.
    pub activation: Option<Activation>,
    /// Dropout probability (training mode only).
    pub dropout: f32,
    /// Learn a sparse embedding for every node, also for types with features.
    pub use_node_embeddings: bool,
    /// Learn a sparse embedding for featureless types.
    pub featureless_embeddings: bool,
    /// Sparse embedding width `S`; defaults to `embed_size`.
    pub sparse_embed_size: Option<usize>,
    /// Cast every output to this dtype.
    pub out_dtype: Option<DType>,
}

impl Default for NodeEncoderConfig {
    fn default() -> Self {
        Self {
            embed_size: 128,
            activation: None,
            dropout: 0.0,
            use_node_embeddings: false,
            featureless_embeddings: true,
            sparse_embed_size: None,
            out_dtype: None,
        }
    }
}

impl NodeEncoderConfig {
    /// Config with output width `embed_size` and defaults otherwise.
    pub fn new(embed_size: usize) -> Self {
        Self {
            embed_size,
            ..Default::default()
        }
    }

    /// Set the activation.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self
    }

    /// Set the dropout probability.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Enable or disable sparse embeddings on every type.
    pub fn with_node_embeddings(mut self, enabled: bool) -> Self {
        self.use_node_embeddings = enabled;
        self
    }

    /// Enable or disable sparse embeddings on featureless types.
    pub fn with_featureless_embeddings(mut self, enabled: bool) -> Self {
        self.featureless_embeddings = enabled;
        self
    }

    /// Set the sparse embedding width.
    pub fn with_sparse_embed_size(mut self, size: usize) -> Self {
        self.sparse_embed_size = Some(size);
        self
    }

    /// Cast outputs to `dtype`.
    pub fn with_out_dtype(mut self, dtype: DType) -> Self {
        self.out_dtype = Some(dtype);
        self
    }
}

fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = RELU_GAIN * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Gather rows of `table` by node id.
pub(crate) fn gather_rows(table: &Tensor, ids: &[NodeId]) -> Result<Tensor> {
    let index = Tensor::from_slice(ids, ids.len(), table.device())?;
    Ok(table.index_select(&index, 0)?)
}

/// Input layer over raw features and sparse node embeddings.
///
/// Parameters are registered through the [`VarBuilder`] as
/// `input_projs.<ntype>`, `sparse_embeds.<ntype>` and `proj_matrix.<ntype>`.
pub struct NodeEncoderInputLayer {
    embed_size: usize,
    num_nodes: HashMap<NodeType, usize>,
    input_projs: HashMap<NodeType, Tensor>,
    sparse_embeds: HashMap<NodeType, Tensor>,
    proj_matrix: HashMap<NodeType, Tensor>,
    activation: Option<Activation>,
    dropout: Option<Dropout>,
    out_dtype: Option<DType>,
    dtype: DType,
    device: Device,
    training: bool,
}

impl NodeEncoderInputLayer {
    /// Build the layer for every node type of `g`.
    ///
    /// # Arguments
    /// - `g`: Graph the layer embeds nodes of
    /// - `feat_size`: Input feature width per type (see
    ///   [`get_feat_size`](graphstorm_core::get_feat_size))
    /// - `config`: Layer configuration
    /// - `vb`: Variable builder for parameter initialisation
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `feat_size` names a type not in `g`, or a type
    /// ends up with no enabled stage.
    pub fn new(
        g: &dyn GraphStore,
        feat_size: &FeatSize,
        config: NodeEncoderConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.embed_size == 0 {
            return Err(Error::config("embed size must be positive"));
        }
        let mut unknown: Vec<&NodeType> =
            feat_size.keys().filter(|t| !g.has_node_type(t)).collect();
        unknown.sort();
        if let Some(ntype) = unknown.first() {
            return Err(Error::config(format!(
                "feature size given for node type {ntype}, which is not in the graph"
            )));
        }

        let hidden = config.embed_size;
        let sparse = config.sparse_embed_size.unwrap_or(hidden);
        let mut layer = Self {
            embed_size: hidden,
            num_nodes: HashMap::new(),
            input_projs: HashMap::new(),
            sparse_embeds: HashMap::new(),
            proj_matrix: HashMap::new(),
            activation: config.activation,
            dropout: (config.dropout > 0.0).then(|| Dropout::new(config.dropout)),
            out_dtype: config.out_dtype,
            dtype: vb.dtype(),
            device: vb.device().clone(),
            training: true,
        };

        for ntype in g.node_types() {
            let num_nodes = g.num_nodes(&ntype)?;
            let fs = feat_size.get(&ntype).copied().unwrap_or(0);
            let name = ntype.as_str();
            let with_sparse = config.use_node_embeddings || (fs == 0 && config.featureless_embeddings);

            if fs == 0 && !with_sparse {
                return Err(Error::config(format!(
                    "node type {ntype} has no input features and sparse embeddings are disabled"
                )));
            }
            if fs > 0 {
                let proj = vb
                    .pp("input_projs")
                    .get_with_hints((fs, hidden), name, xavier_uniform(fs, hidden))?;
                layer.input_projs.insert(ntype.clone(), proj);
            }
            if with_sparse {
                let table = vb.pp("sparse_embeds").get_with_hints(
                    (num_nodes, sparse),
                    name,
                    Init::Uniform { lo: -1.0, up: 1.0 },
                )?;
                let proj_in = if fs > 0 { hidden + sparse } else { sparse };
                let proj = vb.pp("proj_matrix").get_with_hints(
                    (proj_in, hidden),
                    name,
                    xavier_uniform(proj_in, hidden),
                )?;
                layer.sparse_embeds.insert(ntype.clone(), table);
                layer.proj_matrix.insert(ntype.clone(), proj);
            }
            tracing::debug!(
                ntype = %ntype,
                feat_size = fs,
                sparse = with_sparse,
                "built input embedding"
            );
            layer.num_nodes.insert(ntype, num_nodes);
        }
        Ok(layer)
    }

    /// Feature projection of a type.
    pub fn input_proj(&self, ntype: &str) -> Option<&Tensor> {
        self.input_projs.get(ntype)
    }

    /// Sparse embedding table of a type.
    pub fn sparse_embed(&self, ntype: &str) -> Option<&Tensor> {
        self.sparse_embeds.get(ntype)
    }

    /// Projection applied after the sparse embedding is joined in.
    pub fn proj_matrix(&self, ntype: &str) -> Option<&Tensor> {
        self.proj_matrix.get(ntype)
    }

    /// Node types the layer was built for, sorted.
    pub fn ntypes(&self) -> Vec<NodeType> {
        let mut ntypes: Vec<NodeType> = self.num_nodes.keys().cloned().collect();
        ntypes.sort();
        ntypes
    }

    /// Dtype of the layer outputs.
    pub fn out_dtype(&self) -> DType {
        self.out_dtype.unwrap_or(self.dtype)
    }

    /// Fail if a batch holds a type the layer was not built for, or an id
    /// out of range.
    pub(crate) fn check_input_nodes(&self, input_nodes: &NodeIds) -> Result<()> {
        let mut ntypes: Vec<&NodeType> = input_nodes.keys().collect();
        ntypes.sort();
        for ntype in ntypes {
            let num_nodes = *self.num_nodes.get(ntype).ok_or_else(|| {
                Error::usage(format!("node type {ntype} is not known to the input layer"))
            })?;
            check_node_ids(ntype, &input_nodes[ntype], num_nodes)?;
        }
        Ok(())
    }

    fn embed_ntype(&self, ntype: &NodeType, feat: Option<&Tensor>, ids: &[NodeId]) -> Result<Tensor> {
        if ids.is_empty() {
            return Ok(Tensor::zeros(
                (0, self.embed_size),
                self.out_dtype(),
                &self.device,
            )?);
        }

        let emb = match (feat, self.input_projs.get(ntype)) {
            (Some(feat), Some(proj)) => {
                let rows = feat.dim(0)?;
                if rows != ids.len() {
                    return Err(Error::DimensionMismatch {
                        expected: ids.len(),
                        got: rows,
                    });
                }
                let emb = feat.to_device(&self.device)?.to_dtype(self.dtype)?.matmul(proj)?;
                match (self.sparse_embeds.get(ntype), self.proj_matrix.get(ntype)) {
                    (Some(table), Some(proj)) => {
                        let sparse = gather_rows(table, ids)?;
                        Tensor::cat(&[&emb, &sparse], 1)?.matmul(proj)?
                    }
                    _ => emb,
                }
            }
            (Some(_), None) => {
                return Err(Error::usage(format!(
                    "input features given for node type {ntype}, which was built without them"
                )))
            }
            (None, Some(_)) => {
                return Err(Error::usage(format!(
                    "node type {ntype} needs input features, but none were supplied"
                )))
            }
            (None, None) => match (self.sparse_embeds.get(ntype), self.proj_matrix.get(ntype)) {
                (Some(table), Some(proj)) => gather_rows(table, ids)?.matmul(proj)?,
                _ => {
                    return Err(Error::usage(format!(
                        "node type {ntype} has neither input features nor a sparse embedding"
                    )))
                }
            },
        };

        let emb = match &self.activation {
            Some(act) => act.forward(&emb)?,
            None => emb,
        };
        let emb = match &self.dropout {
            Some(dropout) => dropout.forward(&emb, self.training)?,
            None => emb,
        };
        Ok(match self.out_dtype {
            Some(dtype) => emb.to_dtype(dtype)?,
            None => emb,
        })
    }
}

impl TrainMode for NodeEncoderInputLayer {
    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl NodeInputLayer for NodeEncoderInputLayer {
    fn forward(&self, input_feats: &NodeTensors, input_nodes: &NodeIds) -> Result<NodeTensors> {
        self.check_input_nodes(input_nodes)?;
        let mut embs = NodeTensors::with_capacity(input_nodes.len());
        for (ntype, ids) in input_nodes {
            let emb = self.embed_ntype(ntype, input_feats.get(ntype), ids)?;
            embs.insert(ntype.clone(), emb);
        }
        Ok(embs)
    }

    fn out_dims(&self) -> usize {
        self.embed_size
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use graphstorm_core::MemGraph;

    fn graph() -> MemGraph {
        let g = MemGraph::new();
        g.add_node_type("n0", 4);
        g.add_node_type("n1", 3);
        g
    }

    fn feat_size(n0: usize) -> FeatSize {
        let mut fs = FeatSize::new();
        fs.insert("n0".into(), n0);
        fs
    }

    fn build(config: NodeEncoderConfig, fs: &FeatSize) -> (VarMap, NodeEncoderInputLayer) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = NodeEncoderInputLayer::new(&graph(), fs, config, vb).unwrap();
        (varmap, layer)
    }

    #[test]
    fn test_parameter_shapes() {
        let (varmap, layer) = build(NodeEncoderConfig::new(8).with_node_embeddings(true), &feat_size(2));
        assert_eq!(layer.input_proj("n0").unwrap().dims(), &[2, 8]);
        assert_eq!(layer.sparse_embed("n0").unwrap().dims(), &[4, 8]);
        assert_eq!(layer.proj_matrix("n0").unwrap().dims(), &[16, 8]);
        assert!(layer.input_proj("n1").is_none());
        assert_eq!(layer.proj_matrix("n1").unwrap().dims(), &[8, 8]);
        assert_eq!(varmap.all_vars().len(), 5);
    }

    #[test]
    fn test_sparse_size_override() {
        let config = NodeEncoderConfig::new(4).with_sparse_embed_size(6);
        let (_, layer) = build(config, &feat_size(2));
        assert!(layer.sparse_embed("n0").is_none());
        assert_eq!(layer.sparse_embed("n1").unwrap().dims(), &[3, 6]);
        assert_eq!(layer.proj_matrix("n1").unwrap().dims(), &[6, 4]);
    }

    #[test]
    fn test_no_stage_is_config_error() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = NodeEncoderConfig::new(4).with_featureless_embeddings(false);
        let res = NodeEncoderInputLayer::new(&graph(), &feat_size(2), config, vb);
        assert!(res.err().unwrap().is_config());
    }

    #[test]
    fn test_unknown_feat_size_type() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut fs = feat_size(2);
        fs.insert("n9".into(), 2);
        let res = NodeEncoderInputLayer::new(&graph(), &fs, NodeEncoderConfig::new(4), vb);
        assert!(res.err().unwrap().is_config());
    }

    #[test]
    fn test_missing_features_is_usage_error() {
        let (_, layer) = build(NodeEncoderConfig::new(4), &feat_size(2));
        let mut nodes = NodeIds::new();
        nodes.insert("n0".into(), vec![0, 1]);
        let err = layer.forward(&NodeTensors::new(), &nodes).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_feature_row_mismatch() {
        let (_, layer) = build(NodeEncoderConfig::new(4), &feat_size(2));
        let mut nodes = NodeIds::new();
        nodes.insert("n0".into(), vec![0, 1]);
        let mut feats = NodeTensors::new();
        feats.insert("n0".into(), Tensor::ones((3, 2), DType::F32, &Device::Cpu).unwrap());
        let err = layer.forward(&feats, &nodes).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 3 }));
    }

    #[test]
    fn test_out_of_range_ids() {
        let (_, layer) = build(NodeEncoderConfig::new(4), &feat_size(2));
        let mut nodes = NodeIds::new();
        nodes.insert("n1".into(), vec![3]);
        assert!(layer.forward(&NodeTensors::new(), &nodes).unwrap_err().is_usage());
    }

    #[test]
    fn test_dropout_only_in_training() {
        let config = NodeEncoderConfig::new(16).with_dropout(0.5);
        let (_, mut layer) = build(config, &feat_size(2));
        let mut nodes = NodeIds::new();
        nodes.insert("n1".into(), vec![0, 1, 2]);
        layer.set_training(false);
        let a = layer.forward(&NodeTensors::new(), &nodes).unwrap()["n1"]
            .to_vec2::<f32>()
            .unwrap();
        let b = layer.forward(&NodeTensors::new(), &nodes).unwrap()["n1"]
            .to_vec2::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }
}
