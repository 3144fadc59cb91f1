//! Node prediction models.
//!
//! A model is an input layer, an optional message-passing encoder and a
//! decoder. [`NodeModel`] is the contract the prediction loops rely on;
//! [`NodeGnnModel`] is the reference implementation.

use std::sync::PoisonError;

use candle_core::{DType, Device, Tensor};
use candle_nn::{loss, VarMap};
use graphstorm_core::{Block, EdgeTensors, Error, NodeIds, NodeTensors, NodeType, Result};

use crate::decoder::Decoder;
use crate::embed::NodeInputLayer;
use crate::mode::TrainMode;

/// Output of [`NodeModel::predict`].
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// One tensor per node type.
    PerType(NodeTensors),
    /// A single tensor; the node type is implied by the batch.
    Flat(Tensor),
}

impl ModelOutput {
    /// Per-type form, attributing a flat tensor to `ntype`.
    ///
    /// # Errors
    ///
    /// [`Error::Usage`] for a flat output without a type to attribute it to.
    pub fn into_per_type(self, ntype: Option<&NodeType>) -> Result<NodeTensors> {
        match self {
            Self::PerType(tensors) => Ok(tensors),
            Self::Flat(tensor) => {
                let ntype = ntype.ok_or_else(|| {
                    Error::usage("flat model output, but the batch does not name one node type")
                })?;
                Ok(NodeTensors::from([(ntype.clone(), tensor)]))
            }
        }
    }

    /// Whether this is the flat form.
    pub fn is_flat(&self) -> bool {
        matches!(self, Self::Flat(_))
    }
}

/// Message passing over the blocks of a mini-batch.
pub trait GnnEncoder: Send + Sync {
    /// Encode the input-layer output `h` through `blocks`, returning
    /// embeddings of the destination nodes of the last block.
    fn compute_embed_step(&self, blocks: &[Block], h: &NodeTensors) -> Result<NodeTensors>;
}

/// A node prediction model.
pub trait NodeModel: TrainMode {
    /// Device inputs should be moved to.
    fn device(&self) -> &Device;

    /// Training loss of a batch.
    fn forward(
        &self,
        blocks: &[Block],
        node_feats: &NodeTensors,
        edge_feats: Option<&EdgeTensors>,
        labels: &NodeTensors,
        input_nodes: &NodeIds,
    ) -> Result<Tensor>;

    /// Predictions and embeddings of a batch.
    ///
    /// Predictions are class ids, or class probabilities with `return_proba`.
    fn predict(
        &self,
        blocks: &[Block],
        node_feats: &NodeTensors,
        edge_feats: Option<&EdgeTensors>,
        input_nodes: &NodeIds,
        return_proba: bool,
    ) -> Result<(ModelOutput, ModelOutput)>;

    /// The prediction head.
    fn decoder(&self) -> &dyn Decoder;
}

/// Input layer, optional GNN encoder and decoder.
pub struct NodeGnnModel {
    input_layer: Box<dyn NodeInputLayer>,
    encoder: Option<Box<dyn GnnEncoder>>,
    decoder: Box<dyn Decoder>,
    alpha_l2norm: f64,
    dense_params: Vec<Tensor>,
    training: bool,
}

impl NodeGnnModel {
    /// Create a model without message passing and without regularisation.
    pub fn new(input_layer: Box<dyn NodeInputLayer>, decoder: Box<dyn Decoder>) -> Self {
        let training = input_layer.is_training();
        Self {
            input_layer,
            encoder: None,
            decoder,
            alpha_l2norm: 0.0,
            dense_params: Vec::new(),
            training,
        }
    }

    /// Add a message-passing encoder.
    pub fn with_encoder(mut self, encoder: Box<dyn GnnEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// L2-regularise the dense parameters of `varmap` with weight `alpha`.
    /// Sparse embedding tables are not regularised.
    pub fn with_l2norm(mut self, varmap: &VarMap, alpha: f64) -> Self {
        let vars = varmap.data().lock().unwrap_or_else(PoisonError::into_inner);
        let mut named: Vec<(&String, Tensor)> = vars
            .iter()
            .filter(|(name, _)| !name.starts_with("sparse_embeds."))
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        self.dense_params = named.into_iter().map(|(_, t)| t).collect();
        self.alpha_l2norm = alpha;
        self
    }

    /// The input layer.
    pub fn input_layer(&self) -> &dyn NodeInputLayer {
        self.input_layer.as_ref()
    }

    /// The input layer, mutably.
    pub fn input_layer_mut(&mut self) -> &mut dyn NodeInputLayer {
        self.input_layer.as_mut()
    }

    fn encode(
        &self,
        blocks: &[Block],
        node_feats: &NodeTensors,
        input_nodes: &NodeIds,
    ) -> Result<NodeTensors> {
        let h = self.input_layer.forward(node_feats, input_nodes)?;
        if blocks.is_empty() {
            return Ok(h);
        }
        let encoder = self.encoder.as_ref().ok_or_else(|| {
            Error::usage("message-passing blocks given, but the model has no GNN encoder")
        })?;
        encoder.compute_embed_step(blocks, &h)
    }

    fn l2_penalty(&self) -> Result<Tensor> {
        let mut reg = Tensor::zeros((), DType::F32, self.input_layer.device())?;
        for param in &self.dense_params {
            let sq = param.to_dtype(DType::F32)?.sqr()?.sum_all()?;
            reg = (reg + sq.to_device(self.input_layer.device())?)?;
        }
        Ok(reg)
    }
}

impl TrainMode for NodeGnnModel {
    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.input_layer.set_training(training);
    }
}

impl NodeModel for NodeGnnModel {
    fn device(&self) -> &Device {
        self.input_layer.device()
    }

    fn forward(
        &self,
        blocks: &[Block],
        node_feats: &NodeTensors,
        _edge_feats: Option<&EdgeTensors>,
        labels: &NodeTensors,
        input_nodes: &NodeIds,
    ) -> Result<Tensor> {
        let embs = self.encode(blocks, node_feats, input_nodes)?;
        let mut ntypes: Vec<&NodeType> = labels.keys().collect();
        ntypes.sort();

        let mut pred_loss: Option<Tensor> = None;
        for ntype in ntypes {
            let emb = embs.get(ntype).ok_or_else(|| {
                Error::usage(format!("labels given for node type {ntype}, which has no embeddings"))
            })?;
            let logits = self.decoder.forward(emb)?.to_dtype(DType::F32)?;
            let target = labels[ntype].to_device(logits.device())?.to_dtype(DType::U32)?;
            let l = loss::cross_entropy(&logits, &target)?;
            pred_loss = Some(match pred_loss {
                Some(acc) => (acc + l)?,
                None => l,
            });
        }
        let pred_loss = pred_loss.ok_or_else(|| Error::usage("no labels given for the batch"))?;
        if self.alpha_l2norm == 0.0 {
            return Ok(pred_loss);
        }
        let reg = self.l2_penalty()?.to_device(pred_loss.device())?;
        Ok((pred_loss + (reg * self.alpha_l2norm)?)?)
    }

    fn predict(
        &self,
        blocks: &[Block],
        node_feats: &NodeTensors,
        _edge_feats: Option<&EdgeTensors>,
        input_nodes: &NodeIds,
        return_proba: bool,
    ) -> Result<(ModelOutput, ModelOutput)> {
        let embs = self.encode(blocks, node_feats, input_nodes)?;
        let mut preds = NodeTensors::with_capacity(embs.len());
        for (ntype, emb) in &embs {
            let pred = if return_proba {
                self.decoder.predict_proba(emb)?
            } else {
                self.decoder.predict(emb)?
            };
            preds.insert(ntype.clone(), pred);
        }
        Ok((ModelOutput::PerType(preds), ModelOutput::PerType(embs)))
    }

    fn decoder(&self) -> &dyn Decoder {
        self.decoder.as_ref()
    }
}
