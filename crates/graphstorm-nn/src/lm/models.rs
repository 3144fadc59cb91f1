use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use graphstorm_core::{
    Error, GraphStore, NodeId, NodeType, Result, ATT_MASK_IDX, TOKEN_IDX, VALID_LEN,
};

use super::layer::LmFusionConfig;
use super::{build_lm, LanguageModel, NodeLmConfig};

struct LmEntry {
    config: NodeLmConfig,
    model: Box<dyn LanguageModel>,
}

/// The language models of an input layer and the node types they embed.
pub struct LmModels {
    entries: Vec<LmEntry>,
    ntype_model: HashMap<NodeType, usize>,
    num_train: usize,
    infer_batch_size: usize,
    trainable: bool,
    device: Device,
    dtype: DType,
}

impl LmModels {
    /// Build every LM of `config`; the i-th LM's parameters live under
    /// `vb.pp(i)`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty LM list, an unknown `lm_type`, a node
    /// type assigned twice, missing from the graph or lacking token ids.
    pub fn new(g: &dyn GraphStore, config: &LmFusionConfig, vb: VarBuilder) -> Result<Self> {
        let device = vb.device().clone();
        let dtype = vb.dtype();
        let models = config
            .lm_configs
            .iter()
            .enumerate()
            .map(|(i, cfg)| -> Result<(NodeLmConfig, Box<dyn LanguageModel>)> {
                Ok((cfg.clone(), build_lm(cfg, vb.pp(i.to_string()))?))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::with_models(
            g,
            models,
            config.num_train,
            config.infer_batch_size,
            device,
            dtype,
        )
    }

    /// Wrap already constructed language models.
    ///
    /// # Arguments
    /// - `g`: Graph holding the token fields
    /// - `models`: Each LM with the config naming its node types
    /// - `num_train`: Rows per batch that receive gradients in training mode
    /// - `infer_batch_size`: Chunk size when running an LM over all nodes
    /// - `device`: Device LM inputs are moved to
    /// - `dtype`: Dtype of the LM outputs
    pub fn with_models(
        g: &dyn GraphStore,
        models: Vec<(NodeLmConfig, Box<dyn LanguageModel>)>,
        num_train: usize,
        infer_batch_size: usize,
        device: Device,
        dtype: DType,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::config(
                "language model configurations must be provided",
            ));
        }
        if infer_batch_size == 0 {
            return Err(Error::config("LM inference batch size must be positive"));
        }

        let mut ntype_model = HashMap::new();
        for (i, (cfg, _)) in models.iter().enumerate() {
            for ntype in &cfg.node_types {
                if !g.has_node_type(ntype) {
                    return Err(Error::config(format!(
                        "language model node type {ntype} is not in the graph"
                    )));
                }
                if !g.has_node_feat(ntype, TOKEN_IDX) {
                    return Err(Error::config(format!(
                        "node type {ntype} has no \"{TOKEN_IDX}\" field for its language model"
                    )));
                }
                if ntype_model.insert(ntype.clone(), i).is_some() {
                    return Err(Error::config(format!(
                        "node type {ntype} is assigned to more than one language model"
                    )));
                }
            }
        }

        Ok(Self {
            entries: models
                .into_iter()
                .map(|(config, model)| LmEntry { config, model })
                .collect(),
            ntype_model,
            num_train,
            infer_batch_size,
            trainable: true,
            device,
            dtype,
        })
    }

    /// Node types embedded by some LM, sorted.
    pub fn ntypes(&self) -> Vec<NodeType> {
        let mut ntypes: Vec<NodeType> = self.ntype_model.keys().cloned().collect();
        ntypes.sort();
        ntypes
    }

    /// Whether a type is embedded by an LM.
    pub fn has_ntype(&self, ntype: &NodeType) -> bool {
        self.ntype_model.contains_key(ntype)
    }

    /// Number of language models.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no language models.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Config of the i-th LM.
    pub fn config(&self, i: usize) -> Option<&NodeLmConfig> {
        self.entries.get(i).map(|e| &e.config)
    }

    /// The LM embedding `ntype`.
    pub fn model_for(&self, ntype: &NodeType) -> Option<&dyn LanguageModel> {
        let i = *self.ntype_model.get(ntype)?;
        Some(self.entries[i].model.as_ref())
    }

    /// Pooled output width for `ntype`.
    pub fn hidden_size(&self, ntype: &NodeType) -> Option<usize> {
        self.model_for(ntype).map(|m| m.hidden_size())
    }

    /// Dtype of the LM outputs.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Rows per batch that receive gradients in training mode.
    pub fn num_train(&self) -> usize {
        self.num_train
    }

    /// Whether the LM parameters may receive gradients.
    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub(crate) fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    /// Run the LM of `ntype` on nodes `ids`.
    ///
    /// With `training`, a trainable LM and `num_train > 0`, gradients flow
    /// through at most `num_train` randomly chosen rows; all other outputs
    /// are detached.
    pub fn run(
        &self,
        g: &dyn GraphStore,
        ntype: &NodeType,
        ids: &[NodeId],
        training: bool,
    ) -> Result<Tensor> {
        let model = self.model_for(ntype).ok_or_else(|| {
            Error::usage(format!("node type {ntype} has no language model"))
        })?;
        if ids.is_empty() {
            return Ok(Tensor::zeros(
                (0, model.hidden_size()),
                self.dtype,
                &self.device,
            )?);
        }

        let input_ids = g.fetch_node_feat(ntype, TOKEN_IDX, ids)?;
        let seq_len = input_ids.dim(1)?;
        let attention_mask = attention_mask(g, ntype, ids, seq_len)?;
        let out = model.forward(
            &input_ids.to_device(&self.device)?,
            &attention_mask.to_device(&self.device)?,
        )?;

        if !(training && self.trainable && self.num_train > 0) {
            return Ok(out.detach());
        }
        if ids.len() <= self.num_train {
            return Ok(out);
        }
        let mut keep = vec![0f32; ids.len()];
        for i in rand::seq::index::sample(&mut rand::rng(), ids.len(), self.num_train).iter() {
            keep[i] = 1.0;
        }
        let keep = Tensor::from_vec(keep, (ids.len(), 1), &self.device)?.to_dtype(out.dtype())?;
        let frozen = out.detach().broadcast_mul(&keep.affine(-1.0, 1.0)?)?;
        Ok((out.broadcast_mul(&keep)? + frozen)?)
    }

    /// LM outputs over every node of `ntype`, in chunks of the inference
    /// batch size. Outputs are detached.
    pub fn infer_all(&self, g: &dyn GraphStore, ntype: &NodeType) -> Result<Tensor> {
        let hidden = self.hidden_size(ntype).ok_or_else(|| {
            Error::usage(format!("node type {ntype} has no language model"))
        })?;
        let num_nodes = g.num_nodes(ntype)?;
        let mut parts = Vec::with_capacity(num_nodes.div_ceil(self.infer_batch_size));
        for start in (0..num_nodes).step_by(self.infer_batch_size) {
            let end = (start + self.infer_batch_size).min(num_nodes);
            let ids: Vec<NodeId> = (start as NodeId..end as NodeId).collect();
            parts.push(self.run(g, ntype, &ids, false)?);
        }
        if parts.is_empty() {
            return Ok(Tensor::zeros((0, hidden), self.dtype, &self.device)?);
        }
        Ok(Tensor::cat(&parts, 0)?)
    }
}

/// Attention mask `(N, seq_len)` for nodes `ids`.
fn attention_mask(
    g: &dyn GraphStore,
    ntype: &NodeType,
    ids: &[NodeId],
    seq_len: usize,
) -> Result<Tensor> {
    let field = [ATT_MASK_IDX, VALID_LEN]
        .into_iter()
        .find(|field| g.has_node_feat(ntype, field));
    let Some(field) = field else {
        return Ok(Tensor::ones((ids.len(), seq_len), DType::F32, &Device::Cpu)?);
    };

    let mask = g.fetch_node_feat(ntype, field, ids)?;
    match mask.rank() {
        2 => Ok(mask.to_dtype(DType::F32)?),
        1 => {
            // Valid lengths: attend to the first len positions.
            let positions = Tensor::arange(0u32, seq_len as u32, &Device::Cpu)?
                .to_dtype(DType::F32)?
                .unsqueeze(0)?;
            let lens = mask.to_dtype(DType::F32)?.unsqueeze(1)?;
            Ok(positions.broadcast_lt(&lens)?.to_dtype(DType::F32)?)
        }
        rank => Err(Error::config(format!(
            "field \"{field}\" of node type {ntype} has rank {rank}, expected 1 or 2"
        ))),
    }
}
