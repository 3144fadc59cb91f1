//! Full-graph input embedding computation.
//!
//! Runs an input layer over every node of the target types and stores the
//! result in the graph store, each worker handling its own contiguous shard
//! of node ids. After all workers finish, each one reads back the full
//! tables.

use std::time::Instant;

use candle_core::DType;
use graphstorm_core::{
    node_split, prepare_batch_input, Error, FeatField, GraphStore, NodeId, NodeIds, NodeTensors,
    NodeType, ProcessGroup, Result, INPUT_EMB,
};
use tracing::{info, warn};

use crate::embed::NodeInputLayer;
use crate::mode::EvalScope;

/// Chunks between two progress reports.
const LOG_EVERY: usize = 200;

/// Configuration for [`compute_node_input_embeddings`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedComputeConfig {
    /// Nodes per layer call.
    pub batch_size: usize,
    /// Feature fields fed to the layer.
    pub feat_field: FeatField,
    /// Types to embed; `None` means every type of the graph.
    pub target_ntypes: Option<Vec<NodeType>>,
    /// Graph store field the embeddings are written to.
    pub emb_field: String,
}

impl Default for EmbedComputeConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            feat_field: FeatField::None,
            target_ntypes: None,
            emb_field: INPUT_EMB.to_string(),
        }
    }
}

impl EmbedComputeConfig {
    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the feature fields.
    pub fn with_feat_field(mut self, feat_field: impl Into<FeatField>) -> Self {
        self.feat_field = feat_field.into();
        self
    }

    /// Restrict the computation to some types.
    pub fn with_target_ntypes<T: Into<NodeType>>(mut self, ntypes: impl IntoIterator<Item = T>) -> Self {
        self.target_ntypes = Some(ntypes.into_iter().map(Into::into).collect());
        self
    }

    /// Set the output field.
    pub fn with_emb_field(mut self, field: impl Into<String>) -> Self {
        self.emb_field = field.into();
        self
    }
}

/// Whether the output table of a type exists; fails if it has the wrong width.
fn check_emb_field(g: &dyn GraphStore, ntype: &NodeType, field: &str, dim: usize) -> Result<bool> {
    let Some(shape) = g.feat_shape(ntype, field) else {
        return Ok(false);
    };
    let width: usize = shape.iter().skip(1).product();
    if width != dim {
        return Err(Error::config(format!(
            "field \"{field}\" of node type {ntype} has width {width}, but the layer outputs {dim}"
        )));
    }
    Ok(true)
}

/// Compute input embeddings of all nodes with the input layer.
///
/// Every worker of `pg` calls this with its own handle. The layer runs in
/// evaluation mode and is handed back in the mode it came in.
///
/// # Returns
/// - The full `(num_nodes, out_dims)` table of every target type.
///
/// # Errors
///
/// [`Error::Config`] for a zero batch size, an unknown target type, or an
/// existing output field of the wrong width.
pub fn compute_node_input_embeddings<L>(
    g: &dyn GraphStore,
    layer: &mut L,
    config: &EmbedComputeConfig,
    pg: &ProcessGroup,
) -> Result<NodeTensors>
where
    L: NodeInputLayer + ?Sized,
{
    if config.batch_size == 0 {
        return Err(Error::config("batch size must be positive"));
    }
    let target_ntypes = match &config.target_ntypes {
        Some(ntypes) => ntypes.clone(),
        None => g.node_types(),
    };
    if let Some(ntype) = target_ntypes.iter().find(|t| !g.has_node_type(t)) {
        return Err(Error::config(format!(
            "target node type {ntype} is not in the graph"
        )));
    }

    let dim = layer.out_dims();
    let layer = EvalScope::new(layer);
    let device = layer.device().clone();
    let start = Instant::now();
    // Width checks run on every rank before the barrier; only rank 0 creates.
    let mut missing = Vec::new();
    for ntype in &target_ntypes {
        if !check_emb_field(g, ntype, &config.emb_field, dim)? {
            missing.push(ntype);
        }
    }
    if pg.rank() == 0 {
        info!(
            ntypes = target_ntypes.len(),
            world_size = pg.world_size(),
            "computing input embeddings"
        );
        for ntype in missing {
            g.init_node_feat(ntype, &config.emb_field, dim, DType::F32)?;
        }
    }
    pg.barrier();

    for ntype in &target_ntypes {
        let num_nodes = g.num_nodes(ntype)?;
        if num_nodes == 0 {
            warn!(ntype = %ntype, "node type has no nodes");
            continue;
        }
        let shard = node_split(num_nodes, pg);
        let ids: Vec<NodeId> = (shard.start as NodeId..shard.end as NodeId).collect();
        let num_batches = ids.len().div_ceil(config.batch_size);

        for (iter, chunk) in ids.chunks(config.batch_size).enumerate() {
            let mut input_nodes = NodeIds::new();
            input_nodes.insert(ntype.clone(), chunk.to_vec());
            let feats = prepare_batch_input(g, &input_nodes, &device, &config.feat_field)?;
            let mut embs = layer.forward(&feats, &input_nodes)?;
            let emb = embs.remove(ntype).ok_or_else(|| {
                Error::usage(format!("input layer returned no embeddings for {ntype}"))
            })?;
            g.write_node_feat(ntype, &config.emb_field, chunk, &emb.detach().to_dtype(DType::F32)?)?;

            if iter % LOG_EVERY == 0 && pg.rank() == 0 {
                info!(
                    ntype = %ntype,
                    iter,
                    num_batches,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "input embedding progress"
                );
            }
        }
    }
    drop(layer);
    pg.barrier();

    let mut embs = NodeTensors::new();
    for ntype in &target_ntypes {
        let num_nodes = g.num_nodes(ntype)?;
        let all: Vec<NodeId> = (0..num_nodes as NodeId).collect();
        embs.insert(ntype.clone(), g.fetch_node_feat(ntype, &config.emb_field, &all)?);
    }
    if pg.rank() == 0 {
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "finished computing input embeddings"
        );
    }
    Ok(embs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{NodeEncoderConfig, NodeEncoderInputLayer};
    use crate::mode::TrainMode;
    use candle_core::{Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use graphstorm_core::{get_feat_size, MemGraph};

    fn setup() -> (MemGraph, VarMap, NodeEncoderInputLayer) {
        let g = MemGraph::new();
        g.add_node_type("n0", 7);
        g.add_node_type("n1", 0);
        let feat = Tensor::ones((7, 3), DType::F32, &Device::Cpu).unwrap();
        g.set_node_feat("n0", "feat", feat).unwrap();
        let field = FeatField::per_type([("n0", vec!["feat"])]);
        let fs = get_feat_size(&g, &field).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = NodeEncoderInputLayer::new(&g, &fs, NodeEncoderConfig::new(4), vb).unwrap();
        (g, varmap, layer)
    }

    #[test]
    fn test_shapes_and_mode_restored() {
        let (g, _varmap, mut layer) = setup();
        let config = EmbedComputeConfig::default()
            .with_batch_size(3)
            .with_feat_field(FeatField::per_type([("n0", vec!["feat"])]));
        let embs =
            compute_node_input_embeddings(&g, &mut layer, &config, &ProcessGroup::single()).unwrap();
        assert_eq!(embs["n0"].dims(), &[7, 4]);
        assert_eq!(embs["n1"].dims(), &[0, 4]);
        assert!(layer.is_training());
        assert_eq!(g.feat_shape(&"n0".into(), INPUT_EMB), Some(vec![7, 4]));
    }

    #[test]
    fn test_existing_field_of_wrong_width() {
        let (g, _varmap, mut layer) = setup();
        g.init_node_feat(&"n0".into(), INPUT_EMB, 5, DType::F32).unwrap();
        let config = EmbedComputeConfig::default()
            .with_target_ntypes(["n0"])
            .with_feat_field(FeatField::per_type([("n0", vec!["feat"])]));
        let err = compute_node_input_embeddings(&g, &mut layer, &config, &ProcessGroup::single())
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unknown_target_type() {
        let (g, _varmap, mut layer) = setup();
        let config = EmbedComputeConfig::default().with_target_ntypes(["n5"]);
        let err = compute_node_input_embeddings(&g, &mut layer, &config, &ProcessGroup::single())
            .unwrap_err();
        assert!(err.is_config());
    }
}
