//! Datasets and mini-batch loaders for node prediction.
//!
//! A loader yields [`MiniBatch`]es of `(input_nodes, seeds, blocks)` and
//! exposes the [`NodeDataset`] it was built from, which in turn fetches input
//! features for `input_nodes` and labels for `seeds`.
//!
//! Neighbourhood sampling belongs to the graph library that produces
//! [`Block`]s; [`NodeDataLoader`] yields seed batches without sampling
//! (empty blocks), which models treat as "encode the inputs directly".

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::Device;

use crate::error::{Error, Result};
use crate::features::{prepare_batch_input, FeatField};
use crate::hetero::{EdgeStore, EdgeType, GraphStore, NodeId, NodeIds, NodeTensors, NodeType};

/// One message-passing layer of a sampled mini-batch.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Source (input-side) nodes per type.
    pub src_nodes: NodeIds,
    /// Destination (output-side) nodes per type.
    pub dst_nodes: NodeIds,
    /// Edges per edge type; indices are positions into `src_nodes` /
    /// `dst_nodes` of the edge type's source and destination node types.
    pub edges: HashMap<EdgeType, EdgeStore>,
}

impl Block {
    /// Total number of edges in the block.
    pub fn num_edges(&self) -> usize {
        self.edges.values().map(EdgeStore::num_edges).sum()
    }
}

/// A loader item.
#[derive(Debug, Clone, Default)]
pub struct MiniBatch {
    /// All nodes whose input features the batch needs.
    pub input_nodes: NodeIds,
    /// Nodes to predict for.
    pub seeds: NodeIds,
    /// Message-passing blocks, outermost first. Empty means no message passing.
    pub blocks: Vec<Block>,
}

impl MiniBatch {
    /// Number of seed nodes over all types.
    pub fn num_seeds(&self) -> usize {
        self.seeds.values().map(Vec::len).sum()
    }
}

/// The dataset behind a loader.
pub trait NodeDataset {
    /// Input features of `input_nodes`, on `device`.
    fn get_node_feats(&self, input_nodes: &NodeIds, device: &Device) -> Result<NodeTensors>;

    /// Labels of `seeds`, per type, row-aligned with the seed ids.
    fn get_labels(&self, seeds: &NodeIds) -> Result<NodeTensors>;

    /// Whether a label field was configured.
    fn has_labels(&self) -> bool;
}

/// A mini-batch loader: a dataset plus a fallible sequence of batches.
pub trait MiniBatchLoader {
    /// Dataset the loader was built from.
    fn data(&self) -> &dyn NodeDataset;

    /// Batches in yield order. Iteration errors are passed through unchanged.
    fn batches(&self) -> Box<dyn Iterator<Item = Result<MiniBatch>> + '_>;
}

/// Inference dataset over a graph store.
pub struct NodeInferData {
    g: Arc<dyn GraphStore>,
    node_feat_field: FeatField,
    label_field: Option<String>,
    infer_idxs: NodeIds,
}

impl std::fmt::Debug for NodeInferData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInferData")
            .field("node_feat_field", &self.node_feat_field)
            .field("label_field", &self.label_field)
            .field("infer_idxs", &self.infer_idxs)
            .finish_non_exhaustive()
    }
}

impl NodeInferData {
    /// Build a dataset predicting on every node of `target_ntypes`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if a target type is not in the graph, or the label
    /// field is missing on one of them.
    pub fn new(
        g: Arc<dyn GraphStore>,
        target_ntypes: &[NodeType],
        node_feat_field: FeatField,
        label_field: Option<String>,
    ) -> Result<Self> {
        let mut infer_idxs = NodeIds::new();
        for ntype in target_ntypes {
            if !g.has_node_type(ntype) {
                return Err(Error::config(format!(
                    "target node type {ntype} is not in the graph"
                )));
            }
            if let Some(field) = &label_field {
                if !g.has_node_feat(ntype, field) {
                    return Err(Error::config(format!(
                        "label field \"{field}\" does not exist for node type {ntype}"
                    )));
                }
            }
            let n = g.num_nodes(ntype)?;
            infer_idxs.insert(ntype.clone(), (0..n as NodeId).collect());
        }
        Ok(Self {
            g,
            node_feat_field,
            label_field,
            infer_idxs,
        })
    }

    /// Restrict prediction to specific ids per type.
    pub fn with_infer_idxs(mut self, infer_idxs: NodeIds) -> Self {
        self.infer_idxs = infer_idxs;
        self
    }

    /// Ids to predict on, per type.
    pub fn infer_idxs(&self) -> &NodeIds {
        &self.infer_idxs
    }

    /// The underlying graph.
    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.g
    }
}

impl NodeDataset for NodeInferData {
    fn get_node_feats(&self, input_nodes: &NodeIds, device: &Device) -> Result<NodeTensors> {
        prepare_batch_input(self.g.as_ref(), input_nodes, device, &self.node_feat_field)
    }

    fn get_labels(&self, seeds: &NodeIds) -> Result<NodeTensors> {
        let field = self.label_field.as_deref().ok_or_else(|| {
            Error::config("labels requested, but no label field was configured for the dataset")
        })?;
        let mut labels = NodeTensors::new();
        for (ntype, ids) in seeds {
            labels.insert(ntype.clone(), self.g.fetch_node_feat(ntype, field, ids)?);
        }
        Ok(labels)
    }

    fn has_labels(&self) -> bool {
        self.label_field.is_some()
    }
}

/// Loader yielding fixed-size seed batches, one node type at a time in
/// sorted type order, with `input_nodes == seeds` and no blocks.
pub struct NodeDataLoader {
    data: NodeInferData,
    batch_size: usize,
}

impl NodeDataLoader {
    /// Create a loader.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `batch_size` is zero.
    pub fn new(data: NodeInferData, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("batch size must be positive"));
        }
        Ok(Self { data, batch_size })
    }

    /// Number of batches one pass yields.
    pub fn num_batches(&self) -> usize {
        self.data
            .infer_idxs
            .values()
            .map(|ids| ids.len().div_ceil(self.batch_size))
            .sum()
    }
}

impl MiniBatchLoader for NodeDataLoader {
    fn data(&self) -> &dyn NodeDataset {
        &self.data
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Result<MiniBatch>> + '_> {
        let mut ntypes: Vec<&NodeType> = self.data.infer_idxs.keys().collect();
        ntypes.sort();
        let batch_size = self.batch_size;
        Box::new(ntypes.into_iter().flat_map(move |ntype| {
            self.data.infer_idxs[ntype].chunks(batch_size).map(move |chunk| {
                let mut seeds = NodeIds::new();
                seeds.insert(ntype.clone(), chunk.to_vec());
                Ok(MiniBatch {
                    input_nodes: seeds.clone(),
                    seeds,
                    blocks: Vec::new(),
                })
            })
        }))
    }
}
