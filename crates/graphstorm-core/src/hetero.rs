//! Heterogeneous graph types and the graph store contract.
//!
//! A heterogeneous graph has several node types, each with its own node count
//! and its own set of per-node feature tables. The pipeline in this workspace
//! only ever reads node counts and feature rows, and writes computed
//! embeddings back; everything else about the store is opaque.
//!
//! [`GraphStore`] is that contract. [`MemGraph`] implements it in memory and
//! is what tests and single-machine runs use.
//!
//! # Example
//!
//! ```rust
//! use candle_core::{Device, Tensor};
//! use graphstorm_core::hetero::{GraphStore, MemGraph, NodeType};
//!
//! let g = MemGraph::new();
//! g.add_node_type("user", 3);
//! let feat = Tensor::zeros((3, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
//! g.set_node_feat("user", "feat", feat).unwrap();
//!
//! assert_eq!(g.num_nodes(&NodeType::new("user")).unwrap(), 3);
//! assert_eq!(g.feat_shape(&NodeType::new("user"), "feat"), Some(vec![3, 4]));
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use candle_core::{DType, Device, Tensor};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A node type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeType(pub String);

impl NodeType {
    /// Create a new node type.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Into<String>> From<S> for NodeType {
    fn from(s: S) -> Self {
        Self(s.into())
    }
}

impl Borrow<str> for NodeType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An edge type identifier, represented as (src_type, relation, dst_type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeType {
    /// Source node type.
    pub src_type: NodeType,
    /// Relation name.
    pub relation: String,
    /// Destination node type.
    pub dst_type: NodeType,
}

impl EdgeType {
    /// Create a new edge type.
    pub fn new(
        src_type: impl Into<NodeType>,
        relation: impl Into<String>,
        dst_type: impl Into<NodeType>,
    ) -> Self {
        Self {
            src_type: src_type.into(),
            relation: relation.into(),
            dst_type: dst_type.into(),
        }
    }
}

/// Global node index within one node type.
pub type NodeId = u32;

/// Input node batch: node type to an ordered sequence of node ids.
///
/// A type missing from the map means the batch holds no node of that type.
pub type NodeIds = HashMap<NodeType, Vec<NodeId>>;

/// Per-node-type 2-D tensors, row-aligned with a [`NodeIds`] batch.
pub type NodeTensors = HashMap<NodeType, Tensor>;

/// Per-edge-type tensors.
pub type EdgeTensors = HashMap<EdgeType, Tensor>;

/// Edge storage for a specific edge type (COO format).
///
/// Indices are local to their respective node types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeStore {
    /// Source node indices (local to src_type).
    pub src: Vec<NodeId>,
    /// Target node indices (local to dst_type).
    pub dst: Vec<NodeId>,
}

impl EdgeStore {
    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }
}

/// Read/write access to a (possibly remote, sharded) heterogeneous graph.
///
/// Reads and writes are assumed atomic per requested id set. Implementations
/// may block on I/O. Feature tables are always indexed by global node id
/// along their first dimension.
pub trait GraphStore: Send + Sync {
    /// All node types, sorted by name.
    fn node_types(&self) -> Vec<NodeType>;

    /// Number of nodes of a type.
    fn num_nodes(&self, ntype: &NodeType) -> Result<usize>;

    /// Whether the graph has this node type.
    fn has_node_type(&self, ntype: &NodeType) -> bool {
        self.node_types().iter().any(|t| t == ntype)
    }

    /// Full shape of a feature table (first dimension is the node count),
    /// or `None` if the type does not carry the field.
    fn feat_shape(&self, ntype: &NodeType, field: &str) -> Option<Vec<usize>>;

    /// Whether a type carries a feature field.
    fn has_node_feat(&self, ntype: &NodeType, field: &str) -> bool {
        self.feat_shape(ntype, field).is_some()
    }

    /// Fetch the rows `ids` of a feature table, in the order given.
    fn fetch_node_feat(&self, ntype: &NodeType, field: &str, ids: &[NodeId]) -> Result<Tensor>;

    /// Create a zero-filled `(num_nodes, dim)` feature table.
    fn init_node_feat(&self, ntype: &NodeType, field: &str, dim: usize, dtype: DType)
        -> Result<()>;

    /// Overwrite rows `ids` of an existing feature table with `values`.
    fn write_node_feat(
        &self,
        ntype: &NodeType,
        field: &str,
        ids: &[NodeId],
        values: &Tensor,
    ) -> Result<()>;
}

/// Validate that every id is below `num_nodes`.
pub fn check_node_ids(ntype: &NodeType, ids: &[NodeId], num_nodes: usize) -> Result<()> {
    match ids.iter().find(|&&id| id as usize >= num_nodes) {
        Some(id) => Err(Error::usage(format!(
            "node id {id} out of range for node type {ntype} with {num_nodes} nodes"
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Default)]
struct NodeData {
    num_nodes: usize,
    feats: HashMap<String, Tensor>,
}

/// In-memory heterogeneous graph.
///
/// Feature tables live on the CPU behind a read-write lock, so several
/// workers can share one `MemGraph` through an `Arc` and write disjoint rows.
#[derive(Debug, Default)]
pub struct MemGraph {
    nodes: RwLock<HashMap<NodeType, NodeData>>,
}

impl MemGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node type with `num_nodes` nodes. Re-adding a type resizes it
    /// and drops its features.
    pub fn add_node_type(&self, ntype: impl Into<NodeType>, num_nodes: usize) {
        self.nodes.write().insert(
            ntype.into(),
            NodeData {
                num_nodes,
                feats: HashMap::new(),
            },
        );
    }

    /// Attach a feature table to a node type.
    pub fn set_node_feat(
        &self,
        ntype: impl Into<NodeType>,
        field: impl Into<String>,
        values: Tensor,
    ) -> Result<()> {
        let ntype = ntype.into();
        let field = field.into();
        let mut nodes = self.nodes.write();
        let data = nodes
            .get_mut(&ntype)
            .ok_or_else(|| Error::Store(format!("unknown node type {ntype}")))?;
        if values.rank() == 0 {
            return Err(Error::Store(format!(
                "feature {field} of node type {ntype} must have a node dimension"
            )));
        }
        let rows = values.dim(0)?;
        if rows != data.num_nodes {
            return Err(Error::DimensionMismatch {
                expected: data.num_nodes,
                got: rows,
            });
        }
        data.feats.insert(field, values.to_device(&Device::Cpu)?);
        Ok(())
    }
}

fn unknown_field(ntype: &NodeType, field: &str) -> Error {
    Error::Store(format!("node type {ntype} has no feature {field}"))
}

fn is_contiguous(ids: &[NodeId]) -> bool {
    ids.windows(2).all(|w| w[1] == w[0] + 1)
}

impl GraphStore for MemGraph {
    fn node_types(&self) -> Vec<NodeType> {
        let mut ntypes: Vec<NodeType> = self.nodes.read().keys().cloned().collect();
        ntypes.sort();
        ntypes
    }

    fn num_nodes(&self, ntype: &NodeType) -> Result<usize> {
        self.nodes
            .read()
            .get(ntype)
            .map(|d| d.num_nodes)
            .ok_or_else(|| Error::Store(format!("unknown node type {ntype}")))
    }

    fn has_node_type(&self, ntype: &NodeType) -> bool {
        self.nodes.read().contains_key(ntype)
    }

    fn feat_shape(&self, ntype: &NodeType, field: &str) -> Option<Vec<usize>> {
        self.nodes
            .read()
            .get(ntype)?
            .feats
            .get(field)
            .map(|t| t.dims().to_vec())
    }

    fn fetch_node_feat(&self, ntype: &NodeType, field: &str, ids: &[NodeId]) -> Result<Tensor> {
        let nodes = self.nodes.read();
        let data = nodes
            .get(ntype)
            .ok_or_else(|| Error::Store(format!("unknown node type {ntype}")))?;
        let table = data
            .feats
            .get(field)
            .ok_or_else(|| unknown_field(ntype, field))?;
        check_node_ids(ntype, ids, data.num_nodes)?;

        if ids.is_empty() {
            let mut dims = table.dims().to_vec();
            dims[0] = 0;
            return Ok(Tensor::zeros(dims, table.dtype(), &Device::Cpu)?);
        }
        let index = Tensor::from_slice(ids, ids.len(), &Device::Cpu)?;
        Ok(table.index_select(&index, 0)?)
    }

    fn init_node_feat(
        &self,
        ntype: &NodeType,
        field: &str,
        dim: usize,
        dtype: DType,
    ) -> Result<()> {
        let mut nodes = self.nodes.write();
        let data = nodes
            .get_mut(ntype)
            .ok_or_else(|| Error::Store(format!("unknown node type {ntype}")))?;
        let table = Tensor::zeros((data.num_nodes, dim), dtype, &Device::Cpu)?;
        data.feats.insert(field.to_string(), table);
        Ok(())
    }

    fn write_node_feat(
        &self,
        ntype: &NodeType,
        field: &str,
        ids: &[NodeId],
        values: &Tensor,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut nodes = self.nodes.write();
        let data = nodes
            .get_mut(ntype)
            .ok_or_else(|| Error::Store(format!("unknown node type {ntype}")))?;
        let num_nodes = data.num_nodes;
        check_node_ids(ntype, ids, num_nodes)?;
        let table = data
            .feats
            .get_mut(field)
            .ok_or_else(|| unknown_field(ntype, field))?;

        let dims = table.dims().to_vec();
        let width: usize = dims[1..].iter().product();
        let values = values
            .to_device(&Device::Cpu)?
            .to_dtype(table.dtype())?;
        if values.elem_count() != ids.len() * width {
            return Err(Error::DimensionMismatch {
                expected: ids.len() * width,
                got: values.elem_count(),
            });
        }
        let values = values.reshape((ids.len(), width))?;
        let flat = table.reshape((num_nodes, width))?;

        let updated = if is_contiguous(ids) {
            let start = ids[0] as usize;
            flat.slice_assign(&[start..start + ids.len(), 0..width], &values)?
        } else {
            // Row r of the result is gathered from [table; values]; written
            // ids point into the values block, later duplicates win.
            let mut index: Vec<u32> = (0..num_nodes as u32).collect();
            for (i, &id) in ids.iter().enumerate() {
                index[id as usize] = (num_nodes + i) as u32;
            }
            let index = Tensor::from_vec(index, num_nodes, &Device::Cpu)?;
            Tensor::cat(&[&flat, &values], 0)?.index_select(&index, 0)?
        };
        *table = updated.reshape(dims)?;
        Ok(())
    }
}
