use std::collections::HashMap;

use candle_core::Tensor;
use graphstorm_core::{check_node_ids, NodeId, NodeType, Result};

use crate::embed::gather_rows;

/// Lifecycle state of the LM fusion component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LmState {
    /// Neither prepared nor frozen; the LM runs live.
    #[default]
    Unprepared,
    /// Frozen with a populated cache; batch reads hit the cache.
    Warm,
    /// Trainable; the LM runs live.
    Training,
}

impl LmState {
    /// Whether batch reads are served from the cache.
    pub fn is_warm(self) -> bool {
        self == Self::Warm
    }
}

/// LM outputs over all nodes, per node type.
///
/// An entry exists exactly for the types that have been populated; a type
/// with zero nodes is populated by a zero-row entry.
#[derive(Debug, Default)]
pub struct LmEmbedCache {
    embeds: HashMap<NodeType, Tensor>,
}

impl LmEmbedCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the full table of a type.
    pub fn insert(&mut self, ntype: NodeType, embeds: Tensor) {
        self.embeds.insert(ntype, embeds);
    }

    /// Whether a type has been populated.
    pub fn contains(&self, ntype: &NodeType) -> bool {
        self.embeds.contains_key(ntype)
    }

    /// Full table of a type.
    pub fn get(&self, ntype: &NodeType) -> Option<&Tensor> {
        self.embeds.get(ntype)
    }

    /// Rows `ids` of a populated type, or `None` if the type is not cached.
    pub fn lookup(&self, ntype: &NodeType, ids: &[NodeId]) -> Result<Option<Tensor>> {
        let Some(table) = self.embeds.get(ntype) else {
            return Ok(None);
        };
        check_node_ids(ntype, ids, table.dim(0)?)?;
        if ids.is_empty() {
            let width = table.dim(1)?;
            return Ok(Some(Tensor::zeros(
                (0, width),
                table.dtype(),
                table.device(),
            )?));
        }
        gather_rows(table, ids).map(Some)
    }

    /// Number of populated types.
    pub fn len(&self) -> usize {
        self.embeds.len()
    }

    /// Whether no type is populated.
    pub fn is_empty(&self) -> bool {
        self.embeds.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.embeds.clear();
    }
}
