//! Feature-size resolution and batch feature fetching.
//!
//! A [`FeatField`] says which feature fields feed the input layer of each
//! node type. [`get_feat_size`] turns it into the per-type input width the
//! layer is built with, and [`prepare_batch_input`] fetches and concatenates
//! the same fields for one batch of nodes.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};
use crate::hetero::{GraphStore, NodeIds, NodeTensors, NodeType};

/// Per-node-type input feature width.
pub type FeatSize = HashMap<NodeType, usize>;

/// Which feature fields are used as node input features.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FeatField {
    /// No node type has input features.
    #[default]
    None,
    /// The same field on every node type; every type must carry it.
    Global(String),
    /// An ordered field list per node type; unlisted types have no features.
    PerType(HashMap<NodeType, Vec<String>>),
}

impl FeatField {
    /// Field list per type, e.g. `FeatField::per_type([("n0", vec!["feat"])])`.
    pub fn per_type<I, T, F>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, Vec<F>)>,
        T: Into<NodeType>,
        F: Into<String>,
    {
        Self::PerType(
            entries
                .into_iter()
                .map(|(t, fields)| (t.into(), fields.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }

    /// Fields requested for one node type, in order. Empty means none.
    pub fn fields_for(&self, ntype: &NodeType) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Global(field) => vec![field.clone()],
            Self::PerType(map) => map.get(ntype).cloned().unwrap_or_default(),
        }
    }
}

impl From<&str> for FeatField {
    fn from(field: &str) -> Self {
        Self::Global(field.to_string())
    }
}

impl From<HashMap<NodeType, Vec<String>>> for FeatField {
    fn from(map: HashMap<NodeType, Vec<String>>) -> Self {
        Self::PerType(map)
    }
}

/// Width contributed by one field: the product of its trailing dimensions.
/// A 1-D (scalar per node) field contributes 1.
fn field_width(shape: &[usize]) -> usize {
    shape.iter().skip(1).product()
}

/// Compute the input feature width of every node type in the graph.
///
/// Types without requested fields map to `0`.
///
/// # Errors
///
/// [`Error::Config`] if a per-type entry names a type the graph does not
/// have, or a requested field is missing on a type.
pub fn get_feat_size(g: &dyn GraphStore, feat_field: &FeatField) -> Result<FeatSize> {
    if let FeatField::PerType(map) = feat_field {
        let mut unknown: Vec<&NodeType> = map.keys().filter(|t| !g.has_node_type(t)).collect();
        unknown.sort();
        if let Some(ntype) = unknown.first() {
            return Err(Error::config(format!(
                "feature fields requested for node type {ntype}, which is not in the graph"
            )));
        }
    }

    let mut feat_size = FeatSize::new();
    for ntype in g.node_types() {
        let mut size = 0;
        for field in feat_field.fields_for(&ntype) {
            let shape = g.feat_shape(&ntype, &field).ok_or_else(|| {
                Error::config(format!(
                    "the feature \"{field}\" does not exist for the node type \"{ntype}\""
                ))
            })?;
            size += field_width(&shape);
        }
        feat_size.insert(ntype, size);
    }
    Ok(feat_size)
}

/// Fetch the input features of a batch of nodes.
///
/// For each type in `input_nodes` with requested fields, the fields are
/// fetched, flattened to 2-D and concatenated in the order they were
/// requested. Types without fields are left out of the result.
pub fn prepare_batch_input(
    g: &dyn GraphStore,
    input_nodes: &NodeIds,
    device: &Device,
    feat_field: &FeatField,
) -> Result<NodeTensors> {
    let mut feats = NodeTensors::new();
    for (ntype, ids) in input_nodes {
        let fields = feat_field.fields_for(ntype);
        if fields.is_empty() {
            continue;
        }
        let mut parts = Vec::with_capacity(fields.len());
        for field in &fields {
            let part = g.fetch_node_feat(ntype, field, ids)?;
            let width = field_width(part.dims());
            parts.push(part.reshape((ids.len(), width))?);
        }
        if parts.iter().any(|p| p.dtype() != parts[0].dtype()) {
            parts = parts
                .into_iter()
                .map(|p| p.to_dtype(DType::F32))
                .collect::<candle_core::Result<_>>()?;
        }
        let feat = if parts.len() == 1 {
            parts.remove(0)
        } else {
            Tensor::cat(&parts, 1)?
        };
        feats.insert(ntype.clone(), feat.to_device(device)?);
    }
    Ok(feats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hetero::MemGraph;

    fn graph() -> MemGraph {
        let g = MemGraph::new();
        g.add_node_type("n0", 5);
        g.add_node_type("n1", 3);
        let dev = Device::Cpu;
        g.set_node_feat("n0", "feat", Tensor::ones((5, 4), DType::F32, &dev).unwrap())
            .unwrap();
        g.set_node_feat("n0", "age", Tensor::zeros(5, DType::F32, &dev).unwrap())
            .unwrap();
        g.set_node_feat("n1", "feat", Tensor::ones((3, 2), DType::F32, &dev).unwrap())
            .unwrap();
        g
    }

    #[test]
    fn test_global_field() {
        let g = graph();
        let sizes = get_feat_size(&g, &FeatField::from("feat")).unwrap();
        assert_eq!(sizes.get("n0"), Some(&4));
        assert_eq!(sizes.get("n1"), Some(&2));
    }

    #[test]
    fn test_per_type_fields_sum_and_scalar() {
        let g = graph();
        let field = FeatField::per_type([("n0", vec!["feat", "age"])]);
        let sizes = get_feat_size(&g, &field).unwrap();
        assert_eq!(sizes.get("n0"), Some(&5));
        assert_eq!(sizes.get("n1"), Some(&0));
    }

    #[test]
    fn test_missing_field_is_config_error() {
        let g = graph();
        let err = get_feat_size(&g, &FeatField::from("age")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let g = graph();
        let field = FeatField::per_type([("n2", vec!["feat"])]);
        assert!(get_feat_size(&g, &field).unwrap_err().is_config());
    }

    #[test]
    fn test_no_fields() {
        let g = graph();
        let sizes = get_feat_size(&g, &FeatField::None).unwrap();
        assert!(sizes.values().all(|&s| s == 0));
        assert_eq!(sizes.len(), 2);
    }

    #[test]
    fn test_prepare_batch_concat() {
        let g = graph();
        let field = FeatField::per_type([("n0", vec!["feat", "age"])]);
        let mut nodes = NodeIds::new();
        nodes.insert("n0".into(), vec![0, 2, 4]);
        nodes.insert("n1".into(), vec![1]);
        let feats = prepare_batch_input(&g, &nodes, &Device::Cpu, &field).unwrap();
        assert_eq!(feats.len(), 1);
        assert_eq!(feats["n0"].dims(), &[3, 5]);
    }
}
