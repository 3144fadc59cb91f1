//! Mini-batch prediction loops.
//!
//! Both loops run the model in evaluation mode, collect per-type outputs of
//! every batch on the CPU, and concatenate them per type in the order the
//! loader yields batches.

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use graphstorm_core::{
    check_node_ids, Error, MiniBatch, MiniBatchLoader, NodeDataset, NodeTensors, NodeType, Result,
};
use tracing::debug;

use crate::embed::gather_rows;
use crate::mode::EvalScope;
use crate::model::NodeModel;

/// Outputs of [`node_mini_batch_gnn_predict`].
#[derive(Debug, Clone)]
pub struct PredictOutput {
    /// Predictions per type.
    pub preds: NodeTensors,
    /// Node embeddings per type.
    pub embs: NodeTensors,
    /// Labels per type, when requested.
    pub labels: Option<NodeTensors>,
}

/// Per-type tensor parts, concatenated at the end.
#[derive(Default)]
struct Collector {
    parts: HashMap<NodeType, Vec<Tensor>>,
}

impl Collector {
    fn push(&mut self, ntype: NodeType, part: &Tensor) -> Result<()> {
        let part = part.detach().to_device(&Device::Cpu)?;
        self.parts.entry(ntype).or_default().push(part);
        Ok(())
    }

    fn extend(&mut self, tensors: NodeTensors) -> Result<()> {
        for (ntype, part) in tensors {
            self.push(ntype, &part)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<NodeTensors> {
        self.parts
            .into_iter()
            .map(|(ntype, parts)| -> Result<(NodeType, Tensor)> {
                Ok((ntype, Tensor::cat(&parts, 0)?))
            })
            .collect()
    }
}

fn require_labels(data: &dyn NodeDataset, return_label: bool) -> Result<()> {
    if return_label && !data.has_labels() {
        return Err(Error::config(
            "return label is required, but the label field is not provided when \
             initializing the inference dataset",
        ));
    }
    Ok(())
}

/// The single node type a flat model output belongs to.
fn sole_ntype<'a>(keys: impl Iterator<Item = &'a NodeType>) -> Result<NodeType> {
    let keys: Vec<&NodeType> = keys.collect();
    match keys.as_slice() {
        [ntype] => Ok((*ntype).clone()),
        _ => Err(Error::usage(format!(
            "flat model output needs exactly one node type in the batch, found {}",
            keys.len()
        ))),
    }
}

/// Predict on every batch of `loader` with the full model.
///
/// # Arguments
/// - `model`: Model to predict with; handed back in the mode it came in
/// - `loader`: Batches to predict on
/// - `return_proba`: Return class probabilities instead of class ids
/// - `return_label`: Also return the labels of the seed nodes
///
/// # Errors
///
/// [`Error::Config`] before the first batch if labels are requested but the
/// dataset has no label field. [`Error::Usage`] if a flat model output
/// cannot be attributed to exactly one node type. Loader and model errors
/// are passed through.
pub fn node_mini_batch_gnn_predict<M, L>(
    model: &mut M,
    loader: &L,
    return_proba: bool,
    return_label: bool,
) -> Result<PredictOutput>
where
    M: NodeModel + ?Sized,
    L: MiniBatchLoader + ?Sized,
{
    let data = loader.data();
    require_labels(data, return_label)?;
    let model = EvalScope::new(model);
    let device = model.device().clone();

    let mut preds = Collector::default();
    let mut embs = Collector::default();
    let mut labels = Collector::default();
    let mut num_batches = 0usize;
    for batch in loader.batches() {
        let MiniBatch {
            input_nodes,
            seeds,
            blocks,
        } = batch?;
        let input_feats = data.get_node_feats(&input_nodes, &device)?;
        let (pred, emb) = model.predict(&blocks, &input_feats, None, &input_nodes, return_proba)?;

        let flat = pred.is_flat() || emb.is_flat();
        let label = if return_label || (flat && data.has_labels()) {
            Some(data.get_labels(&seeds)?)
        } else {
            None
        };
        let ntype = if flat {
            Some(match &label {
                Some(label) => sole_ntype(label.keys())?,
                None => sole_ntype(seeds.keys())?,
            })
        } else {
            None
        };

        preds.extend(pred.into_per_type(ntype.as_ref())?)?;
        embs.extend(emb.into_per_type(ntype.as_ref())?)?;
        if let (true, Some(label)) = (return_label, label) {
            labels.extend(label)?;
        }
        num_batches += 1;
    }
    drop(model);
    debug!(num_batches, "finished mini-batch prediction");

    Ok(PredictOutput {
        preds: preds.finish()?,
        embs: embs.finish()?,
        labels: if return_label {
            Some(labels.finish()?)
        } else {
            None
        },
    })
}

/// Predict on every batch of `loader` from precomputed embeddings, using
/// only the model's decoder.
///
/// # Arguments
/// - `model`: Model whose decoder is applied
/// - `emb`: Full embedding table per type; row i belongs to node i
/// - `loader`: Batches to predict on
/// - `return_proba`: Return class probabilities instead of class ids
/// - `return_label`: Also return the labels of the seed nodes
///
/// # Returns
/// - Predictions per type, and labels per type when requested.
///
/// # Errors
///
/// [`Error::Config`] before the first batch if labels are requested but the
/// dataset has no label field. [`Error::Usage`] if a batch holds a type
/// missing from `emb`.
pub fn node_mini_batch_predict<M, L>(
    model: &mut M,
    emb: &NodeTensors,
    loader: &L,
    return_proba: bool,
    return_label: bool,
) -> Result<(NodeTensors, Option<NodeTensors>)>
where
    M: NodeModel + ?Sized,
    L: MiniBatchLoader + ?Sized,
{
    let data = loader.data();
    require_labels(data, return_label)?;
    let model = EvalScope::new(model);
    let device = model.device().clone();
    let decoder = model.decoder();

    let mut preds = Collector::default();
    let mut labels = Collector::default();
    for batch in loader.batches() {
        let batch = batch?;
        let mut batch_labels = if return_label {
            Some(data.get_labels(&batch.seeds)?)
        } else {
            None
        };

        let mut ntypes: Vec<&NodeType> = batch.input_nodes.keys().collect();
        ntypes.sort();
        for ntype in ntypes {
            let table = emb.get(ntype).ok_or_else(|| {
                Error::usage(format!("no precomputed embeddings for node type {ntype}"))
            })?;
            let ids = &batch.input_nodes[ntype];
            check_node_ids(ntype, ids, table.dim(0)?)?;
            let rows = if ids.is_empty() {
                Tensor::zeros((0, table.dim(1)?), table.dtype(), table.device())?
            } else {
                gather_rows(table, ids)?
            }
            .to_device(&device)?;
            let pred = if return_proba {
                decoder.predict_proba(&rows)?
            } else {
                decoder.predict(&rows)?
            };
            preds.push(ntype.clone(), &pred)?;

            if let Some(batch_labels) = batch_labels.as_mut() {
                let label = batch_labels.remove(ntype).ok_or_else(|| {
                    Error::usage(format!("batch has no labels for node type {ntype}"))
                })?;
                labels.push(ntype.clone(), &label)?;
            }
        }
    }
    drop(model);

    let labels = if return_label {
        Some(labels.finish()?)
    } else {
        None
    };
    Ok((preds.finish()?, labels))
}
