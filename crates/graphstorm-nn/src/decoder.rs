//! Prediction heads.

use candle_core::{DType, Module, Tensor, D};
use candle_nn::{linear_no_bias, ops, Linear, VarBuilder};
use graphstorm_core::Result;

/// Maps node embeddings to class scores.
pub trait Decoder: Send + Sync {
    /// Class logits (N x num_classes).
    fn forward(&self, emb: &Tensor) -> Result<Tensor>;

    /// Number of classes.
    fn out_dims(&self) -> usize;

    /// Arg-max class per row, as `U32` (N).
    fn predict(&self, emb: &Tensor) -> Result<Tensor> {
        if emb.dim(0)? == 0 {
            return Ok(Tensor::zeros(0, DType::U32, emb.device())?);
        }
        Ok(self.forward(emb)?.argmax(D::Minus1)?)
    }

    /// Class probabilities per row (N x num_classes).
    fn predict_proba(&self, emb: &Tensor) -> Result<Tensor> {
        let logits = self.forward(emb)?;
        if logits.dim(0)? == 0 {
            return Ok(logits);
        }
        Ok(ops::softmax(&logits, D::Minus1)?)
    }
}

/// Bias-free linear classifier.
pub struct EntityClassifier {
    linear: Linear,
    in_dims: usize,
    num_classes: usize,
}

impl EntityClassifier {
    /// Create a new classifier.
    ///
    /// # Arguments
    /// - `in_dims`: Embedding width
    /// - `num_classes`: Number of classes
    /// - `vb`: Variable builder; the weight lives under `weight`
    pub fn new(in_dims: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let linear = linear_no_bias(in_dims, num_classes, vb)?;
        Ok(Self {
            linear,
            in_dims,
            num_classes,
        })
    }

    /// Embedding width.
    pub fn in_dims(&self) -> usize {
        self.in_dims
    }
}

impl Decoder for EntityClassifier {
    fn forward(&self, emb: &Tensor) -> Result<Tensor> {
        let weight = self.linear.weight();
        if emb.dim(0)? == 0 {
            return Ok(Tensor::zeros(
                (0, self.num_classes),
                weight.dtype(),
                emb.device(),
            )?);
        }
        let emb = emb.to_dtype(weight.dtype())?;
        Ok(self.linear.forward(&emb)?)
    }

    fn out_dims(&self) -> usize {
        self.num_classes
    }
}
