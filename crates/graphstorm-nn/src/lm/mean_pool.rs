//! Mean-pooling text encoder.

use candle_core::{DType, Module, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};
use graphstorm_core::Result;

use super::LanguageModel;

/// Token embeddings averaged over attended positions, followed by a dense
/// tanh pooler.
///
/// ```text
/// pooled = tanh(W * (sum_j m_j e(x_j) / sum_j m_j) + b)
/// ```
pub struct MeanPoolLm {
    word_embeddings: Embedding,
    pooler: Linear,
    hidden_size: usize,
}

impl MeanPoolLm {
    /// `lm_type` under which configs build this model.
    pub const LM_TYPE: &'static str = "mean_pool";

    /// Create a new model.
    ///
    /// # Arguments
    /// - `vocab_size`: Number of token ids
    /// - `hidden_size`: Token embedding and pooled output width
    /// - `vb`: Variable builder; parameters live under `word_embeddings` and
    ///   `pooler`
    pub fn new(vocab_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let word_embeddings = embedding(vocab_size, hidden_size, vb.pp("word_embeddings"))?;
        let pooler = linear(hidden_size, hidden_size, vb.pp("pooler"))?;
        Ok(Self {
            word_embeddings,
            pooler,
            hidden_size,
        })
    }
}

impl LanguageModel for MeanPoolLm {
    fn lm_type(&self) -> &str {
        Self::LM_TYPE
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let ids = input_ids.to_dtype(DType::U32)?;
        // (N, L, H)
        let tokens = self.word_embeddings.forward(&ids)?;
        let mask = attention_mask.to_dtype(tokens.dtype())?.unsqueeze(2)?;
        let summed = tokens.broadcast_mul(&mask)?.sum(1)?;
        // Epsilon keeps all-padding rows finite.
        let counts = (mask.sum(1)? + 1e-6)?;
        let mean = summed.broadcast_div(&counts)?;
        Ok(self.pooler.forward(&mean)?.tanh()?)
    }
}
