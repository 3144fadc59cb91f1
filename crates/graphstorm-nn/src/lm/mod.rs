//! Language-model fusion for text-bearing node types.
//!
//! Node types with tokenised text (an `input_ids` field, optionally an
//! `attention_mask` or `valid_len` field) can be embedded by a language
//! model. The pooled LM output either joins the raw features of the type
//! ([`LmNodeEncoderInputLayer`]) or is the whole node representation
//! ([`PureLmNodeInputLayer`]).
//!
//! # Lifecycle
//!
//! ```text
//!            prepare (num_train == 0) / freeze
//! Unprepared ---------------------------------> Warm
//!     |                                          |  ^
//!     | prepare (num_train > 0)         unfreeze |  | freeze
//!     v                                          v  |
//!  Training <-------------------------------------  |
//!     |_____________________________________________|
//! ```
//!
//! In `Warm`, batch reads come from a per-type cache of LM outputs over all
//! nodes. Otherwise the LM runs live.

mod cache;
mod fusion;
mod layer;
mod mean_pool;
mod models;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use graphstorm_core::{Error, NodeType, Result};
use serde::{Deserialize, Serialize};

pub use cache::{LmEmbedCache, LmState};
pub use fusion::LmFusion;
pub use layer::{LmFusionConfig, LmNodeEncoderInputLayer, PureLmNodeInputLayer};
pub use mean_pool::MeanPoolLm;
pub use models::LmModels;

/// A text encoder producing one pooled vector per token sequence.
pub trait LanguageModel: Send + Sync {
    /// Model family name.
    fn lm_type(&self) -> &str;

    /// Width of the pooled output.
    fn hidden_size(&self) -> usize;

    /// Encode a batch.
    ///
    /// # Arguments
    /// - `input_ids`: Token ids (N x L)
    /// - `attention_mask`: 1 for attended tokens, 0 for padding (N x L)
    ///
    /// # Returns
    /// - Pooled output (N x hidden_size)
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor>;
}

/// One language model and the node types it embeds.
///
/// A list of these is the usual way to configure LM fusion:
///
/// ```rust
/// use graphstorm_nn::lm::NodeLmConfig;
///
/// let configs = NodeLmConfig::list_from_json(r#"[
///     {"lm_type": "mean_pool", "model_name": "tiny", "node_types": ["paper"],
///      "vocab_size": 100, "hidden_size": 8}
/// ]"#).unwrap();
/// assert_eq!(configs[0].node_types[0].as_str(), "paper");
/// assert!(!configs[0].gradient_checkpoint);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLmConfig {
    /// Model family, e.g. `"mean_pool"`.
    pub lm_type: String,
    /// Pretrained model name.
    #[serde(default)]
    pub model_name: String,
    /// Trade compute for memory when fine-tuning.
    #[serde(default)]
    pub gradient_checkpoint: bool,
    /// Node types this model embeds.
    pub node_types: Vec<NodeType>,
    /// Vocabulary size for models built from scratch.
    #[serde(default)]
    pub vocab_size: Option<usize>,
    /// Pooled output width for models built from scratch.
    #[serde(default)]
    pub hidden_size: Option<usize>,
}

impl NodeLmConfig {
    /// Config for an LM of `lm_type` embedding `node_types`.
    pub fn new<T: Into<NodeType>>(lm_type: impl Into<String>, node_types: impl IntoIterator<Item = T>) -> Self {
        Self {
            lm_type: lm_type.into(),
            model_name: String::new(),
            gradient_checkpoint: false,
            node_types: node_types.into_iter().map(Into::into).collect(),
            vocab_size: None,
            hidden_size: None,
        }
    }

    /// Set the pretrained model name.
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Enable gradient checkpointing.
    pub fn with_gradient_checkpoint(mut self, enabled: bool) -> Self {
        self.gradient_checkpoint = enabled;
        self
    }

    /// Set the vocabulary size.
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = Some(vocab_size);
        self
    }

    /// Set the pooled output width.
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = Some(hidden_size);
        self
    }

    /// Parse a JSON list of LM configs.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Build a language model from its config.
///
/// # Errors
///
/// [`Error::Config`] for an unknown `lm_type` or missing sizes. LMs of other
/// families are injected through [`LmModels::with_models`].
pub fn build_lm(config: &NodeLmConfig, vb: VarBuilder) -> Result<Box<dyn LanguageModel>> {
    match config.lm_type.as_str() {
        MeanPoolLm::LM_TYPE => {
            let (vocab_size, hidden_size) = match (config.vocab_size, config.hidden_size) {
                (Some(v), Some(h)) if v > 0 && h > 0 => (v, h),
                _ => {
                    return Err(Error::config(format!(
                        "{} needs a positive vocab_size and hidden_size",
                        MeanPoolLm::LM_TYPE
                    )))
                }
            };
            if config.gradient_checkpoint {
                tracing::debug!(
                    model = %config.model_name,
                    "gradient checkpointing has no effect on mean pooling"
                );
            }
            Ok(Box::new(MeanPoolLm::new(vocab_size, hidden_size, vb)?))
        }
        other => Err(Error::config(format!(
            "unknown language model type \"{other}\""
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_config_defaults_from_json() {
        let configs = NodeLmConfig::list_from_json(
            r#"[{"lm_type": "bert", "model_name": "bert-base-uncased", "node_types": ["n0", "n1"]}]"#,
        )
        .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].node_types, vec![NodeType::new("n0"), NodeType::new("n1")]);
        assert_eq!(configs[0].hidden_size, None);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            NodeLmConfig::list_from_json("{"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_build_unknown_lm_type() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = NodeLmConfig::new("bert", ["n0"]);
        assert!(build_lm(&config, vb).err().unwrap().is_config());
    }

    #[test]
    fn test_build_mean_pool() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = NodeLmConfig::new("mean_pool", ["n0"])
            .with_vocab_size(10)
            .with_hidden_size(4);
        let lm = build_lm(&config, vb).unwrap();
        assert_eq!(lm.hidden_size(), 4);
        assert_eq!(lm.lm_type(), "mean_pool");
    }
}
