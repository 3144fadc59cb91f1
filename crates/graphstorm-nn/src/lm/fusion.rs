use std::sync::Arc;

use candle_core::Tensor;
use graphstorm_core::{GraphStore, NodeId, NodeIds, NodeTensors, NodeType, Result};
use tracing::{debug, info};

use super::cache::{LmEmbedCache, LmState};
use super::models::LmModels;

/// Language models plus the cache and lifecycle around them.
///
/// State transitions take `&mut self`. In a multi-worker run every worker
/// owns its own instance and performs the same transitions; callers line
/// workers up with [`ProcessGroup::barrier`](graphstorm_core::ProcessGroup::barrier)
/// around a transition when they share parameters.
pub struct LmFusion {
    g: Arc<dyn GraphStore>,
    models: LmModels,
    cache: LmEmbedCache,
    state: LmState,
}

impl LmFusion {
    /// Wrap `models` reading token fields from `g`.
    pub fn new(g: Arc<dyn GraphStore>, models: LmModels) -> Self {
        Self {
            g,
            models,
            cache: LmEmbedCache::new(),
            state: LmState::Unprepared,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LmState {
        self.state
    }

    /// The cache of LM outputs.
    pub fn cache(&self) -> &LmEmbedCache {
        &self.cache
    }

    /// The wrapped language models.
    pub fn models(&self) -> &LmModels {
        &self.models
    }

    /// Graph the token fields are read from.
    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.g
    }

    /// Prepare for a run: freeze and cache when no LM rows are trained,
    /// otherwise switch to live training.
    pub fn prepare(&mut self) -> Result<()> {
        if self.models.num_train() == 0 {
            return self.freeze();
        }
        info!(
            num_train = self.models.num_train(),
            "language models are fine-tuned, skipping embedding cache"
        );
        self.cache.clear();
        self.models.set_trainable(true);
        self.state = LmState::Training;
        Ok(())
    }

    /// Same as [`prepare`](Self::prepare), run before the first epoch.
    pub fn warmup(&mut self) -> Result<()> {
        self.prepare()
    }

    /// Populate the cache for every LM type not yet cached, stop LM
    /// training, and serve batch reads from the cache.
    pub fn freeze(&mut self) -> Result<()> {
        for ntype in self.models.ntypes() {
            if self.cache.contains(&ntype) {
                continue;
            }
            let embeds = self.models.infer_all(self.g.as_ref(), &ntype)?;
            debug!(ntype = %ntype, rows = embeds.dim(0)?, "cached language model embeddings");
            self.cache.insert(ntype, embeds);
        }
        self.models.set_trainable(false);
        self.state = LmState::Warm;
        info!(cached_types = self.cache.len(), "froze language models");
        Ok(())
    }

    /// Drop the cache and resume LM training.
    pub fn unfreeze(&mut self) {
        self.cache.clear();
        self.models.set_trainable(true);
        self.state = LmState::Training;
        info!("unfroze language models");
    }

    /// LM outputs for the LM types of `input_nodes`; other types are skipped.
    pub fn embed(&self, input_nodes: &NodeIds, training: bool) -> Result<NodeTensors> {
        let mut embs = NodeTensors::new();
        for (ntype, ids) in input_nodes {
            if !self.models.has_ntype(ntype) {
                continue;
            }
            let emb = self.embed_ntype(ntype, ids, training)?;
            embs.insert(ntype.clone(), emb);
        }
        Ok(embs)
    }

    fn embed_ntype(&self, ntype: &NodeType, ids: &[NodeId], training: bool) -> Result<Tensor> {
        if self.state.is_warm() {
            if let Some(rows) = self.cache.lookup(ntype, ids)? {
                return Ok(rows);
            }
        }
        self.models.run(self.g.as_ref(), ntype, ids, training)
    }
}
