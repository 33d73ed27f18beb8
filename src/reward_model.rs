//! Reward models: scalar estimators of how desirable a query is.
//!
//! The trainer only depends on the [`RewardModel`] trait. [`MlpRewardModel`]
//! is the stock implementation: a two-layer perceptron scored per step and
//! summed over the segment.

use crate::errors::{PrefError, PrefResult, SafeLock};
use crate::preference_dataset::Query;
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A trainable map from trajectory segments to scalar rewards.
pub trait RewardModel {
    /// `(batch, steps, features)` to `(batch,)`.
    fn forward(&self, segments: &Tensor) -> candle_core::Result<Tensor>;

    /// Parameters the optimizer is allowed to update.
    fn trainable_vars(&self) -> Vec<Var>;

    fn device(&self) -> &Device;

    /// Reward of a single query.
    fn evaluate(&self, query: &Query) -> PrefResult<f64> {
        let input = query.to_tensor(self.device())?;
        let rewards = self.forward(&input)?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        rewards
            .first()
            .copied()
            .ok_or_else(|| PrefError::numeric("reward model produced no output"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardModelConfig {
    pub feature_dim: usize,
    pub hidden_dim: usize,
}

impl RewardModelConfig {
    pub fn new(feature_dim: usize, hidden_dim: usize) -> Self {
        Self {
            feature_dim,
            hidden_dim,
        }
    }
}

/// Per-step MLP reward, summed over the segment.
pub struct MlpRewardModel {
    varmap: VarMap,
    fc1: Linear,
    fc2: Linear,
    config: RewardModelConfig,
    device: Device,
}

impl MlpRewardModel {
    /// Fresh model with randomly initialized weights.
    ///
    /// Candle cannot seed its CPU initializer, so two models built from the
    /// same config start from different weights.
    pub fn new(config: RewardModelConfig, device: &Device) -> PrefResult<Self> {
        if config.feature_dim == 0 || config.hidden_dim == 0 {
            return Err(PrefError::invalid_input(
                "reward_model",
                format!("dimensions must be positive, got {config:?}"),
            ));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, device);
        let fc1 = linear(config.feature_dim, config.hidden_dim, vb.pp("fc1"))?;
        let fc2 = linear(config.hidden_dim, 1, vb.pp("fc2"))?;

        Ok(Self {
            varmap,
            fc1,
            fc2,
            config,
            device: device.clone(),
        })
    }

    /// Rebuild a model and restore weights saved with [`MlpRewardModel::save`].
    pub fn load<P: AsRef<Path>>(path: P, config: RewardModelConfig, device: &Device) -> PrefResult<Self> {
        let mut model = Self::new(config, device)?;
        model.varmap.load(path.as_ref())?;
        Ok(model)
    }

    /// Write weights as safetensors.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PrefResult<()> {
        self.varmap.save(path.as_ref())?;
        Ok(())
    }

    pub fn config(&self) -> RewardModelConfig {
        self.config
    }

    /// Parameters sorted by name, flattened to plain vectors.
    pub fn parameter_snapshot(&self) -> PrefResult<Vec<(String, Vec<f64>)>> {
        let data = self.varmap.data().safe_lock()?;
        let mut snapshot = data
            .iter()
            .map(|(name, var)| {
                let values = var.as_tensor().flatten_all()?.to_vec1::<f64>()?;
                Ok::<_, PrefError>((name.clone(), values))
            })
            .collect::<PrefResult<Vec<_>>>()?;
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(snapshot)
    }
}

impl RewardModel for MlpRewardModel {
    fn forward(&self, segments: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.fc1.forward(segments)?.relu()?;
        let per_step = self.fc2.forward(&hidden)?.squeeze(D::Minus1)?;
        per_step.sum(D::Minus1)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

impl std::fmt::Debug for MlpRewardModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlpRewardModel")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish()
    }
}
