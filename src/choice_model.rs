//! Pairwise choice model over a wrapped reward model.
//!
//! `P(a preferred) = exp(r_a) / (exp(r_a) + exp(r_b))`, evaluated as a logistic
//! of `z = r_a - r_b` that never exponentiates a positive number.

use crate::errors::{PrefError, PrefResult};
use crate::preference_dataset::Query;
use crate::reward_model::RewardModel;
use candle_core::{DType, Tensor, Var};

/// Predicts which of two queries the labeler prefers.
///
/// Holds no weights of its own; its parameters are the reward model's.
pub struct ChoiceModel<R: RewardModel> {
    reward_model: R,
}

impl<R: RewardModel> ChoiceModel<R> {
    pub fn new(reward_model: R) -> Self {
        Self { reward_model }
    }

    pub fn reward_model(&self) -> &R {
        &self.reward_model
    }

    pub fn into_reward_model(self) -> R {
        self.reward_model
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.reward_model.trainable_vars()
    }

    /// Reward difference `r_a - r_b`, one entry per pair.
    pub fn preference_logits(&self, queries_a: &Tensor, queries_b: &Tensor) -> candle_core::Result<Tensor> {
        let rewards_a = self.reward_model.forward(queries_a)?;
        let rewards_b = self.reward_model.forward(queries_b)?;
        rewards_a - rewards_b
    }

    /// Probability that each first query is preferred.
    pub fn forward(&self, queries_a: &Tensor, queries_b: &Tensor) -> candle_core::Result<Tensor> {
        let logits = self.preference_logits(queries_a, queries_b)?;
        stable_sigmoid(&logits)
    }

    /// Probability for a single pair.
    ///
    /// Saturates in f64: the result is exactly `1.0` once `r_a - r_b` exceeds
    /// about 37, and exactly `0.0` once it drops below about -745, so `ln(p)`
    /// or `ln(1 - p)` of it can be infinite. Use
    /// [`binary_cross_entropy_with_logits`] on [`Self::preference_logits`]
    /// for losses.
    pub fn predict(&self, query_a: &Query, query_b: &Query) -> PrefResult<f64> {
        let device = self.reward_model.device();
        let probability = self
            .forward(&query_a.to_tensor(device)?, &query_b.to_tensor(device)?)?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()?;
        let value = probability
            .first()
            .copied()
            .ok_or_else(|| PrefError::numeric("choice model produced no output"))?;
        if !value.is_finite() {
            return Err(PrefError::numeric(format!("choice probability is {value}")));
        }
        Ok(value)
    }
}

/// Logistic function split on the sign of `z`: `1 / (1 + e)` for `z >= 0`,
/// `e / (1 + e)` otherwise, with `e = exp(-|z|)`.
pub fn stable_sigmoid(z: &Tensor) -> candle_core::Result<Tensor> {
    let e = z.abs()?.neg()?.exp()?;
    let denom = e.affine(1.0, 1.0)?.recip()?;
    let upper = denom.clone();
    let lower = (&e * &denom)?;
    z.ge(&z.zeros_like()?)?.where_cond(&upper, &lower)
}

/// `log(1 + exp(x))` without overflow: `max(x, 0) + log(1 + exp(-|x|))`.
pub fn stable_softplus(x: &Tensor) -> candle_core::Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    x.relu()? + tail
}

/// Mean binary cross-entropy between `sigmoid(logits)` and `targets`.
///
/// Per element `y * softplus(-z) + (1 - y) * softplus(z)`, which equals
/// `-(y ln p + (1 - y) ln(1 - p))` but stays finite for saturated `p`.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let prefer_a = stable_softplus(&logits.neg()?)?;
    let prefer_b = stable_softplus(logits)?;
    let not_targets = targets.affine(-1.0, 1.0)?;
    let per_pair = ((targets * prefer_a)? + (not_targets * prefer_b)?)?;
    per_pair.mean_all()
}
