//! Reward model training on pairwise preferences.
//!
//! One Adam step per batch of the preference dataset. The running mean of
//! the loss is written to a [`MetricsSink`] every `summary_writing_interval`
//! iterations, where the iteration counter runs across epochs.

use crate::choice_model::{binary_cross_entropy_with_logits, ChoiceModel};
use crate::errors::{PrefError, PrefResult};
use crate::preference_dataset::PreferenceDataset;
use crate::reward_model::RewardModel;
use crate::summary_writer::MetricsSink;
use candle_core::DType;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tag under which the running loss is written.
pub const TRAINING_LOSS_TAG: &str = "training loss";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub summary_writing_interval: usize,
    pub batch_size: usize,
    /// Skip the trailing partial batch of every epoch.
    pub drop_last: bool,
    /// Shuffle records each epoch with this seed; sequential order when unset.
    pub shuffle_seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            summary_writing_interval: 100,
            batch_size: 16,
            drop_last: true,
            shuffle_seed: None,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> PrefResult<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PrefError::config(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(PrefError::config("batch_size must be at least 1"));
        }
        if self.summary_writing_interval == 0 {
            return Err(PrefError::config("summary_writing_interval must be at least 1"));
        }
        Ok(())
    }
}

/// Outcome of one `train` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub batches_per_epoch: usize,
    pub optimizer_steps: usize,
    pub summaries_written: usize,
    pub summaries_dropped: usize,
    /// Loss of the last batch, if any batch ran.
    pub final_loss: Option<f64>,
}

impl TrainingReport {
    fn new(epochs: usize, batches_per_epoch: usize) -> Self {
        Self {
            epochs,
            batches_per_epoch,
            optimizer_steps: 0,
            summaries_written: 0,
            summaries_dropped: 0,
            final_loss: None,
        }
    }
}

pub struct RewardTrainer<R: RewardModel, W: MetricsSink> {
    choice_model: ChoiceModel<R>,
    optimizer: AdamW,
    config: TrainerConfig,
    writer: W,
    total_steps: usize,
}

impl<R: RewardModel, W: MetricsSink> RewardTrainer<R, W> {
    pub fn new(reward_model: R, config: TrainerConfig, writer: W) -> PrefResult<Self> {
        config.validate()?;

        let choice_model = ChoiceModel::new(reward_model);
        // Plain Adam: AdamW without decoupled weight decay.
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(choice_model.trainable_vars(), params)?;

        Ok(Self {
            choice_model,
            optimizer,
            config,
            writer,
            total_steps: 0,
        })
    }

    pub fn train(&mut self, dataset: &PreferenceDataset, epochs: usize) -> PrefResult<TrainingReport> {
        let batches_per_epoch = self.batches_per_epoch(dataset.len());
        let mut report = TrainingReport::new(epochs, batches_per_epoch);

        if batches_per_epoch == 0 {
            warn!(
                dataset_len = dataset.len(),
                batch_size = self.config.batch_size,
                "dataset does not fill a single batch; no parameters were updated"
            );
            return Ok(report);
        }

        let device = self.choice_model.reward_model().device().clone();
        let mut running_loss = 0.0;

        for epoch in 0..epochs {
            info!(epoch, batches = batches_per_epoch, "starting epoch");
            let order = self.epoch_order(dataset.len(), epoch);

            for (i, indices) in order
                .chunks(self.config.batch_size)
                .take(batches_per_epoch)
                .enumerate()
            {
                let batch = dataset.batch(indices, &device)?;

                let logits = self
                    .choice_model
                    .preference_logits(&batch.queries_a, &batch.queries_b)?;
                let choices = batch.choices.to_dtype(logits.dtype())?;
                let loss = binary_cross_entropy_with_logits(&logits, &choices)?;

                let loss_value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
                if !loss_value.is_finite() {
                    return Err(PrefError::numeric(format!(
                        "training loss is {loss_value} at epoch {epoch}, batch {i}"
                    )));
                }

                self.optimizer.backward_step(&loss)?;
                self.total_steps += 1;
                report.optimizer_steps += 1;
                report.final_loss = Some(loss_value);

                running_loss += loss_value;

                let iteration = Self::calculate_iteration(epoch, i, batches_per_epoch);
                if self.is_writing_iteration(iteration) {
                    if self.write_summary(running_loss, iteration) {
                        report.summaries_written += 1;
                    } else {
                        report.summaries_dropped += 1;
                    }
                    running_loss = 0.0;
                }
            }

            info!(epoch, last_loss = ?report.final_loss, "finished epoch");
        }

        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "failed to flush training summaries");
        }

        Ok(report)
    }

    /// Full batches when `drop_last`, otherwise including the partial tail.
    pub fn batches_per_epoch(&self, dataset_len: usize) -> usize {
        if self.config.drop_last {
            dataset_len / self.config.batch_size
        } else {
            dataset_len.div_ceil(self.config.batch_size)
        }
    }

    fn epoch_order(&self, len: usize, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        if let Some(seed) = self.config.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    fn is_writing_iteration(&self, iteration: usize) -> bool {
        let interval = self.config.summary_writing_interval;
        iteration % interval == interval - 1
    }

    fn calculate_iteration(epoch: usize, i: usize, batches_per_epoch: usize) -> usize {
        epoch * batches_per_epoch + i
    }

    /// Best effort: a failing sink is logged and training carries on.
    fn write_summary(&mut self, running_loss: f64, iteration: usize) -> bool {
        let mean_loss = running_loss / self.config.summary_writing_interval as f64;
        debug!(iteration, loss = mean_loss, "writing training summary");

        match self.writer.add_scalar(TRAINING_LOSS_TAG, mean_loss, iteration) {
            Ok(()) => true,
            Err(e) => {
                warn!(iteration, error = %e, "failed to write training summary");
                false
            }
        }
    }

    pub fn choice_model(&self) -> &ChoiceModel<R> {
        &self.choice_model
    }

    pub fn reward_model(&self) -> &R {
        self.choice_model.reward_model()
    }

    pub fn into_reward_model(self) -> R {
        self.choice_model.into_reward_model()
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Optimizer steps across every `train` call on this trainer.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}
