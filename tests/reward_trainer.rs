use candle_core::{Device, Tensor, Var, D};
use preflearn::errors::PrefError;
use preflearn::reward_trainer::TRAINING_LOSS_TAG;
use preflearn::{
    MemorySink, MetricsSink, MlpRewardModel, PrefResult, PreferenceDataset, PreferenceRecord, Query,
    RewardModel, RewardModelConfig, RewardTrainer, TrainerConfig,
};

fn preferred() -> Query {
    Query::new(vec![vec![1.0, 0.5, -0.25], vec![0.75, 1.5, 0.5]])
}

fn rejected() -> Query {
    Query::new(vec![vec![-1.0, 0.2, 0.9], vec![-0.5, -1.25, 0.3]])
}

fn preference_dataset(len: usize) -> PreferenceDataset {
    let record = PreferenceRecord::new(preferred(), rejected(), 1.0).unwrap();
    PreferenceDataset::new(vec![record; len]).unwrap()
}

fn reward_model() -> MlpRewardModel {
    MlpRewardModel::new(RewardModelConfig::new(3, 32), &Device::Cpu).unwrap()
}

fn reward_trainer(config: TrainerConfig) -> (RewardTrainer<MlpRewardModel, MemorySink>, MemorySink) {
    let sink = MemorySink::new();
    let trainer = RewardTrainer::new(reward_model(), config, sink.clone()).unwrap();
    (trainer, sink)
}

struct FailingSink {
    attempts: usize,
}

impl MetricsSink for FailingSink {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: usize) -> PrefResult<()> {
        self.attempts += 1;
        Err(PrefError::sink("summary backend unavailable"))
    }
}

/// Reward that is NaN for every segment.
struct NanReward {
    device: Device,
}

impl RewardModel for NanReward {
    fn forward(&self, segments: &Tensor) -> candle_core::Result<Tensor> {
        segments.sum(D::Minus1)?.sum(D::Minus1)?.affine(f64::NAN, 0.0)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        Vec::new()
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[test]
fn training_changes_model_parameters() {
    let (mut trainer, _) = reward_trainer(TrainerConfig::default());
    let before = trainer.reward_model().parameter_snapshot().unwrap();

    let report = trainer.train(&preference_dataset(32), 1).unwrap();

    assert_eq!(report.batches_per_epoch, 2);
    assert_eq!(report.optimizer_steps, 2);
    assert!(report.final_loss.is_some());

    let after = trainer.reward_model().parameter_snapshot().unwrap();
    assert!(
        before.iter().zip(&after).any(|((_, p0), (_, p1))| p0 != p1),
        "no parameter moved after two optimizer steps"
    );
}

#[test]
fn output_bias_is_untouched_because_only_reward_differences_matter() {
    let (mut trainer, _) = reward_trainer(TrainerConfig::default());
    let before = trainer.reward_model().parameter_snapshot().unwrap();

    trainer.train(&preference_dataset(48), 2).unwrap();

    let after = trainer.reward_model().parameter_snapshot().unwrap();
    let bias_before = before.iter().find(|(name, _)| name == "fc2.bias").unwrap();
    let bias_after = after.iter().find(|(name, _)| name == "fc2.bias").unwrap();
    assert_eq!(bias_before, bias_after);
}

#[test]
fn dataset_smaller_than_batch_leaves_parameters_unchanged() {
    let (mut trainer, sink) = reward_trainer(TrainerConfig {
        batch_size: 16,
        ..Default::default()
    });
    let before = trainer.reward_model().parameter_snapshot().unwrap();

    let report = trainer.train(&preference_dataset(3), 1).unwrap();

    assert_eq!(report.batches_per_epoch, 0);
    assert_eq!(report.optimizer_steps, 0);
    assert_eq!(report.final_loss, None);
    assert_eq!(trainer.reward_model().parameter_snapshot().unwrap(), before);
    assert!(sink.events().unwrap().is_empty());
}

#[test]
fn partial_batch_trains_when_not_dropped() {
    let (mut trainer, _) = reward_trainer(TrainerConfig {
        batch_size: 16,
        drop_last: false,
        ..Default::default()
    });

    let report = trainer.train(&preference_dataset(3), 2).unwrap();
    assert_eq!(report.optimizer_steps, 2);
    assert_eq!(trainer.total_steps(), 2);
}

#[test]
fn summaries_are_written_at_interval_boundaries() {
    let (mut trainer, sink) = reward_trainer(TrainerConfig {
        batch_size: 1,
        summary_writing_interval: 100,
        ..Default::default()
    });

    let report = trainer.train(&preference_dataset(250), 1).unwrap();
    assert_eq!(report.optimizer_steps, 250);
    assert_eq!(report.summaries_written, 2);

    let events = sink.events().unwrap();
    let steps: Vec<usize> = events.iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![99, 199]);
    assert!(events.iter().all(|e| e.tag == TRAINING_LOSS_TAG));
    assert!(events.iter().all(|e| e.value.is_finite() && e.value >= 0.0));
}

#[test]
fn summary_iterations_continue_across_epochs() {
    let (mut trainer, sink) = reward_trainer(TrainerConfig {
        batch_size: 2,
        summary_writing_interval: 100,
        ..Default::default()
    });

    // 25 batches per epoch, 250 batches overall
    let report = trainer.train(&preference_dataset(50), 10).unwrap();
    assert_eq!(report.optimizer_steps, 250);

    let steps: Vec<usize> = sink.events().unwrap().iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![99, 199]);
}

#[test]
fn summary_with_unit_interval_reports_each_batch_loss() {
    let (mut trainer, sink) = reward_trainer(TrainerConfig {
        batch_size: 4,
        summary_writing_interval: 1,
        ..Default::default()
    });

    let report = trainer.train(&preference_dataset(12), 1).unwrap();

    let events = sink.events().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().unwrap().value, report.final_loss.unwrap());
}

#[test]
fn failing_sink_does_not_abort_training() {
    let config = TrainerConfig {
        batch_size: 2,
        summary_writing_interval: 1,
        ..Default::default()
    };
    let mut trainer = RewardTrainer::new(reward_model(), config, FailingSink { attempts: 0 }).unwrap();

    let report = trainer.train(&preference_dataset(10), 1).unwrap();

    assert_eq!(report.optimizer_steps, 5);
    assert_eq!(report.summaries_written, 0);
    assert_eq!(report.summaries_dropped, 5);
    assert_eq!(trainer.writer().attempts, 5);
}

#[test]
fn training_learns_a_consistent_preference() {
    let (mut trainer, _) = reward_trainer(TrainerConfig {
        learning_rate: 1e-2,
        batch_size: 8,
        summary_writing_interval: 50,
        ..Default::default()
    });

    trainer.train(&preference_dataset(64), 40).unwrap();

    let choice = trainer.choice_model();
    let p = choice.predict(&preferred(), &rejected()).unwrap();
    assert!(p > 0.9, "preferred query only predicted with p = {p}");

    let model = trainer.into_reward_model();
    assert!(model.evaluate(&preferred()).unwrap() > model.evaluate(&rejected()).unwrap());
}

#[test]
fn shuffled_training_performs_the_same_number_of_steps() {
    let records: Vec<PreferenceRecord> = (0..20)
        .map(|i| {
            let label = if i % 2 == 0 { 1.0 } else { 0.75 };
            PreferenceRecord::new(preferred(), rejected(), label).unwrap()
        })
        .collect();
    let dataset = PreferenceDataset::new(records).unwrap();

    let (mut trainer, _) = reward_trainer(TrainerConfig {
        batch_size: 3,
        shuffle_seed: Some(5),
        ..Default::default()
    });

    let report = trainer.train(&dataset, 3).unwrap();
    assert_eq!(report.batches_per_epoch, 6);
    assert_eq!(report.optimizer_steps, 18);
}

#[test]
fn non_finite_loss_stops_training_before_the_optimizer_step() {
    let sink = MemorySink::new();
    let config = TrainerConfig {
        batch_size: 4,
        summary_writing_interval: 1,
        ..Default::default()
    };
    let mut trainer = RewardTrainer::new(NanReward { device: Device::Cpu }, config, sink.clone()).unwrap();

    let err = trainer.train(&preference_dataset(16), 2).unwrap_err();

    assert!(matches!(err, PrefError::Numeric { .. }), "unexpected error: {err}");
    assert!(err.to_string().contains("epoch 0, batch 0"));
    assert_eq!(trainer.total_steps(), 0);
    assert!(sink.events().unwrap().is_empty());
}
