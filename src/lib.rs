//! Library root for the `preflearn` crate
//! Pairwise preference learning: query selection and reward model training

// Core error handling
pub mod errors;

// Queries and labeled comparisons
pub mod preference_dataset;
pub mod query_selector;

// Models
pub mod choice_model;
pub mod reward_model;

// Training & persistence
pub mod checkpoint;
pub mod reward_trainer;
pub mod summary_writer;

// Configuration & logging
pub mod config_loader;
pub mod log_sink;

pub use choice_model::ChoiceModel;
pub use errors::{PrefError, PrefResult};
pub use preference_dataset::{PreferenceDataset, PreferenceRecord, Query};
pub use query_selector::{MostRecentlyGeneratedQuerySelector, QuerySelector, RandomQuerySelector, Selector};
pub use reward_model::{MlpRewardModel, RewardModel, RewardModelConfig};
pub use reward_trainer::{RewardTrainer, TrainerConfig, TrainingReport};
pub use summary_writer::{MemorySink, MetricsSink, SummaryWriter};
