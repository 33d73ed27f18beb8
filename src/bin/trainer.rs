use anyhow::{bail, Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use preflearn::checkpoint::{load_reward_model, save_reward_model};
use preflearn::config_loader::{load_config, PrefConfig, SummaryTargetKind};
use preflearn::log_sink::init_logging;
use preflearn::preference_dataset::load_queries;
use preflearn::query_selector::SelectionPolicy;
use preflearn::{
    MetricsSink, MlpRewardModel, PreferenceDataset, QuerySelector, RewardModel, RewardModelConfig,
    RewardTrainer, Selector, SummaryWriter,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Pairwise preference reward learning", long_about = None)]
struct Args {
    /// TOML configuration file (defaults to ./preflearn.toml when present)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a reward model on labeled preferences
    Train {
        /// JSON Lines file of {query_a, query_b, choice} records
        #[clap(short, long)]
        preferences: PathBuf,

        #[clap(short, long, default_value_t = 1)]
        epochs: usize,

        /// Continue from an existing checkpoint instead of fresh weights
        #[clap(long)]
        init: Option<PathBuf>,

        /// Where to write the trained weights (safetensors)
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Pick queries to send for labeling
    Select {
        /// JSON Lines file of candidate queries, oldest first
        #[clap(short, long)]
        queries: PathBuf,

        #[clap(short, long, default_value_t = 1)]
        num: usize,

        #[clap(long, value_enum)]
        policy: Option<SelectionPolicy>,

        #[clap(long)]
        seed: Option<u64>,
    },
    /// Score queries with a trained checkpoint
    Evaluate {
        #[clap(short, long)]
        model: PathBuf,

        #[clap(short, long)]
        queries: PathBuf,
    },
}

fn summary_writer(config: &PrefConfig) -> Result<Box<dyn MetricsSink>> {
    Ok(match config.summary.target {
        SummaryTargetKind::File => Box::new(
            SummaryWriter::in_run_dir(&config.summary.log_dir)
                .context("failed to open summary run directory")?,
        ),
        SummaryTargetKind::Stdout => Box::new(SummaryWriter::stdout()),
        SummaryTargetKind::Tracing => Box::new(SummaryWriter::tracing()),
        SummaryTargetKind::Discard => Box::new(SummaryWriter::discard()),
    })
}

fn train(
    config: &PrefConfig,
    preferences: PathBuf,
    epochs: usize,
    init: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let device = Device::Cpu;
    let dataset = PreferenceDataset::from_jsonl(&preferences)
        .with_context(|| format!("failed to load preferences from {}", preferences.display()))?;
    let Some((_, feature_dim)) = dataset.segment_shape() else {
        bail!("{} contains no preference records", preferences.display());
    };
    info!(records = dataset.len(), feature_dim, "preference dataset loaded");

    let model = match init {
        Some(path) => {
            let (model, manifest) = load_reward_model(&path, &device)
                .with_context(|| format!("failed to restore {}", path.display()))?;
            if manifest.feature_dim != feature_dim {
                bail!(
                    "checkpoint expects {} features but the dataset has {}",
                    manifest.feature_dim,
                    feature_dim
                );
            }
            model
        }
        None => MlpRewardModel::new(RewardModelConfig::new(feature_dim, config.model.hidden_dim), &device)?,
    };

    let mut trainer = RewardTrainer::new(model, config.trainer.clone(), summary_writer(config)?)?;
    let report = trainer.train(&dataset, epochs)?;

    let manifest = match output {
        Some(path) => Some(save_reward_model(trainer.reward_model(), &path, report.optimizer_steps)?),
        None => None,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "report": report, "checkpoint": manifest }))?
    );
    Ok(())
}

fn select(
    config: &PrefConfig,
    queries: PathBuf,
    num: usize,
    policy: Option<SelectionPolicy>,
    seed: Option<u64>,
) -> Result<()> {
    let pool = load_queries(&queries)
        .with_context(|| format!("failed to load queries from {}", queries.display()))?;
    let policy = policy.unwrap_or(config.selector.policy);
    let mut selector = Selector::from_policy(policy, seed.or(config.selector.seed));

    for query in selector.select_queries(&pool, num)? {
        println!("{}", serde_json::to_string(&query)?);
    }
    Ok(())
}

fn evaluate(model: PathBuf, queries: PathBuf) -> Result<()> {
    let (model, _) = load_reward_model(&model, &Device::Cpu)
        .with_context(|| format!("failed to restore {}", model.display()))?;
    for query in load_queries(&queries)? {
        let reward = model.evaluate(&query)?;
        println!("{}", json!({ "reward": reward, "query": query }));
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("failed to load configuration")?;
    init_logging(&config.log_level, config.log_format);

    match args.command {
        Command::Train {
            preferences,
            epochs,
            init,
            output,
        } => train(&config, preferences, epochs, init, output),
        Command::Select {
            queries,
            num,
            policy,
            seed,
        } => select(&config, queries, num, policy, seed),
        Command::Evaluate { model, queries } => evaluate(model, queries),
    }
}
