// Tracing setup for the trainer and CLI

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log events are rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,preflearn={default_level}")))
}

/// Install a console subscriber. `RUST_LOG` overrides `default_level`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// JSON lines on stderr, for runs collected by a log pipeline.
pub fn init_json_tracing(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

pub fn init_logging(default_level: &str, format: LogFormat) -> bool {
    match format {
        LogFormat::Text => init_tracing(default_level),
        LogFormat::Json => init_json_tracing(default_level),
    }
}
