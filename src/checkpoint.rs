// Reward model checkpoints
// Safetensors weights plus a model_manifest.json with a SHA-256 digest

use crate::errors::{PrefError, PrefResult};
use crate::reward_model::{MlpRewardModel, RewardModelConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "model_manifest.json";
const ARCHITECTURE: &str = "MlpRewardModel";

/// Deployment record written next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub model_file: String,
    pub sha256: String,
    pub run_id: Uuid,
    pub architecture: String,
    pub feature_dim: usize,
    pub hidden_dim: usize,
    pub optimizer_steps: usize,
    pub timestamp: DateTime<Utc>,
}

impl ModelManifest {
    pub fn model_config(&self) -> RewardModelConfig {
        RewardModelConfig::new(self.feature_dim, self.hidden_dim)
    }
}

pub fn hash_file<P: AsRef<Path>>(path: P) -> PrefResult<String> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| PrefError::io(format!("reading {}", path.display()), e))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn manifest_path<P: AsRef<Path>>(model_path: P) -> PathBuf {
    model_path.as_ref().with_file_name(MANIFEST_FILE)
}

/// Save weights to `model_path` and write the manifest beside them.
pub fn save_reward_model<P: AsRef<Path>>(
    model: &MlpRewardModel,
    model_path: P,
    optimizer_steps: usize,
) -> PrefResult<ModelManifest> {
    let model_path = model_path.as_ref();
    if let Some(parent) = model_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| PrefError::io(format!("creating {}", parent.display()), e))?;
    }

    model.save(model_path)?;
    let config = model.config();

    let manifest = ModelManifest {
        model_file: model_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string(),
        sha256: hash_file(model_path)?,
        run_id: Uuid::new_v4(),
        architecture: ARCHITECTURE.to_string(),
        feature_dim: config.feature_dim,
        hidden_dim: config.hidden_dim,
        optimizer_steps,
        timestamp: Utc::now(),
    };

    let path = manifest_path(model_path);
    fs::write(&path, serde_json::to_string_pretty(&manifest)?)
        .map_err(|e| PrefError::io(format!("writing {}", path.display()), e))?;

    info!(model = %model_path.display(), sha256 = %manifest.sha256, "reward model checkpoint written");
    Ok(manifest)
}

pub fn read_manifest<P: AsRef<Path>>(model_path: P) -> PrefResult<ModelManifest> {
    let path = manifest_path(model_path);
    let content = fs::read_to_string(&path)
        .map_err(|e| PrefError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content)
        .map_err(|e| PrefError::serialization(format!("parsing {}", path.display()), e))
}

/// Recompute the weights digest and compare it with the manifest.
pub fn verify_checkpoint<P: AsRef<Path>>(model_path: P, manifest: &ModelManifest) -> PrefResult<()> {
    let actual = hash_file(model_path.as_ref())?;
    if actual != manifest.sha256 {
        return Err(PrefError::invalid_input(
            "checkpoint",
            format!("sha256 mismatch: manifest {} but file {}", manifest.sha256, actual),
        ));
    }
    Ok(())
}

/// Verify and restore a checkpoint written by [`save_reward_model`].
pub fn load_reward_model<P: AsRef<Path>>(
    model_path: P,
    device: &candle_core::Device,
) -> PrefResult<(MlpRewardModel, ModelManifest)> {
    let model_path = model_path.as_ref();
    let manifest = read_manifest(model_path)?;
    if manifest.architecture != ARCHITECTURE {
        return Err(PrefError::invalid_input(
            "checkpoint",
            format!("unsupported architecture {}", manifest.architecture),
        ));
    }
    verify_checkpoint(model_path, &manifest)?;

    let model = MlpRewardModel::load(model_path, manifest.model_config(), device)?;
    Ok((model, manifest))
}
