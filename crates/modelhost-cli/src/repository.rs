//! Model repository layout: `<repository>/<model>/config.yaml` and
//! numbered version directories `<repository>/<model>/<version>/`

use anyhow::{bail, Context};
use modelhost_backends::filesystem;
use modelhost_core::ModelConfig;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "config.yaml";

/// A model version selected from a repository
#[derive(Debug, Clone)]
pub struct ModelVersion {
    pub config: ModelConfig,
    pub version: u64,
    pub path: PathBuf,
}

/// Read the model configuration and pick a version, the highest one by default
pub fn locate(repository: &Path, model: &str, version: Option<u64>) -> anyhow::Result<ModelVersion> {
    let model_dir = repository.join(model);
    let config_path = model_dir.join(CONFIG_FILENAME);
    let config = ModelConfig::from_file(&config_path)
        .with_context(|| format!("Failed to read model configuration {}", config_path.display()))?;

    if config.name != model {
        bail!(
            "model configuration {} names '{}', expected '{}'",
            config_path.display(),
            config.name,
            model
        );
    }

    let versions = versions(&model_dir)?;
    let version = match version {
        Some(v) if versions.contains(&v) => v,
        Some(v) => bail!("model '{}' has no version {} (available: {:?})", model, v, versions),
        None => match versions.last() {
            Some(v) => *v,
            None => bail!("model '{}' has no numbered version directories", model),
        },
    };

    Ok(ModelVersion {
        config,
        version,
        path: model_dir.join(version.to_string()),
    })
}

/// Numbered version directories of a model, ascending
pub fn versions(model_dir: &Path) -> anyhow::Result<Vec<u64>> {
    let mut versions: Vec<u64> = filesystem::list_subdirectories(model_dir)?
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();
    versions.sort_unstable();
    Ok(versions)
}
