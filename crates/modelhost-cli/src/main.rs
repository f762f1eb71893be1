//! modelhost CLI
//!
//! Inspects model version directories and loads models through the same
//! backend factories a serving process uses.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use modelhost_backends::{
    collect_artifacts, registry_from_config, Artifact, ArtifactPolicy, BackendFactories,
    InferenceBackend, ServerConfig, SharedResources,
};
use modelhost_core::InferTensor;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

mod config;
mod repository;
mod sessions;

use config::Overrides;
use sessions::LoadOnlySessions;

#[derive(Parser, Debug)]
#[command(name = "modelhost")]
#[command(about = "Model repository inspection and backend loading", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "modelhost.yaml", global = true)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the artifacts collected from a model version directory
    Artifacts {
        /// Local path, file:// or hf:// location
        path: String,

        /// Pass files by path instead of reading them
        #[arg(long)]
        file_paths: bool,
    },

    /// Load one model version and report its execution contexts
    Load {
        /// Model repository root
        #[arg(short, long)]
        repository: PathBuf,

        /// Model name
        #[arg(short, long)]
        model: String,

        /// Version to load (highest by default)
        #[arg(long)]
        version: Option<u64>,

        /// Minimum GPU capability for execution contexts
        #[arg(long, default_value_t = 0.0)]
        min_capability: f64,

        /// Input tensor as JSON, or @file
        #[arg(short, long)]
        input: Option<String>,

        /// Print Prometheus metrics after loading
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Serialize)]
struct ArtifactEntry {
    name: String,
    kind: &'static str,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

#[derive(Serialize)]
struct ContextEntry {
    name: String,
    placement: String,
    reserved_mb: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config = config::load(&cli.config, &cli.overrides)?;

    match cli.command {
        Command::Artifacts { path, file_paths } => list_artifacts(&config, &path, file_paths),
        Command::Load {
            repository,
            model,
            version,
            min_capability,
            input,
            metrics,
        } => {
            let metrics_handle = init_metrics()?;
            load_model(&config, &repository, &model, version, min_capability, input.as_deref()).await?;
            if metrics {
                println!("{}", metrics_handle.render());
            }
            Ok(())
        }
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn list_artifacts(config: &ServerConfig, path: &str, file_paths: bool) -> Result<()> {
    let resources = SharedResources::from_config(config)?;
    let localized = resources.localizer.localize(path)?;
    let policy = if file_paths {
        ArtifactPolicy::FilePaths
    } else {
        ArtifactPolicy::InlineFilesAndSubdirs
    };

    let artifacts = collect_artifacts(localized.path(), policy)?;
    let mut entries = artifacts
        .iter()
        .map(|(name, artifact)| -> Result<ArtifactEntry> {
            Ok(ArtifactEntry {
                name: name.clone(),
                kind: match artifact {
                    Artifact::Inline(_) => "inline",
                    Artifact::ExternalPath(_) => "path",
                },
                bytes: artifact.size_bytes()?,
                path: artifact.as_path().map(|p| p.to_path_buf()),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

async fn load_model(
    config: &ServerConfig,
    repository: &std::path::Path,
    model: &str,
    version: Option<u64>,
    min_capability: f64,
    input: Option<&str>,
) -> Result<()> {
    let located = repository::locate(repository, model, version)?;
    info!(
        "Loading model '{}' version {} ({})",
        model, located.version, located.config.platform
    );

    let resources = SharedResources::from_config(config)?;
    let registry = registry_from_config(&config.platforms, Arc::new(LoadOnlySessions))?;
    let factories = Arc::new(BackendFactories::from_registry(&registry, &resources)?);

    let backend = factories
        .load(located.path.display().to_string(), located.config, min_capability)
        .await
        .with_context(|| format!("Failed to load model '{}' version {}", model, located.version))?;

    let contexts: Vec<ContextEntry> = backend
        .contexts()
        .iter()
        .map(|context| ContextEntry {
            name: context.name().to_string(),
            placement: context.placement().to_string(),
            reserved_mb: context.reserved_mb(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&contexts)?);

    if let Some(input) = input {
        let tensor = parse_input(input)?;
        let outputs = backend.infer(&[tensor])?;
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    }

    Ok(())
}

fn parse_input(input: &str) -> Result<InferTensor> {
    let json = match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path))?,
        None => input.to_string(),
    };
    let tensor: InferTensor = serde_json::from_str(&json).context("Invalid input tensor")?;

    // Re-validate the shape
    Ok(InferTensor::new(tensor.name, tensor.shape, tensor.data)?)
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("modelhost_backends=debug,modelhost_cli=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("modelhost_backends=info,modelhost_cli=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "modelhost_backend_loads_total",
        "Backend load attempts by platform and outcome"
    );
    metrics::describe_histogram!(
        "modelhost_backend_load_duration_ms",
        metrics::Unit::Milliseconds,
        "Backend load latency in milliseconds by platform"
    );
    metrics::describe_counter!(
        "modelhost_artifact_bytes_total",
        metrics::Unit::Bytes,
        "Inline artifact bytes read by platform"
    );
    metrics::describe_gauge!(
        "modelhost_execution_contexts",
        "Live execution contexts by platform"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        let tensor = parse_input(r#"{"name": "x", "shape": [1, 2], "data": [0.5, 1.5]}"#).unwrap();
        assert_eq!(tensor.shape, vec![1, 2]);

        assert!(parse_input(r#"{"name": "x", "shape": [3], "data": [0.5]}"#).is_err());
        assert!(parse_input("@/nonexistent/input.json").is_err());
    }

    #[test]
    fn test_cli_parses_load() {
        let cli = Cli::parse_from([
            "modelhost",
            "load",
            "--repository",
            "/models",
            "--model",
            "mlp",
            "--gpu",
            "0:8.6",
            "--min-capability",
            "7.0",
        ]);
        assert_eq!(cli.overrides.gpus.len(), 1);
        assert!(matches!(cli.command, Command::Load { min_capability, .. } if min_capability == 7.0));
    }
}
