//! Localization of model version directories
//!
//! A [`Localizer`] turns a possibly remote path into a [`LocalizedDirectory`]
//! whose [`path`](LocalizedDirectory::path) is a real local directory. Remote
//! content is staged into a temporary directory that is removed when the last
//! `Arc` to the handle is dropped.

use crate::config::LocalizationConfig;
use crate::filesystem;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use modelhost_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

const HF_SCHEME: &str = "hf://";
const FILE_SCHEME: &str = "file://";

/// Resolves a model path to a local directory
pub trait Localizer: Send + Sync {
    /// Localize `path`, fetching remote content when needed
    fn localize(&self, path: &str) -> Result<Arc<LocalizedDirectory>>;
}

/// Local view of a model version directory
#[derive(Debug)]
pub struct LocalizedDirectory {
    path: PathBuf,
    source: String,
    staged: Option<TempDir>,
}

impl LocalizedDirectory {
    /// Wrap a directory that is already local; nothing is removed on drop
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            source: path.display().to_string(),
            path,
            staged: None,
        }
    }

    /// Wrap a staged copy of `source`; the copy is removed on drop
    pub fn staged(source: impl Into<String>, staging: TempDir) -> Self {
        Self {
            path: staging.path().to_path_buf(),
            source: source.into(),
            staged: Some(staging),
        }
    }

    /// Local root of the model version
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path this directory was localized from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the root is a staged copy
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }
}

impl Drop for LocalizedDirectory {
    fn drop(&mut self) {
        if self.staged.is_some() {
            debug!("Removing staged copy of '{}' at {}", self.source, self.path.display());
        }
    }
}

/// Create an empty staging directory under the configured root
pub fn create_staging_dir(config: &LocalizationConfig) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("modelhost-");

    match &config.staging_dir {
        Some(root) => {
            std::fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
            builder.tempdir_in(root).map_err(|e| Error::io(root, e))
        }
        None => builder
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e)),
    }
}

/// Stage a copy of the local tree `src` as a localized directory for `source`
pub fn stage_copy(
    source: &str,
    src: &Path,
    config: &LocalizationConfig,
) -> Result<Arc<LocalizedDirectory>> {
    let staging = create_staging_dir(config)?;
    let copied = filesystem::copy_tree(src, staging.path())?;
    debug!("Staged {} bytes of '{}' into {}", copied, source, staging.path().display());
    Ok(Arc::new(LocalizedDirectory::staged(source, staging)))
}

/// Localizer for paths on the local filesystem
#[derive(Debug, Default, Clone)]
pub struct LocalFsLocalizer;

impl Localizer for LocalFsLocalizer {
    fn localize(&self, path: &str) -> Result<Arc<LocalizedDirectory>> {
        let local = PathBuf::from(path.strip_prefix(FILE_SCHEME).unwrap_or(path));
        if !local.is_dir() {
            return Err(Error::localization(format!(
                "model directory not found: {}",
                local.display()
            )));
        }
        Ok(Arc::new(LocalizedDirectory::local(local)))
    }
}

/// A parsed `hf://org/repo[@revision][/subdir]` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLocation {
    pub repo_id: String,
    pub revision: String,
    pub subdir: String,
}

impl HubLocation {
    /// Parse a hub path
    pub fn parse(path: &str) -> Result<Self> {
        let rest = path
            .strip_prefix(HF_SCHEME)
            .ok_or_else(|| Error::localization(format!("not a hub path: {}", path)))?;

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let (org, name) = match (segments.next(), segments.next()) {
            (Some(org), Some(name)) => (org, name),
            _ => {
                return Err(Error::localization(format!(
                    "hub path must name 'org/repo': {}",
                    path
                )))
            }
        };

        let (name, revision) = match name.split_once('@') {
            Some((name, rev)) if !rev.is_empty() => (name, rev.to_string()),
            Some(_) => {
                return Err(Error::localization(format!("empty revision in {}", path)));
            }
            None => (name, "main".to_string()),
        };

        Ok(Self {
            repo_id: format!("{}/{}", org, name),
            revision,
            subdir: segments.collect::<Vec<_>>().join("/"),
        })
    }

    /// Repo-relative path of `rfilename` inside the subdirectory, if it is one
    fn relative_path<'a>(&self, rfilename: &'a str) -> Option<&'a str> {
        if self.subdir.is_empty() {
            return Some(rfilename);
        }
        rfilename
            .strip_prefix(self.subdir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Localizer that fetches model directories from the Hugging Face Hub
#[derive(Debug, Clone)]
pub struct HuggingFaceLocalizer {
    config: Arc<LocalizationConfig>,
}

impl HuggingFaceLocalizer {
    pub fn new(config: Arc<LocalizationConfig>) -> Self {
        Self { config }
    }

    fn cache_dir(&self) -> PathBuf {
        self.config.hub_cache_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cache/modelhost/hub")
        })
    }
}

impl Localizer for HuggingFaceLocalizer {
    fn localize(&self, path: &str) -> Result<Arc<LocalizedDirectory>> {
        let location = HubLocation::parse(path)?;
        info!(
            "Localizing {} @ {} (subdir '{}') from HuggingFace",
            location.repo_id, location.revision, location.subdir
        );

        let api = ApiBuilder::new()
            .with_cache_dir(self.cache_dir())
            .with_progress(false)
            .build()
            .map_err(|e| Error::localization(format!("Failed to initialize HuggingFace API: {}", e)))?;

        let repo = api.repo(Repo::with_revision(
            location.repo_id.clone(),
            RepoType::Model,
            location.revision.clone(),
        ));

        let info = repo.info().map_err(|e| {
            Error::localization(format!("Failed to resolve {}: {}", location.repo_id, e))
        })?;

        let staging = create_staging_dir(&self.config)?;
        let mut fetched = 0usize;

        for sibling in &info.siblings {
            let Some(relative) = location.relative_path(&sibling.rfilename) else {
                continue;
            };

            let cached = repo.get(&sibling.rfilename).map_err(|e| {
                Error::localization(format!("Failed to download {}: {}", sibling.rfilename, e))
            })?;

            let target = staging.path().join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            if !filesystem::link_or_copy(&cached, &target)? {
                debug!("Copied {} into staging, cache is on another filesystem", sibling.rfilename);
            }
            fetched += 1;
        }

        if fetched == 0 {
            return Err(Error::localization(format!(
                "no files under '{}' in {} @ {}",
                location.subdir, location.repo_id, location.revision
            )));
        }

        info!("Staged {} files from {} into {}", fetched, location.repo_id, staging.path().display());
        Ok(Arc::new(LocalizedDirectory::staged(path, staging)))
    }
}

/// Localizer that dispatches on the path scheme
#[derive(Debug, Clone)]
pub struct DefaultLocalizer {
    local: LocalFsLocalizer,
    hub: HuggingFaceLocalizer,
}

impl DefaultLocalizer {
    pub fn new(config: Arc<LocalizationConfig>) -> Self {
        Self {
            local: LocalFsLocalizer,
            hub: HuggingFaceLocalizer::new(config),
        }
    }
}

impl Default for DefaultLocalizer {
    fn default() -> Self {
        Self::new(Arc::new(LocalizationConfig::default()))
    }
}

impl Localizer for DefaultLocalizer {
    fn localize(&self, path: &str) -> Result<Arc<LocalizedDirectory>> {
        if path.starts_with(HF_SCHEME) {
            self.hub.localize(path)
        } else if path.starts_with(FILE_SCHEME) || !path.contains("://") {
            self.local.localize(path)
        } else {
            Err(Error::localization(format!("unsupported path scheme: {}", path)))
        }
    }
}
