//! Uniform artifact map built from a local model version directory
//!
//! Small descriptor files are read into memory up front; subdirectories,
//! which usually hold large multi-file payloads, are passed on as paths and
//! read later by the platform backend.

use crate::filesystem;
use modelhost_core::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One named entry of a model version directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Full contents of a single file, as opaque bytes
    Inline(Vec<u8>),

    /// Absolute local path, loaded lazily by the backend
    ExternalPath(PathBuf),
}

impl Artifact {
    /// Inline content, if any
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Inline(bytes) => Some(bytes),
            Self::ExternalPath(_) => None,
        }
    }

    /// External path, if any
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Inline(_) => None,
            Self::ExternalPath(path) => Some(path),
        }
    }

    /// Size on disk or in memory, in bytes
    pub fn size_bytes(&self) -> Result<u64> {
        match self {
            Self::Inline(bytes) => Ok(bytes.len() as u64),
            Self::ExternalPath(path) => filesystem::directory_size(path),
        }
    }
}

/// Artifacts keyed by file or subdirectory name
pub type ArtifactMap = HashMap<String, Artifact>;

/// How a platform wants its version directory presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactPolicy {
    /// Visible files inline, subdirectories as paths
    InlineFilesAndSubdirs,

    /// Visible files as paths, subdirectories ignored
    FilePaths,
}

/// Build the artifact map for `root` under the given policy
pub fn collect_artifacts(root: &Path, policy: ArtifactPolicy) -> Result<ArtifactMap> {
    let mut artifacts = ArtifactMap::new();

    if policy == ArtifactPolicy::InlineFilesAndSubdirs {
        for dirname in filesystem::list_subdirectories(root)? {
            let path = root.join(&dirname);
            debug!("Artifact '{}' -> {}", dirname, path.display());
            artifacts.insert(dirname, Artifact::ExternalPath(path));
        }
    }

    for filename in filesystem::list_files(root, true)? {
        let path = root.join(&filename);
        let artifact = match policy {
            ArtifactPolicy::InlineFilesAndSubdirs => {
                let bytes = filesystem::read_file(&path)?;
                debug!("Artifact '{}' loaded inline ({} bytes)", filename, bytes.len());
                Artifact::Inline(bytes)
            }
            ArtifactPolicy::FilePaths => Artifact::ExternalPath(path),
        };
        artifacts.insert(filename, artifact);
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_file_inline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), "ABCDEFGHIJ").unwrap();

        let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::InlineFilesAndSubdirs).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            artifacts.get("model.onnx"),
            Some(&Artifact::Inline(b"ABCDEFGHIJ".to_vec()))
        );
    }

    #[test]
    fn test_subdirectory_is_external_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("weights")).unwrap();
        std::fs::write(dir.path().join("weights/shard0.bin"), [0u8; 64]).unwrap();
        std::fs::write(dir.path().join("graph.pb"), [0x0a, 0x03, 0xff]).unwrap();

        let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::InlineFilesAndSubdirs).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(
            artifacts.get("weights"),
            Some(&Artifact::ExternalPath(dir.path().join("weights")))
        );
        assert_eq!(
            artifacts.get("graph.pb"),
            Some(&Artifact::Inline(vec![0x0a, 0x03, 0xff]))
        );
        assert_eq!(artifacts["weights"].size_bytes().unwrap(), 64);
    }

    #[test]
    fn test_hidden_files_excluded() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.onnx", "b.txt", "c.json", ".DS_Store", ".lock"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }

        let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::InlineFilesAndSubdirs).unwrap();
        assert_eq!(artifacts.len(), 3);
        assert!(artifacts.keys().all(|name| !name.starts_with('.')));
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_hidden_symlink_does_not_fail_collection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin"), b"weights").unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join(".lock")).unwrap();

        let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::InlineFilesAndSubdirs).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts.contains_key("model.bin"));
    }

    #[test]
    fn test_binary_content_is_not_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0xff, 0xfe, 0x00, 0x80, 0xc3];
        std::fs::write(dir.path().join("model.bin"), &payload).unwrap();

        let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::InlineFilesAndSubdirs).unwrap();
        assert_eq!(artifacts["model.bin"].as_bytes(), Some(payload.as_slice()));
    }

    #[test]
    fn test_file_paths_policy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.graphdef"), b"graph").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("variables")).unwrap();

        let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::FilePaths).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            artifacts["model.graphdef"].as_path(),
            Some(dir.path().join("model.graphdef").as_path())
        );
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect_artifacts(&dir.path().join("gone"), ArtifactPolicy::FilePaths);
        assert!(matches!(result, Err(modelhost_core::Error::Io { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_artifact_count_is_files_plus_subdirs(files in 0usize..6, subdirs in 0usize..6, hidden in 0usize..4) {
            let dir = tempfile::tempdir().unwrap();
            for i in 0..files {
                std::fs::write(dir.path().join(format!("file{}.bin", i)), [i as u8]).unwrap();
            }
            for i in 0..subdirs {
                std::fs::create_dir(dir.path().join(format!("dir{}", i))).unwrap();
            }
            for i in 0..hidden {
                std::fs::write(dir.path().join(format!(".hidden{}", i)), [0u8]).unwrap();
            }

            let artifacts = collect_artifacts(dir.path(), ArtifactPolicy::InlineFilesAndSubdirs).unwrap();
            let inline = artifacts.values().filter(|a| a.as_bytes().is_some()).count();
            let external = artifacts.values().filter(|a| a.as_path().is_some()).count();

            prop_assert_eq!(artifacts.len(), files + subdirs);
            prop_assert_eq!(inline, files);
            prop_assert_eq!(external, subdirs);
        }
    }
}
