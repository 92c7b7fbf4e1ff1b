//! OpenDAL Operator factory for knob storage backends

use anyhow::{Context, Result};
use knob_core::config::{expand_tilde, StorageConfig};
use opendal::Operator;

/// Build an Operator from the `[storage]` config section.
///
/// `fs` roots the store at `storage.root`; `memory` keeps everything in
/// process and is lost on exit.
pub fn build_operator(storage: &StorageConfig) -> Result<Operator> {
    let op = match storage.backend.as_str() {
        "fs" => {
            let root = expand_tilde(&storage.root);
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating storage root: {}", root.display()))?;
            // opendal 0.55: builders use the consuming pattern
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .context("creating OpenDAL fs operator")?
                .layer(opendal::layers::LoggingLayer::default())
                .finish()
        }
        "memory" => {
            tracing::warn!("memory storage backend: sealed files are discarded on exit");
            memory_operator()?
        }
        other => anyhow::bail!("unknown storage backend {other:?} (expected \"fs\" or \"memory\")"),
    };
    Ok(op)
}

/// In-memory Operator.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_fs_operator_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let storage = StorageConfig {
            backend: "fs".into(),
            root: root.clone(),
        };
        assert!(build_operator(&storage).is_ok());
        assert!(root.is_dir());
    }

    #[test]
    fn test_build_memory_operator() {
        let storage = StorageConfig {
            backend: "memory".into(),
            root: PathBuf::from("/unused"),
        };
        assert!(build_operator(&storage).is_ok());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let storage = StorageConfig {
            backend: "s3".into(),
            ..Default::default()
        };
        let err = build_operator(&storage).unwrap_err();
        assert!(err.to_string().contains("unknown storage backend"));
    }
}
