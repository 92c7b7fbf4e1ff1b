use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KnobError, KnobResult};

/// Top-level configuration (loaded from knob.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnobConfig {
    pub log: LogConfig,
    pub pipeline: PipelineConfig,
    pub keys: KeysConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Super-blocks drawn per file (default: 2)
    pub super_block_count: usize,
    /// Container format for new files: "v1" or "v2"
    pub format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Current group key file
    pub group_key: Option<PathBuf>,
    /// Custodian public key (PEM), used for encryption
    pub custodian_public_key: Option<PathBuf>,
    /// Custodian private key (PEM), used for decryption and revocation
    pub custodian_private_key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "fs" or "memory"
    pub backend: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            super_block_count: 2,
            format: "v2".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/knob/store"),
        }
    }
}

impl KnobConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> KnobResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| KnobError::Config(format!("parsing: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.
    pub fn load(path: &Path) -> KnobResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| KnobError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> KnobResult<()> {
        if self.pipeline.super_block_count == 0 {
            return Err(KnobError::Config(
                "pipeline.super_block_count must be at least 1".into(),
            ));
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            return Err(KnobError::Config(format!(
                "log.format must be \"json\" or \"text\", got {:?}",
                self.log.format
            )));
        }
        if !matches!(self.storage.backend.as_str(), "fs" | "memory") {
            return Err(KnobError::Config(format!(
                "storage.backend must be \"fs\" or \"memory\", got {:?}",
                self.storage.backend
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[pipeline]
super_block_count = 3
format = "v1"

[keys]
group_key = "/etc/knob/group.key"
custodian_public_key = "/etc/knob/custodian.pub.pem"
custodian_private_key = "/etc/knob/custodian.pem"

[storage]
backend = "fs"
root = "/var/lib/knob"
"#;
        let config = KnobConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.pipeline.super_block_count, 3);
        assert_eq!(config.pipeline.format, "v1");
        assert_eq!(config.keys.group_key, Some(PathBuf::from("/etc/knob/group.key")));
        assert_eq!(config.storage.root, PathBuf::from("/var/lib/knob"));
    }

    #[test]
    fn test_parse_defaults() {
        let config = KnobConfig::from_toml("").unwrap();

        assert_eq!(config, KnobConfig::default());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.pipeline.super_block_count, 2);
        assert_eq!(config.pipeline.format, "v2");
        assert!(config.keys.group_key.is_none());
        assert_eq!(config.storage.backend, "fs");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[pipeline]
super_block_count = 4
"#;
        let config = KnobConfig::from_toml(toml_str).unwrap();

        // Overridden
        assert_eq!(config.pipeline.super_block_count, 4);
        // Defaults
        assert_eq!(config.pipeline.format, "v2");
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_validate_rejects_zero_super_blocks() {
        let err = KnobConfig::from_toml("[pipeline]\nsuper_block_count = 0\n").unwrap_err();
        assert!(err.to_string().contains("super_block_count"));
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        assert!(KnobConfig::from_toml("[storage]\nbackend = \"s3\"\n").is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = KnobConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = KnobConfig::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knob.toml");
        std::fs::write(&path, "[log]\nlevel = \"trace\"\n").unwrap();

        let config = KnobConfig::load(&path).unwrap();
        assert_eq!(config.log.level, "trace");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = KnobConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, KnobError::Io(_)));
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/abs/path");
        assert_eq!(expand_tilde(plain), PathBuf::from("/abs/path"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_tilde(Path::new("~/x")), PathBuf::from(home).join("x"));
        }
    }
}
