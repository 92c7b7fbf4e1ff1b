//! Group key files and discovery
//!
//! A group key file holds either the raw 32 key bytes or their base64
//! encoding (surrounding whitespace ignored). Files written here are base64
//! with a trailing newline.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use knob_core::config::{expand_tilde, KeysConfig};
use knob_crypto::{generate_group_key, GroupKey, KEY_SIZE};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::atomic::{atomic_write, FileMode};

/// Env var naming the group key file
pub const GROUP_KEY_FILE_ENV: &str = "KNOB_GROUP_KEY_FILE";

/// Env var holding a literal base64 group key
pub const GROUP_KEY_ENV: &str = "KNOB_GROUP_KEY";

/// A loaded group key and where it came from
pub struct GroupKeySource {
    pub key: GroupKey,
    pub source: String,
}

impl std::fmt::Debug for GroupKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupKeySource")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Decode group key file content.
pub fn parse_group_key(data: &[u8]) -> Result<GroupKey> {
    if data.len() == KEY_SIZE {
        if let Some(key) = GroupKey::from_slice(data) {
            return Ok(key);
        }
    }

    let text = std::str::from_utf8(data).context("group key is neither raw bytes nor base64 text")?;
    let decoded = Zeroizing::new(
        STANDARD
            .decode(text.trim())
            .context("group key is not valid base64")?,
    );
    GroupKey::from_slice(&decoded).with_context(|| {
        format!(
            "group key must be {KEY_SIZE} bytes, got {}",
            decoded.len()
        )
    })
}

/// Encode a group key as base64 text.
pub fn encode_group_key(key: &GroupKey) -> Zeroizing<String> {
    Zeroizing::new(format!("{}\n", STANDARD.encode(key.as_bytes())))
}

pub async fn load_group_key(path: &Path) -> Result<GroupKey> {
    let data = Zeroizing::new(
        tokio::fs::read(path)
            .await
            .with_context(|| format!("reading group key: {}", path.display()))?,
    );
    parse_group_key(&data).with_context(|| format!("parsing group key: {}", path.display()))
}

/// Write `key` to `path` with owner-only permissions.
pub async fn save_group_key(path: &Path, key: &GroupKey) -> Result<()> {
    let encoded = encode_group_key(key);
    atomic_write(path, encoded.as_bytes(), FileMode::Private).await?;
    tracing::info!(path = %path.display(), "group key saved");
    Ok(())
}

/// Generate a fresh group key and save it to `path`.
///
/// Refuses to overwrite an existing file.
pub async fn create_group_key(path: &Path) -> Result<GroupKey> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!("refusing to overwrite existing group key: {}", path.display());
    }
    let key = generate_group_key();
    save_group_key(path, &key).await?;
    Ok(key)
}

/// Find and load the current group key:
///   1. `explicit` path (from a CLI flag)
///   2. $KNOB_GROUP_KEY_FILE (path)
///   3. $KNOB_GROUP_KEY (literal base64)
///   4. `keys.group_key` from knob.toml
///   5. ~/.config/knob/group.key
pub async fn find_group_key(explicit: Option<&Path>, keys: &KeysConfig) -> Result<GroupKeySource> {
    if let Some(path) = explicit {
        return load_from(path, "flag").await;
    }

    if let Ok(file) = std::env::var(GROUP_KEY_FILE_ENV) {
        return load_from(Path::new(&file), GROUP_KEY_FILE_ENV).await;
    }

    if let Ok(literal) = std::env::var(GROUP_KEY_ENV) {
        let literal = Zeroizing::new(literal);
        if !literal.is_empty() {
            let key = parse_group_key(literal.as_bytes())
                .with_context(|| format!("parsing ${GROUP_KEY_ENV}"))?;
            return Ok(GroupKeySource {
                key,
                source: format!("{GROUP_KEY_ENV} (env)"),
            });
        }
    }

    if let Some(path) = &keys.group_key {
        return load_from(&expand_tilde(path), "config").await;
    }

    let default_path = default_group_key_path();
    if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
        return load_from(&default_path, "default").await;
    }

    anyhow::bail!(
        "no group key found. Tried: --group-key, ${GROUP_KEY_FILE_ENV}, ${GROUP_KEY_ENV}, \
         keys.group_key in knob.toml, and {}. Run: knob keygen group <path>",
        default_path.display()
    )
}

async fn load_from(path: &Path, origin: &str) -> Result<GroupKeySource> {
    let key = load_group_key(path).await?;
    tracing::debug!(path = %path.display(), origin, "group key loaded");
    Ok(GroupKeySource {
        key,
        source: format!("{origin}:{}", path.display()),
    })
}

pub fn default_group_key_path() -> PathBuf {
    expand_tilde(Path::new("~/.config/knob/group.key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base64_with_whitespace() {
        let key = generate_group_key();
        let text = format!("  {}\n\n", STANDARD.encode(key.as_bytes()));
        assert_eq!(parse_group_key(text.as_bytes()).unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_parse_raw_bytes() {
        let raw = [0xEEu8; KEY_SIZE];
        assert_eq!(parse_group_key(&raw).unwrap().as_bytes(), &raw);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let text = STANDARD.encode([1u8; 16]);
        let err = parse_group_key(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_group_key(b"definitely not a key!").is_err());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.key");
        let key = generate_group_key();

        save_group_key(&path, &key).await.unwrap();
        let loaded = load_group_key(&path).await.unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_create_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.key");

        create_group_key(&path).await.unwrap();
        assert!(create_group_key(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_find_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.key");
        let configured = dir.path().join("configured.key");
        let key = create_group_key(&explicit).await.unwrap();
        create_group_key(&configured).await.unwrap();

        let keys = KeysConfig {
            group_key: Some(configured),
            ..Default::default()
        };
        let found = find_group_key(Some(&explicit), &keys).await.unwrap();
        assert_eq!(found.key.as_bytes(), key.as_bytes());
        assert!(found.source.starts_with("flag:"));
    }

    #[tokio::test]
    async fn test_find_missing_explicit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.key");
        assert!(find_group_key(Some(&missing), &KeysConfig::default()).await.is_err());
    }
}
