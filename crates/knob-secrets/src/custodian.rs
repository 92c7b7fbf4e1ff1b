//! Custodian RSA key pair storage
//!
//! Layout of a custodian directory:
//!   custodian.pem      PKCS#8 private key (0600)
//!   custodian.pub.pem  SPKI public key

use anyhow::{Context, Result};
use knob_core::config::expand_tilde;
use knob_crypto::{CustodianPrivateKey, CustodianPublicKey};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::atomic::{atomic_write, FileMode};

pub const PRIVATE_KEY_FILE: &str = "custodian.pem";
pub const PUBLIC_KEY_FILE: &str = "custodian.pub.pem";

/// Env vars overriding the configured key paths
pub const PRIVATE_KEY_ENV: &str = "KNOB_CUSTODIAN_KEY";
pub const PUBLIC_KEY_ENV: &str = "KNOB_CUSTODIAN_PUB";

pub const DEFAULT_BITS: usize = 2048;
const MIN_BITS: usize = 1024;
const MAX_BITS: usize = 8192;

/// Paths of a saved key pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodianPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl CustodianPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            private_key: dir.join(PRIVATE_KEY_FILE),
            public_key: dir.join(PUBLIC_KEY_FILE),
        }
    }
}

/// Generate a key pair. Runs on the blocking pool; large moduli take seconds.
pub async fn generate_custodian(bits: usize) -> Result<CustodianPrivateKey> {
    if !(MIN_BITS..=MAX_BITS).contains(&bits) || bits % 8 != 0 {
        anyhow::bail!("custodian key size must be a multiple of 8 in {MIN_BITS}..={MAX_BITS}, got {bits}");
    }
    if bits < DEFAULT_BITS {
        tracing::warn!(bits, "custodian key below {DEFAULT_BITS} bits is not recommended");
    }

    let key = tokio::task::spawn_blocking(move || CustodianPrivateKey::generate(bits))
        .await
        .context("key generation task failed")??;
    Ok(key)
}

/// Save both halves into `dir`, creating it if needed.
pub async fn save_custodian(dir: &Path, key: &CustodianPrivateKey) -> Result<CustodianPaths> {
    let paths = CustodianPaths::in_dir(dir);
    for path in [&paths.private_key, &paths.public_key] {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            anyhow::bail!("refusing to overwrite existing key: {}", path.display());
        }
    }

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let private_pem = key.to_pem()?;
    let public_pem = key.public_key().to_pem()?;
    atomic_write(&paths.private_key, private_pem.as_bytes(), FileMode::Private).await?;
    atomic_write(&paths.public_key, public_pem.as_bytes(), FileMode::Public).await?;

    tracing::info!(
        dir = %dir.display(),
        bits = key.modulus_size() * 8,
        "custodian key pair saved"
    );
    Ok(paths)
}

pub async fn load_private_key(path: &Path) -> Result<CustodianPrivateKey> {
    let pem = Zeroizing::new(
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading custodian private key: {}", path.display()))?,
    );
    CustodianPrivateKey::from_pem(&pem)
        .with_context(|| format!("parsing custodian private key: {}", path.display()))
}

pub async fn load_public_key(path: &Path) -> Result<CustodianPublicKey> {
    let pem = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading custodian public key: {}", path.display()))?;
    CustodianPublicKey::from_pem(&pem)
        .with_context(|| format!("parsing custodian public key: {}", path.display()))
}

/// Resolve a key path: explicit flag, then `env_var`, then the configured path.
pub fn resolve_key_path(
    explicit: Option<&Path>,
    env_var: &str,
    configured: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(env_var) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    if let Some(path) = configured {
        return Ok(expand_tilde(path));
    }
    anyhow::bail!("no custodian key path given: pass a flag, set ${env_var}, or configure [keys] in knob.toml")
}
