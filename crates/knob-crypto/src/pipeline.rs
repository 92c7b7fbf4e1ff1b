//! Encrypt, decrypt and revoke pipelines
//!
//! ```text
//! encrypt: Plain → Layer1Encrypted → SuperBlocksLayered → Sealed
//! decrypt: Sealed → SuperBlocksUnlayered → KeyRecovered → Plain
//! ```
//!
//! Intermediate states are private types; only `Sealed` leaves this module.
//! Keys are explicit arguments at every step.

use crate::aont::{compute_binding, recover_key, MetaFk};
use crate::block::{self, decrypt_blocks, encrypt_blocks, generate_iv};
use crate::bundle::MetadataBundle;
use crate::error::{CryptoError, CryptoResult};
use crate::format::{CiphertextFile, FormatVersion, Header};
use crate::group::{layer_super_blocks, rotate_group_key, unlayer_super_blocks, RotationReport};
use crate::index::{decrypt_index, encrypt_index, select_super_blocks, Index};
use crate::keys::{generate_file_key, generate_session_key, FileKey, GroupKey, SessionKey};
use crate::wrap::{unwrap_session_key, wrap_session_key, CustodianPrivateKey, CustodianPublicKey};
use crate::DEFAULT_SUPER_BLOCKS;

/// Pipeline stages, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plain,
    Layer1Encrypted,
    SuperBlocksLayered,
    Sealed,
    SuperBlocksUnlayered,
    KeyRecovered,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plain => "plain",
            Stage::Layer1Encrypted => "layer1_encrypted",
            Stage::SuperBlocksLayered => "super_blocks_layered",
            Stage::Sealed => "sealed",
            Stage::SuperBlocksUnlayered => "super_blocks_unlayered",
            Stage::KeyRecovered => "key_recovered",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptOptions {
    /// Number of super-blocks to draw
    pub super_blocks: usize,
    /// Container format to write
    pub format: FormatVersion,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            super_blocks: DEFAULT_SUPER_BLOCKS,
            format: FormatVersion::default(),
        }
    }
}

/// Output of `encrypt`: the container plus its metadata bundle.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub bundle: MetadataBundle,
}

/// Output of `revoke`.
#[derive(Debug, Clone)]
pub struct Revoked {
    pub ciphertext: Vec<u8>,
    pub report: RotationReport,
}

struct Layer1Encrypted {
    file: CiphertextFile,
    file_key: FileKey,
}

struct SuperBlocksLayered {
    file: CiphertextFile,
    meta_fk: MetaFk,
    index: Index,
}

struct Opened {
    file: CiphertextFile,
    positions: Vec<usize>,
}

struct SuperBlocksUnlayered {
    file: CiphertextFile,
}

struct KeyRecovered {
    file: CiphertextFile,
    file_key: FileKey,
}

impl Layer1Encrypted {
    fn from_plain(plaintext: &[u8], format: FormatVersion) -> Self {
        let file_key = generate_file_key();
        let iv = generate_iv();
        let blocks = encrypt_blocks(plaintext, file_key.as_bytes(), &iv);
        let header = Header {
            version: format,
            plaintext_len: plaintext.len() as u64,
            iv,
        };

        tracing::debug!(stage = %Stage::Layer1Encrypted, blocks = blocks.len(), "file encrypted under FK");
        Self {
            file: CiphertextFile::new(header, blocks),
            file_key,
        }
    }

    /// Bind FK to the layer-1 blocks, then wrap the chosen blocks under GK.
    fn layer(self, group_key: &GroupKey, positions: &[usize]) -> CryptoResult<SuperBlocksLayered> {
        let Self { mut file, file_key } = self;
        let meta_fk = compute_binding(&file.blocks, &file_key)?;
        drop(file_key);

        let index = Index::encode(file.block_count(), positions)?;
        layer_super_blocks(&mut file, positions, group_key)?;

        tracing::debug!(stage = %Stage::SuperBlocksLayered, ?positions, "super-blocks layered under GK");
        Ok(SuperBlocksLayered { file, meta_fk, index })
    }
}

impl SuperBlocksLayered {
    fn seal(self, custodian: &CustodianPublicKey) -> CryptoResult<Sealed> {
        let session_key = generate_session_key();
        let meta_index = encrypt_index(&self.index, &session_key)?;
        let meta_sgx = wrap_session_key(&session_key, custodian)?;

        let format = self.file.header.version;
        let ciphertext = self.file.to_bytes();

        tracing::debug!(stage = %Stage::Sealed, bytes = ciphertext.len(), %format, "container sealed");
        Ok(Sealed {
            ciphertext,
            bundle: MetadataBundle::new(format, self.meta_fk, meta_index, meta_sgx),
        })
    }
}

impl Opened {
    fn parse(ciphertext: &[u8], meta_index: &[u8], session_key: &SessionKey) -> CryptoResult<Self> {
        let header = Header::parse(ciphertext)?;
        let index = decrypt_index(meta_index, session_key)?;
        check_index(&header, &index)?;

        let file = CiphertextFile::parse(ciphertext, &index)?;
        Ok(Self {
            file,
            positions: index.positions(),
        })
    }

    fn unlayer(self, group_key: &GroupKey) -> CryptoResult<SuperBlocksUnlayered> {
        let Self { mut file, positions } = self;
        unlayer_super_blocks(&mut file, &positions, group_key)?;

        tracing::debug!(stage = %Stage::SuperBlocksUnlayered, count = positions.len(), "GK layer removed");
        Ok(SuperBlocksUnlayered { file })
    }
}

impl SuperBlocksUnlayered {
    fn recover(self, meta_fk: &MetaFk) -> CryptoResult<KeyRecovered> {
        let file_key = recover_key(&self.file.blocks, meta_fk)?;

        tracing::debug!(stage = %Stage::KeyRecovered, "FK rebuilt from block hashes");
        Ok(KeyRecovered {
            file: self.file,
            file_key,
        })
    }
}

impl KeyRecovered {
    fn decrypt(self) -> CryptoResult<Vec<u8>> {
        let header = &self.file.header;
        let plaintext = decrypt_blocks(
            &self.file.blocks,
            self.file_key.as_bytes(),
            &header.iv,
            header.plaintext_len,
        )?;

        tracing::debug!(stage = %Stage::Plain, bytes = plaintext.len(), "file decrypted");
        Ok(plaintext)
    }
}

/// Encrypt `plaintext` for holders of `group_key`, with the session key
/// wrapped for `custodian`.
///
/// Super-block positions are drawn before any encryption, so an undersized
/// file fails with `InsufficientBlocks` without doing work.
pub fn encrypt(
    plaintext: &[u8],
    group_key: &GroupKey,
    custodian: &CustodianPublicKey,
    options: EncryptOptions,
) -> CryptoResult<Sealed> {
    let n_blocks = usize::try_from(block::block_count(plaintext.len() as u64)?)
        .map_err(|_| CryptoError::InvalidParameter("plaintext too large".into()))?;
    let positions = select_super_blocks(n_blocks, options.super_blocks)?;

    tracing::debug!(
        stage = %Stage::Plain,
        bytes = plaintext.len(),
        blocks = n_blocks,
        format = %options.format,
        "encrypting"
    );

    Layer1Encrypted::from_plain(plaintext, options.format)
        .layer(group_key, &positions)?
        .seal(custodian)
}

/// Decrypt a sealed container.
///
/// A stale or wrong `group_key` leaves the super-blocks scrambled, which
/// rebuilds an unrelated FK. The result is then a `Padding` error or
/// plaintext that shares nothing with the original.
pub fn decrypt(
    ciphertext: &[u8],
    bundle: &MetadataBundle,
    group_key: &GroupKey,
    custodian: &CustodianPrivateKey,
) -> CryptoResult<Vec<u8>> {
    let header = Header::parse(ciphertext)?;
    if header.version != bundle.format {
        return Err(CryptoError::MalformedCiphertext(format!(
            "container is format {}, bundle says {}",
            header.version, bundle.format
        )));
    }

    let session_key = open_session_key(bundle, custodian)?;
    Opened::parse(ciphertext, &bundle.meta_index, &session_key)?
        .unlayer(group_key)?
        .recover(&bundle.meta_fk)?
        .decrypt()
}

/// Move a container from `old_gk` to `new_gk`.
///
/// Only the super-blocks are rewritten; the bundle stays valid as is.
pub fn revoke(
    ciphertext: &[u8],
    old_gk: &GroupKey,
    new_gk: &GroupKey,
    meta_index: &[u8],
    session_key: &SessionKey,
) -> CryptoResult<Revoked> {
    let Opened { mut file, positions } = Opened::parse(ciphertext, meta_index, session_key)?;
    let report = rotate_group_key(old_gk, new_gk, &mut file, &positions)?;

    tracing::debug!(touched = ?report.touched, "revocation applied");
    Ok(Revoked {
        ciphertext: file.to_bytes(),
        report,
    })
}

/// Recover the session key from a bundle.
pub fn open_session_key(
    bundle: &MetadataBundle,
    custodian: &CustodianPrivateKey,
) -> CryptoResult<SessionKey> {
    unwrap_session_key(&bundle.meta_sgx, custodian)
}

fn check_index(header: &Header, index: &Index) -> CryptoResult<()> {
    let n = header.block_count()?;
    if index.len() != n {
        return Err(CryptoError::MalformedIndex(format!(
            "index covers {} blocks, container has {n}",
            index.len()
        )));
    }
    if index.super_block_count() == 0 {
        return Err(CryptoError::MalformedIndex("index names no super-blocks".into()));
    }
    Ok(())
}
