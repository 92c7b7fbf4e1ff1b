//! Super-block selection and the encrypted super-block index
//!
//! The index holds one ASCII byte per block: `'1'` for a super-block, `'0'`
//! otherwise. Encrypted form (`metaIndex`):
//! ```text
//! [16 bytes: random IV][AES-256-CBC(SK, IV, index [|| pkcs7])]
//! ```
//!
//! PKCS#7 is applied only when the index is not a multiple of the cipher
//! block, so `metaIndex` is `16 + ceil(N / 16) * 16` bytes. Index entries are
//! `0x30`/`0x31` and padding bytes are at most `0x10`, so the final byte tells
//! the two cases apart.

use rand::Rng;

use crate::block::{decrypt_block, encrypt_block, encrypt_with_embedded_iv, generate_iv};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::SessionKey;
use crate::{CIPHER_BLOCK_SIZE, IV_SIZE};

const SUPER: u8 = b'1';
const PLAIN: u8 = b'0';

/// Which positions of a file carry the group-key layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    entries: Vec<bool>,
}

impl Index {
    /// Build the index of an `n_blocks` file from its super-block positions.
    pub fn encode(n_blocks: usize, positions: &[usize]) -> CryptoResult<Self> {
        let mut entries = vec![false; n_blocks];
        for &position in positions {
            let Some(entry) = entries.get_mut(position) else {
                return Err(CryptoError::MalformedIndex(format!(
                    "position {position} out of range for {n_blocks} blocks"
                )));
            };
            if *entry {
                return Err(CryptoError::MalformedIndex(format!(
                    "position {position} listed twice"
                )));
            }
            *entry = true;
        }
        Ok(Self { entries })
    }

    /// Number of blocks covered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_super(&self, position: usize) -> bool {
        self.entries.get(position).copied().unwrap_or(false)
    }

    /// Super-block positions in ascending order.
    pub fn positions(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, &is_super)| is_super.then_some(i))
            .collect()
    }

    pub fn super_block_count(&self) -> usize {
        self.entries.iter().filter(|&&s| s).count()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries
            .iter()
            .map(|&is_super| if is_super { SUPER } else { PLAIN })
            .collect()
    }

    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        if data.is_empty() {
            return Err(CryptoError::MalformedIndex("empty index".into()));
        }
        let entries = data
            .iter()
            .enumerate()
            .map(|(i, &b)| match b {
                SUPER => Ok(true),
                PLAIN => Ok(false),
                other => Err(CryptoError::MalformedIndex(format!(
                    "invalid entry 0x{other:02x} at position {i}"
                ))),
            })
            .collect::<CryptoResult<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

/// Draw `count` distinct super-block positions uniformly from `[0, n_blocks)`.
///
/// Returned in ascending order.
pub fn select_super_blocks(n_blocks: usize, count: usize) -> CryptoResult<Vec<usize>> {
    select_super_blocks_with(&mut rand::thread_rng(), n_blocks, count)
}

/// `select_super_blocks` with a caller-supplied RNG.
pub fn select_super_blocks_with<R: Rng + ?Sized>(
    rng: &mut R,
    n_blocks: usize,
    count: usize,
) -> CryptoResult<Vec<usize>> {
    if count == 0 {
        return Err(CryptoError::InvalidParameter(
            "super-block count must be at least 1".into(),
        ));
    }
    if count > n_blocks {
        return Err(CryptoError::InsufficientBlocks {
            requested: count,
            available: n_blocks,
        });
    }

    let mut positions = rand::seq::index::sample(rng, n_blocks, count).into_vec();
    positions.sort_unstable();
    Ok(positions)
}

/// Encrypt the index under the session key.
pub fn encrypt_index(index: &Index, session_key: &SessionKey) -> CryptoResult<Vec<u8>> {
    let entries = index.to_bytes();
    if entries.is_empty() || entries.len() % CIPHER_BLOCK_SIZE != 0 {
        return Ok(encrypt_with_embedded_iv(session_key.as_bytes(), &entries));
    }

    let iv = generate_iv();
    let ciphertext = encrypt_block(session_key.as_bytes(), &iv, &entries)?;
    let mut meta = Vec::with_capacity(IV_SIZE + ciphertext.len());
    meta.extend_from_slice(&iv);
    meta.extend_from_slice(&ciphertext);
    Ok(meta)
}

/// Decrypt `metaIndex` with the session key.
///
/// A wrong session key almost always fails the padding or entry check.
pub fn decrypt_index(meta_index: &[u8], session_key: &SessionKey) -> CryptoResult<Index> {
    if meta_index.len() < IV_SIZE + CIPHER_BLOCK_SIZE {
        return Err(CryptoError::MalformedIndex(format!(
            "metaIndex too short: {} bytes",
            meta_index.len()
        )));
    }
    let (iv_bytes, ciphertext) = meta_index.split_at(IV_SIZE);
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(iv_bytes);

    let mut plain = decrypt_block(session_key.as_bytes(), &iv, ciphertext)
        .map_err(|e| CryptoError::MalformedIndex(format!("cannot open index: {e}")))?;
    strip_short_padding(&mut plain)?;
    Index::from_bytes(&plain)
}

/// Remove PKCS#7 padding if the final byte is a padding byte.
fn strip_short_padding(plain: &mut Vec<u8>) -> CryptoResult<()> {
    let Some(&last) = plain.last() else {
        return Ok(());
    };
    if last == SUPER || last == PLAIN {
        return Ok(());
    }

    let pad = usize::from(last);
    let valid = (1..=CIPHER_BLOCK_SIZE).contains(&pad)
        && pad <= plain.len()
        && plain[plain.len() - pad..].iter().all(|&b| b == last);
    if !valid {
        return Err(CryptoError::MalformedIndex("malformed index padding".into()));
    }
    plain.truncate(plain.len() - pad);
    Ok(())
}
