//! AES-256-CBC block codec
//!
//! Layer-1 ciphertext format:
//! ```text
//! CBC(FK, file_iv, plaintext || pkcs7) cut into BLOCK_SIZE slices
//! ```
//!
//! The whole file is one CBC chain. PKCS#7 padding is applied only when the
//! final plaintext block is shorter than `BLOCK_SIZE`, so a file of `L` bytes
//! always yields `ceil(L / BLOCK_SIZE)` blocks. Whether the final block carries
//! padding is decided by the plaintext length, which the container records.

use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use rand::RngCore;
use rayon::prelude::*;

use crate::error::{CryptoError, CryptoResult};
use crate::{BLOCK_SIZE, CIPHER_BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A CBC initialization vector
pub type Iv = [u8; IV_SIZE];

/// Generate a random IV.
pub fn generate_iv() -> Iv {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Whether a plaintext of this length has a padded final block.
pub fn has_padding(plaintext_len: u64) -> bool {
    plaintext_len % BLOCK_SIZE as u64 != 0
}

/// Length of the layer-1 ciphertext for a plaintext of `plaintext_len` bytes.
///
/// Lengths come from an unauthenticated header, so lengths whose padding
/// would pass `u64::MAX` are `MalformedCiphertext`.
pub fn padded_len(plaintext_len: u64) -> CryptoResult<u64> {
    if !has_padding(plaintext_len) {
        return Ok(plaintext_len);
    }
    let cipher_block = CIPHER_BLOCK_SIZE as u64;
    (plaintext_len / cipher_block)
        .checked_add(1)
        .and_then(|n| n.checked_mul(cipher_block))
        .ok_or_else(|| {
            CryptoError::MalformedCiphertext(format!("plaintext length {plaintext_len} overflows when padded"))
        })
}

/// Number of blocks a plaintext of `plaintext_len` bytes encrypts to.
pub fn block_count(plaintext_len: u64) -> CryptoResult<u64> {
    Ok(padded_len(plaintext_len)?.div_ceil(BLOCK_SIZE as u64))
}

/// Encrypt a whole plaintext under `key` and `iv`, returning the layer-1 blocks.
pub fn encrypt_blocks(plaintext: &[u8], key: &[u8; KEY_SIZE], iv: &Iv) -> Vec<Vec<u8>> {
    let cipher = Aes256CbcEnc::new(key.into(), iv.into());
    let ciphertext = if has_padding(plaintext.len() as u64) {
        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    } else {
        cipher.encrypt_padded_vec_mut::<NoPadding>(plaintext)
    };

    ciphertext.chunks(BLOCK_SIZE).map(<[u8]>::to_vec).collect()
}

/// Decrypt layer-1 blocks back into the plaintext.
///
/// All blocks but the last are decrypted in parallel: in CBC the chaining
/// value of block `i` is the last cipher block of block `i - 1`, so no block
/// depends on another block's plaintext. The final block is unpadded when
/// `plaintext_len` says it was padded.
pub fn decrypt_blocks(
    blocks: &[Vec<u8>],
    key: &[u8; KEY_SIZE],
    iv: &Iv,
    plaintext_len: u64,
) -> CryptoResult<Vec<u8>> {
    let expected_len = check_layer1_shape(blocks, plaintext_len)?;

    let Some(last) = blocks.len().checked_sub(1) else {
        return Ok(Vec::new());
    };

    let body = (0..last)
        .into_par_iter()
        .map(|i| decrypt_block(key, &chaining_value(blocks, i, iv), &blocks[i]))
        .collect::<CryptoResult<Vec<_>>>()?;

    let final_iv = chaining_value(blocks, last, iv);
    let tail = if has_padding(plaintext_len) {
        decrypt_with_external_iv(key, &final_iv, &blocks[last])?
    } else {
        decrypt_block(key, &final_iv, &blocks[last])?
    };

    let mut plaintext = Vec::with_capacity(expected_len);
    for block in body {
        plaintext.extend_from_slice(&block);
    }
    plaintext.extend_from_slice(&tail);

    if plaintext.len() as u64 != plaintext_len {
        return Err(CryptoError::Padding(format!(
            "final block padding yields {} bytes, container records {}",
            plaintext.len(),
            plaintext_len
        )));
    }
    Ok(plaintext)
}

/// Encrypt one block-aligned buffer with no padding.
pub fn encrypt_block(key: &[u8; KEY_SIZE], iv: &Iv, data: &[u8]) -> CryptoResult<Vec<u8>> {
    check_aligned(data)?;
    Ok(Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<NoPadding>(data))
}

/// Decrypt one block-aligned buffer with no padding.
pub fn decrypt_block(key: &[u8; KEY_SIZE], iv: &Iv, data: &[u8]) -> CryptoResult<Vec<u8>> {
    check_aligned(data)?;
    let mut buf = data.to_vec();
    let len = Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::MalformedCiphertext("unaligned CBC input".into()))?
        .len();
    buf.truncate(len);
    Ok(buf)
}

/// Encrypt with PKCS#7 padding under a fresh IV.
///
/// Returns: `[16-byte IV][ciphertext]`
pub fn encrypt_with_embedded_iv(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let iv = generate_iv();
    let ciphertext = Aes256CbcEnc::new(key.into(), (&iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    result
}

/// Decrypt `[16-byte IV][ciphertext]` produced by `encrypt_with_embedded_iv`.
pub fn decrypt_with_embedded_iv(key: &[u8; KEY_SIZE], data: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.len() < IV_SIZE + CIPHER_BLOCK_SIZE {
        return Err(CryptoError::MalformedCiphertext(format!(
            "ciphertext too short: {} bytes (minimum {})",
            data.len(),
            IV_SIZE + CIPHER_BLOCK_SIZE
        )));
    }
    let (iv_bytes, ciphertext) = data.split_at(IV_SIZE);
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(iv_bytes);
    decrypt_with_external_iv(key, &iv, ciphertext)
}

/// Decrypt PKCS#7-padded ciphertext whose IV is supplied by the caller.
pub fn decrypt_with_external_iv(
    key: &[u8; KEY_SIZE],
    iv: &Iv,
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    if ciphertext.is_empty() {
        return Err(CryptoError::MalformedCiphertext("empty padded ciphertext".into()));
    }
    check_aligned(ciphertext)?;
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Padding("malformed PKCS#7 padding".into()))
}

fn chaining_value(blocks: &[Vec<u8>], i: usize, iv: &Iv) -> Iv {
    if i == 0 {
        return *iv;
    }
    let prev = &blocks[i - 1];
    let mut chain = [0u8; IV_SIZE];
    chain.copy_from_slice(&prev[prev.len() - IV_SIZE..]);
    chain
}

fn check_aligned(data: &[u8]) -> CryptoResult<()> {
    if data.len() % CIPHER_BLOCK_SIZE != 0 {
        return Err(CryptoError::MalformedCiphertext(format!(
            "length {} is not a multiple of {}",
            data.len(),
            CIPHER_BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Returns the total layer-1 length.
fn check_layer1_shape(blocks: &[Vec<u8>], plaintext_len: u64) -> CryptoResult<usize> {
    let expected = padded_len(plaintext_len)?;
    let total: usize = blocks.iter().map(Vec::len).sum();
    if total as u64 != expected {
        return Err(CryptoError::MalformedCiphertext(format!(
            "blocks hold {total} bytes, expected {expected} for a {plaintext_len}-byte plaintext"
        )));
    }
    if let Some((last, body)) = blocks.split_last() {
        if body.iter().any(|b| b.len() != BLOCK_SIZE) || last.is_empty() || last.len() > BLOCK_SIZE {
            return Err(CryptoError::MalformedCiphertext(
                "only the final block may differ from BLOCK_SIZE".into(),
            ));
        }
    }
    Ok(total)
}
