//! All-or-nothing binding of the file key to the layer-1 blocks
//!
//! ```text
//! metaFK = SHA-256(B[0]) ^ SHA-256(B[1]) ^ … ^ SHA-256(B[N-1]) ^ FK
//! ```
//!
//! The fold is recomputed over the blocks at hand during decryption. Any block
//! that differs from its layer-1 form (tampered, missing, or still wrapped in
//! a stale group-key layer) shifts the fold and yields an unrelated key.
//!
//! Nothing here signals that the recovered key is wrong. A bad key shows up
//! only as wrong plaintext or a padding failure on the final block.

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::FileKey;
use crate::KEY_SIZE;

/// The AONT binding value stored alongside the ciphertext.
pub type MetaFk = [u8; KEY_SIZE];

/// XOR-fold the SHA-256 digests of `blocks`, starting from all zeros.
///
/// XOR is commutative and associative, so the digests are computed and
/// partially folded on the rayon pool.
pub fn fold_block_hashes(blocks: &[Vec<u8>]) -> [u8; KEY_SIZE] {
    blocks
        .par_iter()
        .map(|block| -> [u8; KEY_SIZE] { Sha256::digest(block).into() })
        .reduce(|| [0u8; KEY_SIZE], |acc, digest| xor(&acc, &digest))
}

/// Bind `file_key` to the layer-1 `blocks`.
pub fn compute_binding(blocks: &[Vec<u8>], file_key: &FileKey) -> CryptoResult<MetaFk> {
    if blocks.is_empty() {
        return Err(CryptoError::MalformedCiphertext(
            "cannot bind a key to an empty block sequence".into(),
        ));
    }
    Ok(xor(&fold_block_hashes(blocks), file_key.as_bytes()))
}

/// Rebuild the file key from `blocks` and the stored binding.
///
/// Yields the original key only if every block is bit-identical to the one
/// used by `compute_binding`, in the same order.
pub fn recover_key(blocks: &[Vec<u8>], meta_fk: &MetaFk) -> CryptoResult<FileKey> {
    if blocks.is_empty() {
        return Err(CryptoError::MalformedCiphertext(
            "cannot recover a key from an empty block sequence".into(),
        ));
    }
    Ok(FileKey::from_bytes(xor(&fold_block_hashes(blocks), meta_fk)))
}

fn xor(a: &[u8; KEY_SIZE], b: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_file_key;

    fn sample_blocks() -> Vec<Vec<u8>> {
        (0u8..6).map(|i| vec![i; 1024]).collect()
    }

    #[test]
    fn test_binding_roundtrip() {
        let blocks = sample_blocks();
        let fk = generate_file_key();

        let meta = compute_binding(&blocks, &fk).unwrap();
        let recovered = recover_key(&blocks, &meta).unwrap();

        assert_eq!(recovered.as_bytes(), fk.as_bytes());
    }

    #[test]
    fn test_binding_hides_key() {
        let blocks = sample_blocks();
        let fk = generate_file_key();
        let meta = compute_binding(&blocks, &fk).unwrap();
        assert_ne!(&meta, fk.as_bytes());
    }

    #[test]
    fn test_single_bit_change_breaks_recovery() {
        let blocks = sample_blocks();
        let fk = generate_file_key();
        let meta = compute_binding(&blocks, &fk).unwrap();

        let mut tampered = blocks.clone();
        tampered[3][512] ^= 0x01;

        let recovered = recover_key(&tampered, &meta).unwrap();
        assert_ne!(recovered.as_bytes(), fk.as_bytes());
    }

    #[test]
    fn test_missing_block_breaks_recovery() {
        let blocks = sample_blocks();
        let fk = generate_file_key();
        let meta = compute_binding(&blocks, &fk).unwrap();

        let recovered = recover_key(&blocks[..5], &meta).unwrap();
        assert_ne!(recovered.as_bytes(), fk.as_bytes());
    }

    #[test]
    fn test_parallel_fold_matches_sequential() {
        let blocks: Vec<Vec<u8>> = (0..64u32).map(|i| i.to_be_bytes().repeat(256)).collect();

        let mut sequential = [0u8; KEY_SIZE];
        for block in &blocks {
            let digest: [u8; KEY_SIZE] = Sha256::digest(block).into();
            sequential = xor(&sequential, &digest);
        }

        assert_eq!(fold_block_hashes(&blocks), sequential);
    }

    #[test]
    fn test_empty_blocks_rejected() {
        let fk = generate_file_key();
        assert!(compute_binding(&[], &fk).is_err());
        assert!(recover_key(&[], &[0u8; KEY_SIZE]).is_err());
    }
}
