//! Group-key layer on super-blocks: layering, unlayering, rotation
//!
//! Rotation is the revocation primitive. Its cost is one decrypt and one
//! encrypt per super-block, independent of file size.
//!
//! CBC without padding cannot tell a wrong group key from the right one, so
//! rotating with a stale `old_gk` silently scrambles the super-blocks and the
//! file becomes unrecoverable for everyone.

use crate::block::{decrypt_block, encrypt_block, generate_iv, Iv};
use crate::error::{CryptoError, CryptoResult};
use crate::format::{CiphertextFile, FormatVersion};
use crate::keys::GroupKey;
use crate::IV_SIZE;

/// Positions rewritten by `rotate_group_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    pub touched: Vec<usize>,
}

/// Add the group-key layer to the FK-layer blocks at `positions`, in place.
pub fn layer_super_blocks(
    file: &mut CiphertextFile,
    positions: &[usize],
    group_key: &GroupKey,
) -> CryptoResult<()> {
    check_positions(file, positions)?;
    let version = file.header.version;
    let file_iv = file.header.iv;

    for &position in positions {
        let layered = add_layer(version, &file_iv, group_key, &file.blocks[position])?;
        file.blocks[position] = layered;
    }
    Ok(())
}

/// Strip the group-key layer from the blocks at `positions`, in place.
pub fn unlayer_super_blocks(
    file: &mut CiphertextFile,
    positions: &[usize],
    group_key: &GroupKey,
) -> CryptoResult<()> {
    check_positions(file, positions)?;
    let version = file.header.version;
    let file_iv = file.header.iv;

    for &position in positions {
        let plain = strip_layer(version, &file_iv, group_key, &file.blocks[position])?;
        file.blocks[position] = plain;
    }
    Ok(())
}

/// Re-encrypt the super-blocks at `positions` from `old_gk` to `new_gk`.
///
/// Every other block is left byte-for-byte untouched. `positions` must come
/// from the file's decrypted index.
pub fn rotate_group_key(
    old_gk: &GroupKey,
    new_gk: &GroupKey,
    file: &mut CiphertextFile,
    positions: &[usize],
) -> CryptoResult<RotationReport> {
    check_positions(file, positions)?;
    let version = file.header.version;
    let file_iv = file.header.iv;

    for &position in positions {
        let inner = strip_layer(version, &file_iv, old_gk, &file.blocks[position])?;
        file.blocks[position] = add_layer(version, &file_iv, new_gk, &inner)?;
    }

    tracing::debug!(touched = positions.len(), "group key rotated on super-blocks");
    Ok(RotationReport {
        touched: positions.to_vec(),
    })
}

fn add_layer(
    version: FormatVersion,
    file_iv: &Iv,
    group_key: &GroupKey,
    block: &[u8],
) -> CryptoResult<Vec<u8>> {
    match version {
        FormatVersion::V1 => encrypt_block(group_key.as_bytes(), file_iv, block),
        FormatVersion::V2 => {
            let iv = generate_iv();
            let ciphertext = encrypt_block(group_key.as_bytes(), &iv, block)?;
            let mut slot = Vec::with_capacity(IV_SIZE + ciphertext.len());
            slot.extend_from_slice(&iv);
            slot.extend_from_slice(&ciphertext);
            Ok(slot)
        }
    }
}

fn strip_layer(
    version: FormatVersion,
    file_iv: &Iv,
    group_key: &GroupKey,
    slot: &[u8],
) -> CryptoResult<Vec<u8>> {
    match version {
        FormatVersion::V1 => decrypt_block(group_key.as_bytes(), file_iv, slot),
        FormatVersion::V2 => {
            if slot.len() <= IV_SIZE {
                return Err(CryptoError::MalformedCiphertext(format!(
                    "super-block slot too short: {} bytes",
                    slot.len()
                )));
            }
            let (iv_bytes, ciphertext) = slot.split_at(IV_SIZE);
            let mut iv = [0u8; IV_SIZE];
            iv.copy_from_slice(iv_bytes);
            decrypt_block(group_key.as_bytes(), &iv, ciphertext)
        }
    }
}

fn check_positions(file: &CiphertextFile, positions: &[usize]) -> CryptoResult<()> {
    let n = file.block_count();
    for (i, &position) in positions.iter().enumerate() {
        if position >= n {
            return Err(CryptoError::InvalidParameter(format!(
                "super-block position {position} out of range for {n} blocks"
            )));
        }
        if positions[..i].contains(&position) {
            return Err(CryptoError::InvalidParameter(format!(
                "super-block position {position} listed twice"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Header;
    use crate::keys::generate_group_key;
    use crate::BLOCK_SIZE;

    fn sample_file(version: FormatVersion) -> CiphertextFile {
        let header = Header {
            version,
            plaintext_len: 5 * BLOCK_SIZE as u64,
            iv: [0x21; IV_SIZE],
        };
        CiphertextFile::new(header, (0u8..5).map(|i| vec![i; BLOCK_SIZE]).collect())
    }

    #[test]
    fn test_layer_unlayer_roundtrip() {
        for version in [FormatVersion::V1, FormatVersion::V2] {
            let original = sample_file(version);
            let gk = generate_group_key();

            let mut file = original.clone();
            layer_super_blocks(&mut file, &[1, 3], &gk).unwrap();
            assert_ne!(file.blocks[1], original.blocks[1]);
            assert_eq!(file.blocks[0], original.blocks[0]);

            unlayer_super_blocks(&mut file, &[1, 3], &gk).unwrap();
            assert_eq!(file, original);
        }
    }

    #[test]
    fn test_v2_slots_grow_by_iv() {
        let mut file = sample_file(FormatVersion::V2);
        layer_super_blocks(&mut file, &[2], &generate_group_key()).unwrap();
        assert_eq!(file.blocks[2].len(), BLOCK_SIZE + IV_SIZE);
        assert_eq!(file.blocks[1].len(), BLOCK_SIZE);
    }

    #[test]
    fn test_v1_shared_iv_repeats_pattern() {
        // Identical FK-layer blocks under the same GK and file IV encrypt identically
        let mut file = sample_file(FormatVersion::V1);
        file.blocks[4] = file.blocks[0].clone();
        layer_super_blocks(&mut file, &[0, 4], &generate_group_key()).unwrap();
        assert_eq!(file.blocks[0], file.blocks[4]);
    }

    #[test]
    fn test_v2_fresh_iv_hides_pattern() {
        let mut file = sample_file(FormatVersion::V2);
        file.blocks[4] = file.blocks[0].clone();
        layer_super_blocks(&mut file, &[0, 4], &generate_group_key()).unwrap();
        assert_ne!(file.blocks[0], file.blocks[4]);
    }

    #[test]
    fn test_rotation_touches_only_super_blocks() {
        for version in [FormatVersion::V1, FormatVersion::V2] {
            let gk1 = generate_group_key();
            let gk2 = generate_group_key();
            let mut file = sample_file(version);
            layer_super_blocks(&mut file, &[0, 4], &gk1).unwrap();
            let before = file.clone();

            let report = rotate_group_key(&gk1, &gk2, &mut file, &[0, 4]).unwrap();

            assert_eq!(report.touched, vec![0, 4]);
            for i in 1..4 {
                assert_eq!(file.blocks[i], before.blocks[i], "block {i} must not move");
            }
            assert_ne!(file.blocks[0], before.blocks[0]);
            assert_ne!(file.blocks[4], before.blocks[4]);

            unlayer_super_blocks(&mut file, &[0, 4], &gk2).unwrap();
            assert_eq!(file, sample_file(version));
        }
    }

    #[test]
    fn test_stale_key_does_not_unlayer() {
        let gk1 = generate_group_key();
        let gk2 = generate_group_key();
        let mut file = sample_file(FormatVersion::V2);
        layer_super_blocks(&mut file, &[2], &gk1).unwrap();
        rotate_group_key(&gk1, &gk2, &mut file, &[2]).unwrap();

        unlayer_super_blocks(&mut file, &[2], &gk1).unwrap();
        assert_ne!(file.blocks[2], sample_file(FormatVersion::V2).blocks[2]);
    }

    #[test]
    fn test_positions_validated() {
        let mut file = sample_file(FormatVersion::V1);
        let gk = generate_group_key();
        assert!(layer_super_blocks(&mut file, &[5], &gk).is_err());
        assert!(layer_super_blocks(&mut file, &[1, 1], &gk).is_err());
    }
}
