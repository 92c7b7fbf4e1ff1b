//! Versioned ciphertext container
//!
//! ```text
//! [4 bytes: magic "KNOB"][1 byte: format version][3 bytes: zero]
//! [8 bytes: plaintext length, big-endian][16 bytes: file IV]
//! [Block 0][Block 1]…[Block N-1]
//! ```
//!
//! Format versions differ only in how a super-block slot is stored:
//! - `V1`: `CBC(GK, file_iv, block)`, same length as the FK-layer block. The
//!   group-key layer reuses the file IV for every super-block.
//! - `V2`: `[16-byte IV][CBC(GK, IV, block)]` with a fresh IV per super-block
//!   and per rotation.
//!
//! Slot boundaries follow from the header and the super-block index, so a
//! container can only be split into blocks once its index is known.

use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::block::{self, Iv};
use crate::error::{CryptoError, CryptoResult};
use crate::index::Index;
use crate::{BLOCK_SIZE, IV_SIZE};

pub const MAGIC: [u8; 4] = *b"KNOB";

/// Size of the fixed container header
pub const HEADER_SIZE: usize = 32;

/// Container format version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Group-key layer reuses the file IV
    V1,
    /// Group-key layer uses a fresh IV stored in front of each super-block
    #[default]
    V2,
}

impl FormatVersion {
    pub fn as_byte(self) -> u8 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }

    pub fn from_byte(byte: u8) -> CryptoResult<Self> {
        match byte {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            other => Err(CryptoError::UnsupportedFormat(other)),
        }
    }

    /// Extra bytes a super-block slot carries over its FK-layer block.
    pub fn super_block_overhead(self) -> usize {
        match self {
            FormatVersion::V1 => 0,
            FormatVersion::V2 => IV_SIZE,
        }
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatVersion::V1 => f.write_str("v1"),
            FormatVersion::V2 => f.write_str("v2"),
        }
    }
}

impl FromStr for FormatVersion {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" | "1" => Ok(FormatVersion::V1),
            "v2" | "2" => Ok(FormatVersion::V2),
            other => Err(CryptoError::InvalidParameter(format!(
                "unknown format version '{other}' (expected v1 or v2)"
            ))),
        }
    }
}

/// Fixed-size container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: FormatVersion,
    pub plaintext_len: u64,
    pub iv: Iv,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&MAGIC);
        out[4] = self.version.as_byte();
        out[8..16].copy_from_slice(&self.plaintext_len.to_be_bytes());
        out[16..].copy_from_slice(&self.iv);
        out
    }

    pub fn parse(data: &[u8]) -> CryptoResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "container too short for header: {} bytes",
                data.len()
            )));
        }
        if data[..4] != MAGIC {
            return Err(CryptoError::MalformedCiphertext("bad magic".into()));
        }
        let version = FormatVersion::from_byte(data[4])?;
        if data[5..8] != [0u8; 3] {
            return Err(CryptoError::MalformedCiphertext("reserved header bytes set".into()));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[8..16]);
        let plaintext_len = u64::from_be_bytes(len_bytes);
        block::padded_len(plaintext_len)?;
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&data[16..HEADER_SIZE]);

        Ok(Self {
            version,
            plaintext_len,
            iv,
        })
    }

    /// Number of blocks in the container.
    pub fn block_count(&self) -> CryptoResult<usize> {
        to_usize(block::block_count(self.plaintext_len)?)
    }

    /// Length of the FK-layer ciphertext.
    pub fn layer1_len(&self) -> CryptoResult<usize> {
        to_usize(block::padded_len(self.plaintext_len)?)
    }

    /// FK-layer length of the block at `position`.
    pub fn layer1_block_len(&self, position: usize) -> CryptoResult<usize> {
        let layer1 = self.layer1_len()?;
        let start = position.saturating_mul(BLOCK_SIZE);
        if start >= layer1 {
            return Err(CryptoError::MalformedCiphertext(format!(
                "block {position} beyond end of container"
            )));
        }
        Ok((layer1 - start).min(BLOCK_SIZE))
    }

    /// Byte range of every stored block slot, relative to the container start.
    pub fn slot_ranges(&self, index: &Index) -> CryptoResult<Vec<Range<usize>>> {
        let n = self.block_count()?;
        if index.len() != n {
            return Err(CryptoError::MalformedIndex(format!(
                "index covers {} blocks, container has {n}",
                index.len()
            )));
        }

        let overhead = self.version.super_block_overhead();
        let mut offset = HEADER_SIZE;
        let mut ranges = Vec::with_capacity(n);
        for position in 0..n {
            let mut len = self.layer1_block_len(position)?;
            if index.is_super(position) {
                len += overhead;
            }
            ranges.push(offset..offset + len);
            offset += len;
        }
        Ok(ranges)
    }

    /// Total container size for the given number of super-blocks.
    pub fn container_len(&self, super_blocks: usize) -> CryptoResult<usize> {
        let layer1 = self.layer1_len()?;
        super_blocks
            .checked_mul(self.version.super_block_overhead())
            .and_then(|overhead| overhead.checked_add(layer1))
            .and_then(|body| body.checked_add(HEADER_SIZE))
            .ok_or_else(|| CryptoError::MalformedCiphertext("container length overflows".into()))
    }
}

/// A container split into its stored block slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextFile {
    pub header: Header,
    pub blocks: Vec<Vec<u8>>,
}

impl CiphertextFile {
    pub fn new(header: Header, blocks: Vec<Vec<u8>>) -> Self {
        Self { header, blocks }
    }

    /// Split `data` into slots using the super-block `index`.
    pub fn parse(data: &[u8], index: &Index) -> CryptoResult<Self> {
        let header = Header::parse(data)?;
        let expected = header.container_len(index.super_block_count())?;
        if data.len() != expected {
            return Err(CryptoError::MalformedCiphertext(format!(
                "container is {} bytes, header and index imply {expected}",
                data.len()
            )));
        }

        let blocks = header
            .slot_ranges(index)?
            .into_iter()
            .map(|range| data[range].to_vec())
            .collect();
        Ok(Self { header, blocks })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body: usize = self.blocks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(HEADER_SIZE + body);
        out.extend_from_slice(&self.header.to_bytes());
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

fn to_usize(value: u64) -> CryptoResult<usize> {
    usize::try_from(value)
        .map_err(|_| CryptoError::MalformedCiphertext(format!("length {value} exceeds address space")))
}
