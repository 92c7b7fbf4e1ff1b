//! knob-crypto: revocable block encryption for shared files
//!
//! Architecture: Encrypt-then-Bind with AES-256-CBC and a super-block layer
//!
//! Pipeline: plaintext → CBC under FK → SHA-256 XOR fold (metaFK) → GK layer on
//! super-blocks → index under SK (metaIndex) → SK under custodian RSA (metaSGX)
//!
//! Key hierarchy:
//! ```text
//! Custodian RSA key pair (external trust anchor)
//!   └── Session Key (per file, 256-bit random, RSA-OAEP wrapped → metaSGX)
//!       └── Super-block index: AES-256-CBC (key=SK, iv=random, per-block '0'/'1')
//! Group Key (shared by authorized principals, rotated on revocation)
//!   └── Super-block layer: AES-256-CBC over the FK-layer block
//! File Key (per file, 256-bit random, never stored)
//!   └── Whole file: AES-256-CBC chain (key=FK, iv=file IV), recoverable via metaFK
//! ```
//!
//! Revoking a principal rotates GK and rewrites only the super-blocks. Because
//! FK is bound to the hash of every layer-1 block, a reader without the
//! current GK cannot rebuild FK and gets no part of the file.

pub mod aont;
pub mod block;
pub mod bundle;
pub mod error;
pub mod format;
pub mod group;
pub mod index;
pub mod keys;
pub mod pipeline;
pub mod wrap;

pub use aont::{compute_binding, recover_key, MetaFk};
pub use block::{
    decrypt_blocks, decrypt_with_embedded_iv, decrypt_with_external_iv, encrypt_blocks,
    encrypt_with_embedded_iv, Iv,
};
pub use bundle::MetadataBundle;
pub use error::{CryptoError, CryptoResult};
pub use format::{CiphertextFile, FormatVersion, Header};
pub use group::{layer_super_blocks, rotate_group_key, unlayer_super_blocks, RotationReport};
pub use index::{decrypt_index, encrypt_index, select_super_blocks, Index};
pub use keys::{generate_file_key, generate_group_key, generate_session_key, FileKey, GroupKey, SessionKey};
pub use pipeline::{decrypt, encrypt, open_session_key, revoke, EncryptOptions, Revoked, Sealed, Stage};
pub use wrap::{unwrap_session_key, wrap_session_key, CustodianPrivateKey, CustodianPublicKey};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a file block in bytes. Only the final block may be shorter.
pub const BLOCK_SIZE: usize = 1024;

/// Size of a CBC initialization vector
pub const IV_SIZE: usize = 16;

/// AES internal block size; padded lengths are multiples of this
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Super-blocks selected per file unless configured otherwise
pub const DEFAULT_SUPER_BLOCKS: usize = 2;
