use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures of the block encryption core.
///
/// There is no "wrong file key" variant: AONT key recovery cannot
/// tell a correct key from a wrong one, so a stale group key or a tampered block
/// surfaces as wrong plaintext (or as `Padding` on the final block).
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("padding error: {0}")]
    Padding(String),

    #[error("insufficient blocks: cannot select {requested} super-blocks from {available} blocks")]
    InsufficientBlocks { requested: usize, available: usize },

    #[error("session key unwrap failed: {0}")]
    Unwrap(String),

    #[error("malformed index: {0}")]
    MalformedIndex(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("unsupported container format version {0}")]
    UnsupportedFormat(u8),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("RSA error: {0}")]
    Rsa(String),

    #[error("bundle error: {0}")]
    Bundle(String),
}
