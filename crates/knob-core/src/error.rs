use thiserror::Error;

pub type KnobResult<T> = Result<T, KnobError>;

#[derive(Debug, Error)]
pub enum KnobError {
    #[error("crypto error: {0}")]
    Crypto(#[from] knob_crypto::CryptoError),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use knob_crypto::CryptoError;

    #[test]
    fn test_crypto_error_keeps_its_variant() {
        let err: KnobError = CryptoError::Padding("bad tail".into()).into();
        assert!(matches!(err, KnobError::Crypto(CryptoError::Padding(_))));
        assert_eq!(err.to_string(), "crypto error: padding error: bad tail");
    }

    #[test]
    fn test_crypto_error_survives_anyhow() {
        let err = anyhow::Error::from(KnobError::from(CryptoError::Unwrap("wrong key".into())));
        assert!(matches!(
            err.downcast_ref::<KnobError>(),
            Some(KnobError::Crypto(CryptoError::Unwrap(_)))
        ));
    }
}
