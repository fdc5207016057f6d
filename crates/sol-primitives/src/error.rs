use thiserror::Error;

/// Errors raised by the ledger primitives.
#[derive(Debug, Error)]
pub enum SolError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid seeds: {0}")]
    InvalidSeeds(String),

    #[error("no viable bump seed found for program address")]
    DerivationExhausted,

    #[error("invalid account data: {0}")]
    InvalidAccountData(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_private_key() {
        let err = SolError::InvalidPrivateKey("key file holds 63 bytes".into());
        assert_eq!(err.to_string(), "invalid private key: key file holds 63 bytes");
    }

    #[test]
    fn display_invalid_seeds() {
        let err = SolError::InvalidSeeds("seed 2 is 40 bytes".into());
        assert_eq!(err.to_string(), "invalid seeds: seed 2 is 40 bytes");
    }

    #[test]
    fn display_derivation_exhausted() {
        let err = SolError::DerivationExhausted;
        assert_eq!(
            err.to_string(),
            "no viable bump seed found for program address"
        );
    }

    #[test]
    fn display_invalid_account_data() {
        let err = SolError::InvalidAccountData("expected 165 bytes, got 82".into());
        assert_eq!(
            err.to_string(),
            "invalid account data: expected 165 bytes, got 82"
        );
    }

    #[test]
    fn display_signing_error() {
        let err = SolError::SigningError("missing signer".into());
        assert_eq!(err.to_string(), "signing error: missing signer");
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> = Box::new(SolError::InvalidAddress("test".into()));
        assert!(err.to_string().contains("test"));
    }
}
