//! Crypto error types.

/// Errors from signature verification and revocation checking.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The signatures record is missing a required field.
    #[error("signatures record missing field: {0}")]
    MissingField(&'static str),

    /// The record names an algorithm other than ed25519.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The record's key id does not match the server's current key.
    /// The operator should re-fetch the package.
    #[error("key id mismatch: signatures use '{record}', server key is '{server}'")]
    KeyIdMismatch {
        /// Key id named in the signatures record.
        record: String,
        /// The server's current key id.
        server: String,
    },

    /// The served public key failed to decode.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The manifest signature did not verify.
    #[error("manifest signature mismatch")]
    ManifestSignatureMismatch,

    /// The binary signature did not verify.
    #[error("binary signature mismatch")]
    BinarySignatureMismatch,

    /// The binary's SHA-256 digest does not match the signed digest.
    #[error("binary tampered: expected sha256 {expected}, got {actual}")]
    BinaryTampered {
        /// Digest stored in the signatures record.
        expected: String,
        /// Digest computed over the on-disk binary.
        actual: String,
    },

    /// Base64 decoding failed.
    #[error("base64 decode error in {field}: {message}")]
    Base64 {
        /// The field being decoded.
        field: &'static str,
        /// Decoder message.
        message: String,
    },

    /// The upstream key or revocation fetch failed.
    #[error("upstream fetch failed: {0}")]
    Fetch(String),

    /// The upstream response failed to parse.
    #[error("upstream response malformed: {0}")]
    MalformedResponse(String),

    /// I/O error reading package files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CryptoError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
