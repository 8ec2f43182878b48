//! Unified error types for envelope packing and unpacking.

use thiserror::Error;

/// Every failure surfaced by `pack` / `unpack`.
///
/// Messages never carry key material, derived secrets or plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("no recipients given")]
    NoRecipients,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("no recognized recipient")]
    NoRecognizedRecipient,
    #[error("sender key not found: {0}")]
    SenderKeyNotFound(String),
    #[error("sender key identifier mismatch (apu/skid)")]
    ApuSkidMismatch,
    /// Unwrap, agreement and AEAD failures all map here.
    #[error("key agreement failed")]
    KeyAgreementFailure,
    #[error("key store error: {0}")]
    KeyStore(String),
}

pub(crate) fn invalid(msg: impl Into<String>) -> EnvelopeError {
    EnvelopeError::InvalidEnvelope(msg.into())
}

impl EnvelopeError {
    /// Short stable name, used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoRecipients => "no_recipients",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::InvalidEnvelope(_) => "invalid_envelope",
            Self::NoRecognizedRecipient => "no_recognized_recipient",
            Self::SenderKeyNotFound(_) => "sender_key_not_found",
            Self::ApuSkidMismatch => "apu_skid_mismatch",
            Self::KeyAgreementFailure => "key_agreement_failure",
            Self::KeyStore(_) => "key_store",
        }
    }
}

/// Primitive-level failure from a key backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("unsupported key algorithm")]
    Unsupported,
    #[error("invalid key material")]
    InvalidKey,
    #[error("incompatible keys")]
    Incompatible,
    #[error("random number generation failed")]
    Random,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
}

/// Normalize primitive errors into one opaque kind (oracle discipline).
impl From<KeyError> for EnvelopeError {
    fn from(_: KeyError) -> Self {
        EnvelopeError::KeyAgreementFailure
    }
}

/// Failure inside a [`KeyStore`](crate::store::KeyStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid key {kid}: {source}")]
    InvalidKey { kid: String, source: KeyError },
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("lock poisoned")]
    Poisoned,
}

impl From<StoreError> for EnvelopeError {
    fn from(e: StoreError) -> Self {
        EnvelopeError::KeyStore(e.to_string())
    }
}
