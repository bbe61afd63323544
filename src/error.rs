// Attestation error taxonomy
//
// Every variant is terminal for the attempted generation: nothing is emitted
// once a check fails, and callers retry with corrected witnesses.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    #[error("signature does not verify against the voter public key")]
    SignatureInvalid,

    #[error("vote vector malformed: {0}")]
    VoteMalformed(String),

    #[error("ciphertext in slot {slot} does not match the recomputed encryption")]
    EncryptionMismatch { slot: usize },

    #[error("whitelist inclusion path does not resolve to the claimed root")]
    EligibilityFailure,

    #[error("nullifier does not verify against the claimed key and message")]
    NullifierDerivationInvalid,

    #[error("nullifier key already marked used at the claimed old root")]
    NullifierReplay,

    #[error("nullifier witness does not correspond to the declared nullifier key or root")]
    NullifierWitnessMismatch,

    #[error("marking the nullifier used does not yield the declared new root")]
    NullifierAdvanceMismatch,

    #[error("chain continuity break: {0}")]
    ChainContinuityBreak(String),

    #[error("homomorphic tally advance mismatch in slot {slot}")]
    TallyAdvanceMismatch { slot: usize },

    #[error("value exceeds its {bits}-bit bound: {context}")]
    RangeOverflow { context: &'static str, bits: usize },

    #[error("base case changes {0}")]
    BaseCaseInvariantViolation(&'static str),

    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(String),

    #[error("consumed attestation rejected by the backend ({0})")]
    AttestationRejected(&'static str),

    #[error("invalid witness encoding: {0}")]
    InvalidWitness(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("attestation backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for AttestationError {
    fn from(err: serde_json::Error) -> Self {
        AttestationError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AttestationError>;
