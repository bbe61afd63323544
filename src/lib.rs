// Ballot aggregation circuits
// Paillier-encrypted ballots, whitelist membership and a nullifier-guarded
// tally chain on Axiom halo2_base

pub mod error;
pub mod utils;
pub mod config;

pub mod constraints; // Typed-failure enforcer and bit decomposition helpers
pub mod poseidon_hash; // Axiom halo2_base Poseidon
pub mod arithmetic; // Bounded modular arithmetic over 126-bit moduli
pub mod paillier;
pub mod babyjub;
pub mod merkle; // Whitelist inclusion
pub mod signature;
pub mod nullifier_map;

pub mod attestation;
pub mod circuit;
pub mod voter;
pub mod aggregator;

pub mod backend;
pub mod prover;
pub mod witness;
pub mod client;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use attestation::{Attestation, CircuitKind, TallyChain};
pub use backend::{AttestationBackend, MockBackend};
pub use config::{ProtocolConfig, ProvingContext};
pub use error::{AttestationError, Result};
pub use prover::KzgBackend;
pub use witness::{
    generate_aggregator_base_attestation, generate_aggregator_recursive_attestation,
    generate_voter_attestation,
};

// Re-export Axiom stack
pub use halo2_base;
