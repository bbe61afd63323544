// Entry points and their string-encoded witness bundles
//
// Every field value crosses this boundary as a decimal string. Each bundle is
// the public input of the attestation it requests plus its private witnesses;
// attestations travel as the JSON produced by `Attestation::to_json`.

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::aggregator::{AggregatorBaseCircuit, AggregatorRecursiveCircuit};
use crate::attestation::{AggregatorState, Attestation, VoterState};
use crate::babyjub::Point;
use crate::backend::AttestationBackend;
use crate::config::{ProtocolConfig, ProvingContext};
use crate::error::{AttestationError, Result};
use crate::nullifier_map::{NullifierWitness, MAP_DEPTH};
use crate::signature::Signature;
use crate::utils::{decimal_to_field, decimals_to_fields, field_to_decimal, field_to_hex, fields_to_decimals};
use crate::voter::VoterCircuit;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeyWitness {
    pub n: String,
    pub g: String,
    pub n_squared: String,
}

impl EncryptionKeyWitness {
    pub fn from_fields(key: &[Fr; 3]) -> Self {
        Self {
            n: field_to_decimal(&key[0]),
            g: field_to_decimal(&key[1]),
            n_squared: field_to_decimal(&key[2]),
        }
    }

    fn parse(&self) -> Result<[Fr; 3]> {
        Ok([
            decimal_to_field(&self.n)?,
            decimal_to_field(&self.g)?,
            decimal_to_field(&self.n_squared)?,
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointWitness {
    pub x: String,
    pub y: String,
}

impl PointWitness {
    pub fn from_point(point: &Point) -> Self {
        Self { x: field_to_decimal(&point.x), y: field_to_decimal(&point.y) }
    }

    fn parse(&self) -> Result<Point> {
        Ok(Point { x: decimal_to_field(&self.x)?, y: decimal_to_field(&self.y)? })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureWitness {
    pub r: PointWitness,
    pub s: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterWitness {
    // Public input
    pub whitelist_root: String,
    pub proposal_id: String,
    pub encryption_key: EncryptionKeyWitness,
    pub encrypted_vote: Vec<String>,
    pub nullifier_key: String,

    // Private
    pub vote: Vec<String>,
    pub randomness: Vec<String>,
    pub voter_public_key: PointWitness,
    pub leaf_index: u64,
    pub whitelist_path: Vec<String>,
    pub signature: SignatureWitness,
    pub voter_secret_key: String,
}

impl VoterWitness {
    pub fn to_circuit(&self, config: &ProtocolConfig) -> Result<VoterCircuit> {
        Ok(VoterCircuit {
            state: VoterState {
                whitelist_root: decimal_to_field(&self.whitelist_root)?,
                proposal_id: decimal_to_field(&self.proposal_id)?,
                key: self.encryption_key.parse()?,
                encrypted_vote: decimals_to_fields(&self.encrypted_vote, config.slots, "encryptedVote")?,
                nullifier_key: decimal_to_field(&self.nullifier_key)?,
            },
            // Length mismatches surface as VoteMalformed in `validate`
            vote: decimals_to_fields(&self.vote, self.vote.len(), "vote")?,
            randomness: decimals_to_fields(&self.randomness, config.slots, "randomness")?,
            voter_public_key: self.voter_public_key.parse()?,
            leaf_index: self.leaf_index,
            whitelist_path: decimals_to_fields(
                &self.whitelist_path,
                config.whitelist_depth,
                "whitelistPath",
            )?,
            signature: Signature {
                r: self.signature.r.parse()?,
                s: decimal_to_field(&self.signature.s)?,
            },
            secret_key: decimal_to_field(&self.voter_secret_key)?,
        })
    }
}

/// AggregatorState fields shared by the base and recursive bundles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStateWitness {
    pub encryption_key: EncryptionKeyWitness,
    pub proposal_id: String,
    pub whitelist_root: String,
    pub old_nullifier_root: String,
    pub new_nullifier_root: String,
    pub old_tally: Vec<String>,
    pub new_tally: Vec<String>,
}

impl AggregatorStateWitness {
    pub fn from_state(state: &AggregatorState) -> Self {
        Self {
            encryption_key: EncryptionKeyWitness::from_fields(&state.key),
            proposal_id: field_to_decimal(&state.proposal_id),
            whitelist_root: field_to_decimal(&state.whitelist_root),
            old_nullifier_root: field_to_decimal(&state.old_nullifier_root),
            new_nullifier_root: field_to_decimal(&state.new_nullifier_root),
            old_tally: fields_to_decimals(&state.old_tally),
            new_tally: fields_to_decimals(&state.new_tally),
        }
    }

    pub fn parse(&self, slots: usize) -> Result<AggregatorState> {
        Ok(AggregatorState {
            key: self.encryption_key.parse()?,
            proposal_id: decimal_to_field(&self.proposal_id)?,
            whitelist_root: decimal_to_field(&self.whitelist_root)?,
            old_nullifier_root: decimal_to_field(&self.old_nullifier_root)?,
            new_nullifier_root: decimal_to_field(&self.new_nullifier_root)?,
            old_tally: decimals_to_fields(&self.old_tally, slots, "oldTally")?,
            new_tally: decimals_to_fields(&self.new_tally, slots, "newTally")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorBaseWitness {
    #[serde(flatten)]
    pub state: AggregatorStateWitness,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NullifierWitnessJson {
    pub key: String,
    pub siblings: Vec<String>,
}

impl NullifierWitnessJson {
    pub fn from_witness(witness: &NullifierWitness) -> Self {
        Self { key: field_to_decimal(&witness.key), siblings: fields_to_decimals(&witness.siblings) }
    }

    fn parse(&self) -> Result<NullifierWitness> {
        Ok(NullifierWitness {
            key: decimal_to_field(&self.key)?,
            siblings: decimals_to_fields(&self.siblings, MAP_DEPTH, "nullifier siblings")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorRecursiveWitness {
    #[serde(flatten)]
    pub state: AggregatorStateWitness,
    pub prior_attestation: String,
    pub voter_attestation: String,
    pub nullifier_witness: NullifierWitnessJson,
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

pub fn generate_voter_attestation<B: AttestationBackend>(
    ctx: &ProvingContext<B>,
    witness: &VoterWitness,
) -> Result<String> {
    let circuit = witness.to_circuit(&ctx.config)?;
    circuit.validate(&ctx.config)?;

    let _span = info_span!("voter", proposal = %field_to_hex(&circuit.state.proposal_id)).entered();
    let attestation = ctx.backend.generate(&ctx.config, &circuit)?;
    info!(nullifier_key = %field_to_hex(&circuit.state.nullifier_key), "voter attestation ready");
    attestation.to_json()
}

pub fn generate_aggregator_base_attestation<B: AttestationBackend>(
    ctx: &ProvingContext<B>,
    witness: &AggregatorBaseWitness,
) -> Result<String> {
    let circuit = AggregatorBaseCircuit { state: witness.state.parse(ctx.config.slots)? };
    circuit.validate(&ctx.config)?;

    let _span = info_span!("aggregator_base", proposal = %field_to_hex(&circuit.state.proposal_id)).entered();
    let attestation = ctx.backend.generate(&ctx.config, &circuit)?;
    info!("base attestation ready");
    attestation.to_json()
}

pub fn generate_aggregator_recursive_attestation<B: AttestationBackend>(
    ctx: &ProvingContext<B>,
    witness: &AggregatorRecursiveWitness,
) -> Result<String> {
    let slots = ctx.config.slots;
    let prior = Attestation::from_json(&witness.prior_attestation)?;
    let voter = Attestation::from_json(&witness.voter_attestation)?;
    let prior_state = AggregatorState::from_attestation(&prior, slots)?;
    let voter_state = VoterState::from_attestation(&voter, slots)?;

    // Nothing from a consumed attestation is trusted before it verifies
    if !ctx.backend.verify(&ctx.config, &prior)? {
        return Err(AttestationError::AttestationRejected("prior aggregator attestation"));
    }
    if !ctx.backend.verify(&ctx.config, &voter)? {
        return Err(AttestationError::AttestationRejected("voter attestation"));
    }

    let circuit = AggregatorRecursiveCircuit {
        state: witness.state.parse(slots)?,
        prior: prior_state,
        voter: voter_state,
        nullifier_witness: witness.nullifier_witness.parse()?,
    };
    circuit.validate(&ctx.config)?;

    let _span = info_span!(
        "aggregator_fold",
        proposal = %field_to_hex(&circuit.state.proposal_id),
        old_root = %field_to_hex(&circuit.state.old_nullifier_root),
    )
    .entered();
    let attestation = ctx.backend.generate(&ctx.config, &circuit)?;
    info!(new_root = %field_to_hex(&circuit.state.new_nullifier_root), "fold attestation ready");
    attestation.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state_witness() -> AggregatorStateWitness {
        AggregatorStateWitness {
            encryption_key: EncryptionKeyWitness { n: "3".into(), g: "4".into(), n_squared: "9".into() },
            proposal_id: "1".into(),
            whitelist_root: "2".into(),
            old_nullifier_root: "3".into(),
            new_nullifier_root: "3".into(),
            old_tally: vec!["1".into(), "1".into()],
            new_tally: vec!["1".into(), "1".into()],
        }
    }

    #[test]
    fn test_state_witness_parses_and_checks_slots() {
        let witness = sample_state_witness();
        let state = witness.parse(2).unwrap();
        assert_eq!(state.key, [Fr::from(3), Fr::from(4), Fr::from(9)]);
        assert_eq!(AggregatorStateWitness::from_state(&state), witness);
        assert!(matches!(witness.parse(3), Err(AttestationError::InvalidWitness(_))));
    }

    #[test]
    fn test_bundle_json_is_camel_case_and_flat() {
        let bundle = AggregatorBaseWitness { state: sample_state_witness() };
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["oldNullifierRoot"], "3");
        assert_eq!(json["encryptionKey"]["nSquared"], "9");
        let back: AggregatorBaseWitness = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn test_rejects_non_decimal_values() {
        let mut witness = sample_state_witness();
        witness.proposal_id = "0x01".into();
        assert!(matches!(witness.parse(2), Err(AttestationError::InvalidWitness(_))));
    }
}
