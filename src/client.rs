// Client-side witness preparation and tally decryption
//
// Everything here runs natively: it builds the witness bundles the entry
// points consume and decrypts a tally with the election's private key.

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::{CryptoRng, RngCore};
use tracing::debug;

use crate::aggregator::genesis_state;
use crate::attestation::{AggregatorState, Attestation, VoterState};
use crate::config::ProtocolConfig;
use crate::error::{AttestationError, Result};
use crate::merkle::{whitelist_leaf, WhitelistTree};
use crate::nullifier_map::NullifierMap;
use crate::paillier::{EncryptionKey, Keypair};
use crate::signature::SecretKey;
use crate::utils::{biguint_to_field, field_to_biguint, field_to_decimal, field_to_hex, fields_to_decimals};
use crate::witness::{
    AggregatorBaseWitness, AggregatorRecursiveWitness, AggregatorStateWitness,
    EncryptionKeyWitness, NullifierWitnessJson, PointWitness, SignatureWitness, VoterWitness,
};

/// Complete voter bundle for a ballot selecting option `choice`.
pub fn prepare_voter_witness<R: RngCore + CryptoRng>(
    config: &ProtocolConfig,
    key: &EncryptionKey,
    tree: &WhitelistTree,
    secret: &SecretKey,
    proposal_id: Fr,
    choice: usize,
    rng: &mut R,
) -> Result<VoterWitness> {
    if choice >= config.slots {
        return Err(AttestationError::VoteMalformed(format!(
            "choice {} outside {} options",
            choice, config.slots
        )));
    }
    let pk = secret.public_key();
    let leaf_index = tree.index_of(&whitelist_leaf(&pk)).ok_or(AttestationError::EligibilityFailure)?;

    let vote: Vec<BigUint> =
        (0..config.slots).map(|slot| BigUint::from(u32::from(slot == choice))).collect();
    let randomness: Vec<BigUint> = (0..config.slots).map(|_| key.sample_randomness(rng)).collect();
    let encrypted_vote = vote
        .iter()
        .zip(randomness.iter())
        .map(|(m, r)| biguint_to_field(&key.encrypt(m, r)))
        .collect::<Result<Vec<_>>>()?;
    let signature = secret.sign(proposal_id);

    Ok(VoterWitness {
        whitelist_root: field_to_decimal(&tree.root()),
        proposal_id: field_to_decimal(&proposal_id),
        encryption_key: EncryptionKeyWitness::from_fields(&key.to_fields()?),
        encrypted_vote: fields_to_decimals(&encrypted_vote),
        nullifier_key: field_to_decimal(&secret.nullifier_key(proposal_id)),
        vote: vote.iter().map(|v| v.to_string()).collect(),
        randomness: randomness.iter().map(|r| r.to_string()).collect(),
        voter_public_key: PointWitness::from_point(&pk),
        leaf_index: leaf_index as u64,
        whitelist_path: fields_to_decimals(&tree.path(leaf_index)?),
        signature: SignatureWitness {
            r: PointWitness::from_point(&signature.r),
            s: field_to_decimal(&signature.s),
        },
        voter_secret_key: field_to_decimal(&secret.to_field()),
    })
}

/// Base-case bundle: empty nullifier map and every slot at `encrypt(0, 1)`.
pub fn base_witness(
    config: &ProtocolConfig,
    key: &EncryptionKey,
    proposal_id: Fr,
    whitelist_root: Fr,
) -> Result<AggregatorBaseWitness> {
    let state = genesis_state(key.to_fields()?, proposal_id, whitelist_root, config.slots);
    Ok(AggregatorBaseWitness { state: AggregatorStateWitness::from_state(&state) })
}

/// Fold bundle for `voter_json` onto `prior_json`.
///
/// `map` must sit at the prior attestation's new root; on success the voter's
/// nullifier key is marked used in it.
pub fn prepare_fold_witness(
    config: &ProtocolConfig,
    prior_json: &str,
    voter_json: &str,
    map: &mut NullifierMap,
) -> Result<AggregatorRecursiveWitness> {
    let prior = AggregatorState::from_attestation(&Attestation::from_json(prior_json)?, config.slots)?;
    let voter = VoterState::from_attestation(&Attestation::from_json(voter_json)?, config.slots)?;

    let old_root = map.root();
    if old_root != prior.new_nullifier_root {
        return Err(AttestationError::ChainContinuityBreak(format!(
            "local nullifier map is at {}, prior attestation ends at {}",
            field_to_hex(&old_root),
            field_to_hex(&prior.new_nullifier_root)
        )));
    }

    let key = EncryptionKey::from_fields(&prior.key[0], &prior.key[1], &prior.key[2]);
    let new_tally = prior
        .new_tally
        .iter()
        .zip(voter.encrypted_vote.iter())
        .map(|(tally, ballot)| {
            biguint_to_field(&key.add(&field_to_biguint(tally), &field_to_biguint(ballot)))
        })
        .collect::<Result<Vec<_>>>()?;

    let nullifier_witness = map.set_used(&voter.nullifier_key)?;
    debug!(new_root = %field_to_hex(&map.root()), "fold witness prepared");

    let state = AggregatorState {
        old_nullifier_root: old_root,
        new_nullifier_root: map.root(),
        old_tally: prior.new_tally.clone(),
        new_tally,
        ..prior
    };
    Ok(AggregatorRecursiveWitness {
        state: AggregatorStateWitness::from_state(&state),
        prior_attestation: prior_json.to_string(),
        voter_attestation: voter_json.to_string(),
        nullifier_witness: NullifierWitnessJson::from_witness(&nullifier_witness),
    })
}

/// Plaintext counts behind an aggregator attestation's `newTally`.
pub fn decrypt_tally(config: &ProtocolConfig, keypair: &Keypair, attestation_json: &str) -> Result<Vec<u64>> {
    let state = AggregatorState::from_attestation(&Attestation::from_json(attestation_json)?, config.slots)?;
    state
        .new_tally
        .iter()
        .enumerate()
        .map(|(slot, cipher)| {
            keypair.decrypt(&field_to_biguint(cipher))?.to_u64().ok_or_else(|| {
                AttestationError::InvalidWitness(format!("slot {} decrypts beyond u64", slot))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_voter_witness_is_consistent() {
        let config = ProtocolConfig { slots: 3, whitelist_depth: 4, ..ProtocolConfig::default() };
        let mut rng = StdRng::seed_from_u64(3);
        let keypair = Keypair::from_primes(2147483647, 2147483629).unwrap();
        let secret = SecretKey::generate(&mut rng);
        let tree = WhitelistTree::new(&[Fr::from(9), whitelist_leaf(&secret.public_key())], 4).unwrap();

        let witness =
            prepare_voter_witness(&config, &keypair.public, &tree, &secret, Fr::from(8), 2, &mut rng)
                .unwrap();
        assert_eq!(witness.leaf_index, 1);
        assert_eq!(witness.vote, vec!["0", "0", "1"]);
        let circuit = witness.to_circuit(&config).unwrap();
        assert!(circuit.validate(&config).is_ok());
        let decrypted: Vec<BigUint> = circuit
            .state
            .encrypted_vote
            .iter()
            .map(|c| keypair.decrypt(&field_to_biguint(c)).unwrap())
            .collect();
        assert_eq!(decrypted, vec![BigUint::from(0u32), BigUint::from(0u32), BigUint::from(1u32)]);
    }

    #[test]
    fn test_unlisted_voter_and_bad_choice() {
        let config = ProtocolConfig { slots: 3, whitelist_depth: 4, ..ProtocolConfig::default() };
        let mut rng = StdRng::seed_from_u64(4);
        let keypair = Keypair::from_primes(2147483647, 2147483629).unwrap();
        let secret = SecretKey::generate(&mut rng);
        let tree = WhitelistTree::new(&[Fr::from(9)], 4).unwrap();

        let unlisted =
            prepare_voter_witness(&config, &keypair.public, &tree, &secret, Fr::from(8), 0, &mut rng);
        assert_eq!(unlisted.err(), Some(AttestationError::EligibilityFailure));

        let tree = WhitelistTree::new(&[whitelist_leaf(&secret.public_key())], 4).unwrap();
        let out_of_range =
            prepare_voter_witness(&config, &keypair.public, &tree, &secret, Fr::from(8), 3, &mut rng);
        assert!(matches!(out_of_range, Err(AttestationError::VoteMalformed(_))));
    }

    #[test]
    fn test_base_witness_tallies_decrypt_to_zero() {
        let config = ProtocolConfig { slots: 2, ..ProtocolConfig::default() };
        let keypair = Keypair::from_primes(2147483647, 2147483629).unwrap();
        let witness = base_witness(&config, &keypair.public, Fr::from(1), Fr::from(2)).unwrap();
        let state = witness.state.parse(2).unwrap();
        assert_eq!(state.old_nullifier_root, state.new_nullifier_root);
        for tally in &state.new_tally {
            assert_eq!(keypair.decrypt(&field_to_biguint(tally)).unwrap(), BigUint::from(0u32));
        }
    }
}
