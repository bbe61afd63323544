// Attestation records, their public-input views and the tally chain
//
// An attestation is immutable once produced: a circuit kind, the public inputs
// it binds and the backend's proof bytes. The JSON form (decimal public inputs,
// hex proof) is the opaque string handed across the entry points.

use std::collections::HashSet;

use halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::AttestationBackend;
use crate::config::ProtocolConfig;
use crate::error::{AttestationError, Result};
use crate::nullifier_map::empty_root;
use crate::paillier::EncryptionKey;
use crate::utils::{biguint_to_field, decimals_to_fields, field_to_biguint, field_to_hex, fields_to_decimals};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    Voter,
    AggregatorBase,
    AggregatorRecursive,
}

impl CircuitKind {
    pub fn tag(&self) -> u8 {
        match self {
            CircuitKind::Voter => 0,
            CircuitKind::AggregatorBase => 1,
            CircuitKind::AggregatorRecursive => 2,
        }
    }

    pub fn is_aggregator(&self) -> bool {
        !matches!(self, CircuitKind::Voter)
    }

    /// Public input count for `slots` ballot options
    pub fn instance_len(&self, slots: usize) -> usize {
        match self {
            CircuitKind::Voter => VoterState::len(slots),
            CircuitKind::AggregatorBase => AggregatorState::len(slots),
            CircuitKind::AggregatorRecursive => AggregatorState::len(slots) + ConsumedBallot::len(slots),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attestation {
    pub kind: CircuitKind,
    pub public_inputs: Vec<Fr>,
    pub proof: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAttestation {
    pub kind: CircuitKind,
    pub public_inputs: Vec<String>,
    pub proof: String,
}

impl Attestation {
    pub fn to_json(&self) -> Result<String> {
        let serialized = SerializedAttestation {
            kind: self.kind,
            public_inputs: fields_to_decimals(&self.public_inputs),
            proof: hex::encode(&self.proof),
        };
        Ok(serde_json::to_string(&serialized)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let serialized: SerializedAttestation = serde_json::from_str(json)?;
        let count = serialized.public_inputs.len();
        Ok(Self {
            kind: serialized.kind,
            public_inputs: decimals_to_fields(&serialized.public_inputs, count, "public input")?,
            proof: hex::decode(serialized.proof.trim_start_matches("0x"))
                .map_err(|e| AttestationError::Serialization(format!("proof hex: {}", e)))?,
        })
    }
}

/// Public inputs of a voter attestation.
///
/// Instance layout: `[whitelistRoot, proposalId, n, g, n_squared, encryptedVote[k], nullifierKey]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoterState {
    pub whitelist_root: Fr,
    pub proposal_id: Fr,
    pub key: [Fr; 3],
    pub encrypted_vote: Vec<Fr>,
    pub nullifier_key: Fr,
}

impl VoterState {
    pub fn len(slots: usize) -> usize {
        slots + 6
    }

    pub fn to_instances(&self) -> Vec<Fr> {
        let mut out = vec![self.whitelist_root, self.proposal_id];
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.encrypted_vote);
        out.push(self.nullifier_key);
        out
    }

    pub fn from_instances(instances: &[Fr], slots: usize) -> Result<Self> {
        check_len(instances, Self::len(slots), "voter")?;
        Ok(Self {
            whitelist_root: instances[0],
            proposal_id: instances[1],
            key: [instances[2], instances[3], instances[4]],
            encrypted_vote: instances[5..5 + slots].to_vec(),
            nullifier_key: instances[5 + slots],
        })
    }

    pub fn from_attestation(attestation: &Attestation, slots: usize) -> Result<Self> {
        if attestation.kind != CircuitKind::Voter {
            return Err(AttestationError::InvalidWitness(format!(
                "expected a voter attestation, got {:?}",
                attestation.kind
            )));
        }
        Self::from_instances(&attestation.public_inputs, slots)
    }

    /// First election field on which this ballot differs from `state`.
    pub fn election_mismatch(&self, state: &AggregatorState) -> Option<&'static str> {
        if self.key != state.key {
            Some("encryption key")
        } else if self.proposal_id != state.proposal_id {
            Some("proposal id")
        } else if self.whitelist_root != state.whitelist_root {
            Some("whitelist root")
        } else {
            None
        }
    }
}

/// Public inputs of an aggregator attestation (base or recursive).
///
/// Instance layout: `[n, g, n_squared, proposalId, whitelistRoot, oldNullifierRoot,
/// newNullifierRoot, oldTally[k], newTally[k]]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorState {
    pub key: [Fr; 3],
    pub proposal_id: Fr,
    pub whitelist_root: Fr,
    pub old_nullifier_root: Fr,
    pub new_nullifier_root: Fr,
    pub old_tally: Vec<Fr>,
    pub new_tally: Vec<Fr>,
}

impl AggregatorState {
    pub fn len(slots: usize) -> usize {
        2 * slots + 7
    }

    pub fn to_instances(&self) -> Vec<Fr> {
        let mut out = self.key.to_vec();
        out.extend_from_slice(&[
            self.proposal_id,
            self.whitelist_root,
            self.old_nullifier_root,
            self.new_nullifier_root,
        ]);
        out.extend_from_slice(&self.old_tally);
        out.extend_from_slice(&self.new_tally);
        out
    }

    pub fn from_instances(instances: &[Fr], slots: usize) -> Result<Self> {
        check_len(instances, Self::len(slots), "aggregator")?;
        Ok(Self {
            key: [instances[0], instances[1], instances[2]],
            proposal_id: instances[3],
            whitelist_root: instances[4],
            old_nullifier_root: instances[5],
            new_nullifier_root: instances[6],
            old_tally: instances[7..7 + slots].to_vec(),
            new_tally: instances[7 + slots..7 + 2 * slots].to_vec(),
        })
    }

    /// State prefix of a base or recursive attestation.
    pub fn from_attestation(attestation: &Attestation, slots: usize) -> Result<Self> {
        if !attestation.kind.is_aggregator() {
            return Err(AttestationError::InvalidWitness(
                "expected an aggregator attestation, got a voter attestation".into(),
            ));
        }
        let instances = &attestation.public_inputs;
        check_len(instances, attestation.kind.instance_len(slots), "aggregator")?;
        Self::from_instances(&instances[..Self::len(slots)], slots)
    }

    /// First field on which `self` fails to continue from `prior`.
    pub fn continuity_break(&self, prior: &AggregatorState) -> Option<&'static str> {
        if self.key != prior.key {
            Some("encryption key")
        } else if self.proposal_id != prior.proposal_id {
            Some("proposal id")
        } else if self.whitelist_root != prior.whitelist_root {
            Some("whitelist root")
        } else if self.old_nullifier_root != prior.new_nullifier_root {
            Some("nullifier root")
        } else if self.old_tally != prior.new_tally {
            Some("tally")
        } else {
            None
        }
    }
}

/// Ballot a fold consumed, published after the fold's AggregatorState so the
/// record names which voter attestation it counted.
///
/// Instance layout: `[nullifierKey, encryptedVote[k]]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedBallot {
    pub nullifier_key: Fr,
    pub encrypted_vote: Vec<Fr>,
}

impl ConsumedBallot {
    pub fn len(slots: usize) -> usize {
        slots + 1
    }

    pub fn of(voter: &VoterState) -> Self {
        Self { nullifier_key: voter.nullifier_key, encrypted_vote: voter.encrypted_vote.clone() }
    }

    pub fn to_instances(&self) -> Vec<Fr> {
        let mut out = vec![self.nullifier_key];
        out.extend_from_slice(&self.encrypted_vote);
        out
    }

    pub fn from_attestation(attestation: &Attestation, slots: usize) -> Result<Self> {
        if attestation.kind != CircuitKind::AggregatorRecursive {
            return Err(AttestationError::InvalidWitness(format!(
                "only recursive attestations consume a ballot, got {:?}",
                attestation.kind
            )));
        }
        let instances = &attestation.public_inputs;
        check_len(instances, attestation.kind.instance_len(slots), "recursive")?;
        let tail = &instances[AggregatorState::len(slots)..];
        Ok(Self { nullifier_key: tail[0], encrypted_vote: tail[1..].to_vec() })
    }
}

fn check_len(instances: &[Fr], expected: usize, what: &str) -> Result<()> {
    if instances.len() != expected {
        return Err(AttestationError::InvalidWitness(format!(
            "{} attestation has {} public inputs, expected {}",
            what,
            instances.len(),
            expected
        )));
    }
    Ok(())
}

/// One accepted fold: the aggregator attestation and, past the base case, the
/// voter attestation it consumed.
#[derive(Clone, Debug)]
pub struct ChainLink {
    pub aggregate: Attestation,
    pub voter: Option<Attestation>,
}

/// Append-only history of aggregator attestations for one proposal.
#[derive(Clone, Debug)]
pub struct TallyChain {
    slots: usize,
    links: Vec<ChainLink>,
}

impl TallyChain {
    /// Start a chain from a base-case attestation at the genesis state: empty
    /// nullifier map, every slot at the trivial encryption of zero.
    pub fn new(base: Attestation, slots: usize) -> Result<Self> {
        if base.kind != CircuitKind::AggregatorBase {
            return Err(AttestationError::ChainContinuityBreak(
                "chain must start from a base-case attestation".into(),
            ));
        }
        check_genesis(&AggregatorState::from_attestation(&base, slots)?, slots)?;
        Ok(Self { slots, links: vec![ChainLink { aggregate: base, voter: None }] })
    }

    /// Load a history received from an aggregator. Nothing is checked until
    /// `verify_history`.
    pub fn from_links(links: Vec<ChainLink>, slots: usize) -> Result<Self> {
        if links.is_empty() {
            return Err(AttestationError::ChainContinuityBreak("empty history".into()));
        }
        Ok(Self { slots, links })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn tip(&self) -> &Attestation {
        // `new` seeds the base link and links are never removed
        &self.links[self.links.len() - 1].aggregate
    }

    pub fn tip_state(&self) -> Result<AggregatorState> {
        AggregatorState::from_attestation(self.tip(), self.slots)
    }

    /// Append a fold, rejecting records that do not continue the tip or that
    /// do not consume `voter`.
    pub fn push(&mut self, aggregate: Attestation, voter: Attestation) -> Result<()> {
        if aggregate.kind != CircuitKind::AggregatorRecursive {
            return Err(AttestationError::ChainContinuityBreak(
                "only recursive attestations extend a chain".into(),
            ));
        }
        let next = AggregatorState::from_attestation(&aggregate, self.slots)?;
        if let Some(field) = next.continuity_break(&self.tip_state()?) {
            return Err(AttestationError::ChainContinuityBreak(format!(
                "{} does not continue the chain tip",
                field
            )));
        }
        let ballot = check_consumed(&next, &aggregate, &voter, self.slots)?;
        for link in &self.links[1..] {
            if ConsumedBallot::from_attestation(&link.aggregate, self.slots)?.nullifier_key
                == ballot.nullifier_key
            {
                return Err(AttestationError::NullifierReplay);
            }
        }
        debug!(
            height = self.links.len(),
            new_root = %field_to_hex(&next.new_nullifier_root),
            "tally chain extended"
        );
        self.links.push(ChainLink { aggregate, voter: Some(voter) });
        Ok(())
    }

    /// Re-verify every record through `backend` and recheck each link:
    /// continuity between consecutive aggregates, the binding of each fold to
    /// its voter attestation, one fold per nullifier key and the homomorphic
    /// tally advance.
    pub fn verify_history<B: AttestationBackend>(
        &self,
        config: &ProtocolConfig,
        backend: &B,
    ) -> Result<()> {
        let mut prior: Option<AggregatorState> = None;
        let mut counted = HashSet::new();
        for (height, link) in self.links.iter().enumerate() {
            if !backend.verify(config, &link.aggregate)? {
                return Err(AttestationError::AttestationRejected("chain aggregate"));
            }
            let state = AggregatorState::from_attestation(&link.aggregate, self.slots)?;

            match (&prior, &link.voter) {
                (None, None) => {
                    if link.aggregate.kind != CircuitKind::AggregatorBase {
                        return Err(AttestationError::ChainContinuityBreak(
                            "chain does not start from a base case".into(),
                        ));
                    }
                    check_genesis(&state, self.slots)?;
                }
                (Some(prior), Some(voter)) => {
                    if !backend.verify(config, voter)? {
                        return Err(AttestationError::AttestationRejected("chain voter"));
                    }
                    if let Some(field) = state.continuity_break(prior) {
                        return Err(AttestationError::ChainContinuityBreak(format!(
                            "{} breaks at height {}",
                            field, height
                        )));
                    }
                    let ballot = check_consumed(&state, &link.aggregate, voter, self.slots)?;
                    if !counted.insert(ballot.nullifier_key.to_bytes()) {
                        return Err(AttestationError::NullifierReplay);
                    }
                    check_tally_advance(&state, &ballot)?;
                }
                _ => {
                    return Err(AttestationError::ChainContinuityBreak(format!(
                        "link at height {} has no voter attestation",
                        height
                    )));
                }
            }
            prior = Some(state);
        }
        info!(height = self.links.len(), "tally chain history verified");
        Ok(())
    }
}

fn check_genesis(state: &AggregatorState, slots: usize) -> Result<()> {
    if state.old_nullifier_root != empty_root() || state.new_nullifier_root != empty_root() {
        return Err(AttestationError::ChainContinuityBreak(
            "base case does not start from the empty nullifier root".into(),
        ));
    }
    let zero = vec![Fr::one(); slots];
    if state.old_tally != zero || state.new_tally != zero {
        return Err(AttestationError::BaseCaseInvariantViolation(
            "the tally away from the encryption of zero",
        ));
    }
    Ok(())
}

/// The ballot `aggregate` published, checked against the linked `voter`
/// attestation and the election of `state`.
fn check_consumed(
    state: &AggregatorState,
    aggregate: &Attestation,
    voter: &Attestation,
    slots: usize,
) -> Result<ConsumedBallot> {
    let voter = VoterState::from_attestation(voter, slots)?;
    if let Some(field) = voter.election_mismatch(state) {
        return Err(AttestationError::ChainContinuityBreak(format!(
            "voter {} differs from the chain",
            field
        )));
    }
    let ballot = ConsumedBallot::from_attestation(aggregate, slots)?;
    if ballot != ConsumedBallot::of(&voter) {
        return Err(AttestationError::ChainContinuityBreak(
            "fold did not consume the linked voter attestation".into(),
        ));
    }
    Ok(ballot)
}

fn check_tally_advance(state: &AggregatorState, ballot: &ConsumedBallot) -> Result<()> {
    let key = EncryptionKey::from_fields(&state.key[0], &state.key[1], &state.key[2]);
    for (slot, ((old, vote), new)) in state
        .old_tally
        .iter()
        .zip(ballot.encrypted_vote.iter())
        .zip(state.new_tally.iter())
        .enumerate()
    {
        let sum = key.add(&field_to_biguint(old), &field_to_biguint(vote));
        if biguint_to_field(&sum)? != *new {
            return Err(AttestationError::TallyAdvanceMismatch { slot });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::ProtocolCircuit;
    use crate::paillier::Keypair;

    /// Accepts every record, so only the chain's own checks are exercised
    struct AcceptAll;

    impl AttestationBackend for AcceptAll {
        fn generate<C: ProtocolCircuit>(&self, _: &ProtocolConfig, _: &C) -> Result<Attestation> {
            Err(AttestationError::Backend("verify-only backend".into()))
        }

        fn verify(&self, _: &ProtocolConfig, _: &Attestation) -> Result<bool> {
            Ok(true)
        }
    }

    const SLOTS: usize = 2;

    fn election_key() -> Keypair {
        Keypair::from_primes(2147483647, 2147483629).unwrap()
    }

    fn genesis() -> AggregatorState {
        AggregatorState {
            key: election_key().public.to_fields().unwrap(),
            proposal_id: Fr::from(7),
            whitelist_root: Fr::from(11),
            old_nullifier_root: empty_root(),
            new_nullifier_root: empty_root(),
            old_tally: vec![Fr::one(); SLOTS],
            new_tally: vec![Fr::one(); SLOTS],
        }
    }

    fn ballot_for(prior: &AggregatorState, nullifier_key: u64, randomness: u64) -> VoterState {
        let key = election_key().public;
        let encrypted_vote = [1u32, 0]
            .iter()
            .map(|m| {
                let c = key.encrypt(&(*m).into(), &randomness.into());
                biguint_to_field(&c).unwrap()
            })
            .collect();
        VoterState {
            whitelist_root: prior.whitelist_root,
            proposal_id: prior.proposal_id,
            key: prior.key,
            encrypted_vote,
            nullifier_key: Fr::from(nullifier_key),
        }
    }

    /// A fold record of `voter` onto `prior`; the new root is arbitrary since
    /// only the circuit recomputes it.
    fn fold_link(prior: &AggregatorState, voter: &VoterState, new_root: u64) -> (AggregatorState, ChainLink) {
        let key = election_key().public;
        let new_tally = prior
            .new_tally
            .iter()
            .zip(voter.encrypted_vote.iter())
            .map(|(t, b)| biguint_to_field(&key.add(&field_to_biguint(t), &field_to_biguint(b))).unwrap())
            .collect();
        let state = AggregatorState {
            old_nullifier_root: prior.new_nullifier_root,
            new_nullifier_root: Fr::from(new_root),
            old_tally: prior.new_tally.clone(),
            new_tally,
            ..prior.clone()
        };
        let mut public_inputs = state.to_instances();
        public_inputs.extend(ConsumedBallot::of(voter).to_instances());
        let link = ChainLink {
            aggregate: Attestation { kind: CircuitKind::AggregatorRecursive, public_inputs, proof: vec![] },
            voter: Some(Attestation { kind: CircuitKind::Voter, public_inputs: voter.to_instances(), proof: vec![] }),
        };
        (state, link)
    }

    fn base_link(state: &AggregatorState) -> ChainLink {
        ChainLink {
            aggregate: Attestation {
                kind: CircuitKind::AggregatorBase,
                public_inputs: state.to_instances(),
                proof: vec![],
            },
            voter: None,
        }
    }

    fn verify(links: Vec<ChainLink>) -> Result<()> {
        TallyChain::from_links(links, SLOTS)?.verify_history(&ProtocolConfig::default(), &AcceptAll)
    }

    fn aggregator_state(old_root: Fr, new_root: Fr, old: u64, new: u64) -> AggregatorState {
        AggregatorState {
            key: [Fr::from(3), Fr::from(4), Fr::from(9)],
            proposal_id: Fr::from(7),
            whitelist_root: Fr::from(11),
            old_nullifier_root: old_root,
            new_nullifier_root: new_root,
            old_tally: vec![Fr::from(old); 2],
            new_tally: vec![Fr::from(new); 2],
        }
    }

    #[test]
    fn test_instance_layouts() {
        let state = aggregator_state(Fr::from(1), Fr::from(2), 5, 6);
        let instances = state.to_instances();
        assert_eq!(instances.len(), AggregatorState::len(2));
        assert_eq!(AggregatorState::from_instances(&instances, 2).unwrap(), state);
        assert!(AggregatorState::from_instances(&instances, 3).is_err());

        let voter = VoterState {
            whitelist_root: Fr::from(1),
            proposal_id: Fr::from(2),
            key: [Fr::from(3), Fr::from(4), Fr::from(9)],
            encrypted_vote: vec![Fr::from(5), Fr::from(6), Fr::from(7)],
            nullifier_key: Fr::from(8),
        };
        let instances = voter.to_instances();
        assert_eq!(instances.len(), CircuitKind::Voter.instance_len(3));
        assert_eq!(VoterState::from_instances(&instances, 3).unwrap(), voter);
    }

    #[test]
    fn test_json_roundtrip_is_stable() {
        let attestation = Attestation {
            kind: CircuitKind::AggregatorRecursive,
            public_inputs: vec![Fr::from(42), -Fr::from(1)],
            proof: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let json = attestation.to_json().unwrap();
        assert!(json.contains("\"aggregator_recursive\""));
        assert!(json.contains("\"deadbeef\""));
        assert_eq!(Attestation::from_json(&json).unwrap(), attestation);
        assert!(Attestation::from_json("{\"kind\":\"voter\"}").is_err());
    }

    #[test]
    fn test_continuity_break_names_first_field() {
        let prior = aggregator_state(Fr::from(1), Fr::from(2), 5, 6);
        assert_eq!(aggregator_state(Fr::from(2), Fr::from(3), 6, 7).continuity_break(&prior), None);
        assert_eq!(
            aggregator_state(Fr::from(9), Fr::from(3), 6, 7).continuity_break(&prior),
            Some("nullifier root")
        );
        assert_eq!(
            aggregator_state(Fr::from(2), Fr::from(3), 5, 7).continuity_break(&prior),
            Some("tally")
        );
    }

    #[test]
    fn test_chain_rejects_non_base_start() {
        let state = aggregator_state(empty_root(), empty_root(), 1, 1);
        let recursive = Attestation {
            kind: CircuitKind::AggregatorRecursive,
            public_inputs: state.to_instances(),
            proof: vec![],
        };
        assert!(matches!(
            TallyChain::new(recursive, 2),
            Err(AttestationError::ChainContinuityBreak(_))
        ));

        let stray = aggregator_state(Fr::from(5), Fr::from(5), 1, 1);
        let base = Attestation {
            kind: CircuitKind::AggregatorBase,
            public_inputs: stray.to_instances(),
            proof: vec![],
        };
        assert!(TallyChain::new(base, 2).is_err());
    }

    #[test]
    fn test_honest_history_verifies() {
        let base = genesis();
        let (first, link1) = fold_link(&base, &ballot_for(&base, 100, 3), 21);
        let (_, link2) = fold_link(&first, &ballot_for(&first, 200, 5), 22);
        assert!(verify(vec![base_link(&base), link1, link2]).is_ok());
    }

    #[test]
    fn test_history_rejects_fold_of_unlinked_ballot() {
        // The record counted ballot A under a fresh nullifier key but links A
        let base = genesis();
        let a = ballot_for(&base, 100, 3);
        let (first, link1) = fold_link(&base, &a, 21);
        let relabelled = VoterState { nullifier_key: Fr::from(999), ..a.clone() };
        let (_, mut link2) = fold_link(&first, &relabelled, 22);
        link2.voter = Some(Attestation { kind: CircuitKind::Voter, public_inputs: a.to_instances(), proof: vec![] });

        let err = verify(vec![base_link(&base), link1, link2]).unwrap_err();
        assert_eq!(
            err,
            AttestationError::ChainContinuityBreak("fold did not consume the linked voter attestation".into())
        );
    }

    #[test]
    fn test_history_rejects_repeated_nullifier_key() {
        let base = genesis();
        let (first, link1) = fold_link(&base, &ballot_for(&base, 100, 3), 21);
        let (_, link2) = fold_link(&first, &ballot_for(&first, 100, 5), 22);
        assert_eq!(verify(vec![base_link(&base), link1, link2]), Err(AttestationError::NullifierReplay));
    }

    #[test]
    fn test_history_rejects_voter_from_other_proposal() {
        let base = genesis();
        let foreign = VoterState { proposal_id: Fr::from(8), ..ballot_for(&base, 100, 3) };
        let (_, link) = fold_link(&base, &foreign, 21);
        assert_eq!(
            verify(vec![base_link(&base), link]),
            Err(AttestationError::ChainContinuityBreak("voter proposal id differs from the chain".into()))
        );
    }

    #[test]
    fn test_history_rejects_bad_tally_advance() {
        let base = genesis();
        let (_, mut link) = fold_link(&base, &ballot_for(&base, 100, 3), 21);
        // newTally[1] sits after the key, four roots/ids and oldTally
        link.aggregate.public_inputs[7 + SLOTS + 1] += Fr::one();
        assert_eq!(
            verify(vec![base_link(&base), link]),
            Err(AttestationError::TallyAdvanceMismatch { slot: 1 })
        );
    }

    #[test]
    fn test_history_rejects_missing_voter_and_empty_history() {
        let base = genesis();
        let (_, mut link) = fold_link(&base, &ballot_for(&base, 100, 3), 21);
        link.voter = None;
        assert!(matches!(
            verify(vec![base_link(&base), link]),
            Err(AttestationError::ChainContinuityBreak(_))
        ));
        assert!(TallyChain::from_links(vec![], SLOTS).is_err());
    }

    #[test]
    fn test_genesis_tally_is_pinned() {
        let mut base = genesis();
        let c = election_key().public.encrypt(&1000u32.into(), &3u32.into());
        base.old_tally[0] = biguint_to_field(&c).unwrap();
        base.new_tally[0] = base.old_tally[0];
        assert!(matches!(
            TallyChain::new(base_link(&base).aggregate, SLOTS),
            Err(AttestationError::BaseCaseInvariantViolation(_))
        ));
        assert!(matches!(verify(vec![base_link(&base)]), Err(AttestationError::BaseCaseInvariantViolation(_))));
        assert!(TallyChain::new(base_link(&genesis()).aggregate, SLOTS).is_ok());
    }

    #[test]
    fn test_push_checks_the_consumed_ballot() {
        let base = genesis();
        let mut chain = TallyChain::new(base_link(&base).aggregate, SLOTS).unwrap();
        let a = ballot_for(&base, 100, 3);
        let (first, link1) = fold_link(&base, &a, 21);
        chain.push(link1.aggregate.clone(), link1.voter.clone().unwrap()).unwrap();

        let relabelled = VoterState { nullifier_key: Fr::from(999), ..a.clone() };
        let (_, link2) = fold_link(&first, &relabelled, 22);
        let a_record = Attestation { kind: CircuitKind::Voter, public_inputs: a.to_instances(), proof: vec![] };
        assert!(matches!(
            chain.push(link2.aggregate.clone(), a_record),
            Err(AttestationError::ChainContinuityBreak(_))
        ));

        let (_, replay) = fold_link(&first, &ballot_for(&first, 100, 5), 22);
        assert_eq!(
            chain.push(replay.aggregate, replay.voter.unwrap()),
            Err(AttestationError::NullifierReplay)
        );
        assert_eq!(chain.len(), 2);
    }
}
