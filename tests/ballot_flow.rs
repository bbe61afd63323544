//! End-to-end election: base case, two ballots folded, tally decrypted
//!
//! Runs every circuit through MockBackend at the deployment shape (five
//! options, depth-8 whitelist, k=16).

mod common;

use ballot_aggregation_circuits::attestation::{AggregatorState, Attestation, TallyChain};
use ballot_aggregation_circuits::client::decrypt_tally;
use ballot_aggregation_circuits::nullifier_map::{empty_root, NullifierMap};
use ballot_aggregation_circuits::AttestationBackend;
use common::Election;

#[test]
fn test_two_ballots_tally_to_expected_counts() {
    let mut election = Election::new(7);
    let slots = election.ctx.config.slots;

    let base = election.base().unwrap();
    assert_eq!(decrypt_tally(&election.ctx.config, &election.keypair, &base).unwrap(), vec![0; 5]);

    let mut chain = TallyChain::new(Attestation::from_json(&base).unwrap(), slots).unwrap();
    let mut map = NullifierMap::new();
    let mut tip = base;

    for (voter, choice) in [(0, 1), (2, 2)] {
        let ballot = election.ballot(voter, choice).unwrap();
        let folded = election.fold(&tip, &ballot, &mut map).unwrap();
        chain
            .push(Attestation::from_json(&folded).unwrap(), Attestation::from_json(&ballot).unwrap())
            .unwrap();
        tip = folded;
    }

    assert_eq!(chain.len(), 3);
    chain.verify_history(&election.ctx.config, &election.ctx.backend).unwrap();
    // Histories verify repeatedly with the same answer
    chain.verify_history(&election.ctx.config, &election.ctx.backend).unwrap();

    let state = chain.tip_state().unwrap();
    assert_eq!(state.new_nullifier_root, map.root());
    assert_ne!(state.new_nullifier_root, empty_root());
    assert!(map.is_used(&election.voters[0].nullifier_key(election.proposal_id())));
    assert!(map.is_used(&election.voters[2].nullifier_key(election.proposal_id())));
    assert!(!map.is_used(&election.voters[1].nullifier_key(election.proposal_id())));

    assert_eq!(
        decrypt_tally(&election.ctx.config, &election.keypair, &tip).unwrap(),
        vec![0, 1, 1, 0, 0]
    );
}

#[test]
fn test_attestations_survive_serialization() {
    let mut election = Election::new(11);
    let ballot = election.ballot(1, 4).unwrap();

    let attestation = Attestation::from_json(&ballot).unwrap();
    assert!(election.ctx.backend.verify(&election.ctx.config, &attestation).unwrap());
    assert_eq!(Attestation::from_json(&attestation.to_json().unwrap()).unwrap(), attestation);

    let base = election.base().unwrap();
    let state =
        AggregatorState::from_attestation(&Attestation::from_json(&base).unwrap(), 5).unwrap();
    assert_eq!(state.proposal_id, election.proposal_id());
    assert_eq!(state.whitelist_root, election.tree.root());
}
