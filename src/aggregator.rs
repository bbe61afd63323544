// Aggregator attestation circuits: base case and recursive fold
//
// Base case pins the zero point of a chain: the declared transition must be
// the identity (same nullifier root, same tally) under a well-formed key.
//
// A fold consumes one prior aggregator state and one voter state. Both were
// verified through the backend before their public inputs are loaded here as
// witnesses; the circuit then binds them to the current state:
//   a. key, proposal id and whitelist root agree across prior, voter and current
//   b. prior.new* == current.old*
//   c. the voter's nullifier key is unused under current.oldNullifierRoot
//   d. current.newTally[i] == prior.newTally[i] (+) voter.encryptedVote[i],
//      with every ballot ciphertext a unit mod n
//   e. marking the key used yields current.newNullifierRoot
//
// The fold publishes the consumed nullifier key and ballot after its state, so
// a chain can check which voter attestation each record counted.

use halo2_base::{
    gates::{GateInstructions, RangeChip, RangeInstructions},
    halo2_proofs::halo2curves::bn256::Fr,
    AssignedValue, Context,
};

use crate::arithmetic::MODULUS_BITS;
use crate::attestation::{AggregatorState, CircuitKind, ConsumedBallot, VoterState};
use crate::circuit::{load_all, load_encryption_key, shape_key, ProtocolCircuit};
use crate::config::ProtocolConfig;
use crate::constraints::Enforcer;
use crate::error::{AttestationError, Result};
use crate::nullifier_map::{
    assert_unused, empty_root, load_nullifier_witness, set_used, NullifierWitness, MAP_DEPTH,
};
use crate::paillier::{add_ciphertexts, constrain_invertible, AssignedEncryptionKey};
use crate::poseidon_hash::create_poseidon_hasher;

/// AggregatorState as cells, in instance order.
struct AssignedAggregatorState {
    key: AssignedEncryptionKey<Fr>,
    proposal_id: AssignedValue<Fr>,
    whitelist_root: AssignedValue<Fr>,
    old_nullifier_root: AssignedValue<Fr>,
    new_nullifier_root: AssignedValue<Fr>,
    old_tally: Vec<AssignedValue<Fr>>,
    new_tally: Vec<AssignedValue<Fr>>,
}

impl AssignedAggregatorState {
    fn load(
        ctx: &mut Context<Fr>,
        range: &RangeChip<Fr>,
        enforcer: &mut Enforcer,
        state: &AggregatorState,
    ) -> Self {
        Self {
            key: load_encryption_key(ctx, range, enforcer, &state.key),
            proposal_id: ctx.load_witness(state.proposal_id),
            whitelist_root: ctx.load_witness(state.whitelist_root),
            old_nullifier_root: ctx.load_witness(state.old_nullifier_root),
            new_nullifier_root: ctx.load_witness(state.new_nullifier_root),
            old_tally: load_all(ctx, &state.old_tally),
            new_tally: load_all(ctx, &state.new_tally),
        }
    }

    fn into_public(self) -> Vec<AssignedValue<Fr>> {
        let mut public = self.key.cells().to_vec();
        public.extend([
            self.proposal_id,
            self.whitelist_root,
            self.old_nullifier_root,
            self.new_nullifier_root,
        ]);
        public.extend(self.old_tally);
        public.extend(self.new_tally);
        public
    }
}

fn check_slots(state: &AggregatorState, slots: usize, what: &str) -> Result<()> {
    if state.old_tally.len() != slots || state.new_tally.len() != slots {
        return Err(AttestationError::InvalidWitness(format!(
            "{} tallies have {}/{} slots, deployment uses {}",
            what,
            state.old_tally.len(),
            state.new_tally.len(),
            slots
        )));
    }
    Ok(())
}

fn shape_state(config: &ProtocolConfig) -> AggregatorState {
    AggregatorState {
        key: shape_key(),
        proposal_id: Fr::zero(),
        whitelist_root: Fr::zero(),
        old_nullifier_root: Fr::zero(),
        new_nullifier_root: Fr::zero(),
        old_tally: vec![Fr::one(); config.slots],
        new_tally: vec![Fr::one(); config.slots],
    }
}

// ============================================================================
// BASE CASE
// ============================================================================

#[derive(Clone, Debug)]
pub struct AggregatorBaseCircuit {
    pub state: AggregatorState,
}

impl AggregatorBaseCircuit {
    pub fn validate(&self, config: &ProtocolConfig) -> Result<()> {
        check_slots(&self.state, config.slots, "base")
    }
}

impl ProtocolCircuit for AggregatorBaseCircuit {
    const KIND: CircuitKind = CircuitKind::AggregatorBase;

    fn shape(config: &ProtocolConfig) -> Self {
        Self { state: shape_state(config) }
    }

    fn synthesize(
        &self,
        ctx: &mut Context<Fr>,
        range: &RangeChip<Fr>,
        enforcer: &mut Enforcer,
    ) -> Vec<AssignedValue<Fr>> {
        let state = AssignedAggregatorState::load(ctx, range, enforcer, &self.state);

        enforcer.constrain_equal(ctx, &state.old_nullifier_root, &state.new_nullifier_root, || {
            AttestationError::BaseCaseInvariantViolation("the nullifier root")
        });
        for (old, new) in state.old_tally.iter().zip(state.new_tally.iter()) {
            enforcer.constrain_equal(ctx, old, new, || {
                AttestationError::BaseCaseInvariantViolation("the tally")
            });
        }
        // Folds multiply tallies in one limb; they must start reduced
        for new in &state.new_tally {
            enforcer.range_check(ctx, range, *new, MODULUS_BITS, || {
                AttestationError::RangeOverflow { context: "genesis tally", bits: MODULUS_BITS }
            });
            enforcer.check_less_than(ctx, range, *new, state.key.n_squared, MODULUS_BITS, || {
                AttestationError::RangeOverflow { context: "genesis tally", bits: MODULUS_BITS }
            });
        }
        state.into_public()
    }
}

// ============================================================================
// RECURSIVE FOLD
// ============================================================================

#[derive(Clone, Debug)]
pub struct AggregatorRecursiveCircuit {
    pub state: AggregatorState,

    // Private witnesses: verified public inputs of the consumed attestations
    pub prior: AggregatorState,
    pub voter: VoterState,
    pub nullifier_witness: NullifierWitness,
}

impl AggregatorRecursiveCircuit {
    pub fn validate(&self, config: &ProtocolConfig) -> Result<()> {
        check_slots(&self.state, config.slots, "current")?;
        check_slots(&self.prior, config.slots, "prior")?;
        if self.voter.encrypted_vote.len() != config.slots {
            return Err(AttestationError::InvalidWitness(format!(
                "voter ballot has {} slots, deployment uses {}",
                self.voter.encrypted_vote.len(),
                config.slots
            )));
        }
        self.nullifier_witness.validate()
    }

    /// Public inputs the fold attests to: its state, then the consumed ballot.
    pub fn instances(&self) -> Vec<Fr> {
        let mut out = self.state.to_instances();
        out.extend(ConsumedBallot::of(&self.voter).to_instances());
        out
    }
}

fn chain_equal(
    ctx: &mut Context<Fr>,
    enforcer: &mut Enforcer,
    a: &AssignedValue<Fr>,
    b: &AssignedValue<Fr>,
    what: &'static str,
) {
    enforcer.constrain_equal(ctx, a, b, || AttestationError::ChainContinuityBreak(what.into()));
}

impl ProtocolCircuit for AggregatorRecursiveCircuit {
    const KIND: CircuitKind = CircuitKind::AggregatorRecursive;

    fn shape(config: &ProtocolConfig) -> Self {
        Self {
            state: shape_state(config),
            prior: shape_state(config),
            voter: VoterState {
                whitelist_root: Fr::zero(),
                proposal_id: Fr::zero(),
                key: shape_key(),
                encrypted_vote: vec![Fr::one(); config.slots],
                nullifier_key: Fr::zero(),
            },
            nullifier_witness: NullifierWitness {
                key: Fr::zero(),
                siblings: vec![Fr::zero(); MAP_DEPTH],
            },
        }
    }

    fn synthesize(
        &self,
        ctx: &mut Context<Fr>,
        range: &RangeChip<Fr>,
        enforcer: &mut Enforcer,
    ) -> Vec<AssignedValue<Fr>> {
        let gate = range.gate();
        let hasher = create_poseidon_hasher(ctx, gate);

        let current = AssignedAggregatorState::load(ctx, range, enforcer, &self.state);

        // Consumed public inputs
        let prior_key = load_all(ctx, &self.prior.key);
        let prior_proposal = ctx.load_witness(self.prior.proposal_id);
        let prior_whitelist = ctx.load_witness(self.prior.whitelist_root);
        let prior_new_root = ctx.load_witness(self.prior.new_nullifier_root);
        let prior_new_tally = load_all(ctx, &self.prior.new_tally);

        let voter_whitelist = ctx.load_witness(self.voter.whitelist_root);
        let voter_proposal = ctx.load_witness(self.voter.proposal_id);
        let voter_key = load_all(ctx, &self.voter.key);
        let voter_ballot = load_all(ctx, &self.voter.encrypted_vote);
        let voter_nullifier = ctx.load_witness(self.voter.nullifier_key);

        // a. Same election across prior, voter and current
        let current_key = current.key.cells();
        for ((cur, prior), voter) in current_key.iter().zip(prior_key.iter()).zip(voter_key.iter()) {
            chain_equal(ctx, enforcer, prior, cur, "prior encryption key differs");
            chain_equal(ctx, enforcer, voter, cur, "voter encryption key differs");
        }
        chain_equal(ctx, enforcer, &prior_proposal, &current.proposal_id, "prior proposal id differs");
        chain_equal(ctx, enforcer, &voter_proposal, &current.proposal_id, "voter proposal id differs");
        chain_equal(ctx, enforcer, &prior_whitelist, &current.whitelist_root, "prior whitelist root differs");
        chain_equal(ctx, enforcer, &voter_whitelist, &current.whitelist_root, "voter whitelist root differs");

        // b. Continuity
        chain_equal(
            ctx,
            enforcer,
            &prior_new_root,
            &current.old_nullifier_root,
            "old nullifier root is not the prior new root",
        );
        for (prior, old) in prior_new_tally.iter().zip(current.old_tally.iter()) {
            chain_equal(ctx, enforcer, prior, old, "old tally is not the prior new tally");
        }

        // c. Non-replay
        let witness = load_nullifier_witness(ctx, gate, &self.nullifier_witness);
        assert_unused(
            &hasher,
            ctx,
            gate,
            enforcer,
            voter_nullifier,
            &witness,
            current.old_nullifier_root,
        );

        // d. Tally advance
        for (slot, ((prior, ballot), new)) in prior_new_tally
            .iter()
            .zip(voter_ballot.iter())
            .zip(current.new_tally.iter())
            .enumerate()
        {
            constrain_invertible(ctx, range, enforcer, &current.key, *ballot, || {
                AttestationError::EncryptionMismatch { slot }
            });
            let sum = add_ciphertexts(ctx, range, enforcer, &current.key, *prior, *ballot);
            enforcer.constrain_equal(ctx, &sum, new, || {
                AttestationError::TallyAdvanceMismatch { slot }
            });
        }

        // e. Nullifier advance along the same path
        let advanced = set_used(&hasher, ctx, gate, enforcer, voter_nullifier, &witness);
        enforcer.constrain_equal(ctx, &advanced, &current.new_nullifier_root, || {
            AttestationError::NullifierAdvanceMismatch
        });

        let mut public = current.into_public();
        public.push(voter_nullifier);
        public.extend(voter_ballot);
        public
    }
}

/// Base-case state for a fresh proposal: empty nullifier map and every slot
/// at the trivial encryption of zero (`g^0 * 1^n = 1`).
pub fn genesis_state(key: [Fr; 3], proposal_id: Fr, whitelist_root: Fr, slots: usize) -> AggregatorState {
    AggregatorState {
        key,
        proposal_id,
        whitelist_root,
        old_nullifier_root: empty_root(),
        new_nullifier_root: empty_root(),
        old_tally: vec![Fr::one(); slots],
        new_tally: vec![Fr::one(); slots],
    }
}
