// Voter attestation circuit
//
// Proves, for one ballot, that the voter:
//   1. signed the proposal id with a whitelisted Baby Jubjub key
//   2. selected exactly one of k options
//   3. encrypted each slot correctly under the election key
//   4. holds a key whose leaf Poseidon(pk.x, pk.y) is in the whitelist
//   5. derived the published nullifier key from that same private key
//
// Public: VoterState. Private: vote, randomness, pk, whitelist path, signature, sk.

use halo2_base::{
    gates::{GateInstructions, RangeChip, RangeInstructions},
    halo2_proofs::halo2curves::bn256::Fr,
    AssignedValue, Context,
};

use crate::attestation::{CircuitKind, VoterState};
use crate::babyjub::{load_point, Point};
use crate::circuit::{load_all, load_encryption_key, shape_key, ProtocolCircuit};
use crate::config::ProtocolConfig;
use crate::constraints::Enforcer;
use crate::error::{AttestationError, Result};
use crate::merkle::{validate_merkle_inputs, verify_inclusion};
use crate::paillier::encrypt;
use crate::poseidon_hash::{create_poseidon_hasher, hash_pair_with_hasher};
use crate::signature::{load_signature, verify_nullifier, verify_signature, Signature};

#[derive(Clone, Debug)]
pub struct VoterCircuit {
    pub state: VoterState,

    // Private witnesses
    pub vote: Vec<Fr>,
    pub randomness: Vec<Fr>,
    pub voter_public_key: Point,
    pub leaf_index: u64,
    pub whitelist_path: Vec<Fr>,
    pub signature: Signature,
    pub secret_key: Fr,
}

impl VoterCircuit {
    /// Shape checks that must hold before synthesis.
    pub fn validate(&self, config: &ProtocolConfig) -> Result<()> {
        if self.state.encrypted_vote.len() != config.slots {
            return Err(AttestationError::InvalidWitness(format!(
                "{} encrypted slots, deployment uses {}",
                self.state.encrypted_vote.len(),
                config.slots
            )));
        }
        if self.vote.len() != self.state.encrypted_vote.len() {
            return Err(AttestationError::VoteMalformed(format!(
                "vote has {} slots but {} ciphertexts were published",
                self.vote.len(),
                self.state.encrypted_vote.len()
            )));
        }
        if self.randomness.len() != config.slots {
            return Err(AttestationError::InvalidWitness(format!(
                "{} randomness values for {} slots",
                self.randomness.len(),
                config.slots
            )));
        }
        validate_merkle_inputs(self.whitelist_path.len(), self.leaf_index, config.whitelist_depth)
    }
}

/// Constrain every slot to {0, 1} with exactly one slot set.
fn constrain_one_hot(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    enforcer: &mut Enforcer,
    vote: &[AssignedValue<Fr>],
) {
    for (slot, v) in vote.iter().enumerate() {
        gate.assert_bit(ctx, *v);
        enforcer.record(*v.value() != Fr::zero() && *v.value() != Fr::one(), || {
            AttestationError::VoteMalformed(format!("slot {} is neither 0 nor 1", slot))
        });
    }
    let total = gate.sum(ctx, vote.iter().copied());
    let one = ctx.load_constant(Fr::one());
    enforcer.constrain_equal(ctx, &total, &one, || {
        AttestationError::VoteMalformed("ballot must select exactly one option".into())
    });
}

impl ProtocolCircuit for VoterCircuit {
    const KIND: CircuitKind = CircuitKind::Voter;

    fn shape(config: &ProtocolConfig) -> Self {
        let mut vote = vec![Fr::zero(); config.slots];
        vote[0] = Fr::one();
        Self {
            state: VoterState {
                whitelist_root: Fr::zero(),
                proposal_id: Fr::zero(),
                key: shape_key(),
                encrypted_vote: vec![Fr::zero(); config.slots],
                nullifier_key: Fr::zero(),
            },
            vote,
            randomness: vec![Fr::one(); config.slots],
            voter_public_key: Point::identity(),
            leaf_index: 0,
            whitelist_path: vec![Fr::zero(); config.whitelist_depth],
            signature: Signature { r: Point::identity(), s: Fr::zero() },
            secret_key: Fr::zero(),
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

        // Public inputs
        let whitelist_root = ctx.load_witness(self.state.whitelist_root);
        let proposal_id = ctx.load_witness(self.state.proposal_id);
        let key = load_encryption_key(ctx, range, enforcer, &self.state.key);
        let encrypted_vote = load_all(ctx, &self.state.encrypted_vote);
        let nullifier_key = ctx.load_witness(self.state.nullifier_key);

        // 1. Ownership of the voting key
        let pk = load_point(ctx, &self.voter_public_key);
        let signature = load_signature(ctx, &self.signature);
        verify_signature(&hasher, ctx, gate, enforcer, &pk, proposal_id, &signature);

        // 2. Ballot shape
        let vote = load_all(ctx, &self.vote);
        constrain_one_hot(ctx, gate, enforcer, &vote);

        // 3. Per-slot encryption
        let randomness = load_all(ctx, &self.randomness);
        for (slot, ((v, r), published)) in
            vote.iter().zip(randomness.iter()).zip(encrypted_vote.iter()).enumerate()
        {
            let cipher = encrypt(ctx, range, enforcer, &key, *v, *r, || {
                AttestationError::EncryptionMismatch { slot }
            });
            enforcer.constrain_equal(ctx, &cipher, published, || {
                AttestationError::EncryptionMismatch { slot }
            });
        }

        // 4. Eligibility
        let leaf = hash_pair_with_hasher(&hasher, ctx, gate, pk.x, pk.y);
        let leaf_index = ctx.load_witness(Fr::from(self.leaf_index));
        let path = load_all(ctx, &self.whitelist_path);
        verify_inclusion(&hasher, ctx, gate, enforcer, whitelist_root, leaf, leaf_index, &path);

        // 5. Nullifier bound to this key and proposal
        let secret = ctx.load_witness(self.secret_key);
        verify_nullifier(&hasher, ctx, gate, enforcer, secret, &pk, proposal_id, nullifier_key);

        let mut public = vec![whitelist_root, proposal_id];
        public.extend(key.cells());
        public.extend(encrypted_vote);
        public.push(nullifier_key);
        public
    }
}
