// Sparse Merkle map from nullifier key to {0 = unused, 1 = used}
//
// One leaf per canonical field element: depth equals the field bit length, the
// path is the little-endian bit decomposition of the key (bit 0 = leaf level)
// and untouched subtrees hash to precomputed empty roots. Leaves store the flag
// itself; internal nodes are Poseidon(left, right).
//
// A fold step proves non-membership and insertion with ONE witness: the same
// key bits and siblings produce the old root under leaf 0 and the new root
// under leaf 1, so both roots describe the same tree path.

use std::collections::HashMap;

use halo2_base::{
    gates::GateInstructions,
    halo2_proofs::halo2curves::{bn256::Fr, ff::PrimeField},
    poseidon::hasher::PoseidonHasher,
    AssignedValue, Context,
};
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::constraints::{canonical_bits, Enforcer};
use crate::error::{AttestationError, Result};
use crate::poseidon_hash::{hash_pair_native, hash_pair_with_hasher, RATE, T};
use crate::utils::{field_to_biguint, field_to_hex};

/// Tree depth: one level per key bit
pub const MAP_DEPTH: usize = Fr::NUM_BITS as usize;

/// EMPTY_HASHES[i] = root of an all-unused subtree of height i
static EMPTY_HASHES: Lazy<Vec<Fr>> = Lazy::new(|| {
    let mut hashes = Vec::with_capacity(MAP_DEPTH + 1);
    let mut current = Fr::zero();
    hashes.push(current);
    for _ in 0..MAP_DEPTH {
        current = hash_pair_native(current, current);
        hashes.push(current);
    }
    hashes
});

/// Root of the map with every key unused; the starting root of each proposal.
pub fn empty_root() -> Fr {
    EMPTY_HASHES[MAP_DEPTH]
}

/// Path witness for one key: the key it was extracted for plus one sibling per
/// level from the leaf up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NullifierWitness {
    pub key: Fr,
    pub siblings: Vec<Fr>,
}

impl NullifierWitness {
    pub fn validate(&self) -> Result<()> {
        if self.siblings.len() != MAP_DEPTH {
            return Err(AttestationError::InvalidWitness(format!(
                "nullifier witness has {} siblings, expected {}",
                self.siblings.len(),
                MAP_DEPTH
            )));
        }
        Ok(())
    }

    /// Root implied by this path with `leaf` at the key position.
    pub fn root_with_leaf(&self, leaf: Fr) -> Fr {
        root_from_path(&field_to_biguint(&self.key), &self.siblings, leaf)
    }
}

fn root_from_path(key: &BigUint, siblings: &[Fr], leaf: Fr) -> Fr {
    siblings.iter().enumerate().fold(leaf, |current, (level, sibling)| {
        if key.bit(level as u64) {
            hash_pair_native(*sibling, current)
        } else {
            hash_pair_native(current, *sibling)
        }
    })
}

// ============================================================================
// CIRCUIT
// ============================================================================

/// Witness cells shared by `assert_unused` and `set_used` within one fold.
#[derive(Clone, Debug)]
pub struct AssignedNullifierWitness {
    key: AssignedValue<Fr>,
    bits: Vec<AssignedValue<Fr>>,
    siblings: Vec<AssignedValue<Fr>>,
}

impl AssignedNullifierWitness {
    fn native_root(&self, leaf: Fr) -> Fr {
        let siblings: Vec<Fr> = self.siblings.iter().map(|s| *s.value()).collect();
        root_from_path(&field_to_biguint(self.key.value()), &siblings, leaf)
    }
}

/// Load a path witness, constraining its key bits to the canonical
/// decomposition of the implied key.
pub fn load_nullifier_witness(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    witness: &NullifierWitness,
) -> AssignedNullifierWitness {
    let key = ctx.load_witness(witness.key);
    let bits = canonical_bits(ctx, gate, key);
    let siblings = witness.siblings.iter().map(|s| ctx.load_witness(*s)).collect();
    AssignedNullifierWitness { key, bits, siblings }
}

fn implied_root(
    hasher: &PoseidonHasher<Fr, T, RATE>,
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    witness: &AssignedNullifierWitness,
    leaf: AssignedValue<Fr>,
) -> AssignedValue<Fr> {
    let mut current = leaf;
    for (sibling, bit) in witness.siblings.iter().zip(witness.bits.iter()) {
        let left = gate.select(ctx, *sibling, current, *bit);
        let right = gate.select(ctx, current, *sibling, *bit);
        current = hash_pair_with_hasher(hasher, ctx, gate, left, right);
    }
    current
}

fn constrain_key(
    ctx: &mut Context<Fr>,
    enforcer: &mut Enforcer,
    key: AssignedValue<Fr>,
    witness: &AssignedNullifierWitness,
) {
    enforcer.constrain_equal(ctx, &witness.key, &key, || {
        AttestationError::NullifierWitnessMismatch
    });
}

/// Constrain that `key` is unused under `root`.
///
/// A witness that instead resolves to `root` with the leaf already set is
/// reported as a replay; any other mismatch means the witness belongs to a
/// different key or tree.
pub fn assert_unused(
    hasher: &PoseidonHasher<Fr, T, RATE>,
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    enforcer: &mut Enforcer,
    key: AssignedValue<Fr>,
    witness: &AssignedNullifierWitness,
    root: AssignedValue<Fr>,
) {
    constrain_key(ctx, enforcer, key, witness);
    let unused = ctx.load_constant(Fr::zero());
    let computed = implied_root(hasher, ctx, gate, witness, unused);
    enforcer.constrain_equal(ctx, &computed, &root, || {
        if witness.native_root(Fr::one()) == *root.value() {
            AttestationError::NullifierReplay
        } else {
            AttestationError::NullifierWitnessMismatch
        }
    });
}

/// Root after marking `key` used along the same path.
pub fn set_used(
    hasher: &PoseidonHasher<Fr, T, RATE>,
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    enforcer: &mut Enforcer,
    key: AssignedValue<Fr>,
    witness: &AssignedNullifierWitness,
) -> AssignedValue<Fr> {
    constrain_key(ctx, enforcer, key, witness);
    let used = ctx.load_constant(Fr::one());
    implied_root(hasher, ctx, gate, witness, used)
}

// ============================================================================
// NATIVE MAP
// ============================================================================

/// Operator-side copy of the registry. Only non-empty nodes are stored.
#[derive(Clone, Debug, Default)]
pub struct NullifierMap {
    /// (level, index at that level) -> node hash
    nodes: HashMap<(usize, BigUint), Fr>,
}

impl NullifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, level: usize, index: &BigUint) -> Fr {
        self.nodes
            .get(&(level, index.clone()))
            .copied()
            .unwrap_or(EMPTY_HASHES[level])
    }

    pub fn root(&self) -> Fr {
        self.node(MAP_DEPTH, &BigUint::default())
    }

    pub fn is_used(&self, key: &Fr) -> bool {
        self.node(0, &field_to_biguint(key)) == Fr::one()
    }

    pub fn witness(&self, key: &Fr) -> NullifierWitness {
        let index = field_to_biguint(key);
        let siblings = (0..MAP_DEPTH)
            .map(|level| {
                let sibling = (&index >> level) ^ BigUint::from(1u32);
                self.node(level, &sibling)
            })
            .collect();
        NullifierWitness { key: *key, siblings }
    }

    /// Mark `key` used, returning the witness taken against the prior root.
    pub fn set_used(&mut self, key: &Fr) -> Result<NullifierWitness> {
        if self.is_used(key) {
            return Err(AttestationError::NullifierReplay);
        }
        let witness = self.witness(key);
        let index = field_to_biguint(key);

        let mut current = Fr::one();
        self.nodes.insert((0, index.clone()), current);
        for (level, sibling) in witness.siblings.iter().enumerate() {
            current = if index.bit(level as u64) {
                hash_pair_native(*sibling, current)
            } else {
                hash_pair_native(current, *sibling)
            };
            self.nodes.insert((level + 1, &index >> (level + 1)), current);
        }
        debug!(key = %field_to_hex(key), root = %field_to_hex(&current), "nullifier marked used");
        Ok(witness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poseidon_hash::create_poseidon_hasher;
    use halo2_base::{
        gates::{
            circuit::{builder::RangeCircuitBuilder, CircuitBuilderStage},
            RangeInstructions,
        },
        halo2_proofs::dev::MockProver,
    };

    const K: usize = 16;

    /// Run one fold's registry checks; returns (new root, enforcer verdict, satisfied)
    fn run_fold(key: Fr, witness: &NullifierWitness, old_root: Fr) -> (Fr, Result<()>, bool) {
        let mut builder = RangeCircuitBuilder::from_stage(CircuitBuilderStage::Mock).use_k(K);
        builder.set_lookup_bits(8);
        let range = builder.range_chip();
        let gate = range.gate();
        let ctx = builder.main(0);
        let mut enforcer = Enforcer::new(CircuitBuilderStage::Mock);

        let hasher = create_poseidon_hasher(ctx, gate);
        let key = ctx.load_witness(key);
        let root = ctx.load_witness(old_root);
        let witness = load_nullifier_witness(ctx, gate, witness);
        assert_unused(&hasher, ctx, gate, &mut enforcer, key, &witness, root);
        let new_root = set_used(&hasher, ctx, gate, &mut enforcer, key, &witness);
        let new_root = *new_root.value();

        builder.calculate_params(Some(9));
        let satisfied = MockProver::run(K as u32, &builder, vec![])
            .map(|prover| prover.verify().is_ok())
            .unwrap_or(false);
        (new_root, enforcer.finish(), satisfied)
    }

    #[test]
    fn test_native_map_tracks_root() {
        let mut map = NullifierMap::new();
        assert_eq!(map.root(), empty_root());

        let key = Fr::from(0xabcdef);
        let witness = map.set_used(&key).unwrap();
        assert_eq!(witness.root_with_leaf(Fr::zero()), empty_root());
        assert_eq!(witness.root_with_leaf(Fr::one()), map.root());
        assert!(map.is_used(&key));
        assert!(!map.is_used(&Fr::from(0xabcdee)));
        assert_eq!(map.set_used(&key), Err(AttestationError::NullifierReplay));
    }

    #[test]
    fn test_insert_order_does_not_matter() {
        let keys = [Fr::from(3), -Fr::from(9), Fr::from(1u64 << 40)];
        let mut forward = NullifierMap::new();
        let mut backward = NullifierMap::new();
        for key in keys.iter() {
            forward.set_used(key).unwrap();
        }
        for key in keys.iter().rev() {
            backward.set_used(key).unwrap();
        }
        assert_eq!(forward.root(), backward.root());
    }

    #[test]
    fn test_circuit_fold_matches_native() {
        let mut map = NullifierMap::new();
        map.set_used(&Fr::from(17)).unwrap();
        let old_root = map.root();

        let key = Fr::from(99);
        let witness = map.witness(&key);
        let (new_root, verdict, satisfied) = run_fold(key, &witness, old_root);
        map.set_used(&key).unwrap();

        assert!(verdict.is_ok());
        assert!(satisfied);
        assert_eq!(new_root, map.root());
    }

    #[test]
    fn test_circuit_detects_replay() {
        let mut map = NullifierMap::new();
        let key = Fr::from(99);
        map.set_used(&key).unwrap();

        let (_, verdict, satisfied) = run_fold(key, &map.witness(&key), map.root());
        assert_eq!(verdict, Err(AttestationError::NullifierReplay));
        assert!(!satisfied);
    }

    #[test]
    fn test_circuit_detects_foreign_witness() {
        let map = NullifierMap::new();
        let (_, verdict, satisfied) = run_fold(Fr::from(99), &map.witness(&Fr::from(98)), map.root());
        assert_eq!(verdict, Err(AttestationError::NullifierWitnessMismatch));
        assert!(!satisfied);
    }

    #[test]
    fn test_witness_shape_validation() {
        let mut witness = NullifierMap::new().witness(&Fr::one());
        assert!(witness.validate().is_ok());
        witness.siblings.pop();
        assert!(witness.validate().is_err());
    }
}
