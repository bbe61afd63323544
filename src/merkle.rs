// Fixed-depth Merkle inclusion for the voter whitelist
//
// Leaves are Poseidon(pk.x, pk.y) of eligible voting keys. The tree is kept by
// an external registrar; the circuit only needs the root, a leaf index and one
// sibling per level.

use halo2_base::{
    gates::GateInstructions,
    halo2_proofs::halo2curves::bn256::Fr,
    poseidon::hasher::PoseidonHasher,
    utils::BigPrimeField,
    AssignedValue, Context,
};

use crate::babyjub::Point;
use crate::constraints::Enforcer;
use crate::error::{AttestationError, Result};
use crate::poseidon_hash::{hash_pair_native, hash_pair_with_hasher, RATE, T};

/// Whitelist leaf for a voting key
pub fn whitelist_leaf(pk: &Point) -> Fr {
    hash_pair_native(pk.x, pk.y)
}

/// Validate Merkle path inputs BEFORE entering the circuit
///
/// Malformed requests are rejected here with a typed error instead of reaching
/// synthesis with the wrong shape.
pub fn validate_merkle_inputs(path_len: usize, leaf_index: u64, tree_depth: usize) -> Result<()> {
    if path_len != tree_depth {
        return Err(AttestationError::InvalidWitness(format!(
            "whitelist path has {} siblings, expected {} (one per level)",
            path_len, tree_depth
        )));
    }
    if tree_depth < 64 && leaf_index >> tree_depth != 0 {
        return Err(AttestationError::InvalidWitness(format!(
            "leaf index {} does not fit a depth-{} tree",
            leaf_index, tree_depth
        )));
    }
    Ok(())
}

/// Walk `path` from `leaf` to the root.
///
/// Direction bits come from a constrained decomposition of `leaf_index`
/// (LSB = leaf level), so the prover cannot reorder siblings. Bit 0 means the
/// current node is the left child.
pub fn compute_merkle_root<F: BigPrimeField>(
    hasher: &PoseidonHasher<F, T, RATE>,
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    leaf: AssignedValue<F>,
    leaf_index: AssignedValue<F>,
    path: &[AssignedValue<F>],
) -> AssignedValue<F> {
    let index_bits = gate.num_to_bits(ctx, leaf_index, path.len());

    let mut current = leaf;
    for (sibling, bit) in path.iter().zip(index_bits.iter()) {
        let left = gate.select(ctx, *sibling, current, *bit);
        let right = gate.select(ctx, current, *sibling, *bit);
        current = hash_pair_with_hasher(hasher, ctx, gate, left, right);
    }
    current
}

/// Constrain that `leaf` sits at `leaf_index` under `root`.
pub fn verify_inclusion<F: BigPrimeField>(
    hasher: &PoseidonHasher<F, T, RATE>,
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    enforcer: &mut Enforcer,
    root: AssignedValue<F>,
    leaf: AssignedValue<F>,
    leaf_index: AssignedValue<F>,
    path: &[AssignedValue<F>],
) {
    let computed = compute_merkle_root(hasher, ctx, gate, leaf, leaf_index, path);
    enforcer.constrain_equal(ctx, &computed, &root, || AttestationError::EligibilityFailure);
}

/// Native whitelist tree, zero-padded to `2^depth` leaves.
#[derive(Clone, Debug)]
pub struct WhitelistTree {
    depth: usize,
    /// levels[0] = leaves, levels[depth] = [root]
    levels: Vec<Vec<Fr>>,
}

impl WhitelistTree {
    pub fn new(leaves: &[Fr], depth: usize) -> Result<Self> {
        let capacity = 1usize << depth;
        if leaves.len() > capacity {
            return Err(AttestationError::InvalidWitness(format!(
                "{} leaves exceed depth-{} capacity {}",
                leaves.len(),
                depth,
                capacity
            )));
        }

        let mut level = leaves.to_vec();
        level.resize(capacity, Fr::zero());
        let mut levels = vec![level];
        for _ in 0..depth {
            let below = levels.last().map(Vec::as_slice).unwrap_or_default();
            let next = below
                .chunks(2)
                .map(|pair| hash_pair_native(pair[0], pair[1]))
                .collect();
            levels.push(next);
        }
        Ok(Self { depth, levels })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> Fr {
        self.levels[self.depth][0]
    }

    pub fn leaf(&self, index: usize) -> Option<Fr> {
        self.levels[0].get(index).copied()
    }

    pub fn index_of(&self, leaf: &Fr) -> Option<usize> {
        self.levels[0].iter().position(|l| l == leaf)
    }

    /// Sibling hashes from the leaf level up.
    pub fn path(&self, index: usize) -> Result<Vec<Fr>> {
        if index >= self.levels[0].len() {
            return Err(AttestationError::InvalidWitness(format!(
                "leaf index {} outside tree",
                index
            )));
        }
        Ok((0..self.depth)
            .map(|level| self.levels[level][(index >> level) ^ 1])
            .collect())
    }
}
