// Poseidon hash on Axiom halo2_base
// Reference: https://github.com/axiom-crypto/halo2-lib
//
// One hasher per circuit: constants are loaded once by create_poseidon_hasher and
// reused for every hash (whitelist path, nullifier map, signature challenge).

use halo2_base::{
    gates::{circuit::builder::RangeCircuitBuilder, circuit::CircuitBuilderStage, GateChip, GateInstructions},
    halo2_proofs::halo2curves::bn256::Fr,
    poseidon::hasher::{spec::OptimizedPoseidonSpec, PoseidonHasher},
    utils::BigPrimeField,
    AssignedValue, Context,
};
use once_cell::sync::Lazy;
use std::cell::RefCell;

// Poseidon parameters (aligned with Axiom standard)
pub const T: usize = 3; // State size
pub const RATE: usize = 2; // Absorption rate (inputs per permutation)
pub const R_F: usize = 8; // Full rounds
pub const R_P: usize = 57; // Partial rounds

/// Create a hasher with constants loaded into `ctx`.
pub fn create_poseidon_hasher<F: BigPrimeField>(
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
) -> PoseidonHasher<F, T, RATE> {
    let mut poseidon =
        PoseidonHasher::<F, T, RATE>::new(OptimizedPoseidonSpec::new::<R_F, R_P, 0>());
    poseidon.initialize_consts(ctx, gate);
    poseidon
}

/// Hash two field elements (Merkle internal nodes, leaf of a public key)
///
/// Non-commutative: hash(a, b) != hash(b, a). Input length provides domain
/// separation from hashes of other arity.
pub fn hash_pair_with_hasher<F: BigPrimeField>(
    hasher: &PoseidonHasher<F, T, RATE>,
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    left: AssignedValue<F>,
    right: AssignedValue<F>,
) -> AssignedValue<F> {
    hasher.hash_fix_len_array(ctx, gate, &[left, right])
}

/// Hash a fixed-length array of any arity
pub fn hash_with_hasher<F: BigPrimeField>(
    hasher: &PoseidonHasher<F, T, RATE>,
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    inputs: &[AssignedValue<F>],
) -> AssignedValue<F> {
    hasher.hash_fix_len_array(ctx, gate, inputs)
}

static NATIVE_SPEC: Lazy<OptimizedPoseidonSpec<Fr, T, RATE>> =
    Lazy::new(|| OptimizedPoseidonSpec::new::<R_F, R_P, 0>());

/// Hashes a native hasher absorbs before its witness context is dropped
const NATIVE_REBUILD_AFTER: usize = 1024;

/// Circuit hasher on a witness-only builder, constants loaded once.
struct NativeHasher {
    builder: RangeCircuitBuilder<Fr>,
    gate: GateChip<Fr>,
    hasher: PoseidonHasher<Fr, T, RATE>,
    uses: usize,
}

impl NativeHasher {
    fn new() -> Self {
        let mut builder = RangeCircuitBuilder::<Fr>::from_stage(CircuitBuilderStage::Mock);
        let gate = GateChip::<Fr>::default();
        let mut hasher = PoseidonHasher::<Fr, T, RATE>::new(NATIVE_SPEC.clone());
        hasher.initialize_consts(builder.main(0), &gate);
        Self { builder, gate, hasher, uses: 0 }
    }

    fn hash(&mut self, inputs: &[Fr]) -> Fr {
        self.uses += 1;
        let ctx = self.builder.main(0);
        let assigned: Vec<_> = inputs.iter().map(|v| ctx.load_witness(*v)).collect();
        *self.hasher.hash_fix_len_array(ctx, &self.gate, &assigned).value()
    }
}

thread_local! {
    static NATIVE_HASHER: RefCell<NativeHasher> = RefCell::new(NativeHasher::new());
}

/// Out-of-circuit Poseidon with exactly the in-circuit parameters.
///
/// Runs the circuit hasher on a cached witness-only builder, so the native
/// value can never drift from what the constraints compute.
pub fn poseidon_native(inputs: &[Fr]) -> Fr {
    NATIVE_HASHER.with(|cell| {
        let mut native = cell.borrow_mut();
        if native.uses >= NATIVE_REBUILD_AFTER {
            *native = NativeHasher::new();
        }
        native.hash(inputs)
    })
}

pub fn hash_pair_native(left: Fr, right: Fr) -> Fr {
    poseidon_native(&[left, right])
}
