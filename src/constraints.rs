// Constraint helpers shared by every circuit
//
// The Enforcer emits each constraint exactly as a bare gate call would, and in
// witness-carrying stages (Mock/Prover) also compares native values so that the
// first violated check surfaces as a typed AttestationError before any proof is
// produced. Keygen synthesis runs on shape-only witnesses and records nothing.

use halo2_base::{
    gates::{circuit::CircuitBuilderStage, GateInstructions, RangeInstructions},
    utils::{fe_to_biguint, modulus, BigPrimeField},
    AssignedValue, Context,
    QuantumCell::Constant,
};
use num_bigint::BigUint;
use tracing::warn;

use crate::error::{AttestationError, Result};

#[derive(Debug)]
pub struct Enforcer {
    witnessed: bool,
    failure: Option<AttestationError>,
}

impl Enforcer {
    pub fn new(stage: CircuitBuilderStage) -> Self {
        Self {
            witnessed: !matches!(stage, CircuitBuilderStage::Keygen),
            failure: None,
        }
    }

    /// Record `err` if `failed` (first failure wins).
    pub fn record(&mut self, failed: bool, err: impl FnOnce() -> AttestationError) {
        if self.witnessed && failed && self.failure.is_none() {
            let err = err();
            warn!(error = %err, "constraint violated during synthesis");
            self.failure = Some(err);
        }
    }

    pub fn constrain_equal<F: BigPrimeField>(
        &mut self,
        ctx: &mut Context<F>,
        a: &AssignedValue<F>,
        b: &AssignedValue<F>,
        err: impl FnOnce() -> AttestationError,
    ) {
        ctx.constrain_equal(a, b);
        self.record(a.value() != b.value(), err);
    }

    /// Constrain a boolean cell to be 1.
    pub fn assert_true<F: BigPrimeField>(
        &mut self,
        ctx: &mut Context<F>,
        gate: &impl GateInstructions<F>,
        flag: AssignedValue<F>,
        err: impl FnOnce() -> AttestationError,
    ) {
        gate.assert_is_const(ctx, &flag, &F::ONE);
        self.record(*flag.value() != F::ONE, err);
    }

    pub fn range_check<F: BigPrimeField>(
        &mut self,
        ctx: &mut Context<F>,
        range: &impl RangeInstructions<F>,
        a: AssignedValue<F>,
        bits: usize,
        err: impl FnOnce() -> AttestationError,
    ) {
        range.range_check(ctx, a, bits);
        self.record(exceeds_bits(a.value(), bits), err);
    }

    /// Constrain `a < b` where both are already known to fit in `bits` bits.
    pub fn check_less_than<F: BigPrimeField>(
        &mut self,
        ctx: &mut Context<F>,
        range: &impl RangeInstructions<F>,
        a: AssignedValue<F>,
        b: AssignedValue<F>,
        bits: usize,
        err: impl FnOnce() -> AttestationError,
    ) {
        range.check_less_than(ctx, a, b, bits);
        self.record(fe_to_biguint(a.value()) >= fe_to_biguint(b.value()), err);
    }

    pub fn failure(&self) -> Option<&AttestationError> {
        self.failure.as_ref()
    }

    pub fn finish(self) -> Result<()> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn exceeds_bits<F: BigPrimeField>(value: &F, bits: usize) -> bool {
    fe_to_biguint(value).bits() as usize > bits
}

/// Boolean cell: 1 iff the little-endian `bits` encode an integer strictly
/// below the constant `bound`.
pub fn bits_less_than_constant<F: BigPrimeField>(
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    bits: &[AssignedValue<F>],
    bound: &BigUint,
) -> AssignedValue<F> {
    if bound.bits() as usize > bits.len() {
        return ctx.load_constant(F::ONE);
    }

    // MSB-first scan: `lt` latches once a prefix is smaller than the bound,
    // `eq` tracks whether the prefix still matches it exactly.
    let mut lt = ctx.load_constant(F::ZERO);
    let mut eq = ctx.load_constant(F::ONE);
    for (i, bit) in bits.iter().enumerate().rev() {
        let not_bit = gate.not(ctx, *bit);
        if bound.bit(i as u64) {
            let drops_below = gate.and(ctx, eq, not_bit);
            lt = gate.or(ctx, lt, drops_below);
            eq = gate.and(ctx, eq, *bit);
        } else {
            eq = gate.and(ctx, eq, not_bit);
        }
    }
    lt
}

/// Decompose `value` into `F::NUM_BITS` little-endian bits and prove the bit
/// string is the canonical representative (strictly below the field modulus),
/// so no two bit strings share a field value.
pub fn canonical_bits<F: BigPrimeField>(
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    value: AssignedValue<F>,
) -> Vec<AssignedValue<F>> {
    let bits = gate.num_to_bits(ctx, value, F::NUM_BITS as usize);
    let canonical = bits_less_than_constant(ctx, gate, &bits, &modulus::<F>());
    gate.assert_is_const(ctx, &canonical, &F::ONE);
    bits
}

/// Recompose little-endian bits into a field element.
pub fn bits_to_num<F: BigPrimeField>(
    ctx: &mut Context<F>,
    gate: &impl GateInstructions<F>,
    bits: &[AssignedValue<F>],
) -> AssignedValue<F> {
    let powers = gate.pow_of_two()[..bits.len()].iter().map(|p| Constant(*p));
    gate.inner_product(ctx, bits.iter().copied(), powers)
}
