// Constrained modular arithmetic over single-limb integers
//
// Every operand used by the Paillier gadgets is below 2^MODULUS_BITS, so the
// product of two reduced values stays below 2^252 and never wraps the BN254
// scalar field. Each multiplication is reduced immediately through divmod.

use halo2_base::{
    gates::{GateInstructions, RangeInstructions},
    utils::{biguint_to_fe, fe_to_biguint, BigPrimeField},
    AssignedValue, Context,
};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::constraints::Enforcer;
use crate::error::AttestationError;

/// Bit bound on moduli, quotients and remainders (n_squared < 2^126)
pub const MODULUS_BITS: usize = 126;

/// Exponent width: covers a 63-bit Paillier modulus and any plaintext below it
pub const EXPONENT_BITS: usize = 63;

/// `x = q * m + r` with `0 <= r < m`, both witnessed and range-checked.
pub fn divmod<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    x: AssignedValue<F>,
    m: AssignedValue<F>,
) -> (AssignedValue<F>, AssignedValue<F>) {
    let (q, r) = divmod_native(&fe_to_biguint(x.value()), &fe_to_biguint(m.value()));
    let q = ctx.load_witness(biguint_to_fe(&q));
    let r = ctx.load_witness(biguint_to_fe(&r));
    constrain_divmod(ctx, range, enforcer, x, m, q, r);
    (q, r)
}

/// Constraints behind `divmod`, split out so claimed witnesses can be checked
/// directly.
pub(crate) fn constrain_divmod<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    x: AssignedValue<F>,
    m: AssignedValue<F>,
    q: AssignedValue<F>,
    r: AssignedValue<F>,
) {
    enforcer.range_check(ctx, range, q, MODULUS_BITS, || AttestationError::RangeOverflow {
        context: "divmod quotient",
        bits: MODULUS_BITS,
    });
    enforcer.range_check(ctx, range, r, MODULUS_BITS, || AttestationError::RangeOverflow {
        context: "divmod remainder",
        bits: MODULUS_BITS,
    });

    // q < 2^126, m < 2^126, r < m: q*m + r cannot wrap the field
    let recomposed = range.gate().mul_add(ctx, q, m, r);
    enforcer.constrain_equal(ctx, &recomposed, &x, || AttestationError::RangeOverflow {
        context: "divmod recomposition",
        bits: MODULUS_BITS,
    });

    // Strict remainder bound: a bit-width check alone would admit r >= m
    enforcer.check_less_than(ctx, range, r, m, MODULUS_BITS, || {
        AttestationError::RangeOverflow {
            context: "divmod remainder not below modulus",
            bits: MODULUS_BITS,
        }
    });
}

pub fn mulmod<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    a: AssignedValue<F>,
    b: AssignedValue<F>,
    m: AssignedValue<F>,
) -> AssignedValue<F> {
    let product = range.gate().mul(ctx, a, b);
    divmod(ctx, range, enforcer, product, m).1
}

pub fn squaremod<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    a: AssignedValue<F>,
    m: AssignedValue<F>,
) -> AssignedValue<F> {
    mulmod(ctx, range, enforcer, a, a, m)
}

/// `base^exponent mod m`, square-and-multiply from the most significant of
/// `exp_bits` bits.
///
/// Leading zero bits leave the accumulator untouched until the first set bit.
/// A zero exponent is selected to 1 explicitly.
pub fn modpow<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    base: AssignedValue<F>,
    exponent: AssignedValue<F>,
    m: AssignedValue<F>,
    exp_bits: usize,
) -> AssignedValue<F> {
    let gate = range.gate();

    enforcer.record(
        fe_to_biguint(exponent.value()).bits() as usize > exp_bits,
        || AttestationError::RangeOverflow { context: "modpow exponent", bits: exp_bits },
    );
    let bits = gate.num_to_bits(ctx, exponent, exp_bits);

    let base = divmod(ctx, range, enforcer, base, m).1;
    let one = ctx.load_constant(F::ONE);
    let mut acc = one;
    let mut started = ctx.load_constant(F::ZERO);

    for bit in bits.iter().rev() {
        let squared = squaremod(ctx, range, enforcer, acc, m);
        let multiplied = mulmod(ctx, range, enforcer, squared, base, m);
        let stepped = gate.select(ctx, multiplied, squared, *bit);

        started = gate.or(ctx, started, *bit);
        acc = gate.select(ctx, stepped, acc, started);
    }

    let exponent_is_zero = gate.is_zero(ctx, exponent);
    gate.select(ctx, one, acc, exponent_is_zero)
}

// ============================================================================
// NATIVE COUNTERPARTS (constant operands, witness preparation)
// ============================================================================

/// Quotient and remainder; a zero modulus yields `(0, x)` so that witness
/// generation never divides by zero (the remainder bound then fails).
pub fn divmod_native(x: &BigUint, m: &BigUint) -> (BigUint, BigUint) {
    if m.is_zero() {
        return (BigUint::zero(), x.clone());
    }
    x.div_rem(m)
}

pub fn mulmod_native(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a * b) % m
}

pub fn modpow_native(base: &BigUint, exponent: &BigUint, m: &BigUint) -> BigUint {
    if m.is_one() {
        return BigUint::zero();
    }
    base.modpow(exponent, m)
}
