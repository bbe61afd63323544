// Baby Jubjub twisted Edwards curve over the BN254 scalar field
//
//   a*x^2 + y^2 = 1 + d*x^2*y^2,  a = 168700, d = 168696
//
// Voter keys and signatures live on the prime-order subgroup generated by B8.
// The addition law is complete for this (a, d), so every on-curve sum has
// nonzero denominators and `div_unsafe` is safe on curve points.

use halo2_base::{
    gates::GateInstructions,
    halo2_proofs::halo2curves::{bn256::Fr, ff::Field},
    AssignedValue, Context,
    QuantumCell::Constant,
};
use num_bigint::BigUint;
use once_cell::sync::Lazy;

pub const EDWARDS_A: u64 = 168700;
pub const EDWARDS_D: u64 = 168696;

/// Bit length of the subgroup order
pub const SCALAR_BITS: usize = 251;

/// Order l of the subgroup generated by B8
pub static SUBGROUP_ORDER: Lazy<BigUint> = Lazy::new(|| {
    BigUint::from_slice(&[
        0x392126f1, 0x677297dc, 0x3920ee0a, 0xab3eedb8, 0xd0302b0b, 0x370a08b6, 0x5c263405,
        0x060c89ce,
    ])
});

/// 2^i * B8 for every scalar bit
static BASE_POWERS: Lazy<Vec<Point>> = Lazy::new(|| {
    let mut powers = Vec::with_capacity(SCALAR_BITS);
    let mut current = Point::base();
    for _ in 0..SCALAR_BITS {
        powers.push(current);
        current = current.add(&current);
    }
    powers
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: Fr,
    pub y: Fr,
}

impl Point {
    pub fn identity() -> Self {
        Self { x: Fr::ZERO, y: Fr::ONE }
    }

    /// Generator of the prime-order subgroup (B8 = 8 * G)
    pub fn base() -> Self {
        Self {
            x: Fr::from_raw([
                0x2893f3f6bb957051,
                0x2ab8d8010534e0b6,
                0x4eacb2e09d6277c1,
                0x0bb77a6ad63e739b,
            ]),
            y: Fr::from_raw([
                0x4b3c257a872d7d8b,
                0xfce0051fb9e13377,
                0x25572e1cd16bf9ed,
                0x25797203f7a0b249,
            ]),
        }
    }

    pub fn is_on_curve(&self) -> bool {
        let x2 = self.x.square();
        let y2 = self.y.square();
        Fr::from(EDWARDS_A) * x2 + y2 == Fr::ONE + Fr::from(EDWARDS_D) * x2 * y2
    }

    pub fn add(&self, other: &Point) -> Point {
        let x1x2 = self.x * other.x;
        let y1y2 = self.y * other.y;
        let dt = Fr::from(EDWARDS_D) * x1x2 * y1y2;
        // Off-curve inputs may hit a zero denominator; the result is then
        // garbage and fails any later equality check.
        let x_den = (Fr::ONE + dt).invert().unwrap_or(Fr::ZERO);
        let y_den = (Fr::ONE - dt).invert().unwrap_or(Fr::ZERO);
        Point {
            x: (self.x * other.y + self.y * other.x) * x_den,
            y: (y1y2 - Fr::from(EDWARDS_A) * x1x2) * y_den,
        }
    }

    pub fn mul_scalar(&self, scalar: &BigUint) -> Point {
        let mut acc = Point::identity();
        let mut doubling = *self;
        for i in 0..scalar.bits() {
            if scalar.bit(i) {
                acc = acc.add(&doubling);
            }
            doubling = doubling.add(&doubling);
        }
        acc
    }

    /// scalar * B8 from the precomputed table
    pub fn mul_base(scalar: &BigUint) -> Point {
        BASE_POWERS
            .iter()
            .enumerate()
            .filter(|(i, _)| scalar.bit(*i as u64))
            .fold(Point::identity(), |acc, (_, p)| acc.add(p))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AssignedPoint {
    pub x: AssignedValue<Fr>,
    pub y: AssignedValue<Fr>,
}

pub fn load_point(ctx: &mut Context<Fr>, point: &Point) -> AssignedPoint {
    AssignedPoint { x: ctx.load_witness(point.x), y: ctx.load_witness(point.y) }
}

fn load_constant_point(ctx: &mut Context<Fr>, point: &Point) -> AssignedPoint {
    AssignedPoint { x: ctx.load_constant(point.x), y: ctx.load_constant(point.y) }
}

/// Boolean cell: 1 iff `p` satisfies the curve equation
pub fn is_on_curve(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    p: &AssignedPoint,
) -> AssignedValue<Fr> {
    let x2 = gate.mul(ctx, p.x, p.x);
    let y2 = gate.mul(ctx, p.y, p.y);
    let lhs = gate.mul_add(ctx, x2, Constant(Fr::from(EDWARDS_A)), y2);
    let x2y2 = gate.mul(ctx, x2, y2);
    let rhs = gate.mul_add(ctx, x2y2, Constant(Fr::from(EDWARDS_D)), Constant(Fr::ONE));
    gate.is_equal(ctx, lhs, rhs)
}

pub fn add(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    p: &AssignedPoint,
    q: &AssignedPoint,
) -> AssignedPoint {
    let x1y2 = gate.mul(ctx, p.x, q.y);
    let y1x2 = gate.mul(ctx, p.y, q.x);
    let x1x2 = gate.mul(ctx, p.x, q.x);
    let y1y2 = gate.mul(ctx, p.y, q.y);
    let t = gate.mul(ctx, x1x2, y1y2);
    let dt = gate.mul(ctx, t, Constant(Fr::from(EDWARDS_D)));

    let x_num = gate.add(ctx, x1y2, y1x2);
    let x_den = gate.add(ctx, dt, Constant(Fr::ONE));
    let a_x1x2 = gate.mul(ctx, x1x2, Constant(Fr::from(EDWARDS_A)));
    let y_num = gate.sub(ctx, y1y2, a_x1x2);
    let y_den = gate.sub(ctx, Constant(Fr::ONE), dt);

    AssignedPoint {
        x: gate.div_unsafe(ctx, x_num, x_den),
        y: gate.div_unsafe(ctx, y_num, y_den),
    }
}

/// `sel ? a : b`
pub fn select(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    a: &AssignedPoint,
    b: &AssignedPoint,
    sel: AssignedValue<Fr>,
) -> AssignedPoint {
    AssignedPoint { x: gate.select(ctx, a.x, b.x, sel), y: gate.select(ctx, a.y, b.y, sel) }
}

/// `p` when `on_curve` is set, the identity otherwise. Keeps off-curve
/// witnesses away from the addition denominators.
pub fn or_identity(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    p: &AssignedPoint,
    on_curve: AssignedValue<Fr>,
) -> AssignedPoint {
    let identity = load_constant_point(ctx, &Point::identity());
    select(ctx, gate, p, &identity, on_curve)
}

/// Boolean cell: 1 iff both coordinates match
pub fn is_equal(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    p: &AssignedPoint,
    q: &AssignedPoint,
) -> AssignedValue<Fr> {
    let x_eq = gate.is_equal(ctx, p.x, q.x);
    let y_eq = gate.is_equal(ctx, p.y, q.y);
    gate.and(ctx, x_eq, y_eq)
}

/// scalar * B8 for little-endian scalar bits (at most SCALAR_BITS)
pub fn fixed_base_mul(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    bits: &[AssignedValue<Fr>],
) -> AssignedPoint {
    let mut acc = load_constant_point(ctx, &Point::identity());
    for (bit, power) in bits.iter().zip(BASE_POWERS.iter()) {
        let power = load_constant_point(ctx, power);
        let sum = add(ctx, gate, &acc, &power);
        acc = select(ctx, gate, &sum, &acc, *bit);
    }
    acc
}

/// scalar * base for little-endian scalar bits
pub fn variable_base_mul(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    base: &AssignedPoint,
    bits: &[AssignedValue<Fr>],
) -> AssignedPoint {
    let mut acc = load_constant_point(ctx, &Point::identity());
    let mut doubling = *base;
    for (i, bit) in bits.iter().enumerate() {
        let sum = add(ctx, gate, &acc, &doubling);
        acc = select(ctx, gate, &sum, &acc, *bit);
        if i + 1 < bits.len() {
            doubling = add(ctx, gate, &doubling, &doubling);
        }
    }
    acc
}
