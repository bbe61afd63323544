// Voter keys: Schnorr-Poseidon signatures and nullifier derivation
//
// Signature over message m with key pair (sk, PK = sk*B8):
//   R = k*B8,  c = Poseidon(R.x, R.y, PK.x, PK.y, m),  S = k + c*sk mod l
//   valid iff S < l and S*B8 == R + c*PK
//
// Nullifier key for a proposal: Poseidon(sk, proposalId, PK.x). The circuit
// proves PK == sk*B8 before recomputing it, so only the key holder can produce
// it and the same voter always lands on the same key for a given proposal.

use halo2_base::{
    gates::GateInstructions,
    halo2_proofs::halo2curves::bn256::Fr,
    poseidon::hasher::PoseidonHasher,
    utils::fe_to_biguint,
    AssignedValue, Context,
};
use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::{CryptoRng, RngCore};

use crate::babyjub::{
    self, fixed_base_mul, is_on_curve, or_identity, variable_base_mul, AssignedPoint, Point,
    SCALAR_BITS, SUBGROUP_ORDER,
};
use crate::constraints::{bits_less_than_constant, canonical_bits, Enforcer};
use crate::error::{AttestationError, Result};
use crate::poseidon_hash::{hash_with_hasher, poseidon_native, RATE, T};
use crate::utils::{biguint_to_field, field_to_biguint};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretKey(BigUint);

impl SecretKey {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen_biguint_range(&BigUint::from(1u32), &SUBGROUP_ORDER))
    }

    pub fn from_field(value: &Fr) -> Result<Self> {
        let scalar = field_to_biguint(value);
        if scalar.is_zero() || scalar >= *SUBGROUP_ORDER {
            return Err(AttestationError::InvalidWitness(
                "secret key must be in 1..l".into(),
            ));
        }
        Ok(Self(scalar))
    }

    pub fn to_field(&self) -> Fr {
        // l < p, so every valid scalar is a field element
        biguint_to_field(&self.0).unwrap_or_default()
    }

    pub fn public_key(&self) -> Point {
        Point::mul_base(&self.0)
    }

    pub fn sign(&self, msg: Fr) -> Signature {
        let pk = self.public_key();
        let mut nonce = fe_to_biguint(&poseidon_native(&[self.to_field(), msg])) % &*SUBGROUP_ORDER;
        if nonce.is_zero() {
            nonce = BigUint::from(1u32);
        }
        let r = Point::mul_base(&nonce);
        let c = fe_to_biguint(&challenge(&r, &pk, msg));
        let s = (nonce + c * &self.0) % &*SUBGROUP_ORDER;
        Signature { r, s: biguint_to_field(&s).unwrap_or_default() }
    }

    pub fn nullifier_key(&self, proposal_id: Fr) -> Fr {
        poseidon_native(&[self.to_field(), proposal_id, self.public_key().x])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    pub r: Point,
    pub s: Fr,
}

pub fn challenge(r: &Point, pk: &Point, msg: Fr) -> Fr {
    poseidon_native(&[r.x, r.y, pk.x, pk.y, msg])
}

pub fn verify(pk: &Point, msg: Fr, sig: &Signature) -> bool {
    let s = field_to_biguint(&sig.s);
    if s >= *SUBGROUP_ORDER || !pk.is_on_curve() || !sig.r.is_on_curve() {
        return false;
    }
    let c = fe_to_biguint(&challenge(&sig.r, pk, msg));
    Point::mul_base(&s) == sig.r.add(&pk.mul_scalar(&c))
}

// ============================================================================
// CIRCUIT
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct AssignedSignature {
    pub r: AssignedPoint,
    pub s: AssignedValue<Fr>,
}

pub fn load_signature(ctx: &mut Context<Fr>, sig: &Signature) -> AssignedSignature {
    AssignedSignature { r: babyjub::load_point(ctx, &sig.r), s: ctx.load_witness(sig.s) }
}

/// Little-endian bits of a subgroup scalar, constrained below l.
fn scalar_bits(
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    enforcer: &mut Enforcer,
    scalar: AssignedValue<Fr>,
    err: impl Fn() -> AttestationError,
) -> Vec<AssignedValue<Fr>> {
    enforcer.record(fe_to_biguint(scalar.value()) >= *SUBGROUP_ORDER, &err);
    let bits = gate.num_to_bits(ctx, scalar, SCALAR_BITS);
    let below_order = bits_less_than_constant(ctx, gate, &bits, &SUBGROUP_ORDER);
    enforcer.assert_true(ctx, gate, below_order, err);
    bits
}

/// Constrain `sig` to be a valid signature by `pk` over `msg`.
pub fn verify_signature(
    hasher: &PoseidonHasher<Fr, T, RATE>,
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    enforcer: &mut Enforcer,
    pk: &AssignedPoint,
    msg: AssignedValue<Fr>,
    sig: &AssignedSignature,
) {
    let pk_on_curve = is_on_curve(ctx, gate, pk);
    enforcer.assert_true(ctx, gate, pk_on_curve, || AttestationError::SignatureInvalid);
    let r_on_curve = is_on_curve(ctx, gate, &sig.r);
    enforcer.assert_true(ctx, gate, r_on_curve, || AttestationError::SignatureInvalid);
    let safe_pk = or_identity(ctx, gate, pk, pk_on_curve);
    let safe_r = or_identity(ctx, gate, &sig.r, r_on_curve);

    let s_bits = scalar_bits(ctx, gate, enforcer, sig.s, || AttestationError::SignatureInvalid);

    let c = hash_with_hasher(hasher, ctx, gate, &[sig.r.x, sig.r.y, pk.x, pk.y, msg]);
    let c_bits = canonical_bits(ctx, gate, c);

    let lhs = fixed_base_mul(ctx, gate, &s_bits);
    let c_pk = variable_base_mul(ctx, gate, &safe_pk, &c_bits);
    let rhs = babyjub::add(ctx, gate, &safe_r, &c_pk);

    let matches = babyjub::is_equal(ctx, gate, &lhs, &rhs);
    enforcer.assert_true(ctx, gate, matches, || AttestationError::SignatureInvalid);
}

/// Constrain `pk == sk*B8` and `nullifier_key == Poseidon(sk, proposal_id, pk.x)`.
pub fn verify_nullifier(
    hasher: &PoseidonHasher<Fr, T, RATE>,
    ctx: &mut Context<Fr>,
    gate: &impl GateInstructions<Fr>,
    enforcer: &mut Enforcer,
    secret: AssignedValue<Fr>,
    pk: &AssignedPoint,
    proposal_id: AssignedValue<Fr>,
    nullifier_key: AssignedValue<Fr>,
) {
    let sk_bits = scalar_bits(ctx, gate, enforcer, secret, || {
        AttestationError::NullifierDerivationInvalid
    });
    let derived_pk = fixed_base_mul(ctx, gate, &sk_bits);
    let owns_key = babyjub::is_equal(ctx, gate, &derived_pk, pk);
    enforcer.assert_true(ctx, gate, owns_key, || AttestationError::NullifierDerivationInvalid);

    let derived = hash_with_hasher(hasher, ctx, gate, &[secret, proposal_id, pk.x]);
    enforcer.constrain_equal(ctx, &derived, &nullifier_key, || {
        AttestationError::NullifierDerivationInvalid
    });
}
