// Paillier encryption: in-circuit gadgets plus native key material
//
//   encrypt(m, r) = g^m * r^n mod n^2
//   add(c1, c2)   = c1 * c2 mod n^2      (decrypts to m1 + m2)
//
// The modulus is capped at 63 bits so n^2 fits one 126-bit limb.

use halo2_base::{
    gates::{GateInstructions, RangeInstructions},
    halo2_proofs::halo2curves::bn256::Fr,
    utils::{biguint_to_fe, fe_to_biguint, BigPrimeField},
    AssignedValue, Context,
};
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive};
use rand::{CryptoRng, RngCore};

use crate::arithmetic::{
    divmod, modpow, modpow_native, mulmod, mulmod_native, EXPONENT_BITS, MODULUS_BITS,
};
use crate::constraints::Enforcer;
use crate::error::{AttestationError, Result};
use crate::utils::{biguint_to_field, field_to_biguint};

/// Maximum bit length of n
pub const KEY_BITS: usize = 63;

/// Encryption key cells, constrained well-formed by `constrain_encryption_key`.
#[derive(Clone, Copy, Debug)]
pub struct AssignedEncryptionKey<F: BigPrimeField> {
    pub n: AssignedValue<F>,
    pub g: AssignedValue<F>,
    pub n_squared: AssignedValue<F>,
}

impl<F: BigPrimeField> AssignedEncryptionKey<F> {
    pub fn cells(&self) -> [AssignedValue<F>; 3] {
        [self.n, self.g, self.n_squared]
    }
}

/// Check `n_squared == n * n`, `n < 2^63` and `g < n_squared`.
pub fn constrain_encryption_key<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    n: AssignedValue<F>,
    g: AssignedValue<F>,
    n_squared: AssignedValue<F>,
) -> AssignedEncryptionKey<F> {
    enforcer.range_check(ctx, range, n, KEY_BITS, || {
        AttestationError::InvalidEncryptionKey(format!("n exceeds {} bits", KEY_BITS))
    });
    let computed = range.gate().mul(ctx, n, n);
    enforcer.constrain_equal(ctx, &computed, &n_squared, || {
        AttestationError::InvalidEncryptionKey("n_squared != n * n".into())
    });
    enforcer.range_check(ctx, range, g, MODULUS_BITS, || {
        AttestationError::InvalidEncryptionKey(format!("g exceeds {} bits", MODULUS_BITS))
    });
    enforcer.check_less_than(ctx, range, g, n_squared, MODULUS_BITS, || {
        AttestationError::InvalidEncryptionKey("g not below n_squared".into())
    });
    AssignedEncryptionKey { n, g, n_squared }
}

/// Constrain `value` to be a unit mod n by witnessing its inverse.
///
/// A value sharing a factor with n encrypts to a ciphertext that absorbs
/// every tally it is folded into.
pub fn constrain_invertible<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    key: &AssignedEncryptionKey<F>,
    value: AssignedValue<F>,
    err: impl FnOnce() -> AttestationError,
) {
    let reduced = divmod(ctx, range, enforcer, value, key.n).1;
    let inverse = mod_inverse(&fe_to_biguint(reduced.value()), &fe_to_biguint(key.n.value()))
        .unwrap_or_default();
    let inverse = ctx.load_witness(biguint_to_fe(&inverse));
    enforcer.range_check(ctx, range, inverse, KEY_BITS, || AttestationError::RangeOverflow {
        context: "inverse mod n",
        bits: KEY_BITS,
    });
    let product = mulmod(ctx, range, enforcer, reduced, inverse, key.n);
    let one = ctx.load_constant(F::ONE);
    enforcer.constrain_equal(ctx, &product, &one, err);
}

/// `g^msg * randomness^n mod n_squared`, with randomness a unit mod n.
///
/// `err` is recorded when the randomness is not invertible.
pub fn encrypt<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    key: &AssignedEncryptionKey<F>,
    msg: AssignedValue<F>,
    randomness: AssignedValue<F>,
    err: impl FnOnce() -> AttestationError,
) -> AssignedValue<F> {
    enforcer.range_check(ctx, range, randomness, MODULUS_BITS, || {
        AttestationError::RangeOverflow { context: "encryption randomness", bits: MODULUS_BITS }
    });
    constrain_invertible(ctx, range, enforcer, key, randomness, err);
    let g_m = modpow(ctx, range, enforcer, key.g, msg, key.n_squared, EXPONENT_BITS);
    let r_n = modpow(ctx, range, enforcer, randomness, key.n, key.n_squared, EXPONENT_BITS);
    mulmod(ctx, range, enforcer, g_m, r_n, key.n_squared)
}

pub fn add_ciphertexts<F: BigPrimeField>(
    ctx: &mut Context<F>,
    range: &impl RangeInstructions<F>,
    enforcer: &mut Enforcer,
    key: &AssignedEncryptionKey<F>,
    c1: AssignedValue<F>,
    c2: AssignedValue<F>,
) -> AssignedValue<F> {
    mulmod(ctx, range, enforcer, c1, c2, key.n_squared)
}

// ============================================================================
// NATIVE SCHEME
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionKey {
    pub n: BigUint,
    pub g: BigUint,
    pub n_squared: BigUint,
}

impl EncryptionKey {
    /// Standard key with g = n + 1
    pub fn from_modulus(n: BigUint) -> Result<Self> {
        if n.bits() as usize > KEY_BITS || n <= BigUint::one() {
            return Err(AttestationError::InvalidEncryptionKey(format!(
                "modulus must be in 2..2^{}",
                KEY_BITS
            )));
        }
        let n_squared = &n * &n;
        let g = &n + 1u32;
        Ok(Self { n, g, n_squared })
    }

    pub fn from_fields(n: &Fr, g: &Fr, n_squared: &Fr) -> Self {
        Self {
            n: field_to_biguint(n),
            g: field_to_biguint(g),
            n_squared: field_to_biguint(n_squared),
        }
    }

    pub fn to_fields(&self) -> Result<[Fr; 3]> {
        Ok([
            biguint_to_field(&self.n)?,
            biguint_to_field(&self.g)?,
            biguint_to_field(&self.n_squared)?,
        ])
    }

    pub fn encrypt(&self, msg: &BigUint, randomness: &BigUint) -> BigUint {
        let g_m = modpow_native(&self.g, msg, &self.n_squared);
        let r_n = modpow_native(randomness, &self.n, &self.n_squared);
        mulmod_native(&g_m, &r_n, &self.n_squared)
    }

    pub fn add(&self, c1: &BigUint, c2: &BigUint) -> BigUint {
        mulmod_native(c1, c2, &self.n_squared)
    }

    /// Fresh randomness in [1, n) coprime to n
    pub fn sample_randomness<R: RngCore + CryptoRng>(&self, rng: &mut R) -> BigUint {
        loop {
            let r = rng.gen_biguint_range(&BigUint::one(), &self.n);
            if r.gcd(&self.n).is_one() {
                return r;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct DecryptionKey {
    lambda: BigUint,
    mu: BigUint,
}

#[derive(Clone, Debug)]
pub struct Keypair {
    pub public: EncryptionKey,
    pub secret: DecryptionKey,
}

impl Keypair {
    pub fn from_primes(p: u64, q: u64) -> Result<Self> {
        if p == q || !is_prime(p) || !is_prime(q) {
            return Err(AttestationError::InvalidEncryptionKey(
                "factors must be distinct primes".into(),
            ));
        }
        let public = EncryptionKey::from_modulus(BigUint::from(p) * BigUint::from(q))?;

        let lambda = BigUint::from(p - 1).lcm(&BigUint::from(q - 1));
        // With g = n + 1, L(g^lambda mod n^2) = lambda mod n
        let mu = mod_inverse(&(&lambda % &public.n), &public.n).ok_or_else(|| {
            AttestationError::InvalidEncryptionKey("lambda not invertible mod n".into())
        })?;

        Ok(Self { public, secret: DecryptionKey { lambda, mu } })
    }

    /// Random key from two 31-bit primes
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let p = random_prime(rng);
        let mut q = random_prime(rng);
        while q == p {
            q = random_prime(rng);
        }
        Self::from_primes(p, q)
    }

    /// Plaintext of `ciphertext`; fails for values `encrypt` cannot produce.
    pub fn decrypt(&self, ciphertext: &BigUint) -> Result<BigUint> {
        let n = &self.public.n;
        if *ciphertext >= self.public.n_squared || !ciphertext.gcd(n).is_one() {
            return Err(AttestationError::InvalidWitness(
                "ciphertext is not a unit mod n_squared".into(),
            ));
        }
        let u = modpow_native(ciphertext, &self.secret.lambda, &self.public.n_squared);
        let l = (u - 1u32) / n;
        Ok((l * &self.secret.mu) % n)
    }
}

fn random_prime<R: RngCore + CryptoRng>(rng: &mut R) -> u64 {
    loop {
        let candidate = (rng.next_u64() & 0x7fff_ffff) | 0x4000_0001;
        if is_prime(candidate) {
            return candidate;
        }
    }
}

fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let (a, m) = (a.to_i128()?, m.to_i128()?);
    if m <= 1 {
        return None;
    }
    let (mut old_r, mut r) = (a, m);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let quotient = old_r / r;
        (old_r, r) = (r, old_r - quotient * r);
        (old_s, s) = (s, old_s - quotient * s);
    }
    if old_r != 1 {
        return None;
    }
    Some(BigUint::from(old_s.rem_euclid(m) as u128))
}

/// Deterministic Miller-Rabin for 64-bit inputs
fn is_prime(n: u64) -> bool {
    const BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for &p in &BASES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    let mul = |a: u64, b: u64| ((a as u128 * b as u128) % n as u128) as u64;
    let pow = |mut base: u64, mut exp: u64| {
        let mut acc = 1u64;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = mul(acc, base);
            }
            base = mul(base, base);
            exp >>= 1;
        }
        acc
    };
    'witness: for &a in &BASES {
        let mut x = pow(a, d);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul(x, x);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo2_base::{
        gates::circuit::{builder::RangeCircuitBuilder, CircuitBuilderStage},
        halo2_proofs::dev::MockProver,
    };
    use num_traits::Zero;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    const K: usize = 15;

    fn test_keypair() -> Keypair {
        Keypair::from_primes(2147483647, 2147483629).unwrap()
    }

    #[test]
    fn test_native_roundtrip_and_additivity() {
        let keypair = test_keypair();
        let key = &keypair.public;
        let mut rng = StdRng::seed_from_u64(7);

        let c1 = key.encrypt(&BigUint::from(3u32), &key.sample_randomness(&mut rng));
        let c2 = key.encrypt(&BigUint::from(4u32), &key.sample_randomness(&mut rng));
        assert_eq!(keypair.decrypt(&c1).unwrap(), BigUint::from(3u32));
        assert_eq!(keypair.decrypt(&key.add(&c1, &c2)).unwrap(), BigUint::from(7u32));
    }

    #[test]
    fn test_generated_key_fits_one_limb() {
        let keypair = Keypair::generate(&mut StdRng::seed_from_u64(1)).unwrap();
        assert!(keypair.public.n.bits() as usize <= KEY_BITS);
        assert!(keypair.public.n_squared.bits() as usize <= MODULUS_BITS);
    }

    #[test]
    fn test_rejects_bad_factors() {
        assert!(Keypair::from_primes(2147483647, 2147483647).is_err());
        assert!(Keypair::from_primes(2147483647, 2147483648).is_err());
        assert!(EncryptionKey::from_modulus(BigUint::one() << 63).is_err());
    }

    #[test]
    fn test_miller_rabin() {
        assert!(is_prime(2) && is_prime(97) && is_prime(2147483647));
        assert!(!is_prime(1) && !is_prime(561) && !is_prime(2147483647u64 * 3));
    }

    #[test]
    fn test_circuit_encrypt_and_add_match_native() {
        let keypair = test_keypair();
        let key = keypair.public.clone();
        let [n, g, n_squared] = key.to_fields().unwrap();
        let r1 = BigUint::from(123456789u64);
        let r2 = BigUint::from(987654321u64);

        let mut builder = RangeCircuitBuilder::from_stage(CircuitBuilderStage::Mock).use_k(K);
        builder.set_lookup_bits(8);
        let range = builder.range_chip();
        let ctx = builder.main(0);
        let mut enforcer = Enforcer::new(CircuitBuilderStage::Mock);

        let n = ctx.load_witness(n);
        let g = ctx.load_witness(g);
        let n_squared = ctx.load_witness(n_squared);
        let assigned = constrain_encryption_key(ctx, &range, &mut enforcer, n, g, n_squared);

        let one = ctx.load_witness(Fr::one());
        let zero = ctx.load_witness(Fr::zero());
        let r1_cell = ctx.load_witness(biguint_to_field(&r1).unwrap());
        let r2_cell = ctx.load_witness(biguint_to_field(&r2).unwrap());
        let c1 = encrypt(ctx, &range, &mut enforcer, &assigned, one, r1_cell, || {
            AttestationError::EncryptionMismatch { slot: 0 }
        });
        let c2 = encrypt(ctx, &range, &mut enforcer, &assigned, zero, r2_cell, || {
            AttestationError::EncryptionMismatch { slot: 1 }
        });
        let sum = add_ciphertexts(ctx, &range, &mut enforcer, &assigned, c1, c2);

        let expected_c1 = key.encrypt(&BigUint::one(), &r1);
        let expected_sum = key.add(&expected_c1, &key.encrypt(&BigUint::zero(), &r2));
        assert_eq!(field_to_biguint(c1.value()), expected_c1);
        assert_eq!(field_to_biguint(sum.value()), expected_sum);
        assert_eq!(keypair.decrypt(&expected_sum).unwrap(), BigUint::one());
        assert!(enforcer.finish().is_ok());

        builder.calculate_params(Some(9));
        MockProver::run(K as u32, &builder, vec![]).unwrap().assert_satisfied();
    }

    #[test]
    fn test_key_gadget_rejects_wrong_square() {
        let mut builder = RangeCircuitBuilder::from_stage(CircuitBuilderStage::Mock).use_k(12);
        builder.set_lookup_bits(8);
        let range = builder.range_chip();
        let ctx = builder.main(0);
        let mut enforcer = Enforcer::new(CircuitBuilderStage::Mock);

        let n = ctx.load_witness(Fr::from(35));
        let g = ctx.load_witness(Fr::from(36));
        let n_squared = ctx.load_witness(Fr::from(1226));
        constrain_encryption_key(ctx, &range, &mut enforcer, n, g, n_squared);
        assert!(matches!(
            enforcer.finish(),
            Err(AttestationError::InvalidEncryptionKey(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_non_units() {
        let keypair = test_keypair();
        let key = &keypair.public;
        assert!(keypair.decrypt(&BigUint::zero()).is_err());
        assert!(keypair.decrypt(&BigUint::from(2147483647u64)).is_err());
        assert!(keypair.decrypt(&key.n_squared).is_err());
        assert_eq!(keypair.decrypt(&BigUint::one()).unwrap(), BigUint::zero());
    }

    fn encrypt_with_randomness(randomness: Fr) -> (Fr, Result<()>, bool) {
        let keypair = test_keypair();
        let [n, g, n_squared] = keypair.public.to_fields().unwrap();

        let mut builder = RangeCircuitBuilder::from_stage(CircuitBuilderStage::Mock).use_k(K);
        builder.set_lookup_bits(8);
        let range = builder.range_chip();
        let ctx = builder.main(0);
        let mut enforcer = Enforcer::new(CircuitBuilderStage::Mock);

        let n = ctx.load_witness(n);
        let g = ctx.load_witness(g);
        let n_squared = ctx.load_witness(n_squared);
        let assigned = constrain_encryption_key(ctx, &range, &mut enforcer, n, g, n_squared);
        let msg = ctx.load_witness(Fr::one());
        let r = ctx.load_witness(randomness);
        let cipher = encrypt(ctx, &range, &mut enforcer, &assigned, msg, r, || {
            AttestationError::EncryptionMismatch { slot: 3 }
        });
        let value = *cipher.value();

        builder.calculate_params(Some(9));
        let satisfied = MockProver::run(K as u32, &builder, vec![]).unwrap().verify().is_ok();
        (value, enforcer.finish(), satisfied)
    }

    #[test]
    fn test_zero_randomness_is_rejected() {
        let (cipher, verdict, satisfied) = encrypt_with_randomness(Fr::zero());
        assert_eq!(cipher, Fr::zero());
        assert_eq!(verdict, Err(AttestationError::EncryptionMismatch { slot: 3 }));
        assert!(!satisfied);
    }

    #[test]
    fn test_randomness_sharing_a_factor_is_rejected() {
        // p * 5 shares p with n = p * q
        let (_, verdict, satisfied) = encrypt_with_randomness(Fr::from(2147483647u64 * 5));
        assert_eq!(verdict, Err(AttestationError::EncryptionMismatch { slot: 3 }));
        assert!(!satisfied);
    }

    #[test]
    fn test_randomness_above_n_is_reduced_first() {
        let keypair = test_keypair();
        let r = &keypair.public.n + 12345u32;
        let (cipher, verdict, satisfied) = encrypt_with_randomness(biguint_to_field(&r).unwrap());
        assert!(verdict.is_ok() && satisfied);
        assert_eq!(keypair.decrypt(&field_to_biguint(&cipher)).unwrap(), BigUint::one());
    }

    proptest! {
        #[test]
        fn prop_homomorphic_addition(
            m1 in 0u64..1_000_000,
            m2 in 0u64..1_000_000,
            seed in any::<u64>(),
        ) {
            let keypair = test_keypair();
            let key = &keypair.public;
            let mut rng = StdRng::seed_from_u64(seed);
            let c1 = key.encrypt(&BigUint::from(m1), &key.sample_randomness(&mut rng));
            let c2 = key.encrypt(&BigUint::from(m2), &key.sample_randomness(&mut rng));
            prop_assert_eq!(keypair.decrypt(&key.add(&c1, &c2)).unwrap(), BigUint::from(m1 + m2));
            prop_assert_eq!(key.add(&c1, &c2), key.add(&c2, &c1));
        }
    }
}
