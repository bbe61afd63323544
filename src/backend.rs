// Attestation backends
//
// The protocol only needs generate/verify. MockBackend checks constraint
// satisfaction with MockProver and authenticates the result with a keyed
// Blake2b tag, so it is sound for verifiers holding the same backend. The KZG
// backend in `prover` produces real SHPLONK proofs.

use blake2::{
    digest::{KeyInit, Mac},
    Blake2bMac512,
};
use halo2_base::{
    gates::circuit::CircuitBuilderStage,
    halo2_proofs::{dev::MockProver, halo2curves::bn256::Fr},
};
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info};

use crate::attestation::{Attestation, CircuitKind};
use crate::circuit::{lay_out, new_builder, ProtocolCircuit};
use crate::config::ProtocolConfig;
use crate::error::{AttestationError, Result};

pub trait AttestationBackend {
    /// Synthesize `circuit` and attest to it; fails with the first violated
    /// check and emits nothing in that case.
    fn generate<C: ProtocolCircuit>(&self, config: &ProtocolConfig, circuit: &C) -> Result<Attestation>;

    /// `Ok(false)` for a well-formed attestation that does not verify.
    fn verify(&self, config: &ProtocolConfig, attestation: &Attestation) -> Result<bool>;
}

pub struct MockBackend {
    mac_key: [u8; 32],
}

impl MockBackend {
    pub fn new() -> Self {
        let mut mac_key = [0u8; 32];
        OsRng.fill_bytes(&mut mac_key);
        Self { mac_key }
    }

    fn tag(&self, kind: CircuitKind, public_inputs: &[Fr]) -> Result<Blake2bMac512> {
        let mut mac = <Blake2bMac512 as KeyInit>::new_from_slice(&self.mac_key)
            .map_err(|e| AttestationError::Backend(format!("mac key: {}", e)))?;
        mac.update(&[kind.tag()]);
        mac.update(&(public_inputs.len() as u64).to_le_bytes());
        for value in public_inputs {
            mac.update(&value.to_bytes());
        }
        Ok(mac)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AttestationBackend for MockBackend {
    fn generate<C: ProtocolCircuit>(&self, config: &ProtocolConfig, circuit: &C) -> Result<Attestation> {
        let mut builder = new_builder(config, CircuitBuilderStage::Mock);
        let public_inputs = lay_out(circuit, &mut builder, CircuitBuilderStage::Mock)?;
        builder.calculate_params(Some(9));

        let prover = MockProver::run(config.degree, &builder, vec![public_inputs.clone()])
            .map_err(|e| AttestationError::Backend(format!("mock synthesis failed: {:?}", e)))?;
        prover.verify().map_err(|failures| {
            AttestationError::Backend(format!(
                "{} constraint failures not attributed to a protocol check: {:?}",
                failures.len(),
                failures.first()
            ))
        })?;

        let proof = self.tag(C::KIND, &public_inputs)?.finalize().into_bytes().to_vec();
        info!(kind = ?C::KIND, public_inputs = public_inputs.len(), "mock attestation generated");
        Ok(Attestation { kind: C::KIND, public_inputs, proof })
    }

    fn verify(&self, config: &ProtocolConfig, attestation: &Attestation) -> Result<bool> {
        let expected = attestation.kind.instance_len(config.slots);
        if attestation.public_inputs.len() != expected {
            debug!(kind = ?attestation.kind, got = attestation.public_inputs.len(), expected, "wrong instance count");
            return Ok(false);
        }
        let valid = self
            .tag(attestation.kind, &attestation.public_inputs)?
            .verify_slice(&attestation.proof)
            .is_ok();
        debug!(kind = ?attestation.kind, valid, "mock attestation verified");
        Ok(valid)
    }
}
