// KZG attestation backend (SHPLONK + Blake2b transcript)
//
// Keys are generated per circuit kind on first use and cached with the
// circuit params and break points that proving must reuse. Params come from a
// hash-pinned file, or are generated locally only in ALLOW_TEST_PARAMS builds.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use blake2::{Blake2b512, Digest};
use halo2_base::{
    gates::circuit::{builder::RangeCircuitBuilder, BaseCircuitParams, CircuitBuilderStage},
    halo2_proofs::{
        halo2curves::bn256::{Bn256, G1Affine},
        plonk::{create_proof, keygen_pk, keygen_vk, verify_proof, ProvingKey},
        poly::{
            commitment::{Params, ParamsProver},
            kzg::{
                commitment::{KZGCommitmentScheme, ParamsKZG},
                multiopen::{ProverSHPLONK, VerifierSHPLONK},
                strategy::SingleStrategy,
            },
        },
        transcript::{
            Blake2bRead, Blake2bWrite, Challenge255, TranscriptReadBuffer, TranscriptWriterBuffer,
        },
        SerdeFormat,
    },
};
use rand::rngs::OsRng;
use tracing::{debug, info, warn};

use crate::aggregator::{AggregatorBaseCircuit, AggregatorRecursiveCircuit};
use crate::attestation::{Attestation, CircuitKind};
use crate::backend::AttestationBackend;
use crate::circuit::{lay_out, new_builder, ProtocolCircuit};
use crate::config::{ProtocolConfig, ALLOW_TEST_PARAMS};
use crate::error::{AttestationError, Result};
use crate::voter::VoterCircuit;

/// Blake2b-512 hex digest of a params file
pub fn params_digest(bytes: &[u8]) -> String {
    format!("{:x}", Blake2b512::digest(bytes))
}

/// Load params per `config`: from `params_path` (checked against
/// `params_hash` when given), else locally generated in test builds.
pub fn load_params(config: &ProtocolConfig) -> Result<ParamsKZG<Bn256>> {
    let Some(path) = &config.params_path else {
        if ALLOW_TEST_PARAMS {
            warn!(degree = config.degree, "generating local KZG params; not for production");
            return Ok(ParamsKZG::<Bn256>::setup(config.degree, OsRng));
        }
        return Err(AttestationError::Config(
            "params_path is required unless built with ALLOW_TEST_PARAMS=1".into(),
        ));
    };

    let bytes = fs::read(path)
        .map_err(|e| AttestationError::Config(format!("reading {}: {}", path.display(), e)))?;
    let params = params_from_bytes(config, &bytes)?;
    info!(path = %path.display(), degree = config.degree, "KZG params loaded");
    Ok(params)
}

/// Deserialize params, checking `config.params_hash` when set and trimming to
/// `config.degree`.
pub fn params_from_bytes(config: &ProtocolConfig, bytes: &[u8]) -> Result<ParamsKZG<Bn256>> {
    if let Some(expected) = &config.params_hash {
        let actual = params_digest(bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AttestationError::Config(format!(
                "params hash mismatch: expected {}, got {}",
                expected, actual
            )));
        }
    }

    let mut params = ParamsKZG::<Bn256>::read_custom(&mut &bytes[..], SerdeFormat::RawBytesUnchecked)
        .map_err(|e| AttestationError::Config(format!("deserializing params: {}", e)))?;
    if params.k() < config.degree {
        return Err(AttestationError::Config(format!(
            "params support k={}, circuits need k={}",
            params.k(),
            config.degree
        )));
    }
    if params.k() > config.degree {
        params.downsize(config.degree);
    }
    Ok(params)
}

struct CircuitKeys {
    pk: ProvingKey<G1Affine>,
    config_params: BaseCircuitParams,
    break_points: Vec<Vec<usize>>,
}

pub struct KzgBackend {
    params: ParamsKZG<Bn256>,
    keys: Mutex<HashMap<CircuitKind, Arc<CircuitKeys>>>,
}

impl KzgBackend {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        Ok(Self::from_params(load_params(config)?))
    }

    pub fn from_params(params: ParamsKZG<Bn256>) -> Self {
        Self { params, keys: Mutex::new(HashMap::new()) }
    }

    fn keys<C: ProtocolCircuit>(&self, config: &ProtocolConfig) -> Result<Arc<CircuitKeys>> {
        let mut cache = self
            .keys
            .lock()
            .map_err(|_| AttestationError::Backend("key cache lock poisoned".into()))?;
        if let Some(keys) = cache.get(&C::KIND) {
            return Ok(keys.clone());
        }

        if self.params.k() != config.degree {
            return Err(AttestationError::Config(format!(
                "backend params are k={}, config asks for k={}",
                self.params.k(),
                config.degree
            )));
        }

        info!(kind = ?C::KIND, degree = config.degree, "running keygen");
        let mut builder = new_builder(config, CircuitBuilderStage::Keygen);
        lay_out(&C::shape(config), &mut builder, CircuitBuilderStage::Keygen)?;
        let config_params = builder.calculate_params(Some(9));

        let vk = keygen_vk(&self.params, &builder)
            .map_err(|e| AttestationError::Backend(format!("keygen_vk: {:?}", e)))?;
        let pk = keygen_pk(&self.params, vk, &builder)
            .map_err(|e| AttestationError::Backend(format!("keygen_pk: {:?}", e)))?;
        let break_points = builder.break_points();

        let keys = Arc::new(CircuitKeys { pk, config_params, break_points });
        cache.insert(C::KIND, keys.clone());
        Ok(keys)
    }

    fn keys_for(&self, kind: CircuitKind, config: &ProtocolConfig) -> Result<Arc<CircuitKeys>> {
        match kind {
            CircuitKind::Voter => self.keys::<VoterCircuit>(config),
            CircuitKind::AggregatorBase => self.keys::<AggregatorBaseCircuit>(config),
            CircuitKind::AggregatorRecursive => self.keys::<AggregatorRecursiveCircuit>(config),
        }
    }
}

impl AttestationBackend for KzgBackend {
    fn generate<C: ProtocolCircuit>(&self, config: &ProtocolConfig, circuit: &C) -> Result<Attestation> {
        let keys = self.keys::<C>(config)?;

        let mut builder =
            RangeCircuitBuilder::prover(keys.config_params.clone(), keys.break_points.clone());
        let public_inputs = lay_out(circuit, &mut builder, CircuitBuilderStage::Prover)?;

        let mut transcript = Blake2bWrite::<_, G1Affine, Challenge255<_>>::init(vec![]);
        create_proof::<
            KZGCommitmentScheme<Bn256>,
            ProverSHPLONK<'_, Bn256>,
            Challenge255<G1Affine>,
            _,
            Blake2bWrite<Vec<u8>, G1Affine, Challenge255<G1Affine>>,
            _,
        >(
            &self.params,
            &keys.pk,
            &[builder],
            &[&[&public_inputs]],
            OsRng,
            &mut transcript,
        )
        .map_err(|e| AttestationError::Backend(format!("proof creation failed: {:?}", e)))?;

        let proof = transcript.finalize();
        info!(kind = ?C::KIND, bytes = proof.len(), "KZG attestation generated");
        Ok(Attestation { kind: C::KIND, public_inputs, proof })
    }

    fn verify(&self, config: &ProtocolConfig, attestation: &Attestation) -> Result<bool> {
        if attestation.public_inputs.len() != attestation.kind.instance_len(config.slots) {
            return Ok(false);
        }
        let keys = self.keys_for(attestation.kind, config)?;

        let verifier_params = self.params.verifier_params();
        let strategy = SingleStrategy::new(&self.params);
        let mut transcript =
            Blake2bRead::<_, G1Affine, Challenge255<_>>::init(attestation.proof.as_slice());

        let result = verify_proof::<
            KZGCommitmentScheme<Bn256>,
            VerifierSHPLONK<'_, Bn256>,
            Challenge255<G1Affine>,
            Blake2bRead<&[u8], G1Affine, Challenge255<G1Affine>>,
            SingleStrategy<'_, Bn256>,
        >(
            verifier_params,
            keys.pk.get_vk(),
            strategy,
            &[&[&attestation.public_inputs]],
            &mut transcript,
        );

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(kind = ?attestation.kind, error = ?e, "KZG verification failed");
                Ok(false)
            }
        }
    }
}
