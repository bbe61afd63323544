// WASM bindings for browser-side attestation
//
// JavaScript supplies the deployment config and the KZG params bytes once;
// each call then takes a witness bundle as JSON and returns the serialized
// attestation. Keys are generated per circuit kind on first use and cached in
// the prover instance.
//
// USAGE (JavaScript):
// ```javascript
// import init, { BallotProver } from '@ballot/circuits';
//
// await init();
// const prover = new BallotProver('{"slots": 5, "params_hash": "5d56..."}', paramsBytes);
// const voterJson = prover.voterAttestation(JSON.stringify(voterWitness));
// const foldJson = prover.aggregatorRecursiveAttestation(JSON.stringify(foldWitness));
// ```

use wasm_bindgen::prelude::*;

use crate::attestation::Attestation;
use crate::backend::AttestationBackend;
use crate::config::{ProtocolConfig, ProvingContext};
use crate::error::AttestationError;
use crate::prover::{params_from_bytes, KzgBackend};
use crate::witness::{
    generate_aggregator_base_attestation, generate_aggregator_recursive_attestation,
    generate_voter_attestation, AggregatorBaseWitness, AggregatorRecursiveWitness, VoterWitness,
};

/// Enable console.error() for panic messages in browser
#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

fn to_js(err: AttestationError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen]
pub struct BallotProver {
    ctx: ProvingContext<KzgBackend>,
}

#[wasm_bindgen]
impl BallotProver {
    /// Build a prover from a `ProtocolConfig` JSON and raw KZG params.
    ///
    /// `params_path` is ignored here; when `params_hash` is set the bytes must
    /// match it.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, params_bytes: Vec<u8>) -> Result<BallotProver, JsValue> {
        let config = ProtocolConfig::from_json(config_json).map_err(to_js)?;
        let params = params_from_bytes(&config, &params_bytes).map_err(to_js)?;
        let ctx = ProvingContext::new(config, KzgBackend::from_params(params)).map_err(to_js)?;
        Ok(BallotProver { ctx })
    }

    #[wasm_bindgen(js_name = "voterAttestation")]
    pub fn voter_attestation(&self, witness_json: &str) -> Result<String, JsValue> {
        let witness: VoterWitness =
            serde_json::from_str(witness_json).map_err(|e| to_js(e.into()))?;
        generate_voter_attestation(&self.ctx, &witness).map_err(to_js)
    }

    #[wasm_bindgen(js_name = "aggregatorBaseAttestation")]
    pub fn aggregator_base_attestation(&self, witness_json: &str) -> Result<String, JsValue> {
        let witness: AggregatorBaseWitness =
            serde_json::from_str(witness_json).map_err(|e| to_js(e.into()))?;
        generate_aggregator_base_attestation(&self.ctx, &witness).map_err(to_js)
    }

    #[wasm_bindgen(js_name = "aggregatorRecursiveAttestation")]
    pub fn aggregator_recursive_attestation(&self, witness_json: &str) -> Result<String, JsValue> {
        let witness: AggregatorRecursiveWitness =
            serde_json::from_str(witness_json).map_err(|e| to_js(e.into()))?;
        generate_aggregator_recursive_attestation(&self.ctx, &witness).map_err(to_js)
    }

    /// `true` if the serialized attestation verifies under this prover's keys
    #[wasm_bindgen]
    pub fn verify(&self, attestation_json: &str) -> Result<bool, JsValue> {
        let attestation = Attestation::from_json(attestation_json).map_err(to_js)?;
        self.ctx.backend.verify(&self.ctx.config, &attestation).map_err(to_js)
    }
}
