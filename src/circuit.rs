// Common shape of the three protocol circuits
//
// Each circuit lays itself out on the main thread of a RangeCircuitBuilder and
// returns its public cells in instance order. Backends drive the same
// `lay_out` for keygen, mock checking and proving.

use halo2_base::{
    gates::{
        circuit::{builder::RangeCircuitBuilder, CircuitBuilderStage},
        RangeChip,
    },
    halo2_proofs::halo2curves::bn256::Fr,
    AssignedValue, Context,
};

use crate::attestation::CircuitKind;
use crate::config::ProtocolConfig;
use crate::constraints::Enforcer;
use crate::error::Result;
use crate::paillier::{constrain_encryption_key, AssignedEncryptionKey};

pub trait ProtocolCircuit {
    const KIND: CircuitKind;

    /// Shape-only instance for keygen; witness values are placeholders.
    fn shape(config: &ProtocolConfig) -> Self;

    fn synthesize(
        &self,
        ctx: &mut Context<Fr>,
        range: &RangeChip<Fr>,
        enforcer: &mut Enforcer,
    ) -> Vec<AssignedValue<Fr>>;
}

/// Synthesize `circuit` into `builder` and register its public cells.
///
/// Returns the public input values, or the first violated check when the
/// stage carries real witnesses.
pub fn lay_out<C: ProtocolCircuit>(
    circuit: &C,
    builder: &mut RangeCircuitBuilder<Fr>,
    stage: CircuitBuilderStage,
) -> Result<Vec<Fr>> {
    let mut enforcer = Enforcer::new(stage);
    let range = builder.range_chip();
    let ctx = builder.main(0);
    let public = circuit.synthesize(ctx, &range, &mut enforcer);
    let values = public.iter().map(|cell| *cell.value()).collect();

    builder.assigned_instances.clear();
    builder.assigned_instances.push(public);
    enforcer.finish()?;
    Ok(values)
}

/// Fresh builder for `stage` sized by `config`.
pub fn new_builder(config: &ProtocolConfig, stage: CircuitBuilderStage) -> RangeCircuitBuilder<Fr> {
    let mut builder = RangeCircuitBuilder::from_stage(stage).use_k(config.degree as usize);
    builder.set_lookup_bits(config.lookup_bits);
    builder.set_instance_columns(1);
    builder
}

pub(crate) fn load_all(ctx: &mut Context<Fr>, values: &[Fr]) -> Vec<AssignedValue<Fr>> {
    values.iter().map(|v| ctx.load_witness(*v)).collect()
}

/// Load `[n, g, n_squared]` and constrain the key well formed.
pub(crate) fn load_encryption_key(
    ctx: &mut Context<Fr>,
    range: &RangeChip<Fr>,
    enforcer: &mut Enforcer,
    key: &[Fr; 3],
) -> AssignedEncryptionKey<Fr> {
    let [n, g, n_squared] = key.map(|v| ctx.load_witness(v));
    constrain_encryption_key(ctx, range, enforcer, n, g, n_squared)
}

/// Placeholder key for shape-only synthesis (n = 3, g = 4).
pub(crate) fn shape_key() -> [Fr; 3] {
    [Fr::from(3), Fr::from(4), Fr::from(9)]
}
