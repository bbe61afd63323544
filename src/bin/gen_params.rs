//! Generate KZG params for development and print their Blake2b-512 digest
//! WARNING: NOT ceremony parameters - for testing only
//!
//! Usage: gen_params <k> <output path>

use std::fs;
use std::path::PathBuf;

use ballot_aggregation_circuits::prover::params_digest;
use halo2_base::halo2_proofs::{
    halo2curves::bn256::Bn256,
    poly::kzg::commitment::ParamsKZG,
    SerdeFormat,
};
use rand::rngs::OsRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let k: u32 = match args.next() {
        Some(k) => k.parse()?,
        None => 16,
    };
    let path = PathBuf::from(args.next().unwrap_or_else(|| format!("./kzg_params/test_params_k{}.srs", k)));

    warn!(k, "generating local params; NOT ceremony parameters");
    let params = ParamsKZG::<Bn256>::setup(k, OsRng);

    let mut bytes = Vec::new();
    params.write_custom(&mut bytes, SerdeFormat::RawBytesUnchecked)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&path, &bytes)?;

    info!(path = %path.display(), bytes = bytes.len(), "params written");
    println!("{}", params_digest(&bytes));
    Ok(())
}
