// Deployment configuration and the explicit proving context
//
// One config per election: slot count, whitelist depth and circuit sizing are
// fixed up front and every entry point receives them through ProvingContext.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::AttestationBackend;
use crate::error::{AttestationError, Result};

/// Compile-time flag (set with ALLOW_TEST_PARAMS=1) to allow locally generated
/// KZG params. Defaults to false.
pub const ALLOW_TEST_PARAMS: bool = option_env!("ALLOW_TEST_PARAMS").is_some();

pub const DEFAULT_SLOTS: usize = 5;
pub const DEFAULT_WHITELIST_DEPTH: usize = 8;
pub const DEFAULT_DEGREE: u32 = 16;
pub const DEFAULT_LOOKUP_BITS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Ballot options per ballot (k)
    pub slots: usize,
    pub whitelist_depth: usize,
    /// log2 of the circuit row count
    pub degree: u32,
    pub lookup_bits: usize,
    /// KZG params file; generated locally when absent (ALLOW_TEST_PARAMS only)
    pub params_path: Option<PathBuf>,
    /// Blake2b-512 hex digest the params bytes must match
    pub params_hash: Option<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            whitelist_depth: DEFAULT_WHITELIST_DEPTH,
            degree: DEFAULT_DEGREE,
            lookup_bits: DEFAULT_LOOKUP_BITS,
            params_path: None,
            params_hash: None,
        }
    }
}

impl ProtocolConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ProtocolConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 {
            return Err(AttestationError::Config("slots must be at least 1".into()));
        }
        if !(1..=32).contains(&self.whitelist_depth) {
            return Err(AttestationError::Config(format!(
                "whitelist_depth={} outside 1..=32",
                self.whitelist_depth
            )));
        }
        if !(10..=24).contains(&self.degree) {
            return Err(AttestationError::Config(format!(
                "degree={} outside 10..=24",
                self.degree
            )));
        }
        if self.lookup_bits == 0 || self.lookup_bits >= self.degree as usize {
            return Err(AttestationError::Config(format!(
                "lookup_bits={} must be in 1..{}",
                self.lookup_bits, self.degree
            )));
        }
        if let Some(hash) = &self.params_hash {
            if hash.len() != 128 || hex::decode(hash).is_err() {
                return Err(AttestationError::Config(
                    "params_hash must be a 128-digit hex Blake2b-512 digest".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Everything a generation call needs, passed explicitly instead of living in
/// process-wide state.
pub struct ProvingContext<B: AttestationBackend> {
    pub config: ProtocolConfig,
    pub backend: B,
}

impl<B: AttestationBackend> ProvingContext<B> {
    pub fn new(config: ProtocolConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }
}
