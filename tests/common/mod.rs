//! Shared election fixture for the integration tests
#![allow(dead_code)]

use ballot_aggregation_circuits::client::{base_witness, prepare_fold_witness, prepare_voter_witness};
use ballot_aggregation_circuits::halo2_base::halo2_proofs::halo2curves::bn256::Fr;
use ballot_aggregation_circuits::merkle::{whitelist_leaf, WhitelistTree};
use ballot_aggregation_circuits::nullifier_map::NullifierMap;
use ballot_aggregation_circuits::paillier::Keypair;
use ballot_aggregation_circuits::signature::SecretKey;
use ballot_aggregation_circuits::witness::VoterWitness;
use ballot_aggregation_circuits::{
    generate_aggregator_base_attestation, generate_aggregator_recursive_attestation,
    generate_voter_attestation, MockBackend, ProtocolConfig, ProvingContext, Result,
};
use rand::{rngs::StdRng, SeedableRng};

pub const PROPOSAL_ID: u64 = 42;

pub struct Election {
    pub ctx: ProvingContext<MockBackend>,
    pub keypair: Keypair,
    pub voters: Vec<SecretKey>,
    pub tree: WhitelistTree,
    pub rng: StdRng,
}

impl Election {
    /// Five options, depth-8 whitelist of four voters
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let keypair = Keypair::from_primes(2147483647, 2147483629).unwrap();
        let voters: Vec<SecretKey> = (0..4).map(|_| SecretKey::generate(&mut rng)).collect();
        let leaves: Vec<Fr> = voters.iter().map(|s| whitelist_leaf(&s.public_key())).collect();
        let tree = WhitelistTree::new(&leaves, 8).unwrap();
        let ctx = ProvingContext::new(ProtocolConfig::default(), MockBackend::new()).unwrap();
        Self { ctx, keypair, voters, tree, rng }
    }

    pub fn proposal_id(&self) -> Fr {
        Fr::from(PROPOSAL_ID)
    }

    pub fn base(&self) -> Result<String> {
        let witness =
            base_witness(&self.ctx.config, &self.keypair.public, self.proposal_id(), self.tree.root())?;
        generate_aggregator_base_attestation(&self.ctx, &witness)
    }

    pub fn voter_witness(&mut self, voter: usize, choice: usize) -> VoterWitness {
        let proposal_id = self.proposal_id();
        prepare_voter_witness(
            &self.ctx.config,
            &self.keypair.public,
            &self.tree,
            &self.voters[voter],
            proposal_id,
            choice,
            &mut self.rng,
        )
        .unwrap()
    }

    pub fn ballot(&mut self, voter: usize, choice: usize) -> Result<String> {
        let witness = self.voter_witness(voter, choice);
        generate_voter_attestation(&self.ctx, &witness)
    }

    pub fn fold(&self, prior: &str, voter: &str, map: &mut NullifierMap) -> Result<String> {
        let witness = prepare_fold_witness(&self.ctx.config, prior, voter, map)?;
        generate_aggregator_recursive_attestation(&self.ctx, &witness)
    }
}
