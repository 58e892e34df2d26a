//! Environment configuration, loaded from the process environment and `.env`.
//!
//!   RPC_URL             ledger RPC endpoint
//!   PRIVATE_KEY         funded wallet key (deposits, relaying)
//!   POOL_ADDRESS        mixer contract; also the external nullifier
//!   TOKEN_ADDRESS       ERC20 the pool holds (default: none, a native coin pool)
//!   TREE_LEVELS         tree depth (default: 20)
//!   DEPLOY_BLOCK        first block to scan for leaf events (default: 0)
//!   CIRCUIT_MANIFEST    path to the artifact manifest.json
//!   MIXER_PROVER        `sp1` (default) or `mock`
//!   PROOF_TIMEOUT_SECS  abandon proving after this many seconds (default: none)
//!   FEE_WEI             relayer fee (default: 0)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::ledger::Asset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProverKind {
    Sp1,
    Mock,
}

impl FromStr for ProverKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sp1" => Ok(ProverKind::Sp1),
            "mock" => Ok(ProverKind::Mock),
            other => bail!("MIXER_PROVER must be `sp1` or `mock`, got `{other}`"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub pool_address: Option<[u8; 20]>,
    pub token_address: Option<[u8; 20]>,
    pub tree_levels: usize,
    pub deploy_block: u64,
    pub circuit_manifest: Option<PathBuf>,
    pub prover: ProverKind,
    pub proof_timeout: Option<Duration>,
    pub fee_wei: u128,
}

impl MixerConfig {
    /// Load `.env` if present, then read the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pool_address = lookup("POOL_ADDRESS")
            .map(|s| parse_address(&s).context("POOL_ADDRESS"))
            .transpose()?;
        let token_address = lookup("TOKEN_ADDRESS")
            .map(|s| parse_address(&s).context("TOKEN_ADDRESS"))
            .transpose()?;
        let tree_levels = lookup("TREE_LEVELS")
            .unwrap_or_else(|| "20".to_string())
            .parse()
            .context("TREE_LEVELS must be a number")?;
        let deploy_block = lookup("DEPLOY_BLOCK")
            .unwrap_or_else(|| "0".to_string())
            .parse()
            .context("DEPLOY_BLOCK must be a number")?;
        let prover = lookup("MIXER_PROVER")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(ProverKind::Sp1);
        let proof_timeout = lookup("PROOF_TIMEOUT_SECS")
            .map(|s| s.parse::<u64>().context("PROOF_TIMEOUT_SECS must be a number"))
            .transpose()?
            .map(Duration::from_secs);
        let fee_wei = lookup("FEE_WEI")
            .unwrap_or_else(|| "0".to_string())
            .parse()
            .context("FEE_WEI must be a number")?;

        Ok(MixerConfig {
            rpc_url: lookup("RPC_URL"),
            private_key: lookup("PRIVATE_KEY"),
            pool_address,
            token_address,
            tree_levels,
            deploy_block,
            circuit_manifest: lookup("CIRCUIT_MANIFEST").map(PathBuf::from),
            prover,
            proof_timeout,
            fee_wei,
        })
    }

    pub fn rpc_url(&self) -> Result<&str> {
        self.rpc_url.as_deref().context("RPC_URL not set")
    }

    pub fn private_key(&self) -> Result<&str> {
        self.private_key.as_deref().context("PRIVATE_KEY not set")
    }

    pub fn pool_address(&self) -> Result<[u8; 20]> {
        self.pool_address.context("POOL_ADDRESS not set")
    }

    /// The asset the pool holds.
    pub fn asset(&self) -> Asset {
        self.token_address.map_or(Asset::Native, Asset::Token)
    }

    pub fn circuit_manifest(&self) -> Result<&PathBuf> {
        self.circuit_manifest.as_ref().context("CIRCUIT_MANIFEST not set")
    }
}

/// Decode a hex string (with or without 0x prefix) into N bytes.
pub fn decode_hex<const N: usize>(s: &str) -> Result<[u8; N]> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).context("invalid hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected {N} bytes, got {len}"))
}

pub fn parse_address(s: &str) -> Result<[u8; 20]> {
    decode_hex::<20>(s)
}
