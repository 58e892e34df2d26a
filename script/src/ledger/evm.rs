use std::sync::Arc;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, FixedBytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    sol,
};
use mixer_lib::{ExternalNullifier, IdentityCommitment, NullifierHash};
use tracing::{debug, info};

use super::{Asset, Ledger, LedgerError, Receipt, Rejection, WithdrawalSubmission};
use crate::backend::ProvingBackend;
use crate::replica::LeafInserted;

sol! {
    #[sol(rpc)]
    interface IMixer {
        function deposit(bytes32 identityCommitment) external payable;
        function depositERC20(bytes32 identityCommitment) external;
        function mix(bytes calldata proof, bytes calldata publicValues, address recipient, uint256 fee, address relayer) external;
        function mixERC20(bytes calldata proof, bytes calldata publicValues, address recipient, uint256 fee, address relayer) external;
        function getLeaves() external view returns (bytes32[] memory);
        function getLastRoot() external view returns (bytes32);
        function isSpent(bytes32 nullifierHash) external view returns (bool);
        function mixAmt() external view returns (uint256);

        event LeafAdded(bytes32 leaf, uint256 leafIndex);
    }

    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Mixer contract adapter. The contract address is the pool's external nullifier.
///
/// Token pools take deposits through `depositERC20` after an allowance and pay out through
/// `mixERC20`; the payable `deposit` and `mix` are for native pools only.
pub struct EvmLedger<B> {
    provider: DynProvider,
    pool: Address,
    asset: Asset,
    backend: Arc<B>,
}

/// A node error response means the transaction was refused; anything else leaves the outcome
/// unknown.
fn send_error(err: alloy::contract::Error) -> LedgerError {
    if let alloy::contract::Error::TransportError(transport) = &err {
        if let Some(resp) = transport.as_error_resp() {
            return LedgerError::Rejected(Rejection::Reverted(resp.message.to_string()));
        }
    }
    LedgerError::Rpc(err.to_string())
}

impl<B: ProvingBackend> EvmLedger<B> {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        pool: Address,
        backend: Arc<B>,
    ) -> Result<Self, LedgerError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| LedgerError::Rpc(format!("invalid private key: {e}")))?;
        let url = rpc_url
            .parse()
            .map_err(|e| LedgerError::Rpc(format!("invalid RPC URL: {e}")))?;
        let provider = DynProvider::new(
            ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_http(url),
        );
        Ok(EvmLedger {
            provider,
            pool,
            asset: Asset::Native,
            backend,
        })
    }

    /// Talk to a token pool holding `asset`.
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.asset = asset;
        self
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    fn contract(&self) -> IMixer::IMixerInstance<&DynProvider> {
        IMixer::new(self.pool, &self.provider)
    }

    /// The contract's fixed deposit amount in wei.
    pub async fn denomination(&self) -> Result<U256, LedgerError> {
        self.contract()
            .mixAmt()
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    /// Deposit one `denomination` of the pool's asset against `commitment`; returns the
    /// transaction hash. Token deposits approve the pool first.
    pub async fn deposit(
        &self,
        commitment: &IdentityCommitment,
        denomination: U256,
    ) -> Result<[u8; 32], LedgerError> {
        let commitment = FixedBytes::from(commitment.0);
        let pending = match self.asset {
            Asset::Native => self
                .contract()
                .deposit(commitment)
                .value(denomination)
                .send()
                .await
                .map_err(send_error)?,
            Asset::Token(token) => {
                let approval = IERC20::new(Address::from(token), &self.provider)
                    .approve(self.pool, denomination)
                    .send()
                    .await
                    .map_err(send_error)?
                    .get_receipt()
                    .await
                    .map_err(|e| LedgerError::Rpc(e.to_string()))?;
                if !approval.status() {
                    return Err(LedgerError::Rejected(Rejection::Reverted(format!(
                        "approval {} reverted",
                        approval.transaction_hash
                    ))));
                }
                debug!(tx = %approval.transaction_hash, "token allowance set");
                self.contract()
                    .depositERC20(commitment)
                    .send()
                    .await
                    .map_err(send_error)?
            }
        };
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        if !receipt.status() {
            return Err(LedgerError::Rejected(Rejection::Reverted(format!(
                "deposit {} reverted",
                receipt.transaction_hash
            ))));
        }
        info!(tx = %receipt.transaction_hash, asset = %self.asset, "deposit mined");
        Ok(receipt.transaction_hash.0)
    }

    /// Leaf events from `from_block` onward, in log order.
    pub async fn leaf_events(&self, from_block: u64) -> Result<Vec<LeafInserted>, LedgerError> {
        let logs = self
            .contract()
            .LeafAdded_filter()
            .from_block(from_block)
            .query()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        let mut events: Vec<(u64, u64, LeafInserted)> = logs
            .into_iter()
            .map(|(event, log)| {
                (
                    log.block_number.unwrap_or(0),
                    log.log_index.unwrap_or(0),
                    LeafInserted {
                        index: event.leafIndex.saturating_to::<u64>(),
                        commitment: event.leaf.0,
                    },
                )
            })
            .collect();
        events.sort_by_key(|(block, log_index, _)| (*block, *log_index));
        debug!(count = events.len(), "fetched leaf events");
        Ok(events.into_iter().map(|(_, _, e)| e).collect())
    }

    /// Balance of `address` in the pool's asset.
    pub async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        match self.asset {
            Asset::Native => self
                .provider
                .get_balance(address)
                .await
                .map_err(|e| LedgerError::Rpc(e.to_string())),
            Asset::Token(token) => IERC20::new(Address::from(token), &self.provider)
                .balanceOf(address)
                .call()
                .await
                .map_err(|e| LedgerError::Rpc(e.to_string())),
        }
    }

    pub async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }
}

impl<B: ProvingBackend> Ledger for EvmLedger<B> {
    fn external_nullifier(&self) -> ExternalNullifier {
        ExternalNullifier::from_address(self.pool.0 .0)
    }

    async fn current_leaves(&self) -> Result<Vec<[u8; 32]>, LedgerError> {
        let leaves = self
            .contract()
            .getLeaves()
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(leaves.into_iter().map(|l| l.0).collect())
    }

    async fn current_root(&self) -> Result<[u8; 32], LedgerError> {
        let root = self
            .contract()
            .getLastRoot()
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        Ok(root.0)
    }

    async fn is_spent(&self, nullifier_hash: &NullifierHash) -> Result<bool, LedgerError> {
        self.contract()
            .isSpent(FixedBytes::from(nullifier_hash.0))
            .call()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn submit_withdrawal(
        &self,
        submission: &WithdrawalSubmission,
    ) -> Result<Receipt, LedgerError> {
        let proof = self
            .backend
            .onchain_bytes(&submission.proof.bytes)
            .map_err(|_| LedgerError::Rejected(Rejection::ProofInvalid))?;
        let public_values = submission.proof.public_signals.to_bytes();

        let proof = Bytes::from(proof);
        let public_values = Bytes::copy_from_slice(&public_values);
        let recipient = Address::from(submission.recipient);
        let fee = U256::from(submission.fee);
        let relayer = Address::from(submission.relayer);
        let contract = self.contract();
        let pending = match self.asset {
            Asset::Native => {
                contract
                    .mix(proof, public_values, recipient, fee, relayer)
                    .send()
                    .await
            }
            Asset::Token(_) => {
                contract
                    .mixERC20(proof, public_values, recipient, fee, relayer)
                    .send()
                    .await
            }
        }
        .map_err(send_error)?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        if !receipt.status() {
            return Err(LedgerError::Rejected(Rejection::Reverted(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            ))));
        }
        info!(tx = %receipt.transaction_hash, "withdrawal mined");

        Ok(Receipt {
            tx_hash: Some(receipt.transaction_hash.0),
            nullifier_hash: submission.proof.public_signals.nullifier_hash,
        })
    }
}
