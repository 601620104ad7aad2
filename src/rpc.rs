use crate::config::Commitment;
use crate::error::{LedgerError, Result};
use crate::transaction::FreshnessToken;
use async_trait::async_trait;
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::sync::Arc;
use tracing::{debug, info};

/// Where a submitted transaction stands according to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not yet propagated to (or already forgotten by) the node.
    Unknown,
    /// Executed successfully and observed at this commitment.
    Landed(Commitment),
    /// Executed and rejected by the program or runtime.
    Failed { reason: String, code: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountState {
    #[serde(serialize_with = "display")]
    pub address: Pubkey,
    #[serde(serialize_with = "display")]
    pub owner: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
    pub executable: bool,
}

fn display<S: serde::Serializer>(key: &Pubkey, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(key)
}

impl AccountState {
    pub fn from_account(address: Pubkey, account: Account) -> Self {
        Self {
            address,
            owner: account.owner,
            lamports: account.lamports,
            data: account.data,
            executable: account.executable,
        }
    }
}

/// The four node operations the submission pipeline needs, plus block height
/// for expiry detection. Implementations must allow concurrent calls through
/// a shared reference.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn get_freshness_token(&self) -> Result<FreshnessToken>;

    async fn submit(&self, transaction: &Transaction) -> Result<Signature>;

    async fn get_status(&self, signature: &Signature) -> Result<SignatureStatus>;

    async fn get_account_state(&self, address: &Pubkey) -> Result<Option<AccountState>>;

    async fn get_block_height(&self) -> Result<u64>;
}

/// `LedgerRpc` over Solana JSON-RPC. Cheap to clone; clones share one HTTP
/// connection pool.
#[derive(Clone)]
pub struct SolanaRpc {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl SolanaRpc {
    pub fn new(http_url: String, commitment: Commitment) -> Self {
        let commitment = commitment.to_config();
        Self {
            client: Arc::new(RpcClient::new_with_commitment(http_url, commitment)),
            commitment,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    async fn get_freshness_token(&self) -> Result<FreshnessToken> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await?;
        debug!(%blockhash, last_valid_block_height, "fetched latest blockhash");
        Ok(FreshnessToken {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn submit(&self, transaction: &Transaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            preflight_commitment: Some(self.commitment.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..RpcSendTransactionConfig::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(transaction, config)
            .await?;
        info!(%signature, url = %self.client.url(), "transaction submitted");
        Ok(signature)
    }

    async fn get_status(&self, signature: &Signature) -> Result<SignatureStatus> {
        let statuses = self
            .client
            .get_signature_statuses(&[*signature])
            .await?
            .value;

        let Some(Some(status)) = statuses.into_iter().next() else {
            return Ok(SignatureStatus::Unknown);
        };

        if let Some(err) = &status.err {
            let code = match LedgerError::from_transaction_error(err) {
                LedgerError::ProgramExecutionError { code } => Some(code),
                _ => None,
            };
            return Ok(SignatureStatus::Failed {
                reason: err.to_string(),
                code,
            });
        }

        let commitment = match status.confirmation_status {
            Some(TransactionConfirmationStatus::Finalized) => Commitment::Finalized,
            Some(TransactionConfirmationStatus::Confirmed) => Commitment::Confirmed,
            Some(TransactionConfirmationStatus::Processed) => Commitment::Processed,
            // Older nodes omit the field; rooted slots report no confirmations.
            None if status.confirmations.is_none() => Commitment::Finalized,
            None => Commitment::Processed,
        };
        Ok(SignatureStatus::Landed(commitment))
    }

    async fn get_account_state(&self, address: &Pubkey) -> Result<Option<AccountState>> {
        let account = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?
            .value;
        Ok(account.map(|account| AccountState::from_account(*address, account)))
    }

    async fn get_block_height(&self) -> Result<u64> {
        Ok(self
            .client
            .get_block_height_with_commitment(self.commitment)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_state_json_uses_base58() {
        let owner = Pubkey::new_unique();
        let address = Pubkey::new_unique();
        let state = AccountState::from_account(
            address,
            Account {
                lamports: 10,
                data: vec![1, 2],
                owner,
                executable: false,
                rent_epoch: 0,
            },
        );
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["owner"], owner.to_string());
        assert_eq!(json["address"], address.to_string());
        assert_eq!(json["data"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_retryable() {
        let rpc = SolanaRpc::new("http://127.0.0.1:1".to_string(), Commitment::Confirmed);
        let err = rpc.get_freshness_token().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
