use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::instruction::InstructionError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

// JSON-RPC server error codes returned by Solana nodes.
const JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;
const JSON_RPC_SERVER_ERROR_TRANSACTION_SIGNATURE_VERIFICATION_FAILURE: i64 = -32003;
const JSON_RPC_SERVER_ERROR_NODE_UNHEALTHY: i64 = -32005;

/// Every failure the submission pipeline can surface.
///
/// Variants fall into three groups: local validation errors that are never
/// retried, transient node errors the caller may retry with backoff, and
/// terminal program errors that must not be resubmitted with the same payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("transaction has no instructions")]
    EmptyInstructionSet,

    #[error("transaction requires {required} signers, limit is {limit}")]
    TooManySigners { required: usize, limit: usize },

    #[error("serialized transaction is {size} bytes, limit is {limit}")]
    SerializedSizeExceeded { size: usize, limit: usize },

    #[error("no key held for signer {0}")]
    UnknownSigner(Pubkey),

    #[error("signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("instruction `{instruction}` expects {expected} accounts, got {actual}")]
    AccountLayoutMismatch {
        instruction: String,
        expected: usize,
        actual: usize,
    },

    #[error("instruction `{0}` is not declared in the program schema")]
    UnknownInstruction(String),

    #[error("invalid program schema: {0}")]
    InvalidSchema(String),

    #[error("failed to encode transaction: {0}")]
    Encoding(String),

    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("node overloaded: {0}")]
    NodeOverloaded(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("program execution failed with custom error {code}")]
    ProgramExecutionError { code: u32 },

    #[error("transaction already processed")]
    DuplicateSubmission,

    #[error("freshness token expired: {0}")]
    FreshnessTokenExpired(String),

    #[error("account {0} does not exist")]
    AccountNotFound(Pubkey),

    #[error("account {address} is owned by {actual}, expected {expected}")]
    AccountOwnerMismatch {
        address: Pubkey,
        expected: Pubkey,
        actual: Pubkey,
    },

    #[error("account {0} data does not start with the expected discriminator")]
    AccountDiscriminatorMismatch(Pubkey),

    #[error("rpc error: {0}")]
    Rpc(String),
}

impl LedgerError {
    /// Whether the caller may retry the failed call with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NodeUnreachable(_) | Self::NodeOverloaded(_) | Self::SigningUnavailable(_) => {
                true
            }

            Self::EmptyInstructionSet
            | Self::TooManySigners { .. }
            | Self::SerializedSizeExceeded { .. }
            | Self::UnknownSigner(_)
            | Self::AccountLayoutMismatch { .. }
            | Self::UnknownInstruction(_)
            | Self::InvalidSchema(_)
            | Self::Encoding(_)
            | Self::InvalidSignature(_)
            | Self::InsufficientFunds(_)
            | Self::ProgramExecutionError { .. }
            | Self::DuplicateSubmission
            | Self::FreshnessTokenExpired(_)
            | Self::AccountNotFound(_)
            | Self::AccountOwnerMismatch { .. }
            | Self::AccountDiscriminatorMismatch(_)
            | Self::Rpc(_) => false,
        }
    }

    /// Errors produced before anything reaches the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::EmptyInstructionSet
                | Self::TooManySigners { .. }
                | Self::SerializedSizeExceeded { .. }
                | Self::UnknownSigner(_)
                | Self::AccountLayoutMismatch { .. }
                | Self::UnknownInstruction(_)
                | Self::InvalidSchema(_)
                | Self::Encoding(_)
        )
    }

    /// Classifies a transaction-level rejection reported by the node.
    pub fn from_transaction_error(err: &TransactionError) -> Self {
        match err {
            TransactionError::AlreadyProcessed => Self::DuplicateSubmission,
            TransactionError::BlockhashNotFound => {
                Self::FreshnessTokenExpired("blockhash not found".to_string())
            }
            TransactionError::SignatureFailure => {
                Self::InvalidSignature("signature verification failed".to_string())
            }
            TransactionError::InsufficientFundsForFee
            | TransactionError::InsufficientFundsForRent { .. }
            | TransactionError::AccountNotFound => Self::InsufficientFunds(err.to_string()),
            TransactionError::InstructionError(_, InstructionError::Custom(code)) => {
                Self::ProgramExecutionError { code: *code }
            }
            TransactionError::InstructionError(_, InstructionError::InsufficientFunds) => {
                Self::InsufficientFunds(err.to_string())
            }
            other => Self::Rpc(other.to_string()),
        }
    }

    /// Classifies a `solana_client` error into the taxonomy above.
    pub fn from_client_error(error: &ClientError) -> Self {
        match error.kind() {
            ClientErrorKind::Io(_) => Self::NodeUnreachable(error.to_string()),
            ClientErrorKind::Reqwest(reqwest_err) => match reqwest_err.status() {
                Some(status) if status.as_u16() == 429 || status.as_u16() == 503 => {
                    Self::NodeOverloaded(error.to_string())
                }
                Some(status) if status.is_server_error() => {
                    Self::NodeUnreachable(error.to_string())
                }
                Some(_) => Self::Rpc(error.to_string()),
                None => Self::NodeUnreachable(error.to_string()),
            },
            ClientErrorKind::TransactionError(tx_err) => Self::from_transaction_error(tx_err),
            ClientErrorKind::RpcError(RpcError::RpcResponseError {
                code, message, data, ..
            }) => Self::from_rpc_response(*code, message, data),
            ClientErrorKind::RpcError(RpcError::RpcRequestError(msg)) => {
                Self::NodeUnreachable(msg.clone())
            }
            _ => Self::Rpc(error.to_string()),
        }
    }

    fn from_rpc_response(code: i64, message: &str, data: &RpcResponseErrorData) -> Self {
        if let RpcResponseErrorData::SendTransactionPreflightFailure(result) = data {
            if let Some(tx_err) = &result.err {
                return Self::from_transaction_error(tx_err);
            }
        }
        match code {
            JSON_RPC_SERVER_ERROR_TRANSACTION_SIGNATURE_VERIFICATION_FAILURE => {
                Self::InvalidSignature(message.to_string())
            }
            JSON_RPC_SERVER_ERROR_NODE_UNHEALTHY => Self::NodeOverloaded(message.to_string()),
            JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE
                if message.to_lowercase().contains("blockhash not found") =>
            {
                Self::FreshnessTokenExpired(message.to_string())
            }
            _ => Self::Rpc(format!("{message} (code {code})")),
        }
    }
}

impl From<ClientError> for LedgerError {
    fn from(error: ClientError) -> Self {
        Self::from_client_error(&error)
    }
}
