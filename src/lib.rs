pub mod client;
pub mod config;
pub mod confirm;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod report;
pub mod retry;
pub mod rpc;
pub mod schema;
pub mod signer;
pub mod transaction;
pub mod websocket;

pub use client::{ConfirmMode, LedgerClient, StepTimings};
pub use confirm::{cancellation, Confirmer, SubmissionResult, SubmissionStatus};
pub use error::{LedgerError, Result};
pub use rpc::{AccountState, LedgerRpc, SignatureStatus, SolanaRpc};
pub use signer::{KeypairSigner, TransactionSigner};
pub use transaction::{BuilderLimits, FreshnessToken, TransactionBuilder};
