//! In-process ledger node for tests.
//!
//! Verifies signatures and blockhash validity on submit, reports a signature
//! as unknown for a configurable number of status polls before it lands, and
//! applies account writes the moment a transaction lands.

use crate::config::Commitment;
use crate::error::{LedgerError, Result};
use crate::rpc::{AccountState, LedgerRpc, SignatureStatus};
use crate::transaction::FreshnessToken;
use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::collections::{HashMap, HashSet};

/// Blocks a blockhash stays valid for on mainnet.
pub const BLOCKHASH_VALIDITY: u64 = 150;

#[derive(Debug, Default)]
struct Submission {
    status_queries: u32,
    landed: bool,
}

#[derive(Debug, Default)]
struct MockState {
    block_height: u64,
    blockhashes: HashMap<Hash, u64>,
    submissions: HashMap<Signature, Submission>,
    stalled: HashSet<Signature>,
    submit_calls: u32,
    accounts: HashMap<Pubkey, AccountState>,
}

#[derive(Debug)]
pub struct MockLedger {
    confirm_after_polls: u32,
    landed_commitment: Commitment,
    execution_error: Option<u32>,
    submit_error: Option<LedgerError>,
    never_propagate: bool,
    writes_on_land: Vec<AccountState>,
    state: Mutex<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            confirm_after_polls: 0,
            landed_commitment: Commitment::Confirmed,
            execution_error: None,
            submit_error: None,
            never_propagate: false,
            writes_on_land: Vec::new(),
            state: Mutex::new(MockState {
                block_height: 1,
                ..MockState::default()
            }),
        }
    }

    /// The first `polls` status queries for a signature report `Unknown`.
    pub fn confirm_after_polls(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls;
        self
    }

    pub fn landed_commitment(mut self, commitment: Commitment) -> Self {
        self.landed_commitment = commitment;
        self
    }

    /// Transactions land but the program rejects them with `Custom(code)`.
    pub fn fail_execution_with(mut self, code: u32) -> Self {
        self.execution_error = Some(code);
        self
    }

    /// `submit` fails with `error` (after signature and blockhash checks).
    pub fn reject_submit_with(mut self, error: LedgerError) -> Self {
        self.submit_error = Some(error);
        self
    }

    pub fn never_propagate(mut self) -> Self {
        self.never_propagate = true;
        self
    }

    /// Account written when a transaction lands.
    pub fn writes_on_land(mut self, account: AccountState) -> Self {
        self.writes_on_land.push(account);
        self
    }

    pub fn with_account(self, account: AccountState) -> Self {
        self.state.lock().accounts.insert(account.address, account);
        self
    }

    pub fn advance_block_height(&self, height: u64) {
        let mut state = self.state.lock();
        state.block_height = state.block_height.max(height);
    }

    /// Mints a blockhash valid from the current height.
    pub fn current_token(&self) -> FreshnessToken {
        let mut state = self.state.lock();
        let blockhash = Hash::new_unique();
        let last_valid_block_height = state.block_height + BLOCKHASH_VALIDITY;
        state.blockhashes.insert(blockhash, last_valid_block_height);
        FreshnessToken {
            blockhash,
            last_valid_block_height,
        }
    }

    /// Registers a signature as submitted without going through `submit`.
    pub fn submit_dummy(&self) -> Signature {
        let signature = Signature::new_unique();
        self.state
            .lock()
            .submissions
            .insert(signature, Submission::default());
        signature
    }

    /// Status queries for `signature` never resolve from now on.
    pub fn stall_status(&self, signature: &Signature) {
        self.state.lock().stalled.insert(*signature);
    }

    pub fn status_queries(&self, signature: &Signature) -> u32 {
        self.state
            .lock()
            .submissions
            .get(signature)
            .map_or(0, |s| s.status_queries)
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().submit_calls
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn get_freshness_token(&self) -> Result<FreshnessToken> {
        Ok(self.current_token())
    }

    async fn submit(&self, transaction: &Transaction) -> Result<Signature> {
        let mut state = self.state.lock();
        state.submit_calls += 1;

        transaction
            .verify()
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;

        let blockhash = transaction.message.recent_blockhash;
        match state.blockhashes.get(&blockhash) {
            Some(last_valid) if *last_valid >= state.block_height => {}
            _ => {
                return Err(LedgerError::FreshnessTokenExpired(
                    "blockhash not found".to_string(),
                ))
            }
        }

        if let Some(err) = &self.submit_error {
            return Err(err.clone());
        }

        let signature = transaction.signatures[0];
        if state.submissions.contains_key(&signature) {
            return Err(LedgerError::DuplicateSubmission);
        }
        state.submissions.insert(signature, Submission::default());
        Ok(signature)
    }

    async fn get_status(&self, signature: &Signature) -> Result<SignatureStatus> {
        let stalled = self.state.lock().stalled.contains(signature);
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        let Some(submission) = state.submissions.get_mut(signature) else {
            return Ok(SignatureStatus::Unknown);
        };
        submission.status_queries += 1;

        if self.never_propagate || submission.status_queries <= self.confirm_after_polls {
            return Ok(SignatureStatus::Unknown);
        }

        if let Some(code) = self.execution_error {
            return Ok(SignatureStatus::Failed {
                reason: format!("Error processing Instruction 0: custom program error: {code:#x}"),
                code: Some(code),
            });
        }

        if !submission.landed {
            submission.landed = true;
            for account in &self.writes_on_land {
                state.accounts.insert(account.address, account.clone());
            }
        }
        Ok(SignatureStatus::Landed(self.landed_commitment))
    }

    async fn get_account_state(&self, address: &Pubkey) -> Result<Option<AccountState>> {
        Ok(self.state.lock().accounts.get(address).cloned())
    }

    async fn get_block_height(&self) -> Result<u64> {
        Ok(self.state.lock().block_height)
    }
}
