use crate::confirm::{Confirmer, SubmissionResult, SubmissionStatus};
use crate::error::{LedgerError, Result};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::rpc::{AccountState, LedgerRpc};
use crate::signer::{sign_transaction, TransactionSigner};
use crate::transaction::{FreshnessToken, TransactionBuilder};
use crate::websocket::SignatureWatcher;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Wall-clock time spent in each lifecycle step.
#[derive(Debug, Clone, Default)]
pub struct StepTimings {
    pub build_time: Duration,
    pub send_time: Duration,
    pub confirm_time: Duration,
}

/// How confirmation is awaited after submission.
pub enum ConfirmMode {
    Poll(Confirmer),
    Subscribe(SignatureWatcher),
}

/// Drives one transaction through build, sign, submit and confirm.
pub struct LedgerClient<R: ?Sized, S: ?Sized> {
    rpc: Arc<R>,
    signer: Arc<S>,
    fee_payer: Pubkey,
    builder: TransactionBuilder,
    confirm: ConfirmMode,
    retry: RetryConfig,
}

impl<R, S> LedgerClient<R, S>
where
    R: LedgerRpc + ?Sized,
    S: TransactionSigner + ?Sized,
{
    pub fn new(
        rpc: Arc<R>,
        signer: Arc<S>,
        fee_payer: Pubkey,
        builder: TransactionBuilder,
        confirm: ConfirmMode,
    ) -> Self {
        Self {
            rpc,
            signer,
            fee_payer,
            builder,
            confirm,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn fee_payer(&self) -> Pubkey {
        self.fee_payer
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    /// Fetches a blockhash, retrying only transient node errors.
    pub async fn fetch_token_with_backoff(&self) -> Result<FreshnessToken> {
        retry_with_backoff("get_freshness_token", &self.retry, || {
            self.rpc.get_freshness_token()
        })
        .await
    }

    /// Builds and signs a transaction against `token`.
    pub async fn prepare(
        &self,
        instructions: &[Instruction],
        token: &FreshnessToken,
    ) -> Result<Transaction> {
        let unsigned = self.builder.build(instructions, &self.fee_payer, token)?;
        sign_transaction(self.signer.as_ref(), unsigned).await
    }

    /// Submits signed bytes. A duplicate submission resolves to the
    /// transaction's own id, which is its fee payer signature.
    pub async fn submit(&self, transaction: &Transaction) -> Result<Signature> {
        match self.rpc.submit(transaction).await {
            Ok(signature) => Ok(signature),
            Err(LedgerError::DuplicateSubmission) => {
                let signature = transaction.signatures[0];
                info!(%signature, "transaction already processed, resuming confirmation");
                Ok(signature)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn confirm(
        &self,
        signature: &Signature,
        token: Option<&FreshnessToken>,
        cancel: watch::Receiver<bool>,
    ) -> SubmissionStatus {
        match &self.confirm {
            ConfirmMode::Poll(confirmer) => {
                confirmer
                    .confirm(self.rpc.as_ref(), signature, token, cancel)
                    .await
            }
            ConfirmMode::Subscribe(watcher) => match watcher
                .wait(self.rpc.as_ref(), signature, cancel)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    warn!(%signature, error = %e, "signature subscription failed");
                    SubmissionStatus::Failed(format!("subscription error: {e:#}"))
                }
            },
        }
    }

    /// The full lifecycle. Errors before or during submission are returned
    /// as `Err` and confirmation never starts; after submission every outcome
    /// is a `SubmissionStatus`.
    pub async fn send_and_confirm(
        &self,
        instructions: &[Instruction],
        cancel: watch::Receiver<bool>,
    ) -> Result<(SubmissionResult, StepTimings)> {
        let mut timings = StepTimings::default();

        let start = Instant::now();
        let token = self.fetch_token_with_backoff().await?;
        let transaction = self.prepare(instructions, &token).await?;
        timings.build_time = start.elapsed();

        let start = Instant::now();
        let signature = self.submit(&transaction).await?;
        timings.send_time = start.elapsed();

        let start = Instant::now();
        let status = self.confirm(&signature, Some(&token), cancel).await;
        timings.confirm_time = start.elapsed();

        Ok((
            SubmissionResult {
                transaction_id: signature,
                status,
            },
            timings,
        ))
    }

    /// Always re-fetched from the node.
    pub async fn account_state(&self, address: &Pubkey) -> Result<Option<AccountState>> {
        self.rpc.get_account_state(address).await
    }

    /// Fetches `address` and checks that `program_id` owns it and that its
    /// data starts with `discriminator`. An empty discriminator checks the
    /// owner only.
    pub async fn verify_account(
        &self,
        address: &Pubkey,
        program_id: &Pubkey,
        discriminator: &[u8],
    ) -> Result<AccountState> {
        let state = self
            .rpc
            .get_account_state(address)
            .await?
            .ok_or(LedgerError::AccountNotFound(*address))?;

        if state.owner != *program_id {
            return Err(LedgerError::AccountOwnerMismatch {
                address: *address,
                expected: *program_id,
                actual: state.owner,
            });
        }
        if !state.data.starts_with(discriminator) {
            return Err(LedgerError::AccountDiscriminatorMismatch(*address));
        }

        info!(%address, owner = %state.owner, len = state.data.len(), "account verified");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Commitment;
    use crate::confirm::cancellation;
    use crate::mock::MockLedger;
    use crate::schema::{account_discriminator, derive_address, ProgramSchema};
    use crate::signer::KeypairSigner;
    use solana_sdk::instruction::AccountMeta;
    use solana_sdk::signature::{Keypair, Signer};

    fn client(ledger: Arc<MockLedger>, payer: Keypair) -> LedgerClient<MockLedger, KeypairSigner> {
        let fee_payer = payer.pubkey();
        LedgerClient::new(
            ledger,
            Arc::new(KeypairSigner::new(vec![payer])),
            fee_payer,
            TransactionBuilder::default(),
            ConfirmMode::Poll(Confirmer::new(
                Commitment::Confirmed,
                Duration::from_millis(400),
                Duration::from_secs(30),
            )),
        )
    }

    fn initialize_ix(program_id: Pubkey, payer: Pubkey) -> Instruction {
        ProgramSchema::payer_only_initialize()
            .instruction("initialize")
            .unwrap()
            .bind(program_id, &[payer], &[])
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_confirms_and_account_is_readable() {
        let program_id = Pubkey::new_unique();
        let (derived, _) = derive_address(&[b"state"], &program_id);
        let initialized = AccountState {
            address: derived,
            owner: program_id,
            lamports: 1_000_000,
            data: account_discriminator("State").to_vec(),
            executable: false,
        };
        let ledger = Arc::new(
            MockLedger::new()
                .confirm_after_polls(2)
                .writes_on_land(initialized.clone()),
        );
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let client = client(ledger.clone(), payer);

        assert_eq!(client.account_state(&derived).await.unwrap(), None);

        let (_cancel, rx) = cancellation();
        let (result, _) = client
            .send_and_confirm(&[initialize_ix(program_id, payer_key)], rx)
            .await
            .unwrap();

        assert_eq!(result.status, SubmissionStatus::Confirmed);
        assert_eq!(ledger.status_queries(&result.transaction_id), 3);

        let state = client
            .verify_account(&derived, &program_id, &account_discriminator("State"))
            .await
            .unwrap();
        assert_eq!(state, initialized);
    }

    #[tokio::test]
    async fn test_verify_account_rejects_foreign_or_missing_accounts() {
        let program_id = Pubkey::new_unique();
        let other_program = Pubkey::new_unique();
        let foreign = AccountState {
            address: Pubkey::new_unique(),
            owner: other_program,
            lamports: 1,
            data: account_discriminator("State").to_vec(),
            executable: false,
        };
        let wrong_type = AccountState {
            address: Pubkey::new_unique(),
            owner: program_id,
            lamports: 1,
            data: account_discriminator("Vault").to_vec(),
            executable: false,
        };
        let missing = Pubkey::new_unique();
        let ledger = Arc::new(
            MockLedger::new()
                .with_account(foreign.clone())
                .with_account(wrong_type.clone()),
        );
        let client = client(ledger, Keypair::new());
        let discriminator = account_discriminator("State");

        assert_eq!(
            client
                .verify_account(&foreign.address, &program_id, &discriminator)
                .await
                .unwrap_err(),
            LedgerError::AccountOwnerMismatch {
                address: foreign.address,
                expected: program_id,
                actual: other_program,
            }
        );
        assert_eq!(
            client
                .verify_account(&wrong_type.address, &program_id, &discriminator)
                .await
                .unwrap_err(),
            LedgerError::AccountDiscriminatorMismatch(wrong_type.address)
        );
        assert_eq!(
            client
                .verify_account(&missing, &program_id, &discriminator)
                .await
                .unwrap_err(),
            LedgerError::AccountNotFound(missing)
        );
        // Owner-only check.
        assert!(client
            .verify_account(&wrong_type.address, &program_id, &[])
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_error_on_submit_skips_confirmation() {
        let ledger = Arc::new(
            MockLedger::new().reject_submit_with(LedgerError::ProgramExecutionError { code: 1 }),
        );
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let client = client(ledger.clone(), payer);

        let (_cancel, rx) = cancellation();
        let err = client
            .send_and_confirm(&[initialize_ix(Pubkey::new_unique(), payer_key)], rx)
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::ProgramExecutionError { code: 1 });
        assert_eq!(ledger.submit_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submission_yields_same_id() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let client = client(ledger.clone(), payer);

        let token = client.fetch_token_with_backoff().await.unwrap();
        let tx = client
            .prepare(&[initialize_ix(Pubkey::new_unique(), payer_key)], &token)
            .await
            .unwrap();

        let first = client.submit(&tx).await.unwrap();
        let second = client.submit(&tx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            ledger.submit(&tx).await.unwrap_err(),
            LedgerError::DuplicateSubmission
        );

        let (_cancel, rx) = cancellation();
        assert_eq!(
            client.confirm(&second, Some(&token), rx).await,
            SubmissionStatus::Confirmed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_rejected() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let client = client(ledger.clone(), payer);

        let token = client.fetch_token_with_backoff().await.unwrap();
        ledger.advance_block_height(token.last_valid_block_height + 1);

        let tx = client
            .prepare(&[initialize_ix(Pubkey::new_unique(), payer_key)], &token)
            .await
            .unwrap();
        let err = client.submit(&tx).await.unwrap_err();
        assert!(matches!(err, LedgerError::FreshnessTokenExpired(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cosigner_fails_before_submit() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let cosigner = Pubkey::new_unique();
        let client = client(ledger.clone(), payer);

        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(payer_key, true),
                AccountMeta::new_readonly(cosigner, true),
            ],
            data: vec![],
        };
        let (_cancel, rx) = cancellation();
        let err = client.send_and_confirm(&[ix], rx).await.unwrap_err();

        assert_eq!(err, LedgerError::UnknownSigner(cosigner));
        assert_eq!(ledger.submit_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_confirmations_are_independent() {
        let ledger = Arc::new(MockLedger::new().confirm_after_polls(3));
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let client = Arc::new(client(ledger.clone(), payer));

        let mut handles = Vec::new();
        for i in 0..4u8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let ix = Instruction {
                    program_id: Pubkey::new_unique(),
                    accounts: vec![AccountMeta::new(payer_key, true)],
                    data: vec![i],
                };
                let (_cancel, rx) = cancellation();
                client.send_and_confirm(&[ix], rx).await
            }));
        }

        for handle in handles {
            let (result, _) = handle.await.unwrap().unwrap();
            assert_eq!(result.status, SubmissionStatus::Confirmed);
        }
        assert_eq!(ledger.submit_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_confirmation_does_not_delay_others() {
        let ledger = Arc::new(MockLedger::new().confirm_after_polls(3));
        let payer = Keypair::new();
        let payer_key = payer.pubkey();
        let client = Arc::new(client(ledger.clone(), payer));

        let token = client.fetch_token_with_backoff().await.unwrap();
        let mut signatures = Vec::new();
        for i in 0..4u8 {
            let ix = Instruction {
                program_id: Pubkey::new_unique(),
                accounts: vec![AccountMeta::new(payer_key, true)],
                data: vec![i],
            };
            let tx = client.prepare(&[ix], &token).await.unwrap();
            signatures.push(client.submit(&tx).await.unwrap());
        }
        ledger.stall_status(&signatures[0]);

        let mut handles = Vec::new();
        for signature in signatures.clone() {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                let (_cancel, rx) = cancellation();
                let status = client.confirm(&signature, Some(&token), rx).await;
                (status, started.elapsed())
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        assert_eq!(outcomes[0].0, SubmissionStatus::TimedOut);
        for (status, elapsed) in &outcomes[1..] {
            assert_eq!(*status, SubmissionStatus::Confirmed);
            // Three unknown polls at 400ms, confirmed on the fourth.
            assert!(*elapsed < Duration::from_secs(2));
        }
        for signature in &signatures[1..] {
            assert_eq!(ledger.status_queries(signature), 4);
        }
        assert_eq!(ledger.submit_calls(), 4);
    }
}
