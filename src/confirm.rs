use crate::config::Commitment;
use crate::rpc::{LedgerRpc, SignatureStatus};
use crate::transaction::FreshnessToken;
use serde::Serialize;
use solana_sdk::signature::Signature;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Terminal (or, before confirmation starts, initial) state of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "pending"),
            SubmissionStatus::Confirmed => write!(f, "confirmed"),
            SubmissionStatus::Failed(reason) => write!(f, "failed: {reason}"),
            SubmissionStatus::TimedOut => write!(f, "timed out"),
            SubmissionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionResult {
    #[serde(serialize_with = "display")]
    pub transaction_id: Signature,
    #[serde(flatten)]
    pub status: SubmissionStatus,
}

fn display<S: serde::Serializer>(sig: &Signature, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(sig)
}

/// Creates a cancellation pair. Sending `true` cancels every confirmation
/// holding a receiver; dropping the sender never does.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender dropped without cancelling: never fire.
        std::future::pending::<()>().await;
    }
}

/// Polls a node until a signature reaches the target commitment.
///
/// Holds no state between calls; each `confirm` is an independent wait, so
/// any number of confirmations can run concurrently against one `LedgerRpc`.
#[derive(Debug, Clone)]
pub struct Confirmer {
    pub commitment: Commitment,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Confirmer {
    pub fn new(commitment: Commitment, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            commitment,
            poll_interval,
            timeout,
        }
    }

    /// Runs the `Pending -> Confirmed | Failed | TimedOut | Cancelled` loop.
    ///
    /// Every node call is raced against the deadline and `cancel`, so a
    /// stalled request never holds the result past either.
    ///
    /// With a freshness token, a signature still unknown after the chain
    /// passes the token's last valid block height is reported as failed: the
    /// node will never accept it.
    pub async fn confirm<R>(
        &self,
        rpc: &R,
        signature: &Signature,
        token: Option<&FreshnessToken>,
        mut cancel: watch::Receiver<bool>,
    ) -> SubmissionStatus
    where
        R: LedgerRpc + ?Sized,
    {
        let deadline = Instant::now() + self.timeout;
        let mut polls = 0u32;

        loop {
            if *cancel.borrow() {
                info!(%signature, polls, "confirmation cancelled");
                return SubmissionStatus::Cancelled;
            }
            if Instant::now() >= deadline {
                warn!(%signature, polls, timeout = ?self.timeout, "confirmation timed out");
                return SubmissionStatus::TimedOut;
            }

            polls += 1;
            let outcome = tokio::select! {
                outcome = self.poll_once(rpc, signature, token, polls) => outcome,
                _ = sleep_until(deadline) => {
                    warn!(%signature, polls, timeout = ?self.timeout, "confirmation timed out");
                    return SubmissionStatus::TimedOut;
                }
                _ = cancelled(&mut cancel) => {
                    info!(%signature, polls, "confirmation cancelled");
                    return SubmissionStatus::Cancelled;
                }
            };
            if let Some(status) = outcome {
                return status;
            }

            let next_poll = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                _ = sleep_until(next_poll) => {}
                _ = cancelled(&mut cancel) => {
                    info!(%signature, polls, "confirmation cancelled");
                    return SubmissionStatus::Cancelled;
                }
            }
        }
    }

    /// One status query; `Some` when the signature reached a terminal state.
    async fn poll_once<R>(
        &self,
        rpc: &R,
        signature: &Signature,
        token: Option<&FreshnessToken>,
        polls: u32,
    ) -> Option<SubmissionStatus>
    where
        R: LedgerRpc + ?Sized,
    {
        match rpc.get_status(signature).await {
            Ok(SignatureStatus::Landed(level)) if level >= self.commitment => {
                info!(%signature, polls, commitment = level.as_str(), "transaction confirmed");
                Some(SubmissionStatus::Confirmed)
            }
            Ok(SignatureStatus::Failed { reason, code }) => {
                warn!(%signature, polls, %reason, ?code, "transaction failed");
                Some(SubmissionStatus::Failed(reason))
            }
            Ok(SignatureStatus::Landed(level)) => {
                debug!(%signature, polls, commitment = level.as_str(), "awaiting commitment");
                None
            }
            Ok(SignatureStatus::Unknown) => {
                if let Some(token) = token {
                    if self.blockhash_expired(rpc, token).await {
                        warn!(
                            %signature,
                            last_valid_block_height = token.last_valid_block_height,
                            "blockhash expired before transaction landed"
                        );
                        return Some(SubmissionStatus::Failed("blockhash expired".to_string()));
                    }
                }
                debug!(%signature, polls, "signature not yet visible");
                None
            }
            Err(e) => {
                // Status queries are idempotent; keep polling until the deadline.
                warn!(%signature, polls, error = %e, "status query failed");
                None
            }
        }
    }

    async fn blockhash_expired<R>(&self, rpc: &R, token: &FreshnessToken) -> bool
    where
        R: LedgerRpc + ?Sized,
    {
        match rpc.get_block_height().await {
            Ok(height) => height > token.last_valid_block_height,
            Err(e) => {
                debug!(error = %e, "block height query failed");
                false
            }
        }
    }
}
