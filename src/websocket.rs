use crate::config::Commitment;
use crate::confirm::{cancelled, SubmissionStatus};
use crate::rpc::{LedgerRpc, SignatureStatus};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

// Sent to the server to subscribe
#[derive(Debug, Serialize, Deserialize)]
struct SignatureSubscription {
    jsonrpc: String,
    id: u64,
    method: String,
    params: Vec<serde_json::Value>,
}

// Received from server as acknowledgement of subscription
#[derive(Debug, Deserialize)]
struct SubscriptionAcknowledgement {
    id: u64,
    result: u64, // subscription id
}

#[derive(Debug, Deserialize)]
struct SubscriptionFailure {
    id: u64,
    error: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NotificationContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct NotificationValue {
    err: Option<serde_json::Value>, // Error object or null
}

#[derive(Debug, Deserialize)]
struct NotificationResultData {
    context: NotificationContext,
    value: NotificationValue,
}

#[derive(Debug, Deserialize)]
struct SignatureNotificationParams {
    result: NotificationResultData,
    subscription: u64,
}

#[derive(Debug, Deserialize)]
struct SignatureNotification {
    params: SignatureNotificationParams,
}

/// What a single pubsub text frame means for the watched signature.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PubsubEvent {
    Subscribed { request_id: u64, subscription: u64 },
    Rejected { request_id: u64, error: String },
    Notified { subscription: u64, slot: u64, err: Option<String> },
    Other,
}

fn parse_event(text: &str) -> PubsubEvent {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(text) else {
        return PubsubEvent::Other;
    };

    if v.get("method").is_some_and(|m| m == "signatureNotification") {
        return match serde_json::from_value::<SignatureNotification>(v) {
            Ok(n) => PubsubEvent::Notified {
                subscription: n.params.subscription,
                slot: n.params.result.context.slot,
                err: n
                    .params
                    .result
                    .value
                    .err
                    .filter(|e| !e.is_null())
                    .map(|e| e.to_string()),
            },
            Err(_) => PubsubEvent::Other,
        };
    }

    if v.get("error").is_some() {
        if let Ok(failure) = serde_json::from_value::<SubscriptionFailure>(v) {
            return PubsubEvent::Rejected {
                request_id: failure.id,
                error: failure.error.to_string(),
            };
        }
        return PubsubEvent::Other;
    }

    match serde_json::from_value::<SubscriptionAcknowledgement>(v) {
        Ok(ack) => PubsubEvent::Subscribed {
            request_id: ack.id,
            subscription: ack.result,
        },
        Err(_) => PubsubEvent::Other,
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REQUEST_ID: u64 = 1;

/// Confirms a signature through `signatureSubscribe` instead of polling.
#[derive(Debug, Clone)]
pub struct SignatureWatcher {
    ws_url: String,
    commitment: Commitment,
    timeout: Duration,
}

impl SignatureWatcher {
    pub fn new(ws_url: String, commitment: Commitment, timeout: Duration) -> Self {
        Self {
            ws_url,
            commitment,
            timeout,
        }
    }

    /// Resolves on the first notification, the deadline, or cancellation.
    ///
    /// Once the subscription is acknowledged the signature's status is read
    /// once through `rpc`: a transaction that reached the target commitment
    /// before the subscription existed gets no notification. A connected
    /// socket is closed on every path.
    pub async fn wait<R>(
        &self,
        rpc: &R,
        signature: &Signature,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SubmissionStatus>
    where
        R: LedgerRpc + ?Sized,
    {
        let deadline = Instant::now() + self.timeout;
        let (mut ws_stream, _) = tokio::select! {
            connected = connect_async(&self.ws_url) => connected
                .with_context(|| format!("failed to connect to {}", self.ws_url))?,
            _ = sleep_until(deadline) => {
                tracing::warn!(%signature, url = %self.ws_url, "connect timed out");
                return Ok(SubmissionStatus::TimedOut);
            }
            _ = cancelled(&mut cancel) => {
                tracing::info!(%signature, "subscription cancelled while connecting");
                return Ok(SubmissionStatus::Cancelled);
            }
        };

        let outcome = self
            .read_until_resolved(&mut ws_stream, rpc, signature, deadline, &mut cancel)
            .await;

        if let Err(e) = ws_stream.close(None).await {
            tracing::debug!("failed to close WebSocket {}: {}", self.ws_url, e);
        }
        outcome
    }

    async fn read_until_resolved<R>(
        &self,
        ws_stream: &mut WsStream,
        rpc: &R,
        signature: &Signature,
        deadline: Instant,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<SubmissionStatus>
    where
        R: LedgerRpc + ?Sized,
    {
        let subscription_payload = SignatureSubscription {
            jsonrpc: "2.0".to_string(),
            id: REQUEST_ID,
            method: "signatureSubscribe".to_string(),
            params: vec![
                serde_json::to_value(signature.to_string())?,
                serde_json::json!({ "commitment": self.commitment.as_str() }),
            ],
        };
        ws_stream
            .send(Message::Text(serde_json::to_string(&subscription_payload)?))
            .await
            .context("failed to send subscription request")?;

        let mut subscription_id = None;
        loop {
            let msg = tokio::select! {
                msg = ws_stream.next() => msg,
                _ = sleep_until(deadline) => {
                    tracing::warn!(%signature, url = %self.ws_url, "subscription timed out");
                    return Ok(SubmissionStatus::TimedOut);
                }
                _ = cancelled(cancel) => {
                    tracing::info!(%signature, "subscription cancelled");
                    return Ok(SubmissionStatus::Cancelled);
                }
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("Received WebSocket message on {}: {}", self.ws_url, text);
                    match parse_event(&text) {
                        PubsubEvent::Subscribed {
                            request_id: REQUEST_ID,
                            subscription,
                        } => {
                            tracing::info!(
                                %signature,
                                subscription,
                                url = %self.ws_url,
                                "subscription acknowledged"
                            );
                            subscription_id = Some(subscription);

                            let landed = tokio::select! {
                                status = rpc.get_status(signature) => status,
                                _ = sleep_until(deadline) => {
                                    tracing::warn!(%signature, "subscription timed out");
                                    return Ok(SubmissionStatus::TimedOut);
                                }
                                _ = cancelled(cancel) => {
                                    tracing::info!(%signature, "subscription cancelled");
                                    return Ok(SubmissionStatus::Cancelled);
                                }
                            };
                            if let Some(status) = self.already_resolved(signature, landed) {
                                return Ok(status);
                            }
                        }
                        PubsubEvent::Rejected { request_id, error } => {
                            anyhow::bail!(
                                "subscription request {} rejected by {}: {}",
                                request_id,
                                self.ws_url,
                                error
                            );
                        }
                        PubsubEvent::Notified {
                            subscription,
                            slot,
                            err,
                        } if subscription_id == Some(subscription) => {
                            return Ok(match err {
                                None => {
                                    tracing::info!(%signature, slot, "transaction confirmed");
                                    SubmissionStatus::Confirmed
                                }
                                Some(reason) => {
                                    tracing::warn!(%signature, slot, %reason, "transaction failed");
                                    SubmissionStatus::Failed(reason)
                                }
                            });
                        }
                        other => {
                            tracing::warn!(
                                "Received unhandled WebSocket message on {}: {:?}",
                                self.ws_url,
                                other
                            );
                        }
                    }
                }
                Some(Ok(Message::Close(close_frame))) => {
                    anyhow::bail!(
                        "WebSocket connection to {} closed by server: {:?}",
                        self.ws_url,
                        close_frame
                    );
                }
                Some(Ok(_)) => {
                    tracing::debug!("Received non-text WebSocket message on {}", self.ws_url);
                }
                Some(Err(e)) => {
                    return Err(e).with_context(|| format!("error reading from {}", self.ws_url));
                }
                None => anyhow::bail!("WebSocket stream {} ended", self.ws_url),
            }
        }
    }

    /// Status read right after subscribing; `Some` if no notification will follow.
    fn already_resolved(
        &self,
        signature: &Signature,
        status: crate::error::Result<SignatureStatus>,
    ) -> Option<SubmissionStatus> {
        match status {
            Ok(SignatureStatus::Landed(level)) if level >= self.commitment => {
                tracing::info!(
                    %signature,
                    commitment = level.as_str(),
                    "transaction already confirmed"
                );
                Some(SubmissionStatus::Confirmed)
            }
            Ok(SignatureStatus::Failed { reason, .. }) => {
                tracing::warn!(%signature, %reason, "transaction already failed");
                Some(SubmissionStatus::Failed(reason))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(%signature, error = %e, "status check after subscribe failed");
                None
            }
        }
    }
}
