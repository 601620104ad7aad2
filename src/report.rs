use crate::client::StepTimings;
use crate::confirm::SubmissionResult;
use crate::rpc::AccountState;
use serde::Serialize;
use std::time::Duration;
use url::form_urlencoded;

#[derive(Debug, Serialize)]
pub struct LifecycleReport {
    pub node_url: String,
    pub explorer_url: String,
    #[serde(flatten)]
    pub result: SubmissionResult,
    pub build_time: Duration,
    pub send_time: Duration,
    pub confirm_time: Duration,
    pub account: Option<AccountState>,
}

impl LifecycleReport {
    pub fn new(node_url: String, result: SubmissionResult, timings: StepTimings) -> Self {
        Self {
            explorer_url: explorer_url(&node_url, &result.transaction_id.to_string()),
            node_url,
            result,
            build_time: timings.build_time,
            send_time: timings.send_time,
            confirm_time: timings.confirm_time,
            account: None,
        }
    }

    pub fn with_account(mut self, account: Option<AccountState>) -> Self {
        self.account = account;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|_| "Error serializing lifecycle report".to_string())
    }
}

fn explorer_url(node_url: &str, signature: &str) -> String {
    let cluster = if node_url.contains("devnet") {
        "?cluster=devnet".to_string()
    } else if node_url.contains("testnet") {
        "?cluster=testnet".to_string()
    } else if node_url.contains("mainnet") {
        String::new()
    } else {
        let encoded: String = form_urlencoded::byte_serialize(node_url.as_bytes()).collect();
        format!("?cluster=custom&customUrl={encoded}")
    };
    format!("https://explorer.solana.com/tx/{signature}{cluster}")
}
