use anyhow::{Context, Result};
use clap::Parser;
use ledger_submit::config::{ClientConfig, CliArgs, Command, ConfirmStrategy};
use ledger_submit::report::LifecycleReport;
use ledger_submit::schema::{account_discriminator, derive_address, ProgramSchema};
use ledger_submit::websocket::SignatureWatcher;
use ledger_submit::{
    cancellation, BuilderLimits, ConfirmMode, Confirmer, KeypairSigner, LedgerClient, LedgerRpc,
    SolanaRpc, SubmissionStatus, TransactionBuilder, TransactionSigner,
};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use std::str::FromStr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = CliArgs::parse();
    let config = ClientConfig::load(&args)?;
    let rpc = Arc::new(SolanaRpc::new(config.http_url.clone(), config.commitment));

    match args.command {
        Command::Initialize {
            program_id,
            idl,
            instruction,
            seed,
            account_type,
        } => {
            let program_id = Pubkey::from_str(&program_id)
                .map_err(|e| anyhow::anyhow!("Invalid program id {}: {}", program_id, e))?;
            let schema = match &idl {
                Some(path) => ProgramSchema::from_file(path)?,
                None => ProgramSchema::payer_only_initialize(),
            };
            let request = InitializeRequest {
                program_id,
                schema: &schema,
                instruction: &instruction,
                seeds: &seed,
                account_type: account_type.as_deref(),
            };
            initialize(&config, rpc, request).await
        }
        Command::Account { address } => {
            let address = Pubkey::from_str(&address)
                .map_err(|e| anyhow::anyhow!("Invalid address {}: {}", address, e))?;
            match rpc.get_account_state(&address).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("account {address} not found"),
            }
            Ok(())
        }
    }
}

struct InitializeRequest<'a> {
    program_id: Pubkey,
    schema: &'a ProgramSchema,
    instruction: &'a str,
    seeds: &'a [String],
    account_type: Option<&'a str>,
}

async fn initialize(
    config: &ClientConfig,
    rpc: Arc<SolanaRpc>,
    request: InitializeRequest<'_>,
) -> Result<()> {
    let InitializeRequest {
        program_id,
        schema,
        instruction,
        seeds,
        account_type,
    } = request;
    let signer = KeypairSigner::from_source(&config.key_source())?;
    let fee_payer = *signer
        .pubkeys()
        .first()
        .context("keypair source holds no keys")?;

    let derived = (!seeds.is_empty()).then(|| {
        let seeds: Vec<&[u8]> = seeds.iter().map(|s| s.as_bytes()).collect();
        derive_address(&seeds, &program_id).0
    });

    // Fill the schema's account roles in order: payer, derived account, system program.
    let ix_schema = schema.instruction(instruction)?;
    let candidates: Vec<Pubkey> = std::iter::once(fee_payer)
        .chain(derived)
        .chain(std::iter::once(system_program::id()))
        .collect();
    let needed = ix_schema.accounts.len();
    anyhow::ensure!(
        needed <= candidates.len(),
        "instruction `{}` needs {} accounts; pass --seed for a derived account",
        instruction,
        needed
    );
    let ix = ix_schema.bind(program_id, &candidates[..needed], &[])?;

    let builder = TransactionBuilder::new(BuilderLimits {
        max_transaction_size: config.max_transaction_size,
        max_signers: config.max_signers,
    });
    let confirm = match config.confirm_strategy {
        ConfirmStrategy::Poll => ConfirmMode::Poll(Confirmer::new(
            config.commitment,
            config.poll_interval(),
            config.confirm_timeout(),
        )),
        ConfirmStrategy::Subscribe => ConfirmMode::Subscribe(SignatureWatcher::new(
            config.ws_url(),
            config.commitment,
            config.confirm_timeout(),
        )),
    };
    let client = LedgerClient::new(rpc.clone(), Arc::new(signer), fee_payer, builder, confirm)
        .with_retry(config.retry.clone());

    // Ctrl-C abandons confirmation only; the transaction may still land.
    let (cancel_tx, cancel_rx) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let (result, timings) = client.send_and_confirm(&[ix], cancel_rx).await?;
    println!("Your transaction signature {}", result.transaction_id);

    // The derived account must now exist, owned by the program.
    let account = match (&result.status, derived) {
        (SubmissionStatus::Confirmed, Some(address)) => {
            let discriminator: Vec<u8> = account_type
                .map(|name| account_discriminator(name).to_vec())
                .unwrap_or_default();
            let state = client
                .verify_account(&address, &program_id, &discriminator)
                .await
                .with_context(|| format!("account verification failed for {address}"))?;
            Some(state)
        }
        _ => None,
    };
    let status = result.status.clone();
    let report = LifecycleReport::new(rpc.url(), result, timings).with_account(account);
    println!("{}", report.to_json());

    match status {
        SubmissionStatus::Confirmed => Ok(()),
        other => anyhow::bail!("transaction did not confirm: {}", other),
    }
}
