use anyhow::{Context, Result};
use clap::Parser;
use solana_sdk::signature::{write_keypair_file, Keypair, Signer};
use std::path::PathBuf;

/// Writes a fresh fee payer keypair in the Solana CLI JSON format.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output path for the keypair file
    #[arg(short, long, default_value = "id.json")]
    out: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    anyhow::ensure!(
        args.force || !args.out.exists(),
        "{} already exists, pass --force to overwrite",
        args.out.display()
    );

    let keypair = Keypair::new();
    write_keypair_file(&keypair, &args.out)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    tracing::info!(path = %args.out.display(), "keypair written");
    println!(
        "Generated keypair to {}, public key: {}",
        args.out.display(),
        keypair.pubkey()
    );
    Ok(())
}
