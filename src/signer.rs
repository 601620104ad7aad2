use crate::config::KeySource;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use std::collections::HashMap;
use std::fmt;

/// A signing capability: a local keystore, a hardware key or a remote wallet.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Addresses this signer can produce signatures for.
    fn pubkeys(&self) -> Vec<Pubkey>;

    /// Signs `payload` with the key behind `signer`.
    async fn sign(&self, payload: &[u8], signer: &Pubkey) -> Result<Signature>;
}

/// In-memory ed25519 keypairs indexed by address.
pub struct KeypairSigner {
    keypairs: HashMap<Pubkey, Keypair>,
}

impl KeypairSigner {
    pub fn new(keypairs: Vec<Keypair>) -> Self {
        Self {
            keypairs: keypairs.into_iter().map(|kp| (kp.pubkey(), kp)).collect(),
        }
    }

    pub fn from_source(source: &KeySource) -> Result<Self> {
        match source {
            KeySource::File(path) => {
                // The underlying error may echo file contents, so only the path is reported.
                let keypair = read_keypair_file(path).map_err(|_| {
                    LedgerError::SigningUnavailable(format!(
                        "failed reading keypair from {}",
                        path.display()
                    ))
                })?;
                Ok(Self::new(vec![keypair]))
            }
        }
    }

    pub fn add(&mut self, keypair: Keypair) {
        self.keypairs.insert(keypair.pubkey(), keypair);
    }
}

impl fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("pubkeys", &self.keypairs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkeys(&self) -> Vec<Pubkey> {
        self.keypairs.keys().copied().collect()
    }

    async fn sign(&self, payload: &[u8], signer: &Pubkey) -> Result<Signature> {
        let keypair = self
            .keypairs
            .get(signer)
            .ok_or(LedgerError::UnknownSigner(*signer))?;
        Ok(keypair.sign_message(payload))
    }
}

/// Fills every required signature slot of `transaction`.
///
/// Slot `i` belongs to `message.account_keys[i]`; the fee payer is always slot 0.
pub async fn sign_transaction<S>(signer: &S, mut transaction: Transaction) -> Result<Transaction>
where
    S: TransactionSigner + ?Sized,
{
    let payload = transaction.message_data();
    let required = transaction.message.header.num_required_signatures as usize;
    let signer_keys: Vec<Pubkey> = transaction.message.account_keys[..required].to_vec();

    for (slot, key) in signer_keys.iter().enumerate() {
        transaction.signatures[slot] = signer.sign(&payload, key).await?;
    }

    transaction
        .verify()
        .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;

    tracing::debug!(
        signature = %transaction.signatures[0],
        signers = required,
        "transaction signed"
    );
    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::message::Message;
    use std::io::Write;

    fn two_signer_transaction(payer: &Pubkey, other: &Pubkey) -> Transaction {
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new_readonly(*other, true),
            ],
            data: vec![],
        };
        let message = Message::new_with_blockhash(&[ix], Some(payer), &Hash::new_unique());
        Transaction::new_unsigned(message)
    }

    #[tokio::test]
    async fn test_signing_is_deterministic() {
        let keypair = Keypair::new();
        let pubkey = keypair.pubkey();
        let signer = KeypairSigner::new(vec![keypair]);

        let first = signer.sign(b"payload", &pubkey).await.unwrap();
        let second = signer.sign(b"payload", &pubkey).await.unwrap();
        assert_eq!(first, second);
        assert!(first.verify(pubkey.as_ref(), b"payload"));
    }

    #[tokio::test]
    async fn test_unknown_signer() {
        let signer = KeypairSigner::new(vec![Keypair::new()]);
        let stranger = Pubkey::new_unique();
        let err = signer.sign(b"payload", &stranger).await.unwrap_err();
        assert_eq!(err, LedgerError::UnknownSigner(stranger));
    }

    #[tokio::test]
    async fn test_sign_transaction_fills_all_slots() {
        let payer = Keypair::new();
        let other = Keypair::new();
        let tx = two_signer_transaction(&payer.pubkey(), &other.pubkey());
        let signer = KeypairSigner::new(vec![payer, other]);

        let signed = sign_transaction(&signer, tx).await.unwrap();
        assert!(signed.is_signed());
        assert!(signed.verify().is_ok());
    }

    #[tokio::test]
    async fn test_sign_transaction_missing_key() {
        let payer = Keypair::new();
        let other = Pubkey::new_unique();
        let tx = two_signer_transaction(&payer.pubkey(), &other);
        let signer = KeypairSigner::new(vec![payer]);

        let err = sign_transaction(&signer, tx).await.unwrap_err();
        assert_eq!(err, LedgerError::UnknownSigner(other));
    }

    #[test]
    fn test_from_source_missing_file_does_not_leak() {
        let source = KeySource::File("/nonexistent/id.json".into());
        let err = KeypairSigner::from_source(&source).unwrap_err();
        assert!(matches!(err, LedgerError::SigningUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_source_reads_cli_keypair_file() {
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let signer = KeypairSigner::from_source(&KeySource::File(file.path().into())).unwrap();
        assert_eq!(signer.pubkeys(), vec![keypair.pubkey()]);
        assert!(!format!("{signer:?}").contains(&format!("{:?}", keypair.to_bytes())));
    }
}
