use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    hash::Hash, instruction::Instruction, message::Message, packet::PACKET_DATA_SIZE,
    pubkey::Pubkey, transaction::Transaction,
};
use std::collections::BTreeSet;

/// A recent blockhash plus the last block height at which the node will
/// still accept transactions referencing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessToken {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BuilderLimits {
    pub max_transaction_size: usize,
    pub max_signers: usize,
}

impl Default for BuilderLimits {
    fn default() -> Self {
        Self {
            max_transaction_size: PACKET_DATA_SIZE,
            max_signers: 12,
        }
    }
}

/// Assembles unsigned transactions. Holds only limits, so one builder can be
/// shared by any number of concurrent submissions.
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    limits: BuilderLimits,
}

impl TransactionBuilder {
    pub fn new(limits: BuilderLimits) -> Self {
        Self { limits }
    }

    /// Builds the unsigned transaction. The fee payer becomes signer slot 0 and
    /// every other `is_signer` account gets a slot after it.
    pub fn build(
        &self,
        instructions: &[Instruction],
        fee_payer: &Pubkey,
        token: &FreshnessToken,
    ) -> Result<Transaction> {
        if instructions.is_empty() {
            return Err(LedgerError::EmptyInstructionSet);
        }

        let required = signer_set(instructions, fee_payer).len();
        if required > self.limits.max_signers {
            return Err(LedgerError::TooManySigners {
                required,
                limit: self.limits.max_signers,
            });
        }

        let message = Message::new_with_blockhash(instructions, Some(fee_payer), &token.blockhash);
        let transaction = Transaction::new_unsigned(message);

        let size = bincode::serialized_size(&transaction)
            .map_err(|e| LedgerError::Encoding(e.to_string()))?
            as usize;
        if size > self.limits.max_transaction_size {
            return Err(LedgerError::SerializedSizeExceeded {
                size,
                limit: self.limits.max_transaction_size,
            });
        }

        tracing::debug!(
            instructions = instructions.len(),
            signers = required,
            size,
            blockhash = %token.blockhash,
            "built transaction"
        );
        Ok(transaction)
    }
}

/// Fee payer plus every account flagged `is_signer` by any instruction.
pub fn signer_set(instructions: &[Instruction], fee_payer: &Pubkey) -> BTreeSet<Pubkey> {
    let mut signers = BTreeSet::from([*fee_payer]);
    signers.extend(
        instructions
            .iter()
            .flat_map(|ix| ix.accounts.iter())
            .filter(|meta| meta.is_signer)
            .map(|meta| meta.pubkey),
    );
    signers
}
