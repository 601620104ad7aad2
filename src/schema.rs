//! Declarative instruction schemas.
//!
//! A program's instruction set is described as data: each instruction has a
//! name, an ordered list of account roles and a payload prefix. Binding a
//! schema to concrete addresses yields a ready-to-submit `Instruction`. The
//! JSON form accepts the legacy Anchor IDL layout (`isMut` / `isSigner`), so
//! `target/idl/<program>.json` can be loaded directly.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use std::path::Path;

const ANCHOR_INSTRUCTION_NAMESPACE: &str = "global";
const ANCHOR_ACCOUNT_NAMESPACE: &str = "account";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRole {
    pub name: String,
    #[serde(alias = "isMut", default)]
    pub writable: bool,
    #[serde(alias = "isSigner", default)]
    pub signer: bool,
}

impl AccountRole {
    pub fn new(name: impl Into<String>, writable: bool, signer: bool) -> Self {
        Self {
            name: name.into(),
            writable,
            signer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSchema {
    pub name: String,
    #[serde(default)]
    pub accounts: Vec<AccountRole>,
    /// Payload prefix. Derived from the Anchor sighash when absent.
    #[serde(default)]
    pub discriminator: Option<Vec<u8>>,
}

impl InstructionSchema {
    pub fn new(name: impl Into<String>, accounts: Vec<AccountRole>) -> Self {
        Self {
            name: name.into(),
            accounts,
            discriminator: None,
        }
    }

    pub fn discriminator(&self) -> Vec<u8> {
        self.discriminator
            .clone()
            .unwrap_or_else(|| anchor_discriminator(&self.name).to_vec())
    }

    /// Payload is the discriminator followed by the already-encoded arguments.
    pub fn encode_data(&self, args: &[u8]) -> Vec<u8> {
        let mut data = self.discriminator();
        data.extend_from_slice(args);
        data
    }

    /// Binds positional addresses to the declared account roles.
    pub fn bind(
        &self,
        program_id: Pubkey,
        accounts: &[Pubkey],
        args: &[u8],
    ) -> Result<Instruction> {
        if accounts.len() != self.accounts.len() {
            return Err(LedgerError::AccountLayoutMismatch {
                instruction: self.name.clone(),
                expected: self.accounts.len(),
                actual: accounts.len(),
            });
        }

        let metas = self
            .accounts
            .iter()
            .zip(accounts)
            .map(|(role, address)| AccountMeta {
                pubkey: *address,
                is_signer: role.signer,
                is_writable: role.writable,
            })
            .collect();

        Ok(Instruction {
            program_id,
            accounts: metas,
            data: self.encode_data(args),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSchema {
    #[serde(default)]
    pub name: String,
    pub instructions: Vec<InstructionSchema>,
}

impl ProgramSchema {
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Self =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidSchema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::InvalidSchema(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// Schema of a program whose `initialize` takes only the paying signer.
    pub fn payer_only_initialize() -> Self {
        Self {
            name: String::new(),
            instructions: vec![InstructionSchema::new(
                "initialize",
                vec![AccountRole::new("payer", true, true)],
            )],
        }
    }

    pub fn instruction(&self, name: &str) -> Result<&InstructionSchema> {
        self.instructions
            .iter()
            .find(|ix| ix.name == name)
            .ok_or_else(|| LedgerError::UnknownInstruction(name.to_string()))
    }

    fn validate(&self) -> Result<()> {
        for (i, ix) in self.instructions.iter().enumerate() {
            if self.instructions[..i].iter().any(|other| other.name == ix.name) {
                return Err(LedgerError::InvalidSchema(format!(
                    "duplicate instruction `{}`",
                    ix.name
                )));
            }
        }
        Ok(())
    }
}

/// First 8 bytes of `sha256("global:<name>")`.
pub fn anchor_discriminator(name: &str) -> [u8; 8] {
    namespaced_discriminator(ANCHOR_INSTRUCTION_NAMESPACE, name)
}

/// Prefix of an Anchor account's data: first 8 bytes of `sha256("account:<Type>")`.
pub fn account_discriminator(type_name: &str) -> [u8; 8] {
    namespaced_discriminator(ANCHOR_ACCOUNT_NAMESPACE, type_name)
}

fn namespaced_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("{namespace}:{name}").as_bytes());
    let hash = hasher.finalize();

    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// Program-derived address for `seeds` under `program_id`.
pub fn derive_address(seeds: &[&[u8]], program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(seeds, program_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDL: &str = r#"{
        "version": "0.1.0",
        "name": "gfx_task",
        "instructions": [
            {
                "name": "initialize",
                "accounts": [
                    { "name": "payer", "isMut": true, "isSigner": true },
                    { "name": "state", "isMut": true, "isSigner": false },
                    { "name": "systemProgram", "isMut": false, "isSigner": false }
                ],
                "args": []
            }
        ]
    }"#;

    #[test]
    fn test_anchor_discriminator_initialize() {
        assert_eq!(
            anchor_discriminator("initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
    }

    #[test]
    fn test_account_discriminator() {
        assert_eq!(
            account_discriminator("State"),
            [216, 146, 107, 94, 104, 75, 182, 177]
        );
        assert_ne!(account_discriminator("State"), anchor_discriminator("State"));
    }

    #[test]
    fn test_load_anchor_idl() {
        let schema = ProgramSchema::from_json(IDL).unwrap();
        assert_eq!(schema.name, "gfx_task");
        let ix = schema.instruction("initialize").unwrap();
        assert_eq!(ix.accounts.len(), 3);
        assert_eq!(ix.accounts[0], AccountRole::new("payer", true, true));
        assert_eq!(ix.accounts[2], AccountRole::new("systemProgram", false, false));
    }

    #[test]
    fn test_bind_preserves_account_order() {
        let schema = ProgramSchema::from_json(IDL).unwrap();
        let program_id = Pubkey::new_unique();
        let addresses = [Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique()];

        let ix = schema
            .instruction("initialize")
            .unwrap()
            .bind(program_id, &addresses, &[])
            .unwrap();

        assert_eq!(ix.program_id, program_id);
        assert_eq!(ix.accounts[0], AccountMeta::new(addresses[0], true));
        assert_eq!(ix.accounts[1], AccountMeta::new(addresses[1], false));
        assert_eq!(ix.accounts[2], AccountMeta::new_readonly(addresses[2], false));
        assert_eq!(ix.data, anchor_discriminator("initialize").to_vec());
    }

    #[test]
    fn test_bind_wrong_account_count() {
        let schema = ProgramSchema::payer_only_initialize();
        let err = schema
            .instruction("initialize")
            .unwrap()
            .bind(Pubkey::new_unique(), &[], &[])
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::AccountLayoutMismatch {
                instruction: "initialize".into(),
                expected: 1,
                actual: 0,
            }
        );
    }

    #[test]
    fn test_unknown_instruction_and_duplicates() {
        let schema = ProgramSchema::payer_only_initialize();
        assert!(matches!(
            schema.instruction("withdraw"),
            Err(LedgerError::UnknownInstruction(_))
        ));

        let dup = r#"{"instructions":[{"name":"a"},{"name":"a"}]}"#;
        assert!(matches!(
            ProgramSchema::from_json(dup),
            Err(LedgerError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_explicit_discriminator_and_args() {
        let mut ix = InstructionSchema::new("deposit", vec![]);
        ix.discriminator = Some(vec![3]);
        assert_eq!(ix.encode_data(&42u64.to_le_bytes()), [3, 42, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_derive_address_is_stable() {
        let program_id = Pubkey::new_unique();
        let (a, bump_a) = derive_address(&[b"state"], &program_id);
        let (b, bump_b) = derive_address(&[b"state"], &program_id);
        assert_eq!((a, bump_a), (b, bump_b));
        assert!(!a.is_on_curve());
    }
}
