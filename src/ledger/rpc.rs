//! RPC-backed ledger
//!
//! Executes sweeps on-chain. The agent is a signing keypair; a separate fee
//! payer covers transaction fees so the agent's full balance can be moved.

use solana_client::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    instruction::Instruction,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use tracing::{debug, info, warn};

use super::{NativeLedger, TokenLedger};
use crate::error::{Error, Result};

/// Commitment for every balance read, so native and token sweeps snapshot the same view
const SWEEP_COMMITMENT: CommitmentConfig = CommitmentConfig {
    commitment: CommitmentLevel::Confirmed,
};

/// Ledger that signs transfers through an RPC node
pub struct RpcLedger {
    rpc_client: RpcClient,
    agent: Keypair,
    fee_payer: Keypair,
}

impl RpcLedger {
    /// Create a new RPC ledger
    pub fn new(rpc_client: RpcClient, agent: Keypair, fee_payer: Keypair) -> Self {
        Self {
            rpc_client,
            agent,
            fee_payer,
        }
    }

    /// Address of the signing agent
    pub fn agent_address(&self) -> Pubkey {
        self.agent.pubkey()
    }

    /// Ensure the ledger is only asked to move the agent's own funds
    fn check_sender(&self, from: &Pubkey) -> Result<()> {
        if *from != self.agent.pubkey() {
            return Err(Error::Internal(format!(
                "RPC ledger can only sign for {}, not {}",
                self.agent.pubkey(),
                from
            )));
        }
        Ok(())
    }

    /// Sign with fee payer + agent and send
    fn send(&self, instructions: &[Instruction]) -> Result<Signature> {
        let blockhash = self
            .rpc_client
            .get_latest_blockhash()
            .map_err(|e| Error::Rpc(format!("Failed to get blockhash: {}", e)))?;

        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.fee_payer.pubkey()),
            &[&self.fee_payer, &self.agent],
            blockhash,
        );

        self.rpc_client
            .send_and_confirm_transaction(&transaction)
            .map_err(|e| Error::Rpc(format!("Transaction failed: {}", e)))
    }
}

impl NativeLedger for RpcLedger {
    fn balance(&self, account: &Pubkey) -> Result<u64> {
        self.rpc_client
            .get_balance_with_commitment(account, SWEEP_COMMITMENT)
            .map(|response| response.value)
            .map_err(|e| Error::Rpc(format!("Failed to get balance: {}", e)))
    }

    fn transfer(&self, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        self.check_sender(from)?;
        debug!("Sending {} lamports from {} to {}", amount, from, to);

        let instruction = system_instruction::transfer(from, to, amount);
        match self.send(&[instruction]) {
            Ok(signature) => {
                info!(
                    "Transfer complete: {} lamports to {} (sig: {})",
                    amount, to, signature
                );
                Ok(())
            }
            Err(e) => {
                warn!("Native transfer to {} failed: {}", to, e);
                Err(Error::TransferFailed)
            }
        }
    }
}

impl TokenLedger for RpcLedger {
    fn balance_of(&self, token: &Pubkey, account: &Pubkey) -> Result<u64> {
        let token_account = get_associated_token_address(account, token);

        let response = self
            .rpc_client
            .get_account_with_commitment(&token_account, SWEEP_COMMITMENT)
            .map_err(|e| Error::Rpc(format!("Failed to get token account: {}", e)))?;

        match response.value {
            Some(acct) => {
                let state = spl_token::state::Account::unpack(&acct.data).map_err(|e| {
                    Error::Serialization(format!(
                        "Invalid token account {}: {}",
                        token_account, e
                    ))
                })?;
                Ok(state.amount)
            }
            None => Ok(0),
        }
    }

    fn transfer(&self, token: &Pubkey, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<bool> {
        self.check_sender(from)?;

        let instructions =
            token_transfer_instructions(&self.fee_payer.pubkey(), token, from, to, amount)?;
        let signature = self
            .send(&instructions)
            .map_err(|e| Error::TokenTransfer(e.to_string()))?;

        info!(
            "Token transfer complete: {} of {} to {} (sig: {})",
            amount, token, to, signature
        );
        Ok(true)
    }
}

/// Build the instructions sweeping `amount` of `token` from `owner` to `to`:
/// create the recipient's associated token account if missing, then transfer.
pub fn token_transfer_instructions(
    payer: &Pubkey,
    token: &Pubkey,
    owner: &Pubkey,
    to: &Pubkey,
    amount: u64,
) -> Result<Vec<Instruction>> {
    let source = get_associated_token_address(owner, token);
    let destination = get_associated_token_address(to, token);

    let create = create_associated_token_account_idempotent(payer, to, token, &spl_token::id());
    let transfer = spl_token::instruction::transfer(
        &spl_token::id(),
        &source,
        &destination,
        owner,
        &[],
        amount,
    )
    .map_err(|e| Error::TokenTransfer(format!("Failed to build transfer: {}", e)))?;

    Ok(vec![create, transfer])
}

/// Read a keypair file (JSON array of secret key bytes)
pub fn read_keypair(path: &str) -> Result<Keypair> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidKeypair(format!("Failed to read {}: {}", path, e)))?;

    let secret_key: Vec<u8> = serde_json::from_str(&data)
        .map_err(|e| Error::InvalidKeypair(format!("Failed to parse {}: {}", path, e)))?;

    Keypair::from_bytes(&secret_key)
        .map_err(|e| Error::InvalidKeypair(format!("Invalid keypair bytes in {}: {}", path, e)))
}
