//! The narrow contract this facilitator requires from the chain node.
//!
//! The node is an external collaborator: everything the core needs from it -
//! receipt lookup, submission, confirmation polling, transaction decoding,
//! account queries, read-only contract calls - goes through [`ChainGateway`].
//! No chain consensus or node behavior is reimplemented here.

pub mod thor;

use async_trait::async_trait;

use crate::transfer::{CONTRACT_INTERACTION, decode_token_call, token_symbol};
use crate::tx::Clause;
use crate::types::{TokenAmount, TransactionHash, VetAddress};
use alloy_primitives::{Address, U256};

pub use thor::ThorGateway;

/// Errors surfaced by a chain gateway.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The node could not be reached or timed out.
    #[error("Chain node request failed: {0}")]
    Transport(String),
    /// The node answered with something this gateway cannot interpret.
    #[error("Unexpected chain node response: {0}")]
    Node(String),
    /// The node rejected a submitted transaction.
    #[error("Transaction submission failed: {0}")]
    Submission(String),
}

/// A transaction receipt, reduced to what settlement needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub block_number: u64,
    pub reverted: bool,
}

/// An on-chain account: VET balance and VTHO energy, both in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub energy: U256,
}

/// Result of a read-only contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub data: Vec<u8>,
    pub reverted: bool,
}

/// Decoded on-chain truth about a payment. Produced only by
/// [`ChainGateway::decode_transaction`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDetails {
    pub from: VetAddress,
    pub to: VetAddress,
    pub amount: TokenAmount,
    /// Token symbol, contract address string, or [`CONTRACT_INTERACTION`].
    pub token: String,
    pub raw_clauses: Vec<Clause>,
}

/// Reduces a transaction's clauses to the payment they carry.
///
/// The first clause decides: empty call data is a native VET transfer, a
/// recognized token-transfer datum yields the decoded recipient and amount,
/// and anything else is an opaque contract interaction whose amount is
/// unknown - never guessed as zero being "correct".
pub fn decode_payment(origin: VetAddress, clauses: Vec<Clause>) -> PaymentDetails {
    let opaque = |clauses: Vec<Clause>| PaymentDetails {
        from: origin,
        to: VetAddress(Address::ZERO),
        amount: TokenAmount(U256::ZERO),
        token: CONTRACT_INTERACTION.to_string(),
        raw_clauses: clauses,
    };

    let Some(clause) = clauses.first().cloned() else {
        return opaque(clauses);
    };
    let Some(clause_to) = clause.to_address() else {
        return opaque(clauses);
    };

    if clause.data.is_empty() {
        return PaymentDetails {
            from: origin,
            to: clause_to,
            amount: TokenAmount(clause.value),
            token: "VET".to_string(),
            raw_clauses: clauses,
        };
    }

    match decode_token_call(&clause.data) {
        Some(call) => PaymentDetails {
            from: origin,
            to: call.to(),
            amount: call.amount(),
            token: token_symbol(&clause_to),
            raw_clauses: clauses,
        },
        None => PaymentDetails {
            from: origin,
            to: clause_to,
            amount: TokenAmount(U256::ZERO),
            token: CONTRACT_INTERACTION.to_string(),
            raw_clauses: clauses,
        },
    }
}

/// The chain-node contract required by the settlement core.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Fetches the receipt of a transaction, `None` while unknown.
    async fn get_receipt(&self, tx: &TransactionHash) -> Result<Option<Receipt>, ChainError>;

    /// Broadcasts a signed transaction and returns its hash.
    async fn submit(&self, signed_tx_hex: &str) -> Result<TransactionHash, ChainError>;

    /// Fetches and decodes a transaction into [`PaymentDetails`].
    async fn decode_transaction(
        &self,
        tx: &TransactionHash,
    ) -> Result<Option<PaymentDetails>, ChainError>;

    /// Polls at a fixed interval until the transaction has the requested
    /// confirmations.
    ///
    /// Returns `true` once `current block - receipt block >= confirmations`
    /// and the receipt is not reverted; `false` immediately on a reverted
    /// receipt, or after exhausting `max_attempts`. Timeout is a normal,
    /// reportable outcome, not an error.
    async fn poll_until_confirmed(
        &self,
        tx: &TransactionHash,
        confirmations: u64,
        poll_interval_ms: u64,
        max_attempts: u32,
    ) -> Result<bool, ChainError>;

    /// Fetches an account's VET balance and VTHO energy.
    async fn get_account(&self, address: &VetAddress) -> Result<Option<Account>, ChainError>;

    /// Executes a read-only contract call (e.g. VIP-180 `balanceOf`).
    async fn contract_call(
        &self,
        contract: &VetAddress,
        data: Vec<u8>,
    ) -> Result<CallResult, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{TRANSFER_SELECTOR, TRANSFER_WITH_AUTHORIZATION_SELECTOR};

    fn addr(tail: u8) -> VetAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        VetAddress(Address::from(bytes))
    }

    #[test]
    fn empty_data_is_a_native_transfer() {
        let details = decode_payment(
            addr(1),
            vec![Clause::new(addr(2), U256::from(777u64), vec![])],
        );
        assert_eq!(details.token, "VET");
        assert_eq!(details.to, addr(2));
        assert_eq!(details.amount, TokenAmount::from_u64(777));
    }

    #[test]
    fn recognized_transfer_resolves_token_and_recipient() {
        let vtho: VetAddress = "0x0000000000000000000000000000456e65726779".parse().unwrap();
        let mut data = Vec::new();
        data.extend_from_slice(&TRANSFER_SELECTOR);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(addr(9).0.as_slice());
        data.extend_from_slice(&U256::from(500u64).to_be_bytes::<32>());

        let details = decode_payment(addr(1), vec![Clause::new(vtho, U256::ZERO, data)]);
        assert_eq!(details.token, "VTHO");
        assert_eq!(details.to, addr(9));
        assert_eq!(details.amount, TokenAmount::from_u64(500));
    }

    #[test]
    fn unrecognized_call_data_is_opaque() {
        let details = decode_payment(
            addr(1),
            vec![Clause::new(addr(3), U256::from(10u64), vec![0xde, 0xad, 0xbe, 0xef, 0x00])],
        );
        assert_eq!(details.token, CONTRACT_INTERACTION);
        assert_eq!(details.amount, TokenAmount(U256::ZERO));
    }

    #[test]
    fn truncated_authorization_is_opaque_not_zero_valued_transfer() {
        let mut data = Vec::new();
        data.extend_from_slice(&TRANSFER_WITH_AUTHORIZATION_SELECTOR);
        data.extend_from_slice(&[0u8; 64]);
        let details = decode_payment(addr(1), vec![Clause::new(addr(3), U256::ZERO, data)]);
        assert_eq!(details.token, CONTRACT_INTERACTION);
    }

    #[test]
    fn clauseless_transaction_is_opaque() {
        let details = decode_payment(addr(1), vec![]);
        assert_eq!(details.token, CONTRACT_INTERACTION);
        assert!(details.raw_clauses.is_empty());
    }
}
