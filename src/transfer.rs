//! Decoding of VIP-180 token-transfer call data.
//!
//! Exactly two call shapes are recognized, selected purely by the 4-byte
//! leading selector. Everything else is not a token transfer: the caller
//! marks the payment as an opaque contract interaction rather than guessing
//! an amount. Decoding reads fixed-width 32-byte words at explicit offsets -
//! no string slicing, no dynamic ABI machinery.

use alloy_primitives::{Address, B256, U256};

use crate::types::{TokenAmount, VetAddress};

/// Sentinel token value for a clause this decoder cannot interpret.
/// An observed payment carrying it never matches any payment option.
pub const CONTRACT_INTERACTION: &str = "CONTRACT_INTERACTION";

/// Selector of `transfer(address,uint256)`.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Selector of
/// `transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)`.
pub const TRANSFER_WITH_AUTHORIZATION_SELECTOR: [u8; 4] = [0xe3, 0xee, 0x16, 0x0e];

/// Selector of `balanceOf(address)`, used when reading VIP-180 balances
/// through the chain gateway.
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

const WORD: usize = 32;
const SELECTOR: usize = 4;

/// Word offsets (relative to the end of the selector) per recognized call.
mod offsets {
    /// `transfer(to, value)`
    pub const TRANSFER_TO: usize = 0;
    pub const TRANSFER_VALUE: usize = 1;
    pub const TRANSFER_WORDS: usize = 2;

    /// `transferWithAuthorization(from, to, value, validAfter, validBefore, nonce, v, r, s)`
    pub const AUTH_FROM: usize = 0;
    pub const AUTH_TO: usize = 1;
    pub const AUTH_VALUE: usize = 2;
    pub const AUTH_VALID_AFTER: usize = 3;
    pub const AUTH_VALID_BEFORE: usize = 4;
    pub const AUTH_NONCE: usize = 5;
    pub const AUTH_WORDS: usize = 9;
}

/// A decoded `transfer(address,uint256)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub to: VetAddress,
    pub amount: TokenAmount,
}

/// A decoded `transferWithAuthorization` call.
///
/// Only the first six parameters are extracted; the trailing ECDSA triple is
/// validated by the chain itself when the call executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAuthorization {
    pub from: VetAddress,
    pub to: VetAddress,
    pub value: TokenAmount,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: B256,
}

/// Either recognized token-transfer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenCall {
    Transfer(DecodedTransfer),
    TransferWithAuthorization(DecodedAuthorization),
}

impl TokenCall {
    /// The effective recipient of the transfer.
    pub fn to(&self) -> VetAddress {
        match self {
            TokenCall::Transfer(t) => t.to,
            TokenCall::TransferWithAuthorization(a) => a.to,
        }
    }

    /// The transferred amount.
    pub fn amount(&self) -> TokenAmount {
        match self {
            TokenCall::Transfer(t) => t.amount,
            TokenCall::TransferWithAuthorization(a) => a.value,
        }
    }
}

fn word(data: &[u8], index: usize) -> &[u8] {
    &data[SELECTOR + index * WORD..SELECTOR + (index + 1) * WORD]
}

fn address_at(data: &[u8], index: usize) -> VetAddress {
    // ABI addresses occupy the low 20 bytes of their word.
    VetAddress(Address::from_slice(&word(data, index)[12..]))
}

fn u256_at(data: &[u8], index: usize) -> U256 {
    U256::from_be_slice(word(data, index))
}

/// Decodes a `transfer(address,uint256)` call datum.
///
/// Returns `None` unless the length is exactly selector + two 32-byte words.
pub fn decode_transfer(data: &[u8]) -> Option<DecodedTransfer> {
    if data.len() != SELECTOR + offsets::TRANSFER_WORDS * WORD {
        return None;
    }
    if data[..SELECTOR] != TRANSFER_SELECTOR {
        return None;
    }
    Some(DecodedTransfer {
        to: address_at(data, offsets::TRANSFER_TO),
        amount: TokenAmount(u256_at(data, offsets::TRANSFER_VALUE)),
    })
}

/// Decodes a `transferWithAuthorization` call datum.
///
/// Returns `None` if the datum is shorter than selector + nine 32-byte words.
pub fn decode_transfer_with_authorization(data: &[u8]) -> Option<DecodedAuthorization> {
    if data.len() < SELECTOR + offsets::AUTH_WORDS * WORD {
        return None;
    }
    if data[..SELECTOR] != TRANSFER_WITH_AUTHORIZATION_SELECTOR {
        return None;
    }
    Some(DecodedAuthorization {
        from: address_at(data, offsets::AUTH_FROM),
        to: address_at(data, offsets::AUTH_TO),
        value: TokenAmount(u256_at(data, offsets::AUTH_VALUE)),
        valid_after: u256_at(data, offsets::AUTH_VALID_AFTER),
        valid_before: u256_at(data, offsets::AUTH_VALID_BEFORE),
        nonce: B256::from_slice(word(data, offsets::AUTH_NONCE)),
    })
}

/// Dispatches on the selector and decodes whichever transfer shape matches.
pub fn decode_token_call(data: &[u8]) -> Option<TokenCall> {
    if data.len() < SELECTOR {
        return None;
    }
    match <[u8; 4]>::try_from(&data[..SELECTOR]).ok()? {
        TRANSFER_SELECTOR => decode_transfer(data).map(TokenCall::Transfer),
        TRANSFER_WITH_AUTHORIZATION_SELECTOR => {
            decode_transfer_with_authorization(data).map(TokenCall::TransferWithAuthorization)
        }
        _ => None,
    }
}

/// Encodes a `balanceOf(address)` call datum.
pub fn balance_of_calldata(owner: &VetAddress) -> Vec<u8> {
    let mut data = Vec::with_capacity(SELECTOR + WORD);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(owner.0.as_slice());
    data
}

/// Known VIP-180 deployments, contract address to symbol.
const KNOWN_TOKENS: &[(&str, &str)] = &[
    ("0x0000000000000000000000000000456e65726779", "VTHO"),
    ("0x4e17357053da4b473e2daa2c65c2c949545724b8", "VEUSD"),
    ("0x5ef79995fe8a89e0812330e4378eb2660cede699", "B3TR"),
];

/// Resolves a token contract address to its symbol.
///
/// Unknown contracts surface as the lowercased raw address string, not an
/// error, so custom tokens still flow through matching.
pub fn token_symbol(contract: &VetAddress) -> String {
    let lowercased = contract.to_lowercase_string();
    KNOWN_TOKENS
        .iter()
        .find(|(address, _)| *address == lowercased)
        .map(|(_, symbol)| (*symbol).to_string())
        .unwrap_or(lowercased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn addr(tail: u8) -> VetAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        VetAddress(Address::from(bytes))
    }

    fn encode_transfer(to: &VetAddress, amount: u64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&TRANSFER_SELECTOR);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(to.0.as_slice());
        data.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
        data
    }

    fn encode_authorization(from: &VetAddress, to: &VetAddress, value: u64) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&TRANSFER_WITH_AUTHORIZATION_SELECTOR);
        for address in [from, to] {
            data.extend_from_slice(&[0u8; 12]);
            data.extend_from_slice(address.0.as_slice());
        }
        data.extend_from_slice(&U256::from(value).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(100u64).to_be_bytes::<32>()); // validAfter
        data.extend_from_slice(&U256::from(200u64).to_be_bytes::<32>()); // validBefore
        data.extend_from_slice(&[0x42; 32]); // nonce
        data.extend_from_slice(&[0u8; 32]); // v
        data.extend_from_slice(&[0u8; 32]); // r
        data.extend_from_slice(&[0u8; 32]); // s
        data
    }

    #[test]
    fn decodes_exact_transfer_vector() {
        let to = addr(0x55);
        let data = encode_transfer(&to, 1_000_000);
        let decoded = decode_transfer(&data).unwrap();
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.amount, TokenAmount::from_u64(1_000_000));
    }

    #[test]
    fn transfer_rejects_any_other_length() {
        let to = addr(0x55);
        let good = encode_transfer(&to, 7);
        for bad_len in [good.len() - 1, good.len() + 1, good.len() + 32, SELECTOR, 0] {
            let mut data = good.clone();
            data.resize(bad_len, 0);
            assert!(decode_transfer(&data).is_none(), "len {bad_len}");
        }
    }

    #[test]
    fn decodes_authorization_first_six_words() {
        let from = addr(1);
        let to = addr(2);
        let data = encode_authorization(&from, &to, 5_000);
        let decoded = decode_transfer_with_authorization(&data).unwrap();
        assert_eq!(decoded.from, from);
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.value, TokenAmount::from_u64(5_000));
        assert_eq!(decoded.valid_after, U256::from(100u64));
        assert_eq!(decoded.valid_before, U256::from(200u64));
        assert_eq!(decoded.nonce, B256::from([0x42; 32]));
    }

    #[test]
    fn authorization_rejects_short_data_but_allows_longer() {
        let data = encode_authorization(&addr(1), &addr(2), 5_000);
        let mut short = data.clone();
        short.truncate(data.len() - 1);
        assert!(decode_transfer_with_authorization(&short).is_none());

        let mut longer = data;
        longer.extend_from_slice(&[0u8; 32]);
        assert!(decode_transfer_with_authorization(&longer).is_some());
    }

    #[test]
    fn unknown_selector_is_not_a_token_transfer() {
        let mut data = encode_transfer(&addr(1), 10);
        data[0] ^= 0xff;
        assert!(decode_token_call(&data).is_none());
        assert!(decode_token_call(&[]).is_none());
        assert!(decode_token_call(&[0xa9, 0x05]).is_none());
    }

    #[test]
    fn token_call_dispatch() {
        let transfer = encode_transfer(&addr(3), 42);
        assert!(matches!(
            decode_token_call(&transfer),
            Some(TokenCall::Transfer(_))
        ));
        let auth = encode_authorization(&addr(1), &addr(2), 42);
        assert!(matches!(
            decode_token_call(&auth),
            Some(TokenCall::TransferWithAuthorization(_))
        ));
    }

    #[test]
    fn token_symbol_lookup() {
        let vtho = VetAddress::from_str("0x0000000000000000000000000000456E65726779").unwrap();
        assert_eq!(token_symbol(&vtho), "VTHO");

        let unknown = addr(0x99);
        assert_eq!(token_symbol(&unknown), unknown.to_lowercase_string());
    }

    #[test]
    fn balance_of_calldata_shape() {
        let owner = addr(0x10);
        let data = balance_of_calldata(&owner);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[..4], &BALANCE_OF_SELECTOR);
        assert_eq!(&data[16..], owner.0.as_slice());
    }
}
