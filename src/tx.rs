//! Raw transaction codec for the VeChain-style wire format.
//!
//! A transaction is the RLP list `[chainTag, blockRef, expiration, clauses,
//! gasPriceCoef, gas, dependsOn, nonce, reserved, signature]`, where each
//! clause is `[to, value, data]`. `reserved[0]` carries the features bitset;
//! bit 0 marks a fee-delegated transaction. A delegated transaction carries
//! the sender signature followed by the gas payer signature (65 bytes each);
//! the gas payer signs the keccak hash of the signing hash concatenated with
//! the sender address.
//!
//! The node behind the chain gateway remains the source of truth for ids and
//! receipts; this codec exists so the fee-delegation engine can inspect and
//! co-sign sender-signed transactions without a node round-trip.

use alloy_primitives::{Address, B256, Bytes, Signature, U256, keccak256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header};

use crate::types::{TransactionHash, VetAddress};

/// Length of one recoverable signature.
const SIGNATURE_LEN: usize = 65;

/// Features bit marking a fee-delegated transaction.
const DELEGATED_BIT: u32 = 1;

/// Errors raised while decoding, inspecting, or co-signing a raw transaction.
#[derive(Debug, thiserror::Error)]
pub enum TxCodecError {
    #[error("Invalid transaction hex: {0}")]
    Hex(String),
    #[error("Invalid transaction encoding: {0}")]
    Rlp(String),
    #[error("Transaction signature is missing or malformed")]
    Signature,
}

/// One discrete operation bundled inside a transaction: a value transfer or
/// a contract call.
#[derive(Debug, Clone, PartialEq, Eq, alloy_rlp::RlpEncodable, alloy_rlp::RlpDecodable)]
pub struct Clause {
    /// Recipient; empty for contract creation.
    pub to: Bytes,
    pub value: U256,
    pub data: Bytes,
}

impl Clause {
    pub fn new(to: VetAddress, value: U256, data: Vec<u8>) -> Self {
        Clause {
            to: Bytes::copy_from_slice(to.0.as_slice()),
            value,
            data: Bytes::from(data),
        }
    }

    /// The clause recipient, when present and well-formed.
    pub fn to_address(&self) -> Option<VetAddress> {
        if self.to.len() == Address::len_bytes() {
            Some(VetAddress(Address::from_slice(&self.to)))
        } else {
            None
        }
    }
}

/// A decoded raw transaction, signature included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub chain_tag: u8,
    pub block_ref: u64,
    pub expiration: u32,
    pub clauses: Vec<Clause>,
    pub gas_price_coef: u8,
    pub gas: u64,
    /// Hash of a transaction this one depends on; empty when independent.
    pub depends_on: Bytes,
    pub nonce: u64,
    /// Reserved fields; `reserved[0]` is the features bitset.
    pub reserved: Vec<Bytes>,
    /// 65 bytes (sender) or 130 bytes (sender + gas payer).
    pub signature: Bytes,
}

impl Transaction {
    fn encode_fields(&self, out: &mut Vec<u8>, with_signature: bool) {
        self.chain_tag.encode(out);
        self.block_ref.encode(out);
        self.expiration.encode(out);
        self.clauses.encode(out);
        self.gas_price_coef.encode(out);
        self.gas.encode(out);
        self.depends_on.encode(out);
        self.nonce.encode(out);
        self.reserved.encode(out);
        if with_signature {
            self.signature.encode(out);
        }
    }

    /// Decodes a 0x-prefixed hex encoding of a signed transaction.
    pub fn decode_hex(raw: &str) -> Result<Self, TxCodecError> {
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| TxCodecError::Hex(e.to_string()))?;
        let mut slice = bytes.as_slice();
        let tx = Transaction::decode(&mut slice).map_err(|e| TxCodecError::Rlp(e.to_string()))?;
        if !slice.is_empty() {
            return Err(TxCodecError::Rlp("trailing bytes after transaction".into()));
        }
        Ok(tx)
    }

    /// Hex encoding of the signed transaction, 0x-prefixed.
    pub fn encode_hex(&self) -> String {
        format!("0x{}", hex::encode(alloy_rlp::encode(self)))
    }

    /// Hash the sender signs: keccak over the RLP body without the
    /// signature field.
    pub fn signing_hash(&self) -> B256 {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload, false);
        let mut encoded = Vec::with_capacity(payload.len() + 4);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut encoded);
        encoded.extend_from_slice(&payload);
        keccak256(&encoded)
    }

    /// Whether the transaction was flagged for fee delegation.
    pub fn is_delegated(&self) -> bool {
        let Some(features) = self.reserved.first() else {
            return false;
        };
        if features.len() > 4 {
            return false;
        }
        let mut value: u32 = 0;
        for byte in features.iter() {
            value = (value << 8) | u32::from(*byte);
        }
        value & DELEGATED_BIT != 0
    }

    fn sender_signature(&self) -> Result<[u8; SIGNATURE_LEN], TxCodecError> {
        if self.signature.len() != SIGNATURE_LEN && self.signature.len() != 2 * SIGNATURE_LEN {
            return Err(TxCodecError::Signature);
        }
        self.signature[..SIGNATURE_LEN]
            .try_into()
            .map_err(|_| TxCodecError::Signature)
    }

    /// Recovers the transaction sender from its signature.
    pub fn origin(&self) -> Result<VetAddress, TxCodecError> {
        let raw = self.sender_signature()?;
        let signature = Signature::from_raw_array(&raw).map_err(|_| TxCodecError::Signature)?;
        let address = signature
            .recover_address_from_prehash(&self.signing_hash())
            .map_err(|_| TxCodecError::Signature)?;
        Ok(VetAddress(address))
    }

    /// Hash the gas payer signs: keccak over the signing hash concatenated
    /// with the sender address. The transaction id uses the same derivation.
    pub fn gas_payer_signing_hash(&self, origin: &VetAddress) -> B256 {
        let mut input = Vec::with_capacity(32 + Address::len_bytes());
        input.extend_from_slice(self.signing_hash().as_slice());
        input.extend_from_slice(origin.0.as_slice());
        keccak256(&input)
    }

    /// The transaction id as derived by this codec.
    pub fn id(&self, origin: &VetAddress) -> TransactionHash {
        TransactionHash(self.gas_payer_signing_hash(origin).0)
    }

    /// Appends the gas payer signature to a sender-signed transaction.
    pub fn with_gas_payer_signature(
        &self,
        gas_payer_signature: [u8; SIGNATURE_LEN],
    ) -> Result<Transaction, TxCodecError> {
        if self.signature.len() != SIGNATURE_LEN {
            // Already co-signed or not sender-signed at all.
            return Err(TxCodecError::Signature);
        }
        let mut combined = Vec::with_capacity(2 * SIGNATURE_LEN);
        combined.extend_from_slice(&self.signature);
        combined.extend_from_slice(&gas_payer_signature);
        let mut signed = self.clone();
        signed.signature = Bytes::from(combined);
        Ok(signed)
    }
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut dyn BufMut) {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload, true);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(out);
        out.put_slice(&payload);
    }
}

impl Decodable for Transaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = Header::decode_bytes(buf, true)?;
        let tx = Transaction {
            chain_tag: u8::decode(&mut payload)?,
            block_ref: u64::decode(&mut payload)?,
            expiration: u32::decode(&mut payload)?,
            clauses: Vec::<Clause>::decode(&mut payload)?,
            gas_price_coef: u8::decode(&mut payload)?,
            gas: u64::decode(&mut payload)?,
            depends_on: Bytes::decode(&mut payload)?,
            nonce: u64::decode(&mut payload)?,
            reserved: Vec::<Bytes>::decode(&mut payload)?,
            signature: Bytes::decode(&mut payload)?,
        };
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::Custom(
                "unexpected trailing fields in transaction",
            ));
        }
        Ok(tx)
    }
}
