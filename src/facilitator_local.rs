//! The settlement core: payload routing, verification, submission,
//! confirmation, and the final on-chain re-match.
//!
//! [`FacilitatorLocal`] composes the network resolver, signature verifier,
//! nonce ledger, payment matcher, fee delegation engine, and chain gateway
//! into the `/verify` and `/settle` flows. A request moves from payload
//! parsing through either the signed-intent path (signature, nonce, match)
//! or the legacy transaction path (decode, match, submit, confirm), and any
//! failure resolves to exactly one [`PaymentError`] reason.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

use crate::chain::{ChainError, ChainGateway, PaymentDetails, decode_payment};
use crate::delegation::{DelegationError, DelegationStatus, FeeDelegationEngine};
use crate::facilitator::Facilitator;
use crate::matcher::{MatchFailure, ObservedPayment, match_options};
use crate::network::Network;
use crate::nonce::{NonceLedger, NonceLedgerError};
use crate::signature::{SignatureError, hash_intent, recover_signer};
use crate::timestamp::UnixTimestamp;
use crate::transfer::CONTRACT_INTERACTION;
use crate::tx::Transaction;
use crate::types::{
    Base64Bytes, LegacyPayload, PaymentOption, PaymentPayload, PaymentRequirements,
    SettleRequest, SettleResponse, SignedIntentPayload, SupportedNetwork, SupportedResponse,
    TransactionHash, VerifyRequest, VerifyResponse, VetAddress,
};

/// Every way a payment can fail verification or settlement.
///
/// The display form of each variant is the user-visible reason string;
/// internals never leak through it.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Malformed payment payload: {0}")]
    MalformedPayload(String),
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("Payment requirements have expired")]
    ExpiredRequirements,
    #[error("Payment payload expired: validUntil is in the past")]
    ExpiredPayload,
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Nonce has already been used")]
    ReplayedNonce,
    #[error("Payment recipient does not match the required recipient")]
    RecipientMismatch,
    #[error("Payment amount is below the required amount")]
    AmountMismatch,
    #[error("Payment asset does not match the required asset")]
    AssetMismatch,
    #[error("Transaction is an undecodable contract interaction")]
    UndecodableContractInteraction,
    #[error("Payment does not match any accepted payment option")]
    NoMatchingRequirement,
    #[error("Chain node unavailable")]
    ChainUnavailable(String),
    #[error("Transaction not found on-chain")]
    TransactionNotFound,
    #[error("Transaction {0} reverted on-chain")]
    TransactionReverted(TransactionHash),
    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Confirmation timed out for transaction {0}")]
    ConfirmationTimeout(TransactionHash),
    #[error("Fee delegation is not enabled")]
    DelegationDisabled,
    #[error("Transaction is not flagged for fee delegation")]
    DelegationNotRequested,
    #[error("Fee delegation rate limit exceeded")]
    DelegationRateLimited,
    #[error("Estimated fee exceeds the per-transaction VTHO ceiling")]
    DelegationGasExceeded,
    #[error("Delegator balance cannot cover the estimated fee")]
    DelegationInsufficientBalance,
    #[error("Confirmed transaction does not match the payment requirements")]
    PostSettlementMismatch,
    #[error("Internal server error")]
    Internal(String),
}

impl PaymentError {
    /// HTTP status the handler layer reports for this reason.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            PaymentError::ConfirmationTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            PaymentError::Internal(_) | PaymentError::ChainUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// The transaction hash this failure refers to, when one is known.
    pub fn transaction_hash(&self) -> Option<TransactionHash> {
        match self {
            PaymentError::TransactionReverted(hash)
            | PaymentError::ConfirmationTimeout(hash) => Some(*hash),
            _ => None,
        }
    }
}

impl From<ChainError> for PaymentError {
    fn from(error: ChainError) -> Self {
        match error {
            ChainError::Submission(message) => PaymentError::SubmissionFailed(message),
            ChainError::Transport(message) | ChainError::Node(message) => {
                PaymentError::ChainUnavailable(message)
            }
        }
    }
}

impl From<NonceLedgerError> for PaymentError {
    fn from(error: NonceLedgerError) -> Self {
        match error {
            NonceLedgerError::Replay => PaymentError::ReplayedNonce,
            NonceLedgerError::Storage(message) => PaymentError::Internal(message),
        }
    }
}

impl From<SignatureError> for PaymentError {
    fn from(error: SignatureError) -> Self {
        match error {
            SignatureError::RecoveryFailed(message) => PaymentError::InvalidSignature(message),
            SignatureError::Canonicalize(e) => PaymentError::Internal(e.to_string()),
        }
    }
}

impl From<MatchFailure> for PaymentError {
    fn from(failure: MatchFailure) -> Self {
        match failure {
            MatchFailure::Recipient => PaymentError::RecipientMismatch,
            MatchFailure::Amount => PaymentError::AmountMismatch,
            MatchFailure::Asset => PaymentError::AssetMismatch,
            MatchFailure::ContractInteraction => PaymentError::UndecodableContractInteraction,
            MatchFailure::NoMatch => PaymentError::NoMatchingRequirement,
        }
    }
}

impl From<DelegationError> for PaymentError {
    fn from(error: DelegationError) -> Self {
        match error {
            DelegationError::Disabled => PaymentError::DelegationDisabled,
            DelegationError::NotRequested => PaymentError::DelegationNotRequested,
            DelegationError::RateLimited { .. } => PaymentError::DelegationRateLimited,
            DelegationError::GasCeilingExceeded => PaymentError::DelegationGasExceeded,
            DelegationError::InsufficientBalance => PaymentError::DelegationInsufficientBalance,
            DelegationError::SenderMismatch => {
                PaymentError::InvalidSignature("sender address does not match the signature".into())
            }
            DelegationError::Codec(e) => PaymentError::MalformedPayload(e.to_string()),
            DelegationError::Chain(e) => e.into(),
            DelegationError::Signing(message) => PaymentError::Internal(message),
            DelegationError::Log(e) => PaymentError::Internal(e.to_string()),
        }
    }
}

/// Confirmation-polling budget applied by `/settle`.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPolicy {
    pub confirmations: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        ConfirmationPolicy {
            confirmations: 1,
            poll_interval_ms: 3_000,
            max_attempts: 20,
        }
    }
}

/// The local facilitator: all components wired together with explicit
/// dependencies, no module-level singletons.
pub struct FacilitatorLocal {
    gateway: Arc<dyn ChainGateway>,
    nonces: Arc<dyn NonceLedger>,
    delegation: FeeDelegationEngine,
    network: Network,
    confirmation: ConfirmationPolicy,
}

impl FacilitatorLocal {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        nonces: Arc<dyn NonceLedger>,
        delegation: FeeDelegationEngine,
        network: Network,
        confirmation: ConfirmationPolicy,
    ) -> Self {
        FacilitatorLocal {
            gateway,
            nonces,
            delegation,
            network,
            confirmation,
        }
    }

    /// Base64 decoding and JSON parsing are the very first gate; failures
    /// short-circuit before any chain I/O.
    fn parse_payload(&self, encoded: &str) -> Result<PaymentPayload, PaymentError> {
        PaymentPayload::try_from(Base64Bytes::from(encoded))
            .map_err(|e| PaymentError::MalformedPayload(e.to_string()))
    }

    fn now(&self) -> Result<UnixTimestamp, PaymentError> {
        UnixTimestamp::now()
            .ok_or_else(|| PaymentError::Internal("system clock before Unix epoch".into()))
    }

    fn check_requirements(&self, requirements: &PaymentRequirements) -> Result<(), PaymentError> {
        if requirements.payment_options.is_empty() {
            return Err(PaymentError::MalformedPayload(
                "payment requirements must contain at least one payment option".into(),
            ));
        }
        if let Some(expires_at) = requirements.expires_at {
            if expires_at <= self.now()? {
                return Err(PaymentError::ExpiredRequirements);
            }
        }
        Ok(())
    }

    /// Options whose normalized network equals the given network, in their
    /// supplied order.
    fn options_on_network(
        &self,
        requirements: &PaymentRequirements,
        network: Network,
    ) -> Result<Vec<PaymentOption>, PaymentError> {
        let options: Vec<PaymentOption> = requirements
            .payment_options
            .iter()
            .filter(|option| Network::resolve(&option.network) == Some(network))
            .cloned()
            .collect();
        if options.is_empty() {
            return Err(PaymentError::NoMatchingRequirement);
        }
        Ok(options)
    }

    /// The signed-intent verification path: signature, replay nonce, match.
    /// No chain I/O.
    async fn verify_signed_intent(
        &self,
        signed: &SignedIntentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, PaymentError> {
        let intent = &signed.payload;
        let network = Network::resolve(&intent.network)
            .ok_or_else(|| PaymentError::UnsupportedNetwork(intent.network.clone()))?;

        let now = self.now()?;
        if intent.valid_until <= now {
            return Err(PaymentError::ExpiredPayload);
        }

        let digest = hash_intent(intent)?;
        let signer = recover_signer(&digest, &signed.signature)?;

        // Best-effort sweep; expired-but-undeleted records are harmless
        // because the validUntil check above runs before reservation.
        if let Err(error) = self.nonces.sweep_expired(now) {
            tracing::warn!(%error, "nonce sweep failed");
        }
        self.nonces.reserve(
            &signer.to_lowercase_string(),
            &intent.nonce,
            intent.valid_until,
        )?;

        let options = self.options_on_network(requirements, network)?;
        let observed = ObservedPayment {
            to: intent.pay_to,
            amount: intent.amount,
            token: intent.asset.clone(),
        };
        match_options(&observed, &options)?;

        Ok(VerifyResponse::valid(signer))
    }

    /// Matches decoded on-chain details against the requirements.
    fn match_details(
        &self,
        details: &PaymentDetails,
        options: &[PaymentOption],
    ) -> Result<(), PaymentError> {
        let observed = ObservedPayment {
            to: details.to,
            amount: details.amount,
            token: details.token.clone(),
        };
        match_options(&observed, options)?;
        Ok(())
    }

    /// Fetches and matches an already-broadcast transaction. Used by the
    /// legacy `/verify` path; never submits.
    async fn verify_broadcast(
        &self,
        hash: &TransactionHash,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, PaymentError> {
        let receipt = self
            .gateway
            .get_receipt(hash)
            .await?
            .ok_or(PaymentError::TransactionNotFound)?;
        if receipt.reverted {
            return Err(PaymentError::TransactionReverted(*hash));
        }
        let details = self
            .gateway
            .decode_transaction(hash)
            .await?
            .ok_or(PaymentError::TransactionNotFound)?;
        let options = self.options_on_network(requirements, self.network)?;
        self.match_details(&details, &options)?;
        Ok(VerifyResponse::valid(details.from))
    }

    /// Confirmation polling plus the mandatory final re-match against the
    /// independently decoded on-chain transaction.
    async fn confirm_and_recheck(
        &self,
        hash: TransactionHash,
        options: &[PaymentOption],
    ) -> Result<VetAddress, PaymentError> {
        let policy = self.confirmation;
        let confirmed = self
            .gateway
            .poll_until_confirmed(
                &hash,
                policy.confirmations,
                policy.poll_interval_ms,
                policy.max_attempts,
            )
            .await?;
        if !confirmed {
            // Polling reports reverted and timed-out identically; one more
            // receipt read tells them apart.
            let receipt = self.gateway.get_receipt(&hash).await?;
            return match receipt {
                Some(receipt) if receipt.reverted => {
                    Err(PaymentError::TransactionReverted(hash))
                }
                _ => Err(PaymentError::ConfirmationTimeout(hash)),
            };
        }

        let details = self
            .gateway
            .decode_transaction(&hash)
            .await?
            .ok_or(PaymentError::TransactionNotFound)?;
        // The settlement is only successful if the actually confirmed
        // transaction matches, even though an earlier step already matched
        // an unconfirmed or claimed value.
        self.match_details(&details, options)
            .map_err(|_| PaymentError::PostSettlementMismatch)?;
        Ok(details.from)
    }

    /// Pre-submission match of a locally decoded raw transaction, so an
    /// obviously wrong payment never reaches the chain.
    fn match_raw_transaction(
        &self,
        tx: &Transaction,
        origin: VetAddress,
        options: &[PaymentOption],
    ) -> Result<(), PaymentError> {
        let details = decode_payment(origin, tx.clauses.clone());
        if details.token == CONTRACT_INTERACTION {
            return Err(PaymentError::UndecodableContractInteraction);
        }
        self.match_details(&details, options)
    }

    async fn settle_legacy(
        &self,
        legacy: &LegacyPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaymentError> {
        let options = self.options_on_network(requirements, self.network)?;
        match legacy {
            LegacyPayload::Broadcast { transaction_hash } => {
                let details = self
                    .gateway
                    .decode_transaction(transaction_hash)
                    .await?
                    .ok_or(PaymentError::TransactionNotFound)?;
                self.match_details(&details, &options)?;
                let payer = self.confirm_and_recheck(*transaction_hash, &options).await?;
                Ok(SettleResponse::settled(
                    *transaction_hash,
                    self.network.caip2(),
                    Some(payer),
                ))
            }
            LegacyPayload::Raw { signed_transaction } => {
                let tx = Transaction::decode_hex(signed_transaction)
                    .map_err(|e| PaymentError::MalformedPayload(e.to_string()))?;
                let origin = tx
                    .origin()
                    .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
                self.match_raw_transaction(&tx, origin, &options)?;

                let hash = self.gateway.submit(signed_transaction).await?;
                let payer = self.confirm_and_recheck(hash, &options).await?;
                Ok(SettleResponse::settled(
                    hash,
                    self.network.caip2(),
                    Some(payer),
                ))
            }
            LegacyPayload::Delegated {
                sender_signed_transaction,
                sender_address,
            } => {
                let sponsorship = self
                    .delegation
                    .sponsor(
                        self.gateway.as_ref(),
                        sender_signed_transaction,
                        *sender_address,
                    )
                    .await?;

                let tx = Transaction::decode_hex(&sponsorship.signed_transaction)
                    .map_err(|e| PaymentError::Internal(e.to_string()))?;
                self.match_raw_transaction(&tx, sponsorship.origin, &options)?;

                let hash = self
                    .gateway
                    .submit(&sponsorship.signed_transaction)
                    .await?;
                let settled = self.confirm_and_recheck(hash, &options).await;
                let status = match &settled {
                    Ok(_) => DelegationStatus::Success,
                    Err(PaymentError::PostSettlementMismatch) => DelegationStatus::Success,
                    Err(_) => DelegationStatus::Failed,
                };
                self.delegation.log_event(
                    &hash,
                    sender_address,
                    sponsorship.vtho_estimate,
                    status,
                );
                let payer = settled?;
                Ok(SettleResponse::settled(
                    hash,
                    self.network.caip2(),
                    Some(payer),
                ))
            }
        }
    }
}

#[async_trait]
impl Facilitator for FacilitatorLocal {
    type Error = PaymentError;

    /// Walks the verification graph: the signed-intent path up to the
    /// requirements match, or the legacy path (existing hash only) up to the
    /// on-chain match. Never submits or sponsors.
    #[instrument(skip_all, err)]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let payload = self.parse_payload(&request.payment_payload)?;
        self.check_requirements(&request.payment_requirements)?;
        match &payload {
            PaymentPayload::SignedIntent(signed) => {
                self.verify_signed_intent(signed, &request.payment_requirements)
                    .await
            }
            PaymentPayload::Legacy(LegacyPayload::Broadcast { transaction_hash }) => {
                self.verify_broadcast(transaction_hash, &request.payment_requirements)
                    .await
            }
            PaymentPayload::Legacy(_) => Err(PaymentError::MalformedPayload(
                "this payload form can only be settled, not verified".into(),
            )),
        }
    }

    /// Drives settlement: direct submission, fee-delegated submission, or
    /// confirmation of an already-broadcast hash, followed by the final
    /// on-chain re-match.
    #[instrument(skip_all, err)]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let payload = self.parse_payload(&request.payment_payload)?;
        self.check_requirements(&request.payment_requirements)?;
        match &payload {
            PaymentPayload::Legacy(legacy) => {
                self.settle_legacy(legacy, &request.payment_requirements).await
            }
            PaymentPayload::SignedIntent(_) => Err(PaymentError::MalformedPayload(
                "signed payment intents are verified, not settled".into(),
            )),
        }
    }

    fn supported(&self) -> SupportedResponse {
        SupportedResponse {
            networks: Network::variants()
                .iter()
                .map(|network| SupportedNetwork {
                    network: network.caip2().to_string(),
                    assets: network.assets().iter().map(|s| (*s).to_string()).collect(),
                })
                .collect(),
            schemes: vec!["x402".to_string()],
        }
    }
}
