//! VIP-191 fee delegation: gas estimation, spend limits, rate limiting, and
//! gas-payer co-signing.
//!
//! The engine sponsors a sender-signed transaction only when every gate
//! passes, in order: delegation enabled, the sender is under the rolling
//! one-hour transaction ceiling, the transaction is flagged for delegation,
//! the estimated fee is under the per-transaction VTHO ceiling, and the
//! delegator's energy balance covers the estimate. Every rejection carries
//! its own reason. Past sponsorships live in an append-only event log, which
//! also backs the rate-limit counter; the rate-limit read and the balance
//! read are two unlocked reads, so truly concurrent requests from one
//! account can over-admit within a window (see DESIGN.md).

use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::chain::{ChainError, ChainGateway};
use crate::timestamp::UnixTimestamp;
use crate::tx::{Clause, Transaction, TxCodecError};
use crate::types::{TokenAmount, TransactionHash, VetAddress};

/// Intrinsic gas charged per transaction.
pub const TX_GAS: u64 = 5_000;
/// Intrinsic gas charged per clause.
pub const CLAUSE_GAS: u64 = 16_000;
/// Gas per zero byte of clause data.
pub const ZERO_BYTE_GAS: u64 = 4;
/// Gas per non-zero byte of clause data.
pub const NONZERO_BYTE_GAS: u64 = 68;
/// Safety multiplier applied to the intrinsic estimate, in percent.
pub const GAS_SAFETY_PERCENT: u64 = 120;
/// Wei of VTHO consumed per unit of gas at base gas price.
pub const VTHO_WEI_PER_GAS: u64 = 10_000_000_000_000;

/// Rolling window over which the per-address transaction ceiling applies.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 3_600;

/// Estimates the gas a transaction's clauses will consume.
///
/// Sums the per-transaction base, the per-clause base, and a byte-by-byte
/// cost over each clause's call data (zero bytes cheaper than non-zero
/// bytes), then scales by the safety multiplier with integer floor.
pub fn estimate_gas(clauses: &[Clause]) -> u64 {
    let mut gas = TX_GAS;
    for clause in clauses {
        gas += CLAUSE_GAS;
        for byte in clause.data.iter() {
            gas += if *byte == 0 { ZERO_BYTE_GAS } else { NONZERO_BYTE_GAS };
        }
    }
    gas * GAS_SAFETY_PERCENT / 100
}

/// Converts a gas amount to its VTHO cost in wei.
pub fn gas_to_vtho_wei(gas: u64) -> U256 {
    U256::from(gas) * U256::from(VTHO_WEI_PER_GAS)
}

/// Outcome status of a sponsorship attempt, as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationStatus {
    Success,
    Failed,
}

impl DelegationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationStatus::Success => "success",
            DelegationStatus::Failed => "failed",
        }
    }
}

/// One sponsorship event. Append-only; never mutated after insertion.
#[derive(Debug, Clone)]
pub struct DelegationEvent {
    pub tx_hash: String,
    pub user_address: String,
    pub vtho_spent: TokenAmount,
    pub status: DelegationStatus,
    pub created_at: UnixTimestamp,
}

/// Per-address aggregate over a time window, computed from the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationStats {
    pub count: u64,
    pub total_vtho_spent: U256,
}

#[derive(Debug, thiserror::Error)]
#[error("Delegation log error: {0}")]
pub struct DelegationLogError(pub String);

/// Storage contract for the delegation event log.
pub trait DelegationLog: Send + Sync {
    /// Appends one event.
    fn record(&self, event: &DelegationEvent) -> Result<(), DelegationLogError>;

    /// Aggregates events for an address created at or after `since`.
    fn stats_since(
        &self,
        user_address: &str,
        since: UnixTimestamp,
    ) -> Result<DelegationStats, DelegationLogError>;
}

/// Durable delegation log backed by SQLite. Keyed by transaction hash.
pub struct SqliteDelegationLog {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteDelegationLog {
    /// Opens (or creates) the log at the given SQLite path.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS delegation_events (
                tx_hash TEXT PRIMARY KEY,
                user_address TEXT NOT NULL,
                vtho_spent TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_delegation_user_time
                ON delegation_events(user_address, created_at);
            PRAGMA journal_mode=WAL;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("delegation log mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl DelegationLog for SqliteDelegationLog {
    fn record(&self, event: &DelegationEvent) -> Result<(), DelegationLogError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO delegation_events (tx_hash, user_address, vtho_spent, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                event.tx_hash,
                event.user_address.to_ascii_lowercase(),
                event.vtho_spent.to_string(),
                event.status.as_str(),
                i64::try_from(event.created_at.as_secs()).unwrap_or(i64::MAX)
            ],
        )
        .map_err(|e| DelegationLogError(e.to_string()))?;
        Ok(())
    }

    fn stats_since(
        &self,
        user_address: &str,
        since: UnixTimestamp,
    ) -> Result<DelegationStats, DelegationLogError> {
        let conn = self.lock();
        let mut statement = conn
            .prepare(
                "SELECT vtho_spent FROM delegation_events
                 WHERE user_address = ?1 AND created_at >= ?2",
            )
            .map_err(|e| DelegationLogError(e.to_string()))?;
        let rows = statement
            .query_map(
                rusqlite::params![
                    user_address.to_ascii_lowercase(),
                    i64::try_from(since.as_secs()).unwrap_or(i64::MAX)
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(|e| DelegationLogError(e.to_string()))?;

        let mut stats = DelegationStats {
            count: 0,
            total_vtho_spent: U256::ZERO,
        };
        for row in rows {
            let spent = row.map_err(|e| DelegationLogError(e.to_string()))?;
            stats.count += 1;
            // Amounts are stored as decimal strings; summed here because
            // wei values overflow SQLite integers.
            stats.total_vtho_spent += U256::from_str_radix(&spent, 10)
                .map_err(|e| DelegationLogError(format!("corrupt vtho_spent value: {e}")))?;
        }
        Ok(stats)
    }
}

/// In-memory delegation log for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryDelegationLog {
    events: Mutex<Vec<DelegationEvent>>,
}

impl InMemoryDelegationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DelegationLog for InMemoryDelegationLog {
    fn record(&self, event: &DelegationEvent) -> Result<(), DelegationLogError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| DelegationLogError("poisoned".into()))?;
        events.push(event.clone());
        Ok(())
    }

    fn stats_since(
        &self,
        user_address: &str,
        since: UnixTimestamp,
    ) -> Result<DelegationStats, DelegationLogError> {
        let events = self
            .events
            .lock()
            .map_err(|_| DelegationLogError("poisoned".into()))?;
        let user = user_address.to_ascii_lowercase();
        let mut stats = DelegationStats {
            count: 0,
            total_vtho_spent: U256::ZERO,
        };
        for event in events
            .iter()
            .filter(|e| e.user_address.to_ascii_lowercase() == user && e.created_at >= since)
        {
            stats.count += 1;
            stats.total_vtho_spent += event.vtho_spent.0;
        }
        Ok(stats)
    }
}

/// Reasons a sponsorship request is refused or fails.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("Fee delegation is not enabled")]
    Disabled,
    #[error("Transaction is not flagged for fee delegation")]
    NotRequested,
    #[error("Fee delegation rate limit exceeded: {count} sponsored transactions in the last hour")]
    RateLimited { count: u64 },
    #[error("Estimated fee exceeds the per-transaction VTHO ceiling")]
    GasCeilingExceeded,
    #[error("Delegator balance cannot cover the estimated fee")]
    InsufficientBalance,
    #[error("Sender address does not match the transaction signature")]
    SenderMismatch,
    #[error("Gas payer signing failed: {0}")]
    Signing(String),
    #[error(transparent)]
    Codec(#[from] TxCodecError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Log(#[from] DelegationLogError),
}

/// A successfully sponsored transaction.
#[derive(Debug, Clone)]
pub struct Sponsorship {
    /// Fully signed transaction (sender + gas payer), hex-encoded.
    pub signed_transaction: String,
    /// The VTHO the sponsorship is estimated to spend, in wei.
    pub vtho_estimate: TokenAmount,
    /// The recovered transaction sender.
    pub origin: VetAddress,
}

/// The gas sponsorship engine.
pub struct FeeDelegationEngine {
    signer: Option<PrivateKeySigner>,
    max_vtho_per_tx: U256,
    max_tx_per_hour: u64,
    log: Arc<dyn DelegationLog>,
}

impl FeeDelegationEngine {
    /// An engine that refuses every sponsorship request.
    pub fn disabled(log: Arc<dyn DelegationLog>) -> Self {
        FeeDelegationEngine {
            signer: None,
            max_vtho_per_tx: U256::ZERO,
            max_tx_per_hour: 0,
            log,
        }
    }

    /// An engine sponsoring with the given delegator key and limits.
    pub fn enabled(
        signer: PrivateKeySigner,
        max_vtho_per_tx: U256,
        max_tx_per_hour: u64,
        log: Arc<dyn DelegationLog>,
    ) -> Self {
        FeeDelegationEngine {
            signer: Some(signer),
            max_vtho_per_tx,
            max_tx_per_hour,
            log,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.signer.is_some()
    }

    /// The delegator (gas payer) address, when enabled.
    pub fn delegator_address(&self) -> Option<VetAddress> {
        self.signer.as_ref().map(|s| VetAddress(s.address()))
    }

    /// Co-signs a sender-signed transaction as gas payer.
    ///
    /// Runs the gate sequence described in the module docs; each refusal is
    /// a distinct [`DelegationError`], never a generic failure.
    pub async fn sponsor(
        &self,
        gateway: &dyn ChainGateway,
        sender_signed_transaction: &str,
        sender_address: VetAddress,
    ) -> Result<Sponsorship, DelegationError> {
        let Some(signer) = self.signer.as_ref() else {
            return Err(DelegationError::Disabled);
        };

        let now = UnixTimestamp::now()
            .ok_or_else(|| DelegationError::Signing("system clock before epoch".into()))?;
        let window_start =
            UnixTimestamp::from_secs(now.as_secs().saturating_sub(RATE_LIMIT_WINDOW_SECS));
        let stats = self
            .log
            .stats_since(&sender_address.to_lowercase_string(), window_start)?;
        if stats.count >= self.max_tx_per_hour {
            return Err(DelegationError::RateLimited { count: stats.count });
        }

        let tx = Transaction::decode_hex(sender_signed_transaction)?;
        let origin = tx.origin()?;
        if origin != sender_address {
            return Err(DelegationError::SenderMismatch);
        }
        if !tx.is_delegated() {
            return Err(DelegationError::NotRequested);
        }

        let gas = estimate_gas(&tx.clauses);
        let vtho = gas_to_vtho_wei(gas);
        if vtho > self.max_vtho_per_tx {
            return Err(DelegationError::GasCeilingExceeded);
        }

        let delegator = VetAddress(signer.address());
        let energy = gateway
            .get_account(&delegator)
            .await?
            .map(|account| account.energy)
            .unwrap_or(U256::ZERO);
        if energy < vtho {
            return Err(DelegationError::InsufficientBalance);
        }

        let payer_hash = tx.gas_payer_signing_hash(&origin);
        let signature = signer
            .sign_hash_sync(&payer_hash)
            .map_err(|e| DelegationError::Signing(e.to_string()))?;
        let cosigned = tx.with_gas_payer_signature(signature.as_bytes())?;

        Ok(Sponsorship {
            signed_transaction: cosigned.encode_hex(),
            vtho_estimate: TokenAmount(vtho),
            origin,
        })
    }

    /// Appends a sponsorship outcome to the event log.
    ///
    /// Failures are swallowed: logging must never abort a settlement that
    /// already succeeded on-chain.
    pub fn log_event(
        &self,
        tx_hash: &TransactionHash,
        user_address: &VetAddress,
        vtho_spent: TokenAmount,
        status: DelegationStatus,
    ) {
        let Some(created_at) = UnixTimestamp::now() else {
            tracing::warn!("skipping delegation log entry: system clock before epoch");
            return;
        };
        let event = DelegationEvent {
            tx_hash: tx_hash.to_string(),
            user_address: user_address.to_lowercase_string(),
            vtho_spent,
            status,
            created_at,
        };
        if let Err(error) = self.log.record(&event) {
            tracing::warn!(%error, tx_hash = %tx_hash, "failed to record delegation event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Account, CallResult, PaymentDetails, Receipt};
    use alloy_primitives::{Address, Bytes};
    use async_trait::async_trait;

    struct FixedAccountGateway {
        energy: U256,
    }

    #[async_trait]
    impl ChainGateway for FixedAccountGateway {
        async fn get_receipt(&self, _: &TransactionHash) -> Result<Option<Receipt>, ChainError> {
            Ok(None)
        }
        async fn submit(&self, _: &str) -> Result<TransactionHash, ChainError> {
            Ok(TransactionHash([0u8; 32]))
        }
        async fn decode_transaction(
            &self,
            _: &TransactionHash,
        ) -> Result<Option<PaymentDetails>, ChainError> {
            Ok(None)
        }
        async fn poll_until_confirmed(
            &self,
            _: &TransactionHash,
            _: u64,
            _: u64,
            _: u32,
        ) -> Result<bool, ChainError> {
            Ok(false)
        }
        async fn get_account(&self, _: &VetAddress) -> Result<Option<Account>, ChainError> {
            Ok(Some(Account {
                balance: U256::ZERO,
                energy: self.energy,
            }))
        }
        async fn contract_call(
            &self,
            _: &VetAddress,
            _: Vec<u8>,
        ) -> Result<CallResult, ChainError> {
            Ok(CallResult {
                data: vec![],
                reverted: false,
            })
        }
    }

    fn addr(tail: u8) -> VetAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        VetAddress(Address::from(bytes))
    }

    fn clause_with_data(data: Vec<u8>) -> Clause {
        Clause::new(addr(0x55), U256::ZERO, data)
    }

    fn sender_signed(delegated: bool) -> (String, VetAddress, PrivateKeySigner) {
        use alloy_signer::SignerSync;
        let signer = PrivateKeySigner::random();
        let mut tx = Transaction {
            chain_tag: 0x4a,
            block_ref: 1,
            expiration: 720,
            clauses: vec![Clause::new(addr(0x55), U256::from(100u64), vec![])],
            gas_price_coef: 0,
            gas: 21000,
            depends_on: Bytes::new(),
            nonce: 7,
            reserved: if delegated {
                vec![Bytes::from(vec![0x01])]
            } else {
                vec![]
            },
            signature: Bytes::new(),
        };
        let signature = signer.sign_hash_sync(&tx.signing_hash()).unwrap();
        tx.signature = Bytes::from(signature.as_bytes().to_vec());
        (tx.encode_hex(), VetAddress(signer.address()), signer)
    }

    fn engine(max_vtho: U256, max_per_hour: u64) -> FeeDelegationEngine {
        FeeDelegationEngine::enabled(
            PrivateKeySigner::random(),
            max_vtho,
            max_per_hour,
            Arc::new(InMemoryDelegationLog::new()),
        )
    }

    #[test]
    fn estimate_counts_clause_and_byte_costs() {
        let empty = estimate_gas(&[clause_with_data(vec![])]);
        assert_eq!(empty, (TX_GAS + CLAUSE_GAS) * GAS_SAFETY_PERCENT / 100);

        let zeros = estimate_gas(&[clause_with_data(vec![0, 0, 0])]);
        assert_eq!(
            zeros,
            (TX_GAS + CLAUSE_GAS + 3 * ZERO_BYTE_GAS) * GAS_SAFETY_PERCENT / 100
        );

        let mixed = estimate_gas(&[clause_with_data(vec![0, 1, 2])]);
        assert_eq!(
            mixed,
            (TX_GAS + CLAUSE_GAS + ZERO_BYTE_GAS + 2 * NONZERO_BYTE_GAS) * GAS_SAFETY_PERCENT
                / 100
        );
    }

    #[test]
    fn estimate_is_monotonic_in_nonzero_bytes() {
        let mut previous = 0;
        for nonzero in 0..32 {
            let mut data = vec![0u8; 32];
            for byte in data.iter_mut().take(nonzero) {
                *byte = 0xff;
            }
            let gas = estimate_gas(&[clause_with_data(data)]);
            assert!(gas >= previous, "gas dropped at {nonzero} non-zero bytes");
            previous = gas;
        }
    }

    #[tokio::test]
    async fn disabled_engine_refuses() {
        let engine = FeeDelegationEngine::disabled(Arc::new(InMemoryDelegationLog::new()));
        let (raw, sender, _) = sender_signed(true);
        let gateway = FixedAccountGateway { energy: U256::MAX };
        let error = engine.sponsor(&gateway, &raw, sender).await.unwrap_err();
        assert!(matches!(error, DelegationError::Disabled));
        assert_eq!(error.to_string(), "Fee delegation is not enabled");
    }

    #[tokio::test]
    async fn undelegated_transaction_is_refused() {
        let engine = engine(U256::MAX, 10);
        let (raw, sender, _) = sender_signed(false);
        let gateway = FixedAccountGateway { energy: U256::MAX };
        let error = engine.sponsor(&gateway, &raw, sender).await.unwrap_err();
        assert!(matches!(error, DelegationError::NotRequested));
    }

    #[tokio::test]
    async fn sender_mismatch_is_refused() {
        let engine = engine(U256::MAX, 10);
        let (raw, _, _) = sender_signed(true);
        let gateway = FixedAccountGateway { energy: U256::MAX };
        let error = engine.sponsor(&gateway, &raw, addr(0x77)).await.unwrap_err();
        assert!(matches!(error, DelegationError::SenderMismatch));
    }

    #[tokio::test]
    async fn gas_ceiling_is_enforced() {
        let engine = engine(U256::from(1u64), 10);
        let (raw, sender, _) = sender_signed(true);
        let gateway = FixedAccountGateway { energy: U256::MAX };
        let error = engine.sponsor(&gateway, &raw, sender).await.unwrap_err();
        assert!(matches!(error, DelegationError::GasCeilingExceeded));
    }

    #[tokio::test]
    async fn delegator_balance_is_checked() {
        let engine = engine(U256::MAX, 10);
        let (raw, sender, _) = sender_signed(true);
        let gateway = FixedAccountGateway { energy: U256::ZERO };
        let error = engine.sponsor(&gateway, &raw, sender).await.unwrap_err();
        assert!(matches!(error, DelegationError::InsufficientBalance));
    }

    #[tokio::test]
    async fn rate_limit_counts_events_in_window() {
        let log = Arc::new(InMemoryDelegationLog::new());
        let engine = FeeDelegationEngine::enabled(
            PrivateKeySigner::random(),
            U256::MAX,
            2,
            Arc::clone(&log) as Arc<dyn DelegationLog>,
        );
        let (raw, sender, _) = sender_signed(true);
        let now = UnixTimestamp::now().unwrap();
        for i in 0..2 {
            log.record(&DelegationEvent {
                tx_hash: format!("0x{i:064x}"),
                user_address: sender.to_lowercase_string(),
                vtho_spent: TokenAmount::from_u64(1),
                status: DelegationStatus::Success,
                created_at: now,
            })
            .unwrap();
        }

        let gateway = FixedAccountGateway { energy: U256::MAX };
        let error = engine.sponsor(&gateway, &raw, sender).await.unwrap_err();
        assert!(matches!(error, DelegationError::RateLimited { count: 2 }));
    }

    #[tokio::test]
    async fn old_events_fall_out_of_the_window() {
        let log = Arc::new(InMemoryDelegationLog::new());
        let engine = FeeDelegationEngine::enabled(
            PrivateKeySigner::random(),
            U256::MAX,
            1,
            Arc::clone(&log) as Arc<dyn DelegationLog>,
        );
        let (raw, sender, _) = sender_signed(true);
        let now = UnixTimestamp::now().unwrap();
        log.record(&DelegationEvent {
            tx_hash: format!("0x{:064x}", 1),
            user_address: sender.to_lowercase_string(),
            vtho_spent: TokenAmount::from_u64(1),
            status: DelegationStatus::Success,
            created_at: UnixTimestamp::from_secs(
                now.as_secs() - RATE_LIMIT_WINDOW_SECS - 10,
            ),
        })
        .unwrap();

        let gateway = FixedAccountGateway { energy: U256::MAX };
        assert!(engine.sponsor(&gateway, &raw, sender).await.is_ok());
    }

    #[tokio::test]
    async fn happy_path_produces_a_cosigned_transaction() {
        let engine = engine(U256::MAX, 10);
        let (raw, sender, _) = sender_signed(true);
        let gateway = FixedAccountGateway { energy: U256::MAX };
        let sponsorship = engine.sponsor(&gateway, &raw, sender).await.unwrap();

        let cosigned = Transaction::decode_hex(&sponsorship.signed_transaction).unwrap();
        assert_eq!(cosigned.signature.len(), 130);
        assert_eq!(cosigned.origin().unwrap(), sender);
        assert_eq!(sponsorship.origin, sender);
        assert!(sponsorship.vtho_estimate.0 > U256::ZERO);
    }

    #[test]
    fn sqlite_log_roundtrip_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delegation.db");
        let log = SqliteDelegationLog::open(path.to_str().unwrap()).unwrap();

        let user = addr(0xAB).to_lowercase_string();
        for (i, created_at) in [(1u64, 100u64), (2, 200), (3, 300)] {
            log.record(&DelegationEvent {
                tx_hash: format!("0x{i:064x}"),
                user_address: user.clone(),
                vtho_spent: TokenAmount::from_u64(10),
                status: DelegationStatus::Success,
                created_at: UnixTimestamp::from_secs(created_at),
            })
            .unwrap();
        }

        let stats = log
            .stats_since(&user, UnixTimestamp::from_secs(150))
            .unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_vtho_spent, U256::from(20u64));

        // Keyed by hash: replaying the same hash is an error, not an update.
        let duplicate = log.record(&DelegationEvent {
            tx_hash: format!("0x{:064x}", 1),
            user_address: user,
            vtho_spent: TokenAmount::from_u64(99),
            status: DelegationStatus::Failed,
            created_at: UnixTimestamp::from_secs(400),
        });
        assert!(duplicate.is_err());
    }
}
