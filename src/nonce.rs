//! Replay-protection ledger for signed payment intents.
//!
//! A nonce is consumed per wallet: the ledger enforces a uniqueness constraint
//! over `(wallet, nonce)` and translates a constraint violation into
//! [`NonceLedgerError::Replay`]. That constraint is the sole replay guard -
//! `is_used` is advisory, and two concurrent reservations race at the storage
//! layer, not in application logic. Records carry the intent's `validUntil`
//! as their expiry; an opportunistic sweep removes stale rows, and replays of
//! an expired nonce are already rejected upstream by the expiry check.

use dashmap::DashMap;
use std::sync::Mutex;

use crate::timestamp::UnixTimestamp;

/// Errors surfaced by a nonce ledger.
#[derive(Debug, thiserror::Error)]
pub enum NonceLedgerError {
    /// The `(wallet, nonce)` pair has already been reserved.
    #[error("Nonce has already been used")]
    Replay,
    /// The backing store failed; distinct from a replay.
    #[error("Nonce storage error: {0}")]
    Storage(String),
}

/// Storage contract for nonce records.
///
/// Implementations must be thread-safe; `reserve` must be atomic across
/// processes sharing the same store.
pub trait NonceLedger: Send + Sync {
    /// Advisory check whether a nonce has been consumed for a wallet.
    fn is_used(&self, wallet: &str, nonce: &str) -> Result<bool, NonceLedgerError>;

    /// Atomically records the nonce as consumed.
    ///
    /// # Errors
    ///
    /// [`NonceLedgerError::Replay`] if the pair already exists,
    /// [`NonceLedgerError::Storage`] on any other storage fault.
    fn reserve(
        &self,
        wallet: &str,
        nonce: &str,
        expires_at: UnixTimestamp,
    ) -> Result<(), NonceLedgerError>;

    /// Deletes records whose expiry has passed. Best-effort; returns the
    /// number of rows removed.
    fn sweep_expired(&self, now: UnixTimestamp) -> Result<usize, NonceLedgerError>;
}

fn canonical_wallet(wallet: &str) -> String {
    wallet.to_ascii_lowercase()
}

/// Durable nonce ledger backed by SQLite.
///
/// The `PRIMARY KEY (wallet, nonce)` constraint makes reservation atomic at
/// the database level, which stays correct across multiple process instances.
pub struct SqliteNonceLedger {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteNonceLedger {
    /// Opens (or creates) the ledger at the given SQLite path.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nonce_records (
                wallet TEXT NOT NULL,
                nonce TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (wallet, nonce)
            );
            CREATE INDEX IF NOT EXISTS idx_nonce_expires_at ON nonce_records(expires_at);
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
                tracing::error!("nonce ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl NonceLedger for SqliteNonceLedger {
    fn is_used(&self, wallet: &str, nonce: &str) -> Result<bool, NonceLedgerError> {
        let conn = self.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM nonce_records WHERE wallet = ?1 AND nonce = ?2",
                rusqlite::params![canonical_wallet(wallet), nonce],
                |row| row.get(0),
            )
            .map_err(|e| NonceLedgerError::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    fn reserve(
        &self,
        wallet: &str,
        nonce: &str,
        expires_at: UnixTimestamp,
    ) -> Result<(), NonceLedgerError> {
        let conn = self.lock();
        let result = conn.execute(
            "INSERT INTO nonce_records (wallet, nonce, expires_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                canonical_wallet(wallet),
                nonce,
                i64::try_from(expires_at.as_secs()).unwrap_or(i64::MAX)
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(NonceLedgerError::Replay)
            }
            Err(e) => Err(NonceLedgerError::Storage(e.to_string())),
        }
    }

    fn sweep_expired(&self, now: UnixTimestamp) -> Result<usize, NonceLedgerError> {
        let conn = self.lock();
        let removed = conn
            .execute(
                "DELETE FROM nonce_records WHERE expires_at < ?1",
                rusqlite::params![i64::try_from(now.as_secs()).unwrap_or(i64::MAX)],
            )
            .map_err(|e| NonceLedgerError::Storage(e.to_string()))?;
        Ok(removed)
    }
}

/// In-memory nonce ledger backed by DashMap. Used by tests and ephemeral
/// runs; lost on restart.
#[derive(Default)]
pub struct InMemoryNonceLedger {
    records: DashMap<(String, String), UnixTimestamp>,
}

impl InMemoryNonceLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceLedger for InMemoryNonceLedger {
    fn is_used(&self, wallet: &str, nonce: &str) -> Result<bool, NonceLedgerError> {
        Ok(self
            .records
            .contains_key(&(canonical_wallet(wallet), nonce.to_string())))
    }

    fn reserve(
        &self,
        wallet: &str,
        nonce: &str,
        expires_at: UnixTimestamp,
    ) -> Result<(), NonceLedgerError> {
        use dashmap::mapref::entry::Entry;
        // The entry API gives single-process atomicity.
        match self
            .records
            .entry((canonical_wallet(wallet), nonce.to_string()))
        {
            Entry::Occupied(_) => Err(NonceLedgerError::Replay),
            Entry::Vacant(v) => {
                v.insert(expires_at);
                Ok(())
            }
        }
    }

    fn sweep_expired(&self, now: UnixTimestamp) -> Result<usize, NonceLedgerError> {
        let before = self.records.len();
        self.records.retain(|_, expires_at| *expires_at >= now);
        Ok(before - self.records.len())
    }
}
