//! A durable, transactional cache mapping task fingerprint to result
//! artifact, with per-fingerprint at-most-one-in-flight claims so that two
//! workers racing to compute the same fingerprint don't both run its body.
//!
//! Backed by a single SQLite file (via `rusqlite`, bundled so the crate has
//! no external library requirement) with three tables: `results`, `claims`,
//! and `deps`. `deps` is a hint table only — this crate never reads it to
//! make a scheduling or correctness decision.

#![forbid(unsafe_code)]
#![deny(clippy::all)]

mod claim;
mod error;
mod schema;
mod value_codec;

pub use cairn_hash::Hash;
pub use claim::BackoffConfig;
pub use error::{Error, Result};

use std::{
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use cairn_hash::HashedValue;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

/// A single cached task result.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub rule_id: String,
    pub input_hash: Hash,
    pub value: HashedValue,
    pub created_at: i64,
}

/// The outcome of attempting to claim a fingerprint for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// No result or live claim existed; the caller now owns the claim and
    /// should proceed to run the task body.
    Claimed,
    /// A result was already published; the caller should use it and never
    /// run the body.
    AlreadyResult(CachedResult),
    /// Another worker holds the claim. `heartbeat` is its last refresh time
    /// (seconds since the epoch), for the caller to judge staleness.
    HeldByOther { worker_id: String, heartbeat: i64 },
}

/// The durable cache. Cheap to clone — internally reference-counts a single
/// connection guarded by a mutex, since `rusqlite::Connection` is not
/// `Sync`. Multiple OS processes may open the same file concurrently;
/// SQLite's own locking serialises them.
#[derive(Clone)]
pub struct Store {
    conn: std::sync::Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if necessary) a cache file at `path`.
    #[instrument(skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::migrate(&conn)?;
        Ok(Self { conn: std::sync::Arc::new(Mutex::new(conn)) })
    }

    /// Opens a private, in-memory cache — used by tests and by callers that
    /// want at-most-once-per-session semantics without durability.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn: std::sync::Arc::new(Mutex::new(conn)) })
    }

    /// Returns the published result for `fingerprint`, if any.
    pub fn get_result(&self, fingerprint: &Hash) -> Result<Option<CachedResult>> {
        let conn = self.conn.lock();
        Self::get_result_with(&conn, fingerprint)
    }

    fn get_result_with(conn: &Connection, fingerprint: &Hash) -> Result<Option<CachedResult>> {
        let row = conn
            .query_row(
                "SELECT rule_id, input_hash, value, created_at FROM results WHERE fingerprint = ?1",
                params![fingerprint.as_bytes().to_vec()],
                |row| {
                    let rule_id: String = row.get(0)?;
                    let input_hash: Vec<u8> = row.get(1)?;
                    let value: Vec<u8> = row.get(2)?;
                    let created_at: i64 = row.get(3)?;
                    Ok((rule_id, input_hash, value, created_at))
                },
            )
            .optional()?;

        let Some((rule_id, input_hash, value, created_at)) = row else {
            return Ok(None);
        };
        let input_hash = bytes_to_hash(&input_hash)?;
        let value = value_codec::decode(&value)?;
        Ok(Some(CachedResult { rule_id, input_hash, value, created_at }))
    }

    /// Attempts to claim `fingerprint` for execution by `worker_id`. See
    /// [`ClaimOutcome`] for the three possible outcomes.
    #[instrument(skip(self))]
    pub fn try_claim(&self, fingerprint: &Hash, worker_id: &str) -> Result<ClaimOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if let Some(result) = Self::get_result_with(&tx, fingerprint)? {
            return Ok(ClaimOutcome::AlreadyResult(result));
        }

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT worker_id, heartbeat FROM claims WHERE fingerprint = ?1",
                params![fingerprint.as_bytes().to_vec()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((worker_id, heartbeat)) = existing {
            return Ok(ClaimOutcome::HeldByOther { worker_id, heartbeat });
        }

        tx.execute(
            "INSERT INTO claims (fingerprint, worker_id, heartbeat) VALUES (?1, ?2, ?3)",
            params![fingerprint.as_bytes().to_vec(), worker_id, now_secs()],
        )?;
        tx.commit()?;
        debug!(worker_id, "claimed fingerprint");
        Ok(ClaimOutcome::Claimed)
    }

    /// Atomically replaces a stale claim (one whose heartbeat still equals
    /// `expected_heartbeat`) with a fresh claim for `worker_id`. Returns the
    /// outcome as [`try_claim`](Self::try_claim) would, reflecting whatever
    /// actually won the race.
    pub fn reclaim_stale(
        &self,
        fingerprint: &Hash,
        worker_id: &str,
        expected_heartbeat: i64,
    ) -> Result<ClaimOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if let Some(result) = Self::get_result_with(&tx, fingerprint)? {
            return Ok(ClaimOutcome::AlreadyResult(result));
        }

        let deleted = tx.execute(
            "DELETE FROM claims WHERE fingerprint = ?1 AND heartbeat = ?2",
            params![fingerprint.as_bytes().to_vec(), expected_heartbeat],
        )?;

        if deleted == 0 {
            // Someone else already refreshed or released it first.
            let existing: Option<(String, i64)> = tx
                .query_row(
                    "SELECT worker_id, heartbeat FROM claims WHERE fingerprint = ?1",
                    params![fingerprint.as_bytes().to_vec()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            return Ok(match existing {
                Some((worker_id, heartbeat)) => ClaimOutcome::HeldByOther { worker_id, heartbeat },
                None => {
                    tx.execute(
                        "INSERT INTO claims (fingerprint, worker_id, heartbeat) VALUES (?1, ?2, ?3)",
                        params![fingerprint.as_bytes().to_vec(), worker_id, now_secs()],
                    )?;
                    tx.commit()?;
                    return Ok(ClaimOutcome::Claimed);
                }
            });
        }

        tx.execute(
            "INSERT INTO claims (fingerprint, worker_id, heartbeat) VALUES (?1, ?2, ?3)",
            params![fingerprint.as_bytes().to_vec(), worker_id, now_secs()],
        )?;
        tx.commit()?;
        debug!(worker_id, "reclaimed stale fingerprint");
        Ok(ClaimOutcome::Claimed)
    }

    /// Refreshes the heartbeat of a claim still held by `worker_id`. Returns
    /// `false` if the claim was released, reclaimed, or never existed —
    /// the caller should treat that as having lost the claim.
    pub fn heartbeat(&self, fingerprint: &Hash, worker_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE claims SET heartbeat = ?1 WHERE fingerprint = ?2 AND worker_id = ?3",
            params![now_secs(), fingerprint.as_bytes().to_vec(), worker_id],
        )?;
        Ok(updated > 0)
    }

    /// Releases a claim without publishing a result — used on rule-body
    /// failure, since failures are not persisted by default.
    pub fn release_claim(&self, fingerprint: &Hash, worker_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM claims WHERE fingerprint = ?1 AND worker_id = ?2",
            params![fingerprint.as_bytes().to_vec(), worker_id],
        )?;
        Ok(())
    }

    /// Publishes a result and releases its claim in one transaction.
    #[instrument(skip(self, value))]
    pub fn put_result(
        &self,
        fingerprint: &Hash,
        rule_id: &str,
        input_hash: &Hash,
        value: &HashedValue,
    ) -> Result<()> {
        let encoded = value_codec::encode(value)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if let Some(existing) = Self::get_result_with(&tx, fingerprint)? {
            if existing.rule_id != rule_id || existing.input_hash != *input_hash {
                return Err(Error::CacheConflict(fingerprint.to_hex()));
            }
            return Ok(());
        }

        tx.execute(
            "INSERT INTO results (fingerprint, rule_id, input_hash, value, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                fingerprint.as_bytes().to_vec(),
                rule_id,
                input_hash.as_bytes().to_vec(),
                encoded,
                now_secs(),
            ],
        )?;
        tx.execute("DELETE FROM claims WHERE fingerprint = ?1", params![fingerprint.as_bytes().to_vec()])?;
        tx.commit()?;
        Ok(())
    }

    /// Records a parent→child dependency edge. Best-effort: failures are
    /// returned to the caller, who is free to ignore them, since `deps` is a
    /// hint table never consulted for correctness.
    pub fn record_dep(&self, parent: &Hash, child: &Hash) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO deps (parent, child) VALUES (?1, ?2)",
            params![parent.as_bytes().to_vec(), child.as_bytes().to_vec()],
        )?;
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs() as i64
}

fn bytes_to_hash(bytes: &[u8]) -> Result<Hash> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::CorruptValue(format!("hash column has {} bytes, expected 32", bytes.len())))?;
    Ok(Hash::from_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_hash::HashedValue;

    fn fp(tag: &str) -> Hash {
        Hash::of_bytes(tag.as_bytes())
    }

    #[test]
    fn claim_then_publish_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let f = fp("task-1");

        assert_eq!(store.try_claim(&f, "w1").unwrap(), ClaimOutcome::Claimed);
        match store.try_claim(&f, "w2").unwrap() {
            ClaimOutcome::HeldByOther { worker_id, .. } => assert_eq!(worker_id, "w1"),
            other => panic!("expected HeldByOther, got {other:?}"),
        }

        store.put_result(&f, "rule::fib", &fp("args"), &HashedValue::Int(5)).unwrap();
        match store.try_claim(&f, "w2").unwrap() {
            ClaimOutcome::AlreadyResult(r) => assert_eq!(r.value, HashedValue::Int(5)),
            other => panic!("expected AlreadyResult, got {other:?}"),
        }
    }

    #[test]
    fn cache_conflict_on_divergent_rule() {
        let store = Store::open_in_memory().unwrap();
        let f = fp("task-1");
        store.put_result(&f, "rule::a", &fp("args"), &HashedValue::Int(1)).unwrap();
        let err = store.put_result(&f, "rule::b", &fp("args"), &HashedValue::Int(1)).unwrap_err();
        assert!(matches!(err, Error::CacheConflict(_)));
    }

    #[test]
    fn stale_claim_can_be_reclaimed() {
        let store = Store::open_in_memory().unwrap();
        let f = fp("task-1");
        store.try_claim(&f, "w1").unwrap();
        let heartbeat = match store.try_claim(&f, "w2").unwrap() {
            ClaimOutcome::HeldByOther { heartbeat, .. } => heartbeat,
            other => panic!("expected HeldByOther, got {other:?}"),
        };
        assert_eq!(store.reclaim_stale(&f, "w2", heartbeat).unwrap(), ClaimOutcome::Claimed);
    }

    #[test]
    fn release_without_publishing_frees_the_fingerprint() {
        let store = Store::open_in_memory().unwrap();
        let f = fp("task-1");
        store.try_claim(&f, "w1").unwrap();
        store.release_claim(&f, "w1").unwrap();
        assert_eq!(store.try_claim(&f, "w2").unwrap(), ClaimOutcome::Claimed);
    }
}
