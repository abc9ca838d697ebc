use thiserror::Error;

/// Failures the persistent cache can report.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying SQLite file could not be read, written, or migrated.
    #[error("cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A result for this fingerprint is already recorded with a different
    /// rule id or input hash — the same content address produced by two
    /// divergent computations, which should be structurally impossible and
    /// indicates a fingerprint collision or a caller bug.
    #[error("cache conflict for fingerprint {0}: existing entry has a different rule/input")]
    CacheConflict(String),

    /// A value to be persisted still contained an unresolved future leaf.
    /// The scheduler only ever persists fully-resolved results, so this
    /// signals a scheduler bug; surfaced as an error rather than a panic so
    /// it doesn't bring down an otherwise-healthy session.
    #[error("value for fingerprint {0} still contains an unresolved future; cannot persist")]
    UnresolvedFuture(String),

    /// The value codec encountered bytes it doesn't understand, such as an
    /// encoding version newer than this build supports.
    #[error("cache value is corrupt or from an unsupported codec version: {0}")]
    CorruptValue(String),
}

pub type Result<T> = std::result::Result<T, Error>;
