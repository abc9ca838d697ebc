use thiserror::Error;

/// Failures the fingerprint engine can report while canonicalising a value.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be canonicalised — for example a collection whose
    /// length does not fit the engine's length-prefix width.
    #[error("value cannot be canonicalised: {0}")]
    UnsupportedValue(String),

    /// The canonical traversal recursed past the engine's depth bound. A
    /// `HashedValue` tree is owned and therefore can never truly contain a
    /// cycle; this is the practical signal that a `Canonical` impl recurses
    /// into itself without bound while building one.
    #[error("value recurses too deeply to canonicalise (possible self-referential Canonical impl)")]
    CycleInValue,
}

pub type Result<T> = std::result::Result<T, Error>;
