//! Canonical serialisation of values and computation of stable content
//! hashes ("fingerprints") that are stable across processes — the
//! foundation every other `cairn` component builds task identity on.
//!
//! The canonical form of a composite embeds the *fingerprints* of its
//! children, never their values, which is what lets a task's fingerprint be
//! computed before any of its dependencies have run (spec'd in depth in the
//! crate-level docs of `cairn` itself).

#![forbid(unsafe_code)]
#![deny(clippy::all)]

mod canon;
mod error;
mod value;

pub use canon::{canonical_bytes, fingerprint, fingerprint_tagged};
pub use error::{Error, Result};
pub use value::{Canonical, HashedValue};

use std::fmt;

/// A fixed-width content hash. Two values with the same canonical form
/// always hash equal, in this process or any other.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Hashes raw bytes directly — used internally by the canonical encoder
    /// and by callers that already have an opaque byte representation (e.g.
    /// a rule's identity string) and don't need full canonicalisation.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Hash(*blake3::hash(bytes).as_bytes())
    }

    /// The hash's raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Combines two hashes into a third, order-sensitive. Used to combine a
    /// rule's identity hash with its argument composite's fingerprint into
    /// the task's fingerprint.
    pub fn combine(a: &Hash, b: &Hash) -> Hash {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&a.0);
        buf.extend_from_slice(&b.0);
        Hash::of_bytes(&buf)
    }

    /// Reconstructs a hash from raw bytes, e.g. a column read back out of
    /// the persistent cache.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Renders the hash as lowercase hex, the form used in cache keys and
    /// log output.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Computes the fingerprint of any `Canonical` value, tagging it with the
/// type's name so structurally-identical values of unrelated types don't
/// collide.
pub fn fingerprint_of<T: Canonical>(value: &T) -> Result<Hash> {
    fingerprint_tagged(T::type_tag(), &value.to_hashed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_order_sensitive() {
        let a = Hash::of_bytes(b"a");
        let b = Hash::of_bytes(b"b");
        assert_ne!(Hash::combine(&a, &b), Hash::combine(&b, &a));
    }

    #[test]
    fn distinct_types_with_same_shape_do_not_collide() {
        #[derive(Clone)]
        struct Meters(f64);
        impl Canonical for Meters {
            fn type_tag() -> &'static str {
                "test::Meters"
            }
            fn to_hashed(&self) -> HashedValue {
                HashedValue::Float(self.0)
            }
            fn from_hashed(value: HashedValue) -> Option<Self> {
                match value {
                    HashedValue::Float(f) => Some(Meters(f)),
                    _ => None,
                }
            }
        }

        let plain = fingerprint_of(&1.0f64).unwrap();
        let tagged = fingerprint_of(&Meters(1.0)).unwrap();
        assert_ne!(plain, tagged);
    }

    #[test]
    fn same_value_same_fingerprint_across_calls() {
        let a = fingerprint_of(&42i64).unwrap();
        let b = fingerprint_of(&42i64).unwrap();
        assert_eq!(a, b);
    }
}
