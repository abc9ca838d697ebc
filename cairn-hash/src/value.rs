use std::collections::BTreeMap;

use crate::Hash;

/// A tagged sum covering every value the engine treats as data: the four
/// scalar kinds, ordered sequences, string-keyed maps, and an embedded
/// reference to a not-yet-resolved future (represented by its fingerprint,
/// never its value).
///
/// `HashedValue` is the engine's closed vocabulary. User types don't add
/// variants to it; they implement [`Canonical`] to describe how they flatten
/// into one.
#[derive(Debug, Clone, PartialEq)]
pub enum HashedValue {
    /// The absence of a value.
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// A signed integer scalar.
    Int(i64),
    /// An IEEE-754 floating point scalar.
    Float(f64),
    /// A UTF-8 string scalar.
    Str(String),
    /// An opaque byte string.
    Bytes(Vec<u8>),
    /// An ordered sequence of values.
    Seq(Vec<HashedValue>),
    /// An unordered, string-keyed map of values.
    Map(BTreeMap<String, HashedValue>),
    /// A reference to a future's eventual result, identified by the
    /// future's own fingerprint. Never the future's value, even once it is
    /// known — that's what makes shape fingerprints stable before any
    /// dependency has run.
    Future(Hash),
}

impl HashedValue {
    /// Returns the futures directly embedded as leaves of this value (not
    /// recursing through `Canonical` user types, which have already been
    /// flattened by the time they reach a `HashedValue` tree).
    pub fn child_futures(&self) -> Vec<Hash> {
        let mut out = Vec::new();
        self.collect_futures(&mut out);
        out
    }

    fn collect_futures(&self, out: &mut Vec<Hash>) {
        match self {
            HashedValue::Future(h) => out.push(*h),
            HashedValue::Seq(items) => items.iter().for_each(|v| v.collect_futures(out)),
            HashedValue::Map(entries) => entries.values().for_each(|v| v.collect_futures(out)),
            _ => {}
        }
    }

    /// Returns a new value with every embedded future whose fingerprint is a
    /// key in `resolved` replaced by its resolved value. Substitution is
    /// shallow-to-deep: if the resolved replacement is itself composite, it
    /// is substituted too.
    pub fn substitute(&self, resolved: &BTreeMap<Hash, HashedValue>) -> HashedValue {
        match self {
            HashedValue::Future(h) => match resolved.get(h) {
                Some(value) => value.substitute(resolved),
                None => HashedValue::Future(*h),
            },
            HashedValue::Seq(items) => {
                HashedValue::Seq(items.iter().map(|v| v.substitute(resolved)).collect())
            }
            HashedValue::Map(entries) => HashedValue::Map(
                entries.iter().map(|(k, v)| (k.clone(), v.substitute(resolved))).collect(),
            ),
            other => other.clone(),
        }
    }
}

/// A type that knows how to flatten itself into a [`HashedValue`] tree (and
/// reconstruct itself from one), and names itself so the engine can
/// distinguish it structurally from unrelated types with the same shape.
pub trait Canonical: Sized {
    /// A stable, qualified name for this type. Used only to tag the
    /// fingerprint of values of this type so two distinct `Canonical` types
    /// that happen to flatten to the same shape don't collide.
    fn type_tag() -> &'static str;

    /// Flattens `self` into the engine's closed value vocabulary.
    fn to_hashed(&self) -> HashedValue;

    /// Reconstructs a value of this type from its flattened form. Returns
    /// `None` if `value` doesn't have the shape this type expects.
    fn from_hashed(value: HashedValue) -> Option<Self>;
}

impl Canonical for HashedValue {
    fn type_tag() -> &'static str {
        "cairn_hash::HashedValue"
    }

    fn to_hashed(&self) -> HashedValue {
        self.clone()
    }

    fn from_hashed(value: HashedValue) -> Option<Self> {
        Some(value)
    }
}

macro_rules! impl_canonical_scalar {
    ($ty:ty, $tag:literal, $variant:ident) => {
        impl Canonical for $ty {
            fn type_tag() -> &'static str {
                $tag
            }

            fn to_hashed(&self) -> HashedValue {
                HashedValue::$variant((*self).into())
            }

            fn from_hashed(value: HashedValue) -> Option<Self> {
                match value {
                    HashedValue::$variant(v) => v.try_into().ok(),
                    _ => None,
                }
            }
        }
    };
}

impl Canonical for () {
    fn type_tag() -> &'static str {
        "()"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Null
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Null => Some(()),
            _ => None,
        }
    }
}

impl Canonical for bool {
    fn type_tag() -> &'static str {
        "bool"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Bool(*self)
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl_canonical_scalar!(i64, "i64", Int);
impl_canonical_scalar!(f64, "f64", Float);

impl Canonical for i32 {
    fn type_tag() -> &'static str {
        "i32"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Int(*self as i64)
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Int(i) => i32::try_from(i).ok(),
            _ => None,
        }
    }
}

impl Canonical for u64 {
    fn type_tag() -> &'static str {
        "u64"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Int(*self as i64)
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Int(i) => u64::try_from(i).ok(),
            _ => None,
        }
    }
}

impl Canonical for String {
    fn type_tag() -> &'static str {
        "alloc::string::String"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Str(self.clone())
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Canonical for Vec<u8> {
    fn type_tag() -> &'static str {
        "alloc::vec::Vec<u8>"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Bytes(self.clone())
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl<T: Canonical> Canonical for Vec<T> {
    fn type_tag() -> &'static str {
        "alloc::vec::Vec<T>"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Seq(self.iter().map(Canonical::to_hashed).collect())
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Seq(items) => items.into_iter().map(T::from_hashed).collect(),
            _ => None,
        }
    }
}

impl<T: Canonical> Canonical for Option<T> {
    fn type_tag() -> &'static str {
        "core::option::Option<T>"
    }
    fn to_hashed(&self) -> HashedValue {
        match self {
            Some(v) => HashedValue::Seq(vec![v.to_hashed()]),
            None => HashedValue::Null,
        }
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Null => Some(None),
            HashedValue::Seq(mut items) if items.len() == 1 => {
                Some(T::from_hashed(items.remove(0)))
            }
            _ => None,
        }
    }
}

impl<T: Canonical> Canonical for BTreeMap<String, T> {
    fn type_tag() -> &'static str {
        "alloc::collections::BTreeMap<String, T>"
    }
    fn to_hashed(&self) -> HashedValue {
        HashedValue::Map(self.iter().map(|(k, v)| (k.clone(), v.to_hashed())).collect())
    }
    fn from_hashed(value: HashedValue) -> Option<Self> {
        match value {
            HashedValue::Map(entries) => {
                entries.into_iter().map(|(k, v)| T::from_hashed(v).map(|v| (k, v))).collect()
            }
            _ => None,
        }
    }
}
