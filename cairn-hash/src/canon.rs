use crate::{error::Result, value::HashedValue, Error, Hash};

// Tag bytes for each `HashedValue` variant's canonical encoding. Stable
// forever: changing one changes every fingerprint ever computed.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_SEQ: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_FUTURE: u8 = 8;
const TAG_USER: u8 = 9;

/// Recursion bound standing in for true cycle detection: a `HashedValue`
/// tree is owned data and so cannot truly be cyclic, but a `Canonical` impl
/// that recurses into itself while building one could still blow the stack.
const MAX_DEPTH: usize = 256;

/// Computes the fingerprint of a bare `HashedValue` tree (no type tag).
/// Used for values with no declared `Canonical` type of their own, such as a
/// rule's canonicalised argument composite.
pub fn fingerprint(value: &HashedValue) -> Result<Hash> {
    let mut buf = Vec::new();
    write_canonical(&mut buf, value, 0)?;
    Ok(Hash::of_bytes(&buf))
}

/// Computes the fingerprint of a value tagged with a type name, so that two
/// `Canonical` types whose `to_hashed()` output happens to have the same
/// shape don't collide.
pub fn fingerprint_tagged(type_tag: &str, value: &HashedValue) -> Result<Hash> {
    let mut buf = Vec::new();
    buf.push(TAG_USER);
    write_len_prefixed_bytes(&mut buf, type_tag.as_bytes());
    write_canonical(&mut buf, value, 0)?;
    Ok(Hash::of_bytes(&buf))
}

/// Returns the exact canonical byte encoding of `value`, for callers that
/// need the bytes themselves (e.g. to embed as a `deps` hint) rather than
/// just their hash.
pub fn canonical_bytes(value: &HashedValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_canonical(&mut buf, value, 0)?;
    Ok(buf)
}

fn write_canonical(buf: &mut Vec<u8>, value: &HashedValue, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::CycleInValue);
    }

    match value {
        HashedValue::Null => buf.push(TAG_NULL),
        HashedValue::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(*b as u8);
        }
        HashedValue::Int(i) => {
            buf.push(TAG_INT);
            write_len_prefixed_bytes(buf, i.to_string().as_bytes());
        }
        HashedValue::Float(f) => {
            buf.push(TAG_FLOAT);
            write_len_prefixed_bytes(buf, canonical_float(*f).as_bytes());
        }
        HashedValue::Str(s) => {
            buf.push(TAG_STR);
            write_len_prefixed_bytes(buf, s.as_bytes());
        }
        HashedValue::Bytes(b) => {
            buf.push(TAG_BYTES);
            write_len_prefixed_bytes(buf, b);
        }
        HashedValue::Seq(items) => {
            buf.push(TAG_SEQ);
            write_len_prefix(buf, items.len())?;
            for item in items {
                write_canonical(buf, item, depth + 1)?;
            }
        }
        HashedValue::Map(entries) => {
            buf.push(TAG_MAP);
            write_len_prefix(buf, entries.len())?;
            // Sort by the byte order of each key's own canonical form, per
            // the engine's contract, rather than trusting the caller's
            // collection to already be in that order.
            let mut keyed: Vec<(Vec<u8>, &str, &HashedValue)> = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let mut key_bytes = Vec::new();
                write_len_prefixed_bytes(&mut key_bytes, k.as_bytes());
                keyed.push((key_bytes, k.as_str(), v));
            }
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            for (key_bytes, _, v) in keyed {
                buf.extend_from_slice(&key_bytes);
                write_canonical(buf, v, depth + 1)?;
            }
        }
        HashedValue::Future(hash) => {
            buf.push(TAG_FUTURE);
            buf.extend_from_slice(hash.as_bytes());
        }
    }
    Ok(())
}

fn write_len_prefix(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    let len =
        u32::try_from(len).map_err(|_| Error::UnsupportedValue(format!("collection of length {len} exceeds the engine's length-prefix width")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_len_prefixed_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Formats a float per the engine's canonical rules: `nan`/`inf`/`-inf`
/// spelled out, `-0.0` normalised to `0.0`, everything else via Rust's
/// `Display` impl, which already produces the shortest round-tripping
/// decimal.
fn canonical_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f == 0.0 {
        "0.0".to_string()
    } else {
        format!("{f}")
    }
}
