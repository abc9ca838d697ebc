//! The cache's "value" column codec: a small versioned binary format for a
//! fully-resolved [`HashedValue`] tree (no embedded `Future` leaves — by the
//! time a task's result is persisted, the scheduler has already substituted
//! every side-task future it contained). Distinct from `cairn_hash`'s
//! canonical/shape codec, which intentionally leaves future leaves in place.

use std::collections::BTreeMap;

use cairn_hash::HashedValue;

use crate::error::{Error, Result};

const VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_SEQ: u8 = 6;
const TAG_MAP: u8 = 7;

/// Encodes a fully-resolved value for storage in the cache's `value` column.
pub fn encode(value: &HashedValue) -> Result<Vec<u8>> {
    let mut buf = vec![VERSION];
    write(&mut buf, value)?;
    Ok(buf)
}

/// Decodes bytes previously produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<HashedValue> {
    let (&version, rest) = bytes
        .split_first()
        .ok_or_else(|| Error::CorruptValue("empty value".to_string()))?;
    if version != VERSION {
        return Err(Error::CorruptValue(format!("unsupported codec version {version}")));
    }
    let mut cursor = Cursor { bytes: rest, pos: 0 };
    let value = cursor.read_value()?;
    if cursor.pos != cursor.bytes.len() {
        return Err(Error::CorruptValue("trailing bytes after value".to_string()));
    }
    Ok(value)
}

fn write(buf: &mut Vec<u8>, value: &HashedValue) -> Result<()> {
    match value {
        HashedValue::Null => buf.push(TAG_NULL),
        HashedValue::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(*b as u8);
        }
        HashedValue::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        HashedValue::Float(f) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        HashedValue::Str(s) => {
            buf.push(TAG_STR);
            write_bytes(buf, s.as_bytes());
        }
        HashedValue::Bytes(b) => {
            buf.push(TAG_BYTES);
            write_bytes(buf, b);
        }
        HashedValue::Seq(items) => {
            buf.push(TAG_SEQ);
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                write(buf, item)?;
            }
        }
        HashedValue::Map(entries) => {
            buf.push(TAG_MAP);
            buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for (k, v) in entries {
                write_bytes(buf, k.as_bytes());
                write(buf, v)?;
            }
        }
        HashedValue::Future(hash) => {
            return Err(Error::UnresolvedFuture(hash.to_hex()));
        }
    }
    Ok(())
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        let end = end.ok_or_else(|| Error::CorruptValue("truncated value".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("took exactly 4 bytes")))
    }

    fn read_len_prefixed(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_value(&mut self) -> Result<HashedValue> {
        let tag = self.read_u8()?;
        Ok(match tag {
            TAG_NULL => HashedValue::Null,
            TAG_BOOL => HashedValue::Bool(self.read_u8()? != 0),
            TAG_INT => {
                let bytes = self.take(8)?;
                HashedValue::Int(i64::from_le_bytes(bytes.try_into().expect("took 8 bytes")))
            }
            TAG_FLOAT => {
                let bytes = self.take(8)?;
                HashedValue::Float(f64::from_le_bytes(bytes.try_into().expect("took 8 bytes")))
            }
            TAG_STR => {
                let bytes = self.read_len_prefixed()?;
                HashedValue::Str(
                    String::from_utf8(bytes)
                        .map_err(|e| Error::CorruptValue(format!("invalid utf-8 string: {e}")))?,
                )
            }
            TAG_BYTES => HashedValue::Bytes(self.read_len_prefixed()?),
            TAG_SEQ => {
                let len = self.read_u32()? as usize;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                HashedValue::Seq(items)
            }
            TAG_MAP => {
                let len = self.read_u32()? as usize;
                let mut entries = BTreeMap::new();
                for _ in 0..len {
                    let key = self.read_len_prefixed()?;
                    let key = String::from_utf8(key)
                        .map_err(|e| Error::CorruptValue(format!("invalid utf-8 key: {e}")))?;
                    entries.insert(key, self.read_value()?);
                }
                HashedValue::Map(entries)
            }
            other => return Err(Error::CorruptValue(format!("unknown value tag {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_data() {
        let mut entries = BTreeMap::new();
        entries.insert("n".to_string(), HashedValue::Int(5));
        entries.insert("s".to_string(), HashedValue::Str("hi".into()));
        let value = HashedValue::Seq(vec![HashedValue::Bool(true), HashedValue::Map(entries)]);

        let encoded = encode(&value).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn rejects_unresolved_future() {
        let value = HashedValue::Future(cairn_hash::Hash::of_bytes(b"x"));
        assert!(matches!(encode(&value), Err(Error::UnresolvedFuture(_))));
    }
}
