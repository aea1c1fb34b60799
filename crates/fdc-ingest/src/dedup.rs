//! Content-addressed deduplication of sub-records
//!
//! Structurally identical raw sub-records hash to the same [`DedupKey`] via a
//! canonicalized (recursively key-sorted) serialization and a crc32 checksum.
//! The checksum is fast and non-cryptographic: a collision merges two
//! distinct sub-records into one stored record. That is an accepted tradeoff
//! of this index, not a correctness requirement.

use fdc_common::{RawRecord, RecordId};
use std::collections::HashMap;

/// Checksum over the canonicalized serialization of a raw record.
///
/// The zero key is a sentinel: it is produced when deduplication is disabled
/// and is always treated as a miss. A genuinely computed checksum of 0
/// (one chance in 2^32) loses its dedup opportunity the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey(u32);

impl DedupKey {
    /// Sentinel key that never matches a cache entry
    pub const MISS: DedupKey = DedupKey(0);

    pub fn is_miss(self) -> bool {
        self.0 == 0
    }
}

/// Maps (type name, content hash) to the identifier of the record already
/// stored for that content. Entries live for the whole run.
pub struct DedupIndex {
    enabled: bool,
    entries: HashMap<String, HashMap<DedupKey, RecordId>>,
}

impl DedupIndex {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HashMap::new(),
        }
    }

    /// Content hash of a raw record; [`DedupKey::MISS`] when disabled
    pub fn hash(&self, raw: &RawRecord) -> DedupKey {
        if !self.enabled {
            return DedupKey::MISS;
        }
        let mut buf = Vec::with_capacity(128);
        write_canonical(raw, &mut buf);
        DedupKey(crc32fast::hash(&buf))
    }

    /// Identifier of the already-stored record with this content, if any
    pub fn lookup(&self, type_name: &str, key: DedupKey) -> Option<RecordId> {
        if key.is_miss() || !self.enabled {
            return None;
        }
        self.entries.get(type_name)?.get(&key).copied()
    }

    /// Record the identifier stored for this content. Last write wins, but a
    /// lookup always precedes the insert for the same key under single-pass
    /// processing, so an existing entry is never displaced in practice.
    pub fn insert(&mut self, type_name: &str, key: DedupKey, id: RecordId) {
        if key.is_miss() || !self.enabled {
            return;
        }
        self.entries
            .entry(type_name.to_string())
            .or_default()
            .insert(key, id);
    }
}

/// Serialize a JSON value with object keys recursively sorted, so two
/// structurally identical values produce identical bytes regardless of the
/// key order they arrived in.
fn write_canonical(value: &RawRecord, out: &mut Vec<u8>) {
    match value {
        RawRecord::Null => out.extend_from_slice(b"null"),
        RawRecord::Bool(true) => out.extend_from_slice(b"true"),
        RawRecord::Bool(false) => out.extend_from_slice(b"false"),
        RawRecord::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        RawRecord::String(s) => write_escaped(s, out),
        RawRecord::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        },
        RawRecord::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_escaped(key, out);
                out.push(b':');
                if let Some(item) = map.get(key) {
                    write_canonical(item, out);
                }
            }
            out.push(b'}');
        },
    }
}

/// JSON-escape a string into the canonical byte stream. Without escaping the
/// serialization is not injective: a quote inside a value could mimic an
/// object boundary and collide two different records.
fn write_escaped(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                const HEX: &[u8; 16] = b"0123456789abcdef";
                let code = c as usize;
                out.extend_from_slice(b"\\u00");
                out.push(HEX[code >> 4]);
                out.push(HEX[code & 0xf]);
            },
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            },
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_key_order_independent() {
        let index = DedupIndex::new(true);
        let a = json!({"name": "Protein", "unitName": "g", "rank": 600});
        let b = json!({"rank": 600, "unitName": "g", "name": "Protein"});
        assert_eq!(index.hash(&a), index.hash(&b));
    }

    #[test]
    fn test_hash_sorts_nested_objects() {
        let index = DedupIndex::new(true);
        let a = json!({"nutrient": {"name": "Protein", "rank": 600}, "amount": 1.5});
        let b = json!({"amount": 1.5, "nutrient": {"rank": 600, "name": "Protein"}});
        assert_eq!(index.hash(&a), index.hash(&b));
    }

    #[test]
    fn test_hash_distinguishes_values_and_array_order() {
        let index = DedupIndex::new(true);
        assert_ne!(
            index.hash(&json!({"amount": 1})),
            index.hash(&json!({"amount": 2}))
        );
        assert_ne!(index.hash(&json!([1, 2, 3])), index.hash(&json!([3, 2, 1])));
    }

    #[test]
    fn test_embedded_quotes_cannot_fake_structure() {
        let index = DedupIndex::new(true);
        // Unescaped, the quote-bearing value would serialize to the same
        // bytes as the two-field object.
        let smuggled = json!({"a": "x\",\"b\":\"y"});
        let plain = json!({"a": "x", "b": "y"});
        assert_ne!(index.hash(&smuggled), index.hash(&plain));
    }

    #[test]
    fn test_escapes_keep_distinct_strings_distinct() {
        let index = DedupIndex::new(true);
        assert_ne!(
            index.hash(&json!({"name": "a\\nb"})),
            index.hash(&json!({"name": "a\nb"}))
        );
        assert_ne!(
            index.hash(&json!({"name": "tab\there"})),
            index.hash(&json!({"name": "tab\u{1}here"}))
        );
        // Same content still collapses.
        assert_eq!(
            index.hash(&json!({"name": "a\"b"})),
            index.hash(&json!({"name": "a\"b"}))
        );
    }

    #[test]
    fn test_disabled_index_hashes_to_sentinel() {
        let index = DedupIndex::new(false);
        let key = index.hash(&json!({"name": "Protein"}));
        assert!(key.is_miss());
        assert!(index.lookup("Nutrient", key).is_none());
    }

    #[test]
    fn test_lookup_after_insert() {
        let mut index = DedupIndex::new(true);
        let raw = json!({"name": "Protein"});
        let key = index.hash(&raw);
        assert!(index.lookup("Nutrient", key).is_none());

        let id = RecordId::new();
        index.insert("Nutrient", key, id);
        assert_eq!(index.lookup("Nutrient", key), Some(id));

        // Same content, different type: separate namespace.
        assert!(index.lookup("FoodNutrient", key).is_none());
    }

    #[test]
    fn test_sentinel_key_is_never_stored() {
        let mut index = DedupIndex::new(true);
        index.insert("Nutrient", DedupKey::MISS, RecordId::new());
        assert!(index.lookup("Nutrient", DedupKey::MISS).is_none());
    }
}
