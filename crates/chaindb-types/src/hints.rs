//! Tx-hash hint lists.
//!
//! A hint maps the first four bytes of a tx hash to the 6-byte block-data
//! keys of every stored tx whose hash starts with those bytes. The list
//! order on disk is preference order: the currently canonical candidate is
//! serialized first. In memory the preferred key is an explicit field so
//! the invariant cannot drift out of the ordering.

use crate::keys::KeyPrefix;
use crate::ser::{put_var_int, read_var_int, take_array, var_int_size, DbValue, DeserError};
use bytes::BufMut;

/// Length of the tx-hash prefix used as the hint key payload.
pub const TX_HINT_PREFIX_LEN: usize = 4;

/// The hint list stored for one 4-byte tx-hash prefix.
///
/// Value layout: `varint count | count × 6-byte keys`, preferred key
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredTxHints {
    /// First four bytes of the tx hash.
    pub hash_prefix: [u8; 4],
    /// Candidate block-data keys, in insertion order.
    pub db_key_list: Vec<[u8; 6]>,
    /// The currently canonical candidate. Always a member of the list.
    pub preferred_db_key: Option<[u8; 6]>,
}

impl StoredTxHints {
    /// An empty hint list for a hash prefix.
    pub const fn empty(hash_prefix: [u8; 4]) -> Self {
        Self { hash_prefix, db_key_list: Vec::new(), preferred_db_key: None }
    }

    /// The TXHINTS key for this list.
    pub fn db_key(&self) -> Vec<u8> {
        KeyPrefix::TxHints.key(&self.hash_prefix)
    }

    /// Number of candidates.
    pub fn num_hints(&self) -> usize {
        self.db_key_list.len()
    }

    /// Whether `key` is already a candidate.
    pub fn contains(&self, key: &[u8; 6]) -> bool {
        self.db_key_list.contains(key)
    }

    /// Add `key` as a candidate (if new) and make it preferred.
    ///
    /// Returns whether anything changed.
    pub fn prefer(&mut self, key: [u8; 6]) -> bool {
        let mut changed = false;
        if !self.contains(&key) {
            self.db_key_list.push(key);
            changed = true;
        }
        if self.preferred_db_key != Some(key) {
            self.preferred_db_key = Some(key);
            changed = true;
        }
        changed
    }
}

impl DbValue for StoredTxHints {
    fn encoded_size(&self) -> usize {
        var_int_size(self.db_key_list.len() as u64) + 6 * self.db_key_list.len()
    }

    fn encode_value_to<B: BufMut>(&self, buf: &mut B) {
        put_var_int(buf, self.db_key_list.len() as u64);
        if let Some(preferred) = self.preferred_db_key {
            buf.put_slice(&preferred);
        }
        for key in &self.db_key_list {
            if Some(*key) != self.preferred_db_key {
                buf.put_slice(key);
            }
        }
    }

    fn decode_value(data: &mut &[u8]) -> Result<Self, DeserError> {
        let count = read_var_int(data, "hint count")?;
        let mut list = Self::default();
        for _ in 0..count {
            list.db_key_list.push(take_array(data, "hint key")?);
        }
        list.preferred_db_key = list.db_key_list.first().copied();
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::BlkDataKey;

    fn key6(height: u32, dup: u8, idx: u16) -> [u8; 6] {
        BlkDataKey::tx(height, dup, idx).encode_bare().try_into().unwrap()
    }

    #[test]
    fn preferred_key_serializes_first() {
        let mut hints = StoredTxHints::empty([0xde, 0xad, 0xbe, 0xef]);
        let a = key6(100, 0, 1);
        let b = key6(101, 0, 2);
        assert!(hints.prefer(a));
        assert!(hints.prefer(b));
        assert_eq!(hints.db_key_list, vec![a, b]);
        assert_eq!(hints.preferred_db_key, Some(b));

        let bytes = hints.encoded();
        assert_eq!(bytes.len(), hints.encoded_size());
        assert_eq!(&bytes[1..7], &b);
        assert_eq!(&bytes[7..13], &a);

        let decoded = StoredTxHints::decode_value_exact(&bytes).unwrap();
        assert_eq!(decoded.preferred_db_key, Some(b));
        assert!(decoded.contains(&a) && decoded.contains(&b));
    }

    #[test]
    fn prefer_is_idempotent() {
        let mut hints = StoredTxHints::empty([0; 4]);
        let a = key6(5, 0, 0);
        assert!(hints.prefer(a));
        assert!(!hints.prefer(a));
        assert_eq!(hints.num_hints(), 1);
    }

    #[test]
    fn preferred_is_always_a_member() {
        let mut hints = StoredTxHints::empty([1, 2, 3, 4]);
        hints.prefer(key6(10, 0, 0));
        hints.prefer(key6(10, 1, 0));
        let decoded = StoredTxHints::decode_value_exact(&hints.encoded()).unwrap();
        let preferred = decoded.preferred_db_key.unwrap();
        assert!(decoded.contains(&preferred));
    }
}
