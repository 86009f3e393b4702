use std::hash::{Hash, Hasher};

use siphasher::sip::SipHasher13;

/// Default fingerprint width in bits.
pub const DEFAULT_FINGERPRINT_BITS: u32 = 12;

/// Everything C4/C5 need to know about where a key lives: its two bucket
/// addresses, its per-slot fingerprints, and the raw 64-bit hash those
/// fingerprints were carved out of (kept around so a victim can be
/// re-derived without holding on to the key's hash state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Derived {
    pub(crate) i1: u64,
    pub(crate) i2: u64,
    pub(crate) tags: [u16; 4],
    pub(crate) tag_hash: u64,
}

/// Derives `(i1, i2, tag[4], tag_hash)` for a key.
///
/// Three independently-keyed SipHash-1-3 instances do the hashing: two
/// for the bucket indices, one for the tag material.
///
/// Unlike a textbook cuckoo filter, a key here does not have a single
/// fingerprint: `tag[s]` is the fingerprint used when the key occupies
/// slot `s`. Both `find` and `insert` must always index `tags` by the
/// slot they are examining or placing into, never assume a single
/// fingerprint value.
#[derive(Debug, Clone)]
pub(crate) struct KeyDeriver {
    index_key_1: (u64, u64),
    index_key_2: (u64, u64),
    tag_key: (u64, u64),
    fingerprint_bits: u32,
}

impl KeyDeriver {
    pub(crate) fn new(seed: u64, fingerprint_bits: u32) -> Self {
        assert!(
            fingerprint_bits >= 1 && fingerprint_bits <= 16,
            "fingerprint_bits must be in [1, 16], got {}",
            fingerprint_bits
        );
        // Four distinct derived keys from one seed, so a single `u64` seed
        // is enough to make the whole engine reproducible.
        KeyDeriver {
            index_key_1: (seed ^ 0x9E37_79B9_7F4A_7C15, seed.rotate_left(17)),
            index_key_2: (seed ^ 0xC2B2_AE3D_27D4_EB4F, seed.rotate_left(31)),
            tag_key: (seed ^ 0x1656_67B1_9E37_79F9, seed.rotate_left(47)),
            fingerprint_bits,
        }
    }

    fn hash_with<K: Hash>(key: &K, keys: (u64, u64)) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(keys.0, keys.1);
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Carves `tag_hash` into four per-slot tags, forcing any zero result
    /// to `1` so the zero tag stays reserved for "empty slot".
    fn tags_from_hash(&self, tag_hash: u64) -> [u16; 4] {
        let mask = (1u64 << self.fingerprint_bits) - 1;
        let mut tags = [0u16; 4];
        for (slot, tag) in tags.iter_mut().enumerate() {
            let raw = (tag_hash >> (slot as u32 * self.fingerprint_bits)) & mask;
            *tag = if raw == 0 { 1 } else { raw as u16 };
        }
        tags
    }

    pub(crate) fn derive<K: Hash>(&self, key: &K, num_buckets: u64) -> Derived {
        debug_assert!(num_buckets.is_power_of_two());
        let mask = num_buckets - 1;
        let i1 = Self::hash_with(key, self.index_key_1) & mask;
        let i2 = Self::hash_with(key, self.index_key_2) & mask;
        let tag_hash = Self::hash_with(key, self.tag_key);
        Derived {
            i1,
            i2,
            tags: self.tags_from_hash(tag_hash),
            tag_hash,
        }
    }

    /// Re-derives tags (and the two bucket addresses, for completeness)
    /// from a previously-captured `tag_hash`, used when the victim cache
    /// is re-placed after an `erase` frees up room for it.
    pub(crate) fn derive_from_tag_hash<K: Hash>(&self, key: &K, tag_hash: u64, num_buckets: u64) -> Derived {
        debug_assert!(num_buckets.is_power_of_two());
        let mask = num_buckets - 1;
        let i1 = Self::hash_with(key, self.index_key_1) & mask;
        let i2 = Self::hash_with(key, self.index_key_2) & mask;
        Derived {
            i1,
            i2,
            tags: self.tags_from_hash(tag_hash),
            tag_hash,
        }
    }
}
