/// An associative map addressed by `(bucket, slot)` mirroring the
/// occupancy of the fingerprint table, holding the authoritative key and
/// value. Private to the `engine` module; only `Engine` ever touches it,
/// so the table and the side map can never be observed out of sync.
#[derive(Debug)]
pub(crate) struct SideMap<K, V> {
    entries: Vec<[Option<(K, V)>; 4]>,
}

impl<K, V> SideMap<K, V> {
    pub(crate) fn new(num_buckets: u64) -> Self {
        SideMap {
            entries: (0..num_buckets).map(|_| [None, None, None, None]).collect(),
        }
    }

    pub(crate) fn add_to_bucket_at_slot(&mut self, bucket: u64, slot: usize, key: K, val: V) {
        self.entries[bucket as usize][slot] = Some((key, val));
    }

    /// Reads the entry at `(bucket, slot)`. Calling this on a coordinate
    /// whose tag is `0` is unspecified; the engine only ever reads
    /// coordinates it has just confirmed hold a non-zero tag.
    pub(crate) fn read_from_bucket_at_slot(&self, bucket: u64, slot: usize) -> Option<&(K, V)> {
        self.entries[bucket as usize][slot].as_ref()
    }

    pub(crate) fn del_from_bucket_at_slot(&mut self, bucket: u64, slot: usize) {
        self.entries[bucket as usize][slot] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_read() {
        let mut map: SideMap<&str, u64> = SideMap::new(4);
        map.add_to_bucket_at_slot(2, 1, "k", 7);
        assert_eq!(map.read_from_bucket_at_slot(2, 1), Some(&("k", 7)));
    }

    #[test]
    fn del_clears_entry() {
        let mut map: SideMap<&str, u64> = SideMap::new(4);
        map.add_to_bucket_at_slot(0, 0, "k", 7);
        map.del_from_bucket_at_slot(0, 0);
        assert_eq!(map.read_from_bucket_at_slot(0, 0), None);
    }

    #[test]
    fn add_replaces_prior_entry_at_same_coordinate() {
        let mut map: SideMap<&str, u64> = SideMap::new(4);
        map.add_to_bucket_at_slot(0, 0, "k1", 1);
        map.add_to_bucket_at_slot(0, 0, "k2", 2);
        assert_eq!(map.read_from_bucket_at_slot(0, 0), Some(&("k2", 2)));
    }
}
