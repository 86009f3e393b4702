use rand::Rng;

/// Outcome of `FingerprintTable::insert_tag_to_bucket`. `Evicted` still
/// carries the slot even though nothing was placed there, since the
/// caller needs to read the displaced key out of the side map before it
/// overwrites that coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// An empty slot was found and filled; no side-map coordinate is
    /// overwritten.
    Placed(usize),
    /// No empty slot; this slot's tag was overwritten and its former
    /// occupant must be read out of the side map and relocated.
    Evicted(usize),
    /// No empty slot, and eviction was not requested on this attempt.
    Full,
}

/// Bit-packed (here, `u16`-packed) 2D array of `num_buckets` buckets by 4
/// slots, holding only fingerprint bits, never a full key.
///
/// `0` is the reserved "empty slot" sentinel; derivation (`KeyDeriver`)
/// guarantees it is never handed out as a real tag.
#[derive(Debug)]
pub(crate) struct FingerprintTable {
    data: Vec<u16>,
    num_buckets: u64,
}

const SLOTS_PER_BUCKET: u64 = 4;

impl FingerprintTable {
    pub(crate) fn new(num_buckets: u64) -> Self {
        assert!(num_buckets.is_power_of_two() && num_buckets > 0);
        FingerprintTable {
            data: vec![0; (num_buckets * SLOTS_PER_BUCKET) as usize],
            num_buckets,
        }
    }

    pub(crate) fn num_buckets(&self) -> u64 {
        self.num_buckets
    }

    pub(crate) fn size_in_tags(&self) -> u64 {
        self.num_buckets * SLOTS_PER_BUCKET
    }

    pub(crate) fn size_in_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<u16>()
    }

    #[inline]
    fn slot_index(&self, bucket: u64, slot: usize) -> usize {
        debug_assert!(bucket < self.num_buckets, "{} < {}", bucket, self.num_buckets);
        debug_assert!(slot < SLOTS_PER_BUCKET as usize);
        (bucket * SLOTS_PER_BUCKET) as usize + slot
    }

    pub(crate) fn read_tag(&self, bucket: u64, slot: usize) -> u16 {
        self.data[self.slot_index(bucket, slot)]
    }

    pub(crate) fn write_tag(&mut self, bucket: u64, slot: usize, tag: u16) {
        let idx = self.slot_index(bucket, slot);
        self.data[idx] = tag;
    }

    /// Scans the four slots of `bucket` for an empty one; if none is
    /// empty and `kickout` is set, evicts a slot chosen uniformly at
    /// random.
    pub(crate) fn insert_tag_to_bucket(
        &mut self,
        bucket: u64,
        tags: &[u16; 4],
        kickout: bool,
        rng: &mut impl Rng,
    ) -> Placement {
        for slot in 0..SLOTS_PER_BUCKET as usize {
            if self.read_tag(bucket, slot) == 0 {
                self.write_tag(bucket, slot, tags[slot]);
                return Placement::Placed(slot);
            }
        }
        if !kickout {
            return Placement::Full;
        }
        let slot = rng.gen_range(0..SLOTS_PER_BUCKET as usize);
        self.write_tag(bucket, slot, tags[slot]);
        Placement::Evicted(slot)
    }
}
