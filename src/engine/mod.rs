mod derive;
mod side_map;
mod table;
mod victim;

use std::hash::Hash;

use rand::SeedableRng;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use derive::{KeyDeriver, DEFAULT_FINGERPRINT_BITS};
use side_map::SideMap;
use table::{FingerprintTable, Placement};
use victim::Victim;

/// Cuckoo relocations attempted before an insert gives up on the table
/// and falls back to the victim cache.
const K_MAX_CUCKOO_COUNT: usize = 500;

/// Slots per bucket; fixed by the table layout, not a tunable.
const SLOTS_PER_BUCKET: u64 = 4;

/// The default seed used when a caller doesn't need deterministic C5/C4
/// randomness. Tests that need reproducible eviction/remediation
/// sequences should use [`Engine::with_seed`] instead.
const DEFAULT_SEED: u64 = 0x5EED_C0FF_EE15_C0DE;

/// A tagged cuckoo associative store: a cuckoo-hashed fingerprint table
/// coupled one-to-one with a side map, so lookups that would be mere
/// approximate membership in a plain cuckoo filter instead return an
/// authoritative value. A fingerprint match that turns out not to belong
/// to the queried key triggers an intra-bucket remediation shuffle
/// instead of silently remaining a recurring false positive.
///
/// `Engine` is the sole owner of both the fingerprint table and the side
/// map; there is no way to observe one without the other, and no way for
/// the two to desync from outside this type.
pub struct Engine<K, V> {
    table: FingerprintTable,
    side_map: SideMap<K, V>,
    deriver: KeyDeriver,
    victim: Option<Victim<K, V>>,
    num_items: u64,
    rng: Xoshiro256PlusPlus,
}

impl<K, V> Engine<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Builds an engine sized for `capacity_hint` logical entries, using
    /// the default fingerprint width (12 bits).
    ///
    /// `N` (the bucket count) is the least power of two with
    /// `4 * N >= capacity_hint`, doubled once more if that would leave
    /// the load factor above 0.96. A hint of `0` or `1` still produces a
    /// valid engine with `N = 1`.
    pub fn new(capacity_hint: u64) -> Self {
        Self::with_fingerprint_bits(capacity_hint, DEFAULT_FINGERPRINT_BITS)
    }

    /// Like [`Engine::new`], but with an explicit fingerprint width in
    /// bits (`1..=16`).
    pub fn with_fingerprint_bits(capacity_hint: u64, fingerprint_bits: u32) -> Self {
        Self::with_seed(capacity_hint, fingerprint_bits, DEFAULT_SEED)
    }

    /// Like [`Engine::with_fingerprint_bits`], but with an explicit PRNG
    /// seed driving both eviction-slot selection (C4) and remediation
    /// sibling selection (C5). Tests that need a reproducible sequence of
    /// kicks/remediations should use this constructor.
    pub fn with_seed(capacity_hint: u64, fingerprint_bits: u32, seed: u64) -> Self {
        let num_buckets = Self::compute_num_buckets(capacity_hint);
        Engine {
            table: FingerprintTable::new(num_buckets),
            side_map: SideMap::new(num_buckets),
            deriver: KeyDeriver::new(seed, fingerprint_bits),
            victim: None,
            num_items: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    fn compute_num_buckets(capacity_hint: u64) -> u64 {
        let capacity_effective = capacity_hint.max(1);
        let mut num_buckets = ((capacity_effective + SLOTS_PER_BUCKET - 1) / SLOTS_PER_BUCKET)
            .next_power_of_two()
            .max(1);
        if capacity_effective as f64 > 0.96 * (num_buckets * SLOTS_PER_BUCKET) as f64 {
            num_buckets *= 2;
        }
        num_buckets
    }

    /// The two bucket addresses a key could occupy, deduplicated. When
    /// `N == 1` both derived indices collapse to the same bucket, and
    /// scanning it twice would double-count fingerprint matches and run
    /// remediation on the same coordinate twice in one call.
    fn candidate_buckets(i1: u64, i2: u64) -> [Option<u64>; 2] {
        if i1 == i2 {
            [Some(i1), None]
        } else {
            [Some(i1), Some(i2)]
        }
    }

    /// `insert(key, val)`: false iff the victim slot was already occupied
    /// on entry (the structure is effectively full).
    pub fn insert(&mut self, key: K, val: V) -> bool {
        if self.victim.is_some() {
            return false;
        }
        let derived = self.deriver.derive(&key, self.table.num_buckets());
        let accepted = self.insert_impl(key, val, derived.i1, derived.tags, derived.tag_hash);
        if accepted {
            self.num_items += 1;
        }
        accepted
    }

    /// The cuckoo relocation loop (C4). Always returns `true`: either the
    /// key lands in an empty slot within `K_MAX_CUCKOO_COUNT` relocations,
    /// or it is kept in the victim cache. Either way it is logically
    /// present in the structure, which is what the `bool` reports.
    ///
    /// Callers are responsible for `num_items` bookkeeping: a top-level
    /// `insert` increments once per accepted call regardless of where the
    /// chain of relocations ends up, and a victim re-placement after
    /// `erase` does not touch `num_items` at all, since it only moves an
    /// already-counted item from the victim cache into the table.
    fn insert_impl(
        &mut self,
        mut cur_key: K,
        mut cur_val: V,
        mut cur_index: u64,
        mut cur_tags: [u16; 4],
        mut cur_tag_hash: u64,
    ) -> bool {
        for n in 0..K_MAX_CUCKOO_COUNT {
            let kickout = n > 0;
            match self
                .table
                .insert_tag_to_bucket(cur_index, &cur_tags, kickout, &mut self.rng)
            {
                Placement::Placed(slot) => {
                    self.side_map
                        .add_to_bucket_at_slot(cur_index, slot, cur_key, cur_val);
                    return true;
                }
                Placement::Evicted(slot) => {
                    // Ordering requirement: the tag at (cur_index, slot)
                    // has already been overwritten by insert_tag_to_bucket
                    // above; the old side-map entry must be read before
                    // the side map itself is overwritten below.
                    let (old_key, old_val) = self
                        .side_map
                        .read_from_bucket_at_slot(cur_index, slot)
                        .cloned()
                        .expect("tag overwritten at a slot with no side-map entry: C1/C2 desync");
                    self.side_map
                        .add_to_bucket_at_slot(cur_index, slot, cur_key, cur_val);
                    cur_key = old_key;
                    cur_val = old_val;
                    let derived = self.deriver.derive(&cur_key, self.table.num_buckets());
                    cur_tags = derived.tags;
                    cur_tag_hash = derived.tag_hash;
                    cur_index = if cur_index == derived.i1 {
                        derived.i2
                    } else {
                        derived.i1
                    };
                }
                Placement::Full => {
                    // No empty slot and no eviction requested on this
                    // attempt; retry the same bucket next iteration with
                    // kickout = true.
                }
            }
        }
        self.victim = Some(Victim {
            index: cur_index,
            tag_hash: cur_tag_hash,
            key: cur_key,
            val: cur_val,
        });
        true
    }

    /// Shared scan for `find`/`contains`: walks both candidate buckets,
    /// recording a hit when a fingerprint match's side-map key equals the
    /// query, and a false-positive site otherwise, then runs remediation
    /// (C5) on every recorded site before returning. Search never
    /// short-circuits: every fingerprint match in both buckets must be
    /// examined so C5 can run on every false-positive site this query
    /// uncovers, not just the first one.
    fn scan(&mut self, key: &K) -> Option<V> {
        let derived = self.deriver.derive(key, self.table.num_buckets());

        if let Some(victim) = &self.victim {
            if &victim.key == key && (victim.index == derived.i1 || victim.index == derived.i2) {
                return Some(victim.val.clone());
            }
        }

        let mut hit = None;
        let mut false_positive_sites = Vec::new();
        for bucket in Self::candidate_buckets(derived.i1, derived.i2).into_iter().flatten() {
            for slot in 0..SLOTS_PER_BUCKET as usize {
                if self.table.read_tag(bucket, slot) != derived.tags[slot] {
                    continue;
                }
                match self.side_map.read_from_bucket_at_slot(bucket, slot) {
                    Some((stored_key, stored_val)) if stored_key == key => {
                        hit = Some(stored_val.clone());
                    }
                    _ => false_positive_sites.push((bucket, slot)),
                }
            }
        }
        for (bucket, slot) in false_positive_sites {
            self.remediate(bucket, slot);
        }
        hit
    }

    /// Looks `key` up and, on a hit, returns its stored value. Runs C5
    /// remediation on every false-positive site the scan turns up before
    /// returning, whether or not `key` itself was found.
    pub fn find(&mut self, key: &K) -> Option<V> {
        self.scan(key)
    }

    /// `contains(key) -> bool`; behaves exactly like `find` (including
    /// running C5 remediation on discovered false-positive sites) but
    /// discards the value.
    pub fn contains(&mut self, key: &K) -> bool {
        self.scan(key).is_some()
    }

    /// `findinfilter(key) -> bool`: the pure cuckoo-filter membership
    /// check. Shares the victim fast-path with `find`/`contains` (a
    /// direct key comparison against the one key the victim cache
    /// holds), but once past that, returns true at the first fingerprint
    /// match in either bucket without ever touching the side map. No key
    /// comparison against *stored* entries, and no mutation. This is the
    /// one operation safe to call concurrently with itself, and the one
    /// that may return false positives.
    pub fn findinfilter(&self, key: &K) -> bool {
        let derived = self.deriver.derive(key, self.table.num_buckets());
        if let Some(victim) = &self.victim {
            if victim.key == *key && (victim.index == derived.i1 || victim.index == derived.i2) {
                return true;
            }
        }
        for bucket in Self::candidate_buckets(derived.i1, derived.i2).into_iter().flatten() {
            for slot in 0..SLOTS_PER_BUCKET as usize {
                if self.table.read_tag(bucket, slot) == derived.tags[slot] {
                    return true;
                }
            }
        }
        false
    }

    /// `erase(key) -> bool`. On success, also attempts to re-place the
    /// victim (if one is occupied) now that the erase may have freed a
    /// table slot; this re-placement never changes `size()` since it
    /// only relocates an item already counted via the victim cache.
    pub fn erase(&mut self, key: &K) -> bool {
        let derived = self.deriver.derive(key, self.table.num_buckets());

        if let Some(victim) = &self.victim {
            if &victim.key == key && (victim.index == derived.i1 || victim.index == derived.i2) {
                self.victim = None;
                self.num_items -= 1;
                return true;
            }
        }

        let mut found = false;
        let mut false_positive_sites = Vec::new();
        for bucket in Self::candidate_buckets(derived.i1, derived.i2).into_iter().flatten() {
            for slot in 0..SLOTS_PER_BUCKET as usize {
                if self.table.read_tag(bucket, slot) != derived.tags[slot] {
                    continue;
                }
                let matches = self
                    .side_map
                    .read_from_bucket_at_slot(bucket, slot)
                    .map(|(stored_key, _)| stored_key == key)
                    .unwrap_or(false);
                if matches {
                    self.table.write_tag(bucket, slot, 0);
                    self.side_map.del_from_bucket_at_slot(bucket, slot);
                    found = true;
                } else {
                    false_positive_sites.push((bucket, slot));
                }
            }
        }
        for (bucket, slot) in false_positive_sites {
            self.remediate(bucket, slot);
        }

        if !found {
            return false;
        }
        self.num_items -= 1;

        if let Some(victim) = self.victim.take() {
            let derived = self
                .deriver
                .derive_from_tag_hash(&victim.key, victim.tag_hash, self.table.num_buckets());
            self.insert_impl(victim.key, victim.val, victim.index, derived.tags, victim.tag_hash);
        }
        true
    }

    /// False-positive remediation (C5): `(bucket, slot)` is known to hold
    /// a fingerprint that matched a queried key but a different stored
    /// key. Moves the occupant of `slot` to a sibling slot chosen
    /// uniformly from the other three, changing its fingerprint (which
    /// depends on the slot it occupies) and reducing the chance the same
    /// aliasing recurs at `(bucket, slot)`.
    fn remediate(&mut self, bucket: u64, slot: usize) {
        let siblings: [usize; 3] = {
            let mut out = [0usize; 3];
            let mut i = 0;
            for candidate in 0..SLOTS_PER_BUCKET as usize {
                if candidate != slot {
                    out[i] = candidate;
                    i += 1;
                }
            }
            out
        };
        let new_slot = siblings[self.rng.gen_range(0..siblings.len())];

        let empty_new_slot = self.table.read_tag(bucket, new_slot) == 0;

        let (key_a, val_a) = self
            .side_map
            .read_from_bucket_at_slot(bucket, slot)
            .cloned()
            .expect("false-positive site must have a side-map entry");
        let sibling_occupant = if empty_new_slot {
            None
        } else {
            self.side_map.read_from_bucket_at_slot(bucket, new_slot).cloned()
        };

        let num_buckets = self.table.num_buckets();
        let tags_a = self.deriver.derive(&key_a, num_buckets).tags;
        let tag_b_at_slot =
            sibling_occupant.as_ref().map(|(key_b, _)| self.deriver.derive(key_b, num_buckets).tags[slot]);

        self.table
            .write_tag(bucket, slot, if empty_new_slot { 0 } else { tag_b_at_slot.unwrap() });
        self.table.write_tag(bucket, new_slot, tags_a[new_slot]);

        match sibling_occupant {
            None => self.side_map.del_from_bucket_at_slot(bucket, slot),
            Some((key_b, val_b)) => self.side_map.add_to_bucket_at_slot(bucket, slot, key_b, val_b),
        }
        self.side_map.add_to_bucket_at_slot(bucket, new_slot, key_a, val_a);
    }

    /// Current item count: non-zero table tags plus one if the victim
    /// cache is occupied. Incremented on a successful `insert` and
    /// decremented on a successful `erase`, so it always reflects the
    /// live count rather than an insert high-water mark.
    pub fn size(&self) -> usize {
        self.num_items as usize
    }

    /// Forwards the fingerprint table's packed size in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.table.size_in_bytes()
    }

    /// A human-readable, single-line summary: load factor and bits/key,
    /// in the same tagged-diagnostic-line shape this corpus's benchmark
    /// tooling prints, just returned instead of printed (the engine
    /// itself performs no I/O).
    pub fn info(&self) -> String {
        let capacity = self.table.size_in_tags();
        let load_factor = self.num_items as f64 / capacity as f64;
        let bits_per_key = if self.num_items == 0 {
            0.0
        } else {
            (self.table.size_in_bytes() * 8) as f64 / self.num_items as f64
        };
        format!(
            "tp;engine: buckets={} capacity={} items={} load_factor={:.4} bits_per_key={:.2} victim={}",
            self.table.num_buckets(),
            capacity,
            self.num_items,
            load_factor,
            bits_per_key,
            self.victim.is_some(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn capacity_hint_zero_and_one_still_construct() {
        let e0: Engine<u64, u64> = Engine::new(0);
        assert_eq!(e0.table.num_buckets(), 1);
        let e1: Engine<u64, u64> = Engine::new(1);
        assert_eq!(e1.table.num_buckets(), 1);
    }

    #[test]
    fn insert_then_find_then_erase_round_trips() {
        let mut engine: Engine<u64, u64> = Engine::new(1024);
        assert!(engine.insert(1, 100));
        assert_eq!(engine.find(&1), Some(100));
        assert_eq!(engine.find(&2), None);
        assert!(engine.erase(&1));
        assert_eq!(engine.find(&1), None);
    }

    #[test]
    fn two_keys_remain_findable_under_interleaved_lookups() {
        let mut engine: Engine<u64, u64> = Engine::new(1024);
        assert!(engine.insert(7, 70));
        assert!(engine.insert(42, 42));
        assert_eq!(engine.find(&42), Some(42));
        assert_eq!(engine.find(&7), Some(70));
        assert_eq!(engine.find(&7), Some(70));
        assert_eq!(engine.find(&42), Some(42));
    }

    #[test]
    fn idempotent_erase() {
        let mut engine: Engine<u64, u64> = Engine::new(256);
        engine.insert(9, 1);
        assert!(engine.erase(&9));
        assert!(!engine.erase(&9));
    }

    #[test]
    fn reinsert_after_erase_returns_new_value() {
        let mut engine: Engine<u64, u64> = Engine::new(256);
        engine.insert(9, 1);
        engine.erase(&9);
        engine.insert(9, 2);
        assert_eq!(engine.find(&9), Some(2));
    }

    #[test]
    fn findinfilter_is_superset_of_find() {
        let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 14, 12, 7);
        for k in 0..2000u64 {
            engine.insert(k, k * 10);
        }
        for k in 0..2000u64 {
            if engine.find(&k).is_some() {
                assert!(engine.findinfilter(&k));
            }
        }
    }

    #[test]
    fn findinfilter_does_not_mutate_size() {
        let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 12, 12, 3);
        for k in 0..500u64 {
            engine.insert(k, k);
        }
        let before = engine.size();
        for k in 500..10_000u64 {
            let _ = engine.findinfilter(&k);
        }
        assert_eq!(engine.size(), before);
    }

    #[test]
    fn large_stream_round_trips_and_keeps_low_false_positive_rate() {
        const N: u64 = 100_000;
        let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 17, 12, 99);
        for k in 0..N {
            assert!(engine.insert(k, k));
        }
        for k in 0..N {
            assert_eq!(engine.find(&k), Some(k), "missing inserted key {}", k);
        }
        let mut false_positives = 0u64;
        for k in N..(N + N) {
            if engine.find(&k).is_some() {
                false_positives += 1;
            }
        }
        let fp_rate = false_positives as f64 / N as f64;
        assert!(fp_rate < 0.01, "false positive rate too high: {}", fp_rate);
    }

    #[test]
    fn remediation_survives_many_unrelated_lookups() {
        let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 12, 12, 55);
        engine.insert(4242, 1);
        assert_eq!(engine.find(&4242), Some(1));
        for k in 1_000_000..1_001_000u64 {
            let _ = engine.find(&k);
        }
        assert_eq!(engine.find(&4242), Some(1));
    }

    #[test]
    fn fills_until_victim_then_rejects_further_inserts() {
        // A tiny table with a deliberately adversarial fingerprint width
        // makes it easy to force the victim cache to fill within a
        // bounded number of inserts.
        let mut engine: Engine<u64, u64> = Engine::with_seed(4, 2, 11);
        let mut last_accepted = 0u64;
        let mut filled = false;
        for k in 0..100_000u64 {
            if engine.insert(k, k) {
                last_accepted = k;
            } else {
                filled = true;
                break;
            }
        }
        assert!(filled, "expected the tiny table to exhaust its victim cache");
        assert!(!engine.insert(last_accepted + 1, 0));
    }

    #[test]
    fn info_reports_load_factor_and_items() {
        let mut engine: Engine<u64, u64> = Engine::new(64);
        engine.insert(1, 1);
        let info = engine.info();
        assert!(info.contains("items=1"));
        assert!(info.contains("buckets="));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn insert_then_find_returns_same_value(key in 0u64..1_000_000, val in 0u64..1_000_000, seed in 0u64..1000) {
            let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 12, 12, seed);
            prop_assume!(engine.insert(key, val));
            prop_assert_eq!(engine.find(&key), Some(val));
        }

        #[test]
        fn erase_then_find_is_always_none_unless_reinserted(key in 0u64..1_000_000, val in 0u64..1_000_000, seed in 0u64..1000) {
            let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 12, 12, seed);
            engine.insert(key, val);
            engine.erase(&key);
            prop_assert_eq!(engine.find(&key), None);
        }

        #[test]
        fn findinfilter_never_false_negative_for_live_keys(keys in prop::collection::vec(0u64..500_000, 1..200), seed in 0u64..1000) {
            let mut engine: Engine<u64, u64> = Engine::with_seed(1 << 14, 12, seed);
            for (i, key) in keys.iter().enumerate() {
                engine.insert(*key, i as u64);
            }
            for key in &keys {
                if engine.find(key).is_some() {
                    prop_assert!(engine.findinfilter(key));
                }
            }
        }
    }
}
