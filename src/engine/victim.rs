/// The single key/value pair that did not fit in the table after
/// `kMaxCuckooCount` relocations were exhausted.
///
/// Modeled as a sum type rather than a boolean-plus-garbage-fields record:
/// `Engine::victim` is `Option<Victim<K, V>>`, so "no victim" is simply
/// `None` instead of a `used: false` flag sitting next to stale data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Victim<K, V> {
    pub(crate) index: u64,
    pub(crate) tag_hash: u64,
    pub(crate) key: K,
    pub(crate) val: V,
}
