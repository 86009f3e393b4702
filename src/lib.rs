//! A tagged cuckoo associative store: the compactness and speed of a
//! cuckoo filter for negative lookups, extended into an exact key/value
//! map by pairing every occupancy slot in the cuckoo-hashed fingerprint
//! table with a parallel slot in a side map holding the full key and its
//! value.
//!
//! See [`Engine`] for the full API.

mod engine;

pub use engine::Engine;
