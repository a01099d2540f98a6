//! Content-addressed storage for generated code and metadata.
//!
//! Byte-identical buffers produced by different methods (trivial accessors,
//! empty tables, shared stubs) are stored once. A [`DedupeStore`] maps a
//! fingerprint to the canonical buffers with that fingerprint; lookups always
//! compare full contents, so the sampled fingerprint only affects speed.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Buffers up to this many bytes are hashed in full.
pub const FULL_HASH_THRESHOLD: usize = 16;

const SHARD_COUNT: usize = 4;

/// Shared immutable handle to an interned buffer.
///
/// Equality compares contents. Use [`Blob::ptr_eq`] to check that two handles
/// share storage.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Blob(Arc<[u8]>);

impl Blob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn ptr_eq(a: &Blob, b: &Blob) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

/// Fingerprint of a buffer.
///
/// FNV over every byte of small buffers. Larger buffers contribute bytes 6
/// and 7 plus 14 pseudo-randomly chosen positions, followed by an avalanche
/// mix.
pub fn dedupe_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x811c_9dc5;
    const PRIME: u64 = 16_777_619;
    let len = bytes.len();
    let mut hash = SEED;
    let mut mix = |b: u8| hash = hash.wrapping_mul(PRIME) ^ b as u64;
    if len <= FULL_HASH_THRESHOLD {
        for &b in bytes {
            mix(b);
        }
    } else {
        mix(bytes[6]);
        mix(bytes[7]);
        for i in 2..16usize {
            let pos = i.wrapping_mul(1_103_515_245).wrapping_add(12_345) % len;
            mix(bytes[pos]);
        }
    }
    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash.wrapping_add(hash << 5)
}

type Shard = Mutex<FxHashMap<u64, Vec<Blob>>>;

/// One content-addressed store.
pub struct DedupeStore {
    name: &'static str,
    shards: [Shard; SHARD_COUNT],
    entries: AtomicUsize,
    interned_bytes: AtomicUsize,
    requested_bytes: AtomicUsize,
}

impl fmt::Debug for DedupeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupeStore")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl DedupeStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            shards: std::array::from_fn(|_| Mutex::new(FxHashMap::default())),
            entries: AtomicUsize::new(0),
            interned_bytes: AtomicUsize::new(0),
            requested_bytes: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the canonical handle for `bytes`, inserting a copy if no
    /// identical buffer is stored yet.
    pub fn intern(&self, bytes: &[u8]) -> Blob {
        self.requested_bytes.fetch_add(bytes.len(), Ordering::Relaxed);
        let hash = dedupe_hash(bytes);
        let mut shard = self.shards[hash as usize % SHARD_COUNT].lock();
        let bucket = shard.entry(hash).or_default();
        if let Some(existing) = bucket.iter().find(|b| b.as_bytes() == bytes) {
            return existing.clone();
        }
        let blob = Blob(Arc::from(bytes));
        bucket.push(blob.clone());
        self.entries.fetch_add(1, Ordering::Relaxed);
        self.interned_bytes.fetch_add(bytes.len(), Ordering::Relaxed);
        blob
    }

    /// Number of distinct buffers stored.
    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes actually stored.
    pub fn interned_bytes(&self) -> usize {
        self.interned_bytes.load(Ordering::Relaxed)
    }

    /// Bytes passed to [`DedupeStore::intern`], duplicates included.
    pub fn requested_bytes(&self) -> usize {
        self.requested_bytes.load(Ordering::Relaxed)
    }
}

/// The four stores of a run. Kinds are kept apart so a GC map is never
/// conflated with code that happens to share its bytes.
#[derive(Debug)]
pub struct DedupeStores {
    pub code: DedupeStore,
    pub mapping_table: DedupeStore,
    pub vmap_table: DedupeStore,
    pub gc_map: DedupeStore,
}

impl Default for DedupeStores {
    fn default() -> Self {
        Self {
            code: DedupeStore::new("code"),
            mapping_table: DedupeStore::new("mapping table"),
            vmap_table: DedupeStore::new("vmap table"),
            gc_map: DedupeStore::new("gc map"),
        }
    }
}

impl DedupeStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DedupeStore> {
        [&self.code, &self.mapping_table, &self.vmap_table, &self.gc_map].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content_shares_storage() {
        let store = DedupeStore::new("code");
        let a = store.intern(&[1, 2, 3]);
        let b = store.intern(&[1, 2, 3]);
        let c = store.intern(&[1, 2, 4]);
        assert!(Blob::ptr_eq(&a, &b));
        assert!(!Blob::ptr_eq(&a, &c));
        assert_eq!(store.len(), 2);
        assert_eq!(store.requested_bytes(), 9);
        assert_eq!(store.interned_bytes(), 6);
    }

    #[test]
    fn test_sampled_hash_collision_keeps_contents_apart() {
        // Same bytes at every sampled position, different elsewhere.
        let len = 64;
        let sampled: Vec<usize> = [6, 7]
            .into_iter()
            .chain((2..16usize).map(|i| i.wrapping_mul(1_103_515_245).wrapping_add(12_345) % len))
            .collect();
        let free = (0..len).find(|p| !sampled.contains(p)).unwrap();
        let a = vec![0u8; len];
        let mut b = a.clone();
        b[free] = 0xff;
        assert_eq!(dedupe_hash(&a), dedupe_hash(&b));

        let store = DedupeStore::new("code");
        let ha = store.intern(&a);
        let hb = store.intern(&b);
        assert!(!Blob::ptr_eq(&ha, &hb));
        assert_eq!(hb.as_bytes(), &b[..]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_small_buffers_hash_every_byte() {
        assert_ne!(dedupe_hash(&[0, 0, 0, 1]), dedupe_hash(&[0, 0, 1, 0]));
        assert_eq!(dedupe_hash(&[]), dedupe_hash(&[]));
    }

    #[test]
    fn test_concurrent_interning_converges() {
        let store = DedupeStore::new("code");
        let payload: Vec<u8> = (0..200u8).collect();
        let handles: Vec<Blob> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..16).map(|_| s.spawn(|| store.intern(&payload))).collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert_eq!(store.len(), 1);
        for h in &handles {
            assert!(Blob::ptr_eq(&handles[0], h));
        }
    }

    #[test]
    fn test_stores_are_independent() {
        let stores = DedupeStores::new();
        let code = stores.code.intern(&[9, 9]);
        let gc = stores.gc_map.intern(&[9, 9]);
        assert!(!Blob::ptr_eq(&code, &gc));
        assert_eq!(stores.iter().map(DedupeStore::len).sum::<usize>(), 2);
    }
}
