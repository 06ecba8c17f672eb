use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use remora_common::{hash_bytes, hash_bytes_nocase, seeded_hasher, HashSeed};

/// How a dict hashes and compares its keys.
///
/// One policy value travels with each dict, so policies may carry state
/// (a collation table, an interner handle, whatever the comparison needs).
pub trait DictPolicy {
    type Key;

    fn hash(&self, seed: &HashSeed, key: &Self::Key) -> u64;

    fn key_eq(&self, a: &Self::Key, b: &Self::Key) -> bool;
}

/// Byte-string keys hashed with the keyed SipHash over their raw bytes.
pub struct BytesPolicy<K = Vec<u8>>(PhantomData<fn(K)>);

impl<K> Default for BytesPolicy<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K: AsRef<[u8]>> DictPolicy for BytesPolicy<K> {
    type Key = K;

    fn hash(&self, seed: &HashSeed, key: &K) -> u64 {
        hash_bytes(seed, key.as_ref())
    }

    fn key_eq(&self, a: &K, b: &K) -> bool {
        a.as_ref() == b.as_ref()
    }
}

/// Like [`BytesPolicy`], but ASCII-case-insensitive.
pub struct NoCasePolicy<K = Vec<u8>>(PhantomData<fn(K)>);

impl<K> Default for NoCasePolicy<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K: AsRef<[u8]>> DictPolicy for NoCasePolicy<K> {
    type Key = K;

    fn hash(&self, seed: &HashSeed, key: &K) -> u64 {
        hash_bytes_nocase(seed, key.as_ref())
    }

    fn key_eq(&self, a: &K, b: &K) -> bool {
        a.as_ref().eq_ignore_ascii_case(b.as_ref())
    }
}

/// Any `Hash + Eq` key, run through the seeded hasher.
pub struct StdPolicy<K>(PhantomData<fn(K)>);

impl<K> Default for StdPolicy<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K: Hash + Eq> DictPolicy for StdPolicy<K> {
    type Key = K;

    fn hash(&self, seed: &HashSeed, key: &K) -> u64 {
        let mut hasher = seeded_hasher(seed);
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn key_eq(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// Store-scoped state shared by a family of dicts: the hash seed and the
/// resize switch. The store flips resizing off while a child process is
/// snapshotting pages and back on afterwards; even while off, a dict
/// still grows once its load factor passes the force threshold.
pub struct DictContext {
    seed: HashSeed,
    resize_enabled: AtomicBool,
}

impl DictContext {
    pub fn new(seed: HashSeed) -> Self {
        Self {
            seed,
            resize_enabled: AtomicBool::new(true),
        }
    }

    pub fn seed(&self) -> &HashSeed {
        &self.seed
    }

    pub fn resize_enabled(&self) -> bool {
        self.resize_enabled.load(Ordering::Relaxed)
    }

    pub fn enable_resize(&self) {
        self.resize_enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable_resize(&self) {
        self.resize_enabled.store(false, Ordering::Relaxed);
    }
}

impl Default for DictContext {
    fn default() -> Self {
        Self::new(HashSeed::random(&mut rand::thread_rng()))
    }
}

/// Tagged value cell for maps whose values are not all one type: the
/// store keeps small counters unboxed next to boxed objects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar<T> {
    Obj(T),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl<T> Scalar<T> {
    pub fn as_obj(&self) -> Option<&T> {
        match self {
            Scalar::Obj(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Scalar::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }
}
