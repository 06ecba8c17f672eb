//! A chained hash map that rehashes *incrementally*.
//!
//! The map owns two bucket tables. Normally only the first is allocated;
//! when the load factor trips, a larger second table is installed and a
//! rehash cursor starts walking the old one, migrating one bucket chain
//! at a time. Migration is advanced cooperatively — every lookup, insert
//! and delete nudges it one step — so even a huge table never causes a
//! stall. Lookups consult both tables while a rehash is in flight and
//! never miss a live key.
//!
//! Keys are hashed through a per-dict [`DictPolicy`] with a seed carried
//! by the store-scoped [`DictContext`]; there are no process-wide
//! globals. Values are whatever `V` is; heterogeneous stores use the
//! [`Scalar`] cell.
//!
//! Because lookups advance the rehash, read paths take `&mut self`. The
//! read-only complement ([`Dict::peek`], [`Dict::iter`], [`Dict::scan`])
//! leaves the migration where it is.

mod iter;
mod policy;
mod scan;
mod stats;

pub use iter::{DictIter, Iter};
pub use policy::{BytesPolicy, DictContext, DictPolicy, NoCasePolicy, Scalar, StdPolicy};
pub use remora_common::{AllocError, HashSeed};
pub use stats::{DictStats, TableStats};

use std::alloc::Layout;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bucket count of the first allocation.
pub const INITIAL_SIZE: usize = 4;
/// With resizing disabled, a table still grows once `used / size` passes
/// this ratio.
const FORCE_RESIZE_RATIO: usize = 5;

/// Insertion failed; the rejected pair rides along so the caller keeps
/// ownership.
#[derive(Debug)]
pub enum InsertError<K, V> {
    /// The key is already present ([`Dict::add`] only).
    Occupied(K, V),
    /// Out of memory.
    Alloc(K, V),
}

impl<K, V> InsertError<K, V> {
    pub fn into_pair(self) -> (K, V) {
        match self {
            InsertError::Occupied(k, v) | InsertError::Alloc(k, v) => (k, v),
        }
    }
}

impl<K, V> fmt::Display for InsertError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::Occupied(..) => f.write_str("key is already present"),
            InsertError::Alloc(..) => f.write_str("allocation failed"),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> std::error::Error for InsertError<K, V> {}

pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) val: V,
    pub(crate) next: *mut Entry<K, V>,
}

pub(crate) struct Table<K, V> {
    pub(crate) buckets: Box<[*mut Entry<K, V>]>,
    pub(crate) used: usize,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            buckets: Box::default(),
            used: 0,
        }
    }
}

impl<K, V> Table<K, V> {
    pub(crate) fn size(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn mask(&self) -> u64 {
        debug_assert!(!self.buckets.is_empty());
        self.buckets.len() as u64 - 1
    }
}

fn alloc_buckets<K, V>(size: usize) -> Result<Box<[*mut Entry<K, V>]>, AllocError> {
    let mut buckets = Vec::new();
    buckets.try_reserve_exact(size)?;
    buckets.resize(size, ptr::null_mut());
    Ok(buckets.into_boxed_slice())
}

fn alloc_entry<K, V>(key: K, val: V, next: *mut Entry<K, V>) -> Result<NonNull<Entry<K, V>>, (K, V)> {
    let layout = Layout::new::<Entry<K, V>>();
    // SAFETY: the layout is never zero-sized (there is always the next
    // pointer), and the write initializes the allocation.
    unsafe {
        let raw = std::alloc::alloc(layout) as *mut Entry<K, V>;
        let Some(entry) = NonNull::new(raw) else {
            return Err((key, val));
        };
        entry.as_ptr().write(Entry { key, val, next });
        Ok(entry)
    }
}

/// Move the pair out of an unlinked entry and release its allocation.
///
/// # Safety
///
/// `entry` must be a live, already-unlinked entry; it is dead afterwards.
pub(crate) unsafe fn take_entry<K, V>(entry: NonNull<Entry<K, V>>) -> (K, V) {
    let inner = ptr::read(entry.as_ptr());
    std::alloc::dealloc(entry.as_ptr() as *mut u8, Layout::new::<Entry<K, V>>());
    (inner.key, inner.val)
}

pub struct Dict<P: DictPolicy, V> {
    pub(crate) policy: P,
    pub(crate) ctx: Arc<DictContext>,
    pub(crate) tables: [Table<P::Key, V>; 2],
    /// Next bucket of `tables[0]` to migrate; -1 while no rehash runs.
    pub(crate) rehash_idx: isize,
    /// Live safe iterators. While nonzero, rehash steps are suppressed so
    /// iteration never sees a bucket move under it.
    pub(crate) iterators: usize,
}

// Entries are reachable only through the dict that owns them.
unsafe impl<P, V> Send for Dict<P, V>
where
    P: DictPolicy + Send,
    P::Key: Send,
    V: Send,
{
}
unsafe impl<P, V> Sync for Dict<P, V>
where
    P: DictPolicy + Sync,
    P::Key: Sync,
    V: Sync,
{
}

impl<P: DictPolicy, V> Dict<P, V> {
    pub fn new(policy: P, ctx: Arc<DictContext>) -> Self {
        Self {
            policy,
            ctx,
            tables: [Table::default(), Table::default()],
            rehash_idx: -1,
            iterators: 0,
        }
    }

    pub fn context(&self) -> &Arc<DictContext> {
        &self.ctx
    }

    /// Live entries across both tables.
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated buckets across both tables.
    pub fn slots(&self) -> usize {
        self.tables[0].size() + self.tables[1].size()
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    /// The migration cursor: next bucket of the old table to move, or -1
    /// when no rehash is in flight.
    pub fn rehash_index(&self) -> isize {
        self.rehash_idx
    }

    /// The key's hash under this dict's policy and seed.
    pub fn hash_of(&self, key: &P::Key) -> u64 {
        self.policy.hash(self.ctx.seed(), key)
    }

    fn hash_key(&self, key: &P::Key) -> u64 {
        self.policy.hash(self.ctx.seed(), key)
    }

    /// Smallest power of two ≥ `size`, with the initial size as the floor.
    fn next_power(size: usize) -> usize {
        if size >= usize::MAX >> 1 {
            return (usize::MAX >> 1) + 1;
        }
        let mut i = INITIAL_SIZE;
        while i < size {
            i <<= 1;
        }
        i
    }

    /// Install a table of the next power of two ≥ `size`. The first call
    /// allocates the main table; later calls install the migration target
    /// and start the rehash. Returns whether anything happened — a call
    /// mid-rehash, or one not changing the size, is a no-op.
    pub fn expand(&mut self, size: usize) -> Result<bool, AllocError> {
        if self.is_rehashing() || self.tables[0].used > size {
            return Ok(false);
        }
        let realsize = Self::next_power(size);
        if realsize == self.tables[0].size() {
            return Ok(false);
        }
        let buckets = alloc_buckets(realsize)?;
        if self.tables[0].buckets.is_empty() {
            self.tables[0].buckets = buckets;
            return Ok(true);
        }
        tracing::trace!(buckets = realsize, "growing table, incremental rehash begins");
        self.tables[1].buckets = buckets;
        self.rehash_idx = 0;
        Ok(true)
    }

    /// Shrink the table to the smallest size holding the current entries.
    /// Refused while rehashing or while resizing is disabled.
    pub fn resize_to_fit(&mut self) -> Result<bool, AllocError> {
        if !self.ctx.resize_enabled() || self.is_rehashing() {
            return Ok(false);
        }
        let minimal = self.tables[0].used.max(INITIAL_SIZE);
        self.expand(minimal)
    }

    /// Consulted before every insert: first allocation, or growth to
    /// `2 × used` once the load factor reaches 1 (and resizing is
    /// allowed) or passes the force ratio (regardless).
    fn expand_if_needed(&mut self) -> Result<(), AllocError> {
        if self.is_rehashing() {
            return Ok(());
        }
        if self.tables[0].size() == 0 {
            self.expand(INITIAL_SIZE)?;
            return Ok(());
        }
        let used = self.tables[0].used;
        let size = self.tables[0].size();
        if used >= size && (self.ctx.resize_enabled() || used / size > FORCE_RESIZE_RATIO) {
            self.expand(used * 2)?;
        }
        Ok(())
    }

    /// Migrate up to `n` bucket chains from the old table to the new one.
    /// Returns `true` while work remains. At most `10·n` empty buckets
    /// are examined per call, so a sparse cursor region cannot stall the
    /// caller.
    pub fn rehash(&mut self, n: usize) -> bool {
        let mut empty_visits = n * 10;
        if !self.is_rehashing() {
            return false;
        }
        let mut remaining = n;
        while remaining > 0 && self.tables[0].used != 0 {
            remaining -= 1;
            assert!(
                (self.rehash_idx as usize) < self.tables[0].size(),
                "rehash cursor out of bounds"
            );
            let mut idx = self.rehash_idx as usize;
            while self.tables[0].buckets[idx].is_null() {
                idx += 1;
                self.rehash_idx = idx as isize;
                empty_visits -= 1;
                if empty_visits == 0 {
                    return true;
                }
            }
            // Move the whole chain, rehashing each entry into the new mask.
            let mut cur = self.tables[0].buckets[idx];
            while !cur.is_null() {
                // SAFETY: `cur` walks live entries of the bucket being
                // migrated; each is relinked exactly once.
                unsafe {
                    let next = (*cur).next;
                    let h = (self.hash_key(&(*cur).key) & self.tables[1].mask()) as usize;
                    (*cur).next = self.tables[1].buckets[h];
                    self.tables[1].buckets[h] = cur;
                    self.tables[0].used -= 1;
                    self.tables[1].used += 1;
                    cur = next;
                }
            }
            self.tables[0].buckets[idx] = ptr::null_mut();
            self.rehash_idx = idx as isize + 1;
        }

        if self.tables[0].used == 0 {
            self.tables[0] = mem::take(&mut self.tables[1]);
            self.rehash_idx = -1;
            tracing::trace!("incremental rehash complete");
            return false;
        }
        true
    }

    /// Run 100-bucket rehash chunks until `ms` of wall clock have passed
    /// or the rehash finishes. Returns the number of chunks consumed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rehash_for_ms(&mut self, ms: u64) -> usize {
        let budget = Duration::from_millis(ms);
        let start = Instant::now();
        let mut chunks = 0;
        while self.rehash(100) {
            chunks += 1;
            if start.elapsed() > budget {
                break;
            }
        }
        chunks
    }

    /// One cooperative migration step, suppressed while safe iterators
    /// are out.
    fn rehash_step(&mut self) {
        if self.iterators == 0 {
            self.rehash(1);
        }
    }

    /// Find the entry for `key`, consulting the second table only while a
    /// rehash is in flight.
    fn find_existing(&self, key: &P::Key, hash: u64) -> Option<NonNull<Entry<P::Key, V>>> {
        if self.len() == 0 {
            return None;
        }
        for t in 0..2 {
            if self.tables[t].size() == 0 {
                break;
            }
            let idx = (hash & self.tables[t].mask()) as usize;
            let mut cur = self.tables[t].buckets[idx];
            while !cur.is_null() {
                // SAFETY: chain entries are live.
                unsafe {
                    if self.policy.key_eq(key, &(*cur).key) {
                        return NonNull::new(cur);
                    }
                    cur = (*cur).next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Link a fresh entry at the head of its bucket. New entries go to
    /// the second table while a rehash is in flight, so the old table
    /// only ever drains.
    fn insert_new(
        &mut self,
        key: P::Key,
        value: V,
        hash: u64,
    ) -> Result<NonNull<Entry<P::Key, V>>, (P::Key, V)> {
        let t = if self.is_rehashing() { 1 } else { 0 };
        let idx = (hash & self.tables[t].mask()) as usize;
        let entry = alloc_entry(key, value, self.tables[t].buckets[idx])?;
        self.tables[t].buckets[idx] = entry.as_ptr();
        self.tables[t].used += 1;
        Ok(entry)
    }

    /// Insert a new pair; refused when the key is already present.
    pub fn add(&mut self, key: P::Key, value: V) -> Result<(), InsertError<P::Key, V>> {
        let hash = self.hash_key(&key);
        if self.is_rehashing() {
            self.rehash_step();
        }
        if self.expand_if_needed().is_err() {
            return Err(InsertError::Alloc(key, value));
        }
        if self.find_existing(&key, hash).is_some() {
            return Err(InsertError::Occupied(key, value));
        }
        self.insert_new(key, value, hash)
            .map_err(|(k, v)| InsertError::Alloc(k, v))?;
        Ok(())
    }

    /// Insert or overwrite. Returns `true` when the key was newly added.
    /// On overwrite the entry keeps its original key, and the old value
    /// is dropped only after the new one is installed.
    pub fn replace(&mut self, key: P::Key, value: V) -> Result<bool, InsertError<P::Key, V>> {
        let hash = self.hash_key(&key);
        if self.is_rehashing() {
            self.rehash_step();
        }
        if self.expand_if_needed().is_err() {
            return Err(InsertError::Alloc(key, value));
        }
        if let Some(found) = self.find_existing(&key, hash) {
            // SAFETY: `found` is a live entry; the dict is exclusively
            // borrowed.
            unsafe {
                let old = mem::replace(&mut (*found.as_ptr()).val, value);
                drop(old);
            }
            return Ok(false);
        }
        self.insert_new(key, value, hash)
            .map_err(|(k, v)| InsertError::Alloc(k, v))?;
        Ok(true)
    }

    /// The value for `key`, inserting `value` first when absent. The
    /// provided pair is dropped when the key already exists.
    pub fn add_or_get(&mut self, key: P::Key, value: V) -> Result<&mut V, AllocError> {
        let hash = self.hash_key(&key);
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed()?;
        if let Some(found) = self.find_existing(&key, hash) {
            // SAFETY: live entry, exclusive borrow.
            return Ok(unsafe { &mut (*found.as_ptr()).val });
        }
        let entry = self.insert_new(key, value, hash).map_err(|_| AllocError)?;
        // SAFETY: just created.
        Ok(unsafe { &mut (*entry.as_ptr()).val })
    }

    /// Look `key` up, advancing the rehash one step on the way.
    pub fn get(&mut self, key: &P::Key) -> Option<&V> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.hash_key(key);
        let found = self.find_existing(key, hash)?;
        // SAFETY: live entry; the shared return borrow pins the dict.
        Some(unsafe { &(*found.as_ptr()).val })
    }

    pub fn get_mut(&mut self, key: &P::Key) -> Option<&mut V> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.hash_key(key);
        let found = self.find_existing(key, hash)?;
        // SAFETY: live entry, exclusive borrow.
        Some(unsafe { &mut (*found.as_ptr()).val })
    }

    pub fn contains_key(&mut self, key: &P::Key) -> bool {
        self.get(key).is_some()
    }

    /// Read-only lookup: no rehash step, usable from scan callbacks and
    /// other shared-borrow contexts.
    pub fn peek(&self, key: &P::Key) -> Option<&V> {
        let hash = self.hash_key(key);
        let found = self.find_existing(key, hash)?;
        // SAFETY: live entry under a shared borrow.
        Some(unsafe { &(*found.as_ptr()).val })
    }

    /// Detach the entry for `key` from its chain and hand the pair to the
    /// caller, who releases it whenever convenient (dropping it is the
    /// release). Saves the second lookup of a find-then-delete sequence.
    pub fn take(&mut self, key: &P::Key) -> Option<(P::Key, V)> {
        let entry = self.unlink(key)?;
        // SAFETY: just unlinked by us.
        Some(unsafe { take_entry(entry) })
    }

    /// Remove and destroy the entry for `key`. Returns whether it existed.
    pub fn delete(&mut self, key: &P::Key) -> bool {
        match self.unlink(key) {
            Some(entry) => {
                // SAFETY: just unlinked by us.
                drop(unsafe { take_entry(entry) });
                true
            }
            None => false,
        }
    }

    fn unlink(&mut self, key: &P::Key) -> Option<NonNull<Entry<P::Key, V>>> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.hash_key(key);
        for t in 0..2 {
            if self.tables[t].size() == 0 {
                break;
            }
            let idx = (hash & self.tables[t].mask()) as usize;
            let mut prev: *mut Entry<P::Key, V> = ptr::null_mut();
            let mut cur = self.tables[t].buckets[idx];
            while !cur.is_null() {
                // SAFETY: walking live chain entries; unlinking rewrites
                // one next pointer or the bucket head.
                unsafe {
                    if self.policy.key_eq(key, &(*cur).key) {
                        if prev.is_null() {
                            self.tables[t].buckets[idx] = (*cur).next;
                        } else {
                            (*prev).next = (*cur).next;
                        }
                        self.tables[t].used -= 1;
                        return NonNull::new(cur);
                    }
                    prev = cur;
                    cur = (*cur).next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Drop every entry and both tables; the dict stays usable.
    pub fn clear(&mut self) {
        for t in 0..2 {
            let table = &mut self.tables[t];
            if table.used > 0 {
                for i in 0..table.buckets.len() {
                    let mut cur = table.buckets[i];
                    while let Some(entry) = NonNull::new(cur) {
                        // SAFETY: each chain entry is released exactly once.
                        unsafe {
                            cur = (*entry.as_ptr()).next;
                            drop(take_entry(entry));
                        }
                        table.used -= 1;
                    }
                    if table.used == 0 {
                        break;
                    }
                }
            }
            self.tables[t] = Table::default();
        }
        self.rehash_idx = -1;
        self.iterators = 0;
    }

    /// A structural checksum of the two tables (pointers, sizes, counts),
    /// taken by raw iterators at start and checked at release to catch
    /// forbidden mutation.
    pub(crate) fn fingerprint(&self) -> u64 {
        let integers = [
            self.tables[0].buckets.as_ptr() as u64,
            self.tables[0].size() as u64,
            self.tables[0].used as u64,
            self.tables[1].buckets.as_ptr() as u64,
            self.tables[1].size() as u64,
            self.tables[1].used as u64,
        ];
        // Fold with Tomas Wang's 64-bit mix so the same numbers in a
        // different order fingerprint differently.
        let mut hash: u64 = 0;
        for int in integers {
            hash = hash.wrapping_add(int);
            hash = (!hash).wrapping_add(hash << 21);
            hash ^= hash >> 24;
            hash = hash.wrapping_add(hash << 3).wrapping_add(hash << 8);
            hash ^= hash >> 14;
            hash = hash.wrapping_add(hash << 2).wrapping_add(hash << 4);
            hash ^= hash >> 28;
            hash = hash.wrapping_add(hash << 31);
        }
        hash
    }
}

impl<P: DictPolicy, V> Drop for Dict<P, V> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<P: DictPolicy, V> fmt::Debug for Dict<P, V>
where
    P::Key: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
