//! Three ways to walk a dict.
//!
//! [`Dict::iter`] borrows the dict and is what ordinary read-only code
//! wants: the borrow checker forbids mutation for the iterator's
//! lifetime, so nothing can go wrong.
//!
//! The cursor handles exist for walks that interleave with mutation.
//! [`Dict::safe_iter`] registers itself so rehash steps pause while it is
//! out; inserting and deleting between `iter_next` calls is allowed, and
//! the entry yielded last may always be deleted. [`Dict::raw_iter`] makes
//! no registration and tolerates no mutation at all — it snapshots a
//! structural fingerprint up front, and [`Dict::release_iter`] panics if
//! the structure changed underneath it. Both must be released.

use std::marker::PhantomData;
use std::ptr;

use crate::{Dict, DictPolicy, Entry, Table};

/// A detached iteration handle; see the module docs for the two flavors.
pub struct DictIter<K, V> {
    table: usize,
    index: isize,
    safe: bool,
    entry: *mut Entry<K, V>,
    next_entry: *mut Entry<K, V>,
    fingerprint: u64,
}

impl<K, V> DictIter<K, V> {
    fn new(safe: bool) -> Self {
        Self {
            table: 0,
            index: -1,
            safe,
            entry: ptr::null_mut(),
            next_entry: ptr::null_mut(),
            fingerprint: 0,
        }
    }

    fn started(&self) -> bool {
        !(self.index == -1 && self.table == 0)
    }
}

impl<P: DictPolicy, V> Dict<P, V> {
    /// A cursor that permits no mutation while it is out; misuse is
    /// caught at [`Dict::release_iter`] time via the fingerprint.
    pub fn raw_iter(&self) -> DictIter<P::Key, V> {
        DictIter::new(false)
    }

    /// A cursor that suppresses rehash steps while it is out, making
    /// insertion and deletion between advances legal.
    pub fn safe_iter(&self) -> DictIter<P::Key, V> {
        DictIter::new(true)
    }

    /// Advance `it` and yield the next entry, or `None` once the walk is
    /// done. Walks the main table, then the migration target if a rehash
    /// is in flight. The position of the following entry is cached before
    /// yielding, so deleting exactly the yielded entry is always safe.
    pub fn iter_next<'a>(&'a mut self, it: &mut DictIter<P::Key, V>) -> Option<(&'a P::Key, &'a V)> {
        loop {
            if it.entry.is_null() {
                if !it.started() {
                    // First advance: register (safe) or fingerprint (raw).
                    if it.safe {
                        self.iterators += 1;
                    } else {
                        it.fingerprint = self.fingerprint();
                    }
                }
                it.index += 1;
                if it.index >= self.tables[it.table].size() as isize {
                    if self.is_rehashing() && it.table == 0 {
                        it.table = 1;
                        it.index = 0;
                    } else {
                        return None;
                    }
                }
                let ht: &Table<P::Key, V> = &self.tables[it.table];
                it.entry = ht.buckets[it.index as usize];
            } else {
                it.entry = it.next_entry;
            }
            if !it.entry.is_null() {
                // SAFETY: the entry is live: safe iterators pin the
                // bucket layout (rehash is paused and only the yielded
                // entry may be removed), raw iterators tolerate no
                // mutation at all.
                unsafe {
                    it.next_entry = (*it.entry).next;
                    return Some((&(*it.entry).key, &(*it.entry).val));
                }
            }
        }
    }

    /// Retire an iteration handle. Safe cursors un-register; raw cursors
    /// verify the structure did not change and panic otherwise.
    pub fn release_iter(&mut self, it: DictIter<P::Key, V>) {
        if !it.started() {
            return;
        }
        if it.safe {
            self.iterators -= 1;
        } else {
            assert_eq!(
                it.fingerprint,
                self.fingerprint(),
                "dict was structurally modified during raw iteration"
            );
        }
    }

    /// Borrow-checked iteration over every entry.
    pub fn iter(&self) -> Iter<'_, P::Key, V> {
        Iter {
            tables: [&self.tables[0], &self.tables[1]],
            table: 0,
            index: 0,
            entry: ptr::null_mut(),
            _borrow: PhantomData,
        }
    }
}

/// See [`Dict::iter`].
pub struct Iter<'a, K, V> {
    tables: [&'a Table<K, V>; 2],
    table: usize,
    index: usize,
    entry: *mut Entry<K, V>,
    _borrow: PhantomData<&'a Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.entry.is_null() {
                let table = self.tables[self.table];
                if self.index >= table.size() {
                    if self.table == 0 {
                        self.table = 1;
                        self.index = 0;
                        continue;
                    }
                    return None;
                }
                self.entry = table.buckets[self.index];
                self.index += 1;
            } else {
                // SAFETY: the dict is immutably borrowed for 'a, so chain
                // entries stay put.
                self.entry = unsafe { (*self.entry).next };
            }
            if !self.entry.is_null() {
                // SAFETY: as above.
                unsafe {
                    return Some((&(*self.entry).key, &(*self.entry).val));
                }
            }
        }
    }
}
