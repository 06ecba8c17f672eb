//! The stateless reverse-binary cursor scan and the random samplers.

use rand::Rng;

use crate::{Dict, DictPolicy};

impl<P: DictPolicy, V> Dict<P, V> {
    /// Visit one cursor position's worth of entries and return the cursor
    /// for the next call. Start from 0 and stop when 0 comes back.
    ///
    /// The cursor is advanced by incrementing its *reversed* bits. Bucket
    /// indexes are hash suffixes, so when the table doubles every new
    /// index is a bit-extension of an already-scanned one, and when it
    /// halves every merged index is a prefix: positions already visited
    /// under the old mask never need revisiting under the new one. That
    /// makes the scan stateless across arbitrary resizes — every key
    /// present from start to finish is visited at least once, though
    /// possibly more than once.
    ///
    /// While a rehash is in flight the bucket of the smaller table is
    /// visited first, then every bucket of the larger table whose index
    /// expands it, which covers both tables without missing keys that
    /// migrate mid-scan.
    pub fn scan<F>(&self, cursor: u64, mut visit: F) -> u64
    where
        F: FnMut(&P::Key, &V),
    {
        if self.len() == 0 {
            return 0;
        }
        let mut v = cursor;

        let emit = |table: &crate::Table<P::Key, V>, idx: usize, visit: &mut F| {
            let mut cur = table.buckets[idx];
            while !cur.is_null() {
                // SAFETY: chain entries are live under the shared borrow.
                unsafe {
                    visit(&(*cur).key, &(*cur).val);
                    cur = (*cur).next;
                }
            }
        };

        if !self.is_rehashing() {
            let t0 = &self.tables[0];
            let m0 = t0.mask();
            emit(t0, (v & m0) as usize, &mut visit);

            v |= !m0;
            v = v.reverse_bits();
            v = v.wrapping_add(1);
            v = v.reverse_bits();
        } else {
            let (t0, t1) = if self.tables[0].size() > self.tables[1].size() {
                (&self.tables[1], &self.tables[0])
            } else {
                (&self.tables[0], &self.tables[1])
            };
            let m0 = t0.mask();
            let m1 = t1.mask();

            emit(t0, (v & m0) as usize, &mut visit);

            // Expansions of the smaller-table index inside the larger one.
            loop {
                emit(t1, (v & m1) as usize, &mut visit);

                v |= !m1;
                v = v.reverse_bits();
                v = v.wrapping_add(1);
                v = v.reverse_bits();

                if v & (m0 ^ m1) == 0 {
                    break;
                }
            }
        }
        v
    }

    /// A uniformly-random-ish entry: pick a random non-empty bucket
    /// (skipping the already-drained prefix of a mid-rehash table), then
    /// a uniformly random entry of its chain.
    pub fn random_entry<R: Rng>(&mut self, rng: &mut R) -> Option<(&P::Key, &V)> {
        if self.len() == 0 {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let cur = if self.is_rehashing() {
            let s0 = self.tables[0].size();
            let s1 = self.tables[1].size();
            let drained = self.rehash_idx as usize;
            loop {
                // Buckets below the cursor are already empty; sample past
                // them, across both tables laid end to end.
                let h = drained + rng.gen_range(0..(s0 + s1 - drained));
                let cur = if h >= s0 {
                    self.tables[1].buckets[h - s0]
                } else {
                    self.tables[0].buckets[h]
                };
                if !cur.is_null() {
                    break cur;
                }
            }
        } else {
            loop {
                let h = rng.gen_range(0..self.tables[0].size());
                let cur = self.tables[0].buckets[h];
                if !cur.is_null() {
                    break cur;
                }
            }
        };

        // SAFETY: chain entries are live; no mutation below this point.
        unsafe {
            let mut chain_len = 0;
            let mut p = cur;
            while !p.is_null() {
                p = (*p).next;
                chain_len += 1;
            }
            let mut pick = rng.gen_range(0..chain_len);
            let mut cur = cur;
            while pick > 0 {
                cur = (*cur).next;
                pick -= 1;
            }
            Some((&(*cur).key, &(*cur).val))
        }
    }

    /// Sample up to `count` entries by walking buckets forward from a
    /// random start, restarting somewhere else when too many consecutive
    /// empties turn up. Best-effort: bounded at `10·count` bucket steps,
    /// not statistically uniform, and duplicates across calls are
    /// possible. Much cheaper than `count` calls to
    /// [`Dict::random_entry`].
    pub fn sample<R: Rng>(&mut self, rng: &mut R, count: usize) -> Vec<(&P::Key, &V)> {
        let count = count.min(self.len());
        if count == 0 {
            return Vec::new();
        }
        // Pay for the sampling with a proportional amount of migration.
        for _ in 0..count {
            if self.is_rehashing() {
                self.rehash_step();
            } else {
                break;
            }
        }

        let tables = if self.is_rehashing() { 2 } else { 1 };
        let mut maxmask = self.tables[0].mask();
        if tables > 1 && maxmask < self.tables[1].mask() {
            maxmask = self.tables[1].mask();
        }

        let mut i = rng.gen_range(0..=maxmask) as usize;
        let mut empty_run = 0usize;
        let mut out: Vec<(&P::Key, &V)> = Vec::with_capacity(count);
        let mut steps = count * 10;
        while out.len() < count && steps > 0 {
            steps -= 1;
            for t in 0..tables {
                // Nothing lives below the migration cursor in the old
                // table; jump the walk past it when possible.
                if tables == 2 && t == 0 && (i as isize) < self.rehash_idx {
                    if i >= self.tables[1].size() {
                        i = self.rehash_idx as usize;
                    } else {
                        continue;
                    }
                }
                if i >= self.tables[t].size() {
                    continue;
                }
                let mut cur = self.tables[t].buckets[i];
                if cur.is_null() {
                    empty_run += 1;
                    if empty_run >= 5 && empty_run > count {
                        i = rng.gen_range(0..=maxmask) as usize;
                        empty_run = 0;
                    }
                } else {
                    empty_run = 0;
                    while !cur.is_null() {
                        // SAFETY: chain entries are live; no mutation
                        // happens past the rehash steps above.
                        unsafe {
                            out.push((&(*cur).key, &(*cur).val));
                            cur = (*cur).next;
                        }
                        if out.len() == count {
                            return out;
                        }
                    }
                }
            }
            i = (i + 1) & maxmask as usize;
        }
        out
    }
}
