//! Chain-length statistics, for eyeballing how a table is doing.

use std::fmt;

use crate::{Dict, DictPolicy, Table};

/// Chains at or beyond this length share the last histogram slot.
const HISTOGRAM_SLOTS: usize = 50;

#[derive(Debug, Clone)]
pub struct TableStats {
    pub size: usize,
    pub used: usize,
    /// Buckets with at least one entry.
    pub nonempty_slots: usize,
    pub max_chain_len: usize,
    /// `chain_lengths[n]` counts buckets whose chain holds `n` entries;
    /// the last slot aggregates everything longer.
    pub chain_lengths: [usize; HISTOGRAM_SLOTS],
}

fn table_stats<K, V>(table: &Table<K, V>) -> TableStats {
    let mut stats = TableStats {
        size: table.size(),
        used: table.used,
        nonempty_slots: 0,
        max_chain_len: 0,
        chain_lengths: [0; HISTOGRAM_SLOTS],
    };
    for &head in table.buckets.iter() {
        let mut chain_len = 0;
        let mut cur = head;
        while !cur.is_null() {
            chain_len += 1;
            // SAFETY: chain entries are live under the shared borrow.
            cur = unsafe { (*cur).next };
        }
        if chain_len > 0 {
            stats.nonempty_slots += 1;
        }
        stats.max_chain_len = stats.max_chain_len.max(chain_len);
        stats.chain_lengths[chain_len.min(HISTOGRAM_SLOTS - 1)] += 1;
    }
    stats
}

#[derive(Debug, Clone)]
pub struct DictStats {
    pub main: TableStats,
    /// Present while an incremental rehash is in flight.
    pub rehashing: Option<TableStats>,
}

impl<P: DictPolicy, V> Dict<P, V> {
    pub fn stats(&self) -> DictStats {
        DictStats {
            main: table_stats(&self.tables[0]),
            rehashing: self
                .is_rehashing()
                .then(|| table_stats(&self.tables[1])),
        }
    }
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.used == 0 {
            return writeln!(f, "empty table");
        }
        writeln!(f, " table size: {}", self.size)?;
        writeln!(f, " number of elements: {}", self.used)?;
        writeln!(f, " different slots: {}", self.nonempty_slots)?;
        writeln!(f, " max chain length: {}", self.max_chain_len)?;
        writeln!(
            f,
            " avg chain length: {:.2}",
            self.used as f64 / self.nonempty_slots as f64
        )?;
        writeln!(f, " chain length distribution:")?;
        for (len, count) in self.chain_lengths.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let marker = if len == HISTOGRAM_SLOTS - 1 { ">=" } else { "" };
            writeln!(
                f,
                "   {marker}{len}: {count} ({:.2}%)",
                *count as f64 / self.size as f64 * 100.0
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for DictStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "main hash table:")?;
        write!(f, "{}", self.main)?;
        if let Some(rehashing) = &self.rehashing {
            writeln!(f, "rehashing target:")?;
            write!(f, "{rehashing}")?;
        }
        Ok(())
    }
}
