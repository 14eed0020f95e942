//! Compact bitset over a fixed partition count.
//!
//! `PartitionSet` is the light-weight representation of "which of the N
//! partitions" used throughout the distribution core: analysis working sets,
//! ownership bookkeeping, advisory suggestions, and parallel query fan-out.
//!
//! All binary operations assume both sets share the same partition count.
//! This implementation is not thread-safe; share across threads only behind
//! external synchronization or by copying.

use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};

use crate::encode::{self, WireCodec};
use crate::error::{Error, Result};

/// Serialization format indicator: no partitions are marked; no payload.
const MARKED_NONE: u8 = 0;

/// Serialization format indicator: a small number of partitions are marked;
/// followed by packed integers holding the gaps between successive marked
/// partitions, terminated by `-1`.
const MARKED_FEW: u8 = 1;

/// Serialization format indicator: a large number of partitions are marked;
/// followed by one raw 64-bit word per `ceil(N/64)`.
const MARKED_MANY: u8 = 2;

/// Serialization format indicator: all partitions are marked; no payload.
const MARKED_ALL: u8 = 3;

/// Cached-cardinality sentinel meaning "recompute by popcount".
const DIRTY: i64 = -1;

/// A fixed-capacity set of partition ids in `[0, partition_count)`.
pub struct PartitionSet {
    /// Total partition count.
    partition_count: u32,
    /// Bit array, one bit per partition.
    words: Box<[u64]>,
    /// Mask selecting the used bits of the last word.
    tail_mask: u64,
    /// Cached count of marked partitions; `DIRTY` forces a recount.
    marked: Cell<i64>,
}

impl PartitionSet {
    /// Construct an empty set with the given partition count.
    ///
    /// # Panics
    ///
    /// Panics if `partition_count` is zero.
    pub fn new(partition_count: u32) -> Self {
        assert!(partition_count > 0, "partition count must be positive");

        let words = ((partition_count as usize) + 63) >> 6;
        PartitionSet {
            partition_count,
            words: vec![0u64; words].into_boxed_slice(),
            tail_mask: tail_mask(partition_count),
            marked: Cell::new(0),
        }
    }

    /// Construct a full set with the given partition count.
    pub fn full(partition_count: u32) -> Self {
        let mut set = PartitionSet::new(partition_count);
        set.fill();
        set
    }

    /// Construct a set holding a single marked partition.
    pub fn with_partition(partition_count: u32, partition: u32) -> Self {
        let mut set = PartitionSet::new(partition_count);
        set.add(partition);
        set
    }

    /// Construct a set holding the given marked partitions.
    pub fn with_partitions<I: IntoIterator<Item = u32>>(partition_count: u32, partitions: I) -> Self {
        let mut set = PartitionSet::new(partition_count);
        for partition in partitions {
            set.add(partition);
        }
        set
    }

    /// The total partition count this set was sized for.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    #[inline]
    fn check_index(&self, partition: u32) {
        assert!(
            partition < self.partition_count,
            "{partition} not in [0, {})",
            self.partition_count
        );
    }

    #[inline]
    fn check_compatible(&self, other: &PartitionSet) {
        assert!(
            self.partition_count == other.partition_count,
            "partition count mismatch: {} != {}",
            self.partition_count,
            other.partition_count
        );
    }

    /// Mark the specified partition.
    ///
    /// Returns true if the partition was newly added.
    pub fn add(&mut self, partition: u32) -> bool {
        self.check_index(partition);

        let word = (partition >> 6) as usize;
        let mask = 1u64 << (partition & 63);

        if self.words[word] & mask == 0 {
            self.words[word] |= mask;
            let marked = self.marked.get();
            if marked >= 0 {
                self.marked.set(marked + 1);
            }
            true
        } else {
            false
        }
    }

    /// Mark every partition of `other` in this set.
    ///
    /// Returns true if every added partition was previously unmarked, i.e.
    /// the two sets were disjoint.
    pub fn add_all(&mut self, other: &PartitionSet) -> bool {
        self.check_compatible(other);

        let mut disjoint = true;
        for (this, that) in self.words.iter_mut().zip(other.words.iter()) {
            disjoint &= *this & *that == 0;
            *this |= *that;
        }

        self.marked.set(DIRTY);
        disjoint
    }

    /// Clear the specified partition.
    ///
    /// Returns true if the partition was previously marked.
    pub fn remove(&mut self, partition: u32) -> bool {
        self.check_index(partition);

        let word = (partition >> 6) as usize;
        let mask = 1u64 << (partition & 63);

        if self.words[word] & mask != 0 {
            self.words[word] &= !mask;
            let marked = self.marked.get();
            if marked >= 0 {
                self.marked.set(marked - 1);
            }
            true
        } else {
            false
        }
    }

    /// Remove and return the first marked partition at or after `from`,
    /// wrapping to the start of the set if none is found above.
    ///
    /// Returns `None` only when the set is empty.
    pub fn remove_next(&mut self, from: u32) -> Option<u32> {
        let next = match self.next(from) {
            Some(pid) => Some(pid),
            None if from > 0 => self.next(0),
            None => None,
        };

        if let Some(pid) = next {
            self.remove(pid);
        }
        next
    }

    /// Clear every partition of `other` from this set.
    ///
    /// Returns true if every removed partition was previously marked, i.e.
    /// `other` was fully contained in this set.
    pub fn remove_all(&mut self, other: &PartitionSet) -> bool {
        self.check_compatible(other);

        let mut contained = true;
        for (this, that) in self.words.iter_mut().zip(other.words.iter()) {
            contained &= *this & *that == *that;
            *this &= !*that;
        }

        self.marked.set(DIRTY);
        contained
    }

    /// Retain only the partitions also marked in `other`.
    ///
    /// Returns true if this set changed.
    pub fn retain(&mut self, other: &PartitionSet) -> bool {
        self.check_compatible(other);

        let mut changed = false;
        for (this, that) in self.words.iter_mut().zip(other.words.iter()) {
            let intersection = *this & *that;
            if intersection != *this {
                *this = intersection;
                changed = true;
            }
        }

        if changed {
            self.marked.set(DIRTY);
        }
        changed
    }

    /// Check whether the specified partition is marked.
    pub fn contains(&self, partition: u32) -> bool {
        self.check_index(partition);
        self.words[(partition >> 6) as usize] & (1u64 << (partition & 63)) != 0
    }

    /// Check whether every partition of `other` is marked in this set.
    pub fn contains_all(&self, other: &PartitionSet) -> bool {
        self.check_compatible(other);
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(this, that)| this & that == *that)
    }

    /// Check whether this set and `other` share at least one marked partition.
    pub fn intersects(&self, other: &PartitionSet) -> bool {
        self.check_compatible(other);
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(this, that)| this & that != 0)
    }

    /// Check whether no partitions are marked.
    pub fn is_empty(&self) -> bool {
        let marked = self.marked.get();
        if marked >= 0 {
            return marked == 0;
        }

        if self.words.iter().all(|&w| w == 0) {
            self.marked.set(0);
            true
        } else {
            false
        }
    }

    /// Check whether all partitions are marked.
    pub fn is_full(&self) -> bool {
        self.cardinality() == self.partition_count
    }

    /// Clear all partitions.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.marked.set(0);
    }

    /// Mark all partitions.
    pub fn fill(&mut self) {
        let last = self.words.len() - 1;
        self.words[..last].iter_mut().for_each(|w| *w = u64::MAX);
        self.words[last] = self.tail_mask;
        self.marked.set(self.partition_count as i64);
    }

    /// Invert the set: marked partitions become clear and vice versa.
    pub fn invert(&mut self) {
        let last = self.words.len() - 1;
        self.words.iter_mut().for_each(|w| *w = !*w);
        self.words[last] &= self.tail_mask;

        let marked = self.marked.get();
        if marked >= 0 {
            self.marked.set(self.partition_count as i64 - marked);
        }
    }

    /// The first marked partition, or `None` if the set is empty.
    pub fn first(&self) -> Option<u32> {
        self.next(0)
    }

    /// The first marked partition at or after `from`, or `None`.
    ///
    /// `from == partition_count` is allowed and returns `None`, so the usual
    /// iteration `while let Some(pid) = set.next(i) { ...; i = pid + 1; }`
    /// terminates cleanly.
    pub fn next(&self, from: u32) -> Option<u32> {
        assert!(
            from <= self.partition_count,
            "{from} not in [0, {}]",
            self.partition_count
        );

        if from == self.partition_count || self.marked.get() == 0 {
            return None;
        }

        let mut word = (from >> 6) as usize;
        let offset = from & 63;
        let mut bits = self.words[word] >> offset;

        if bits == 0 {
            let last = self.words.len() - 1;
            while bits == 0 && word < last {
                word += 1;
                bits = self.words[word];
            }
            if bits == 0 {
                return None;
            }
            return Some(((word as u32) << 6) + bits.trailing_zeros());
        }

        Some(((word as u32) << 6) + offset + bits.trailing_zeros())
    }

    /// The number of marked partitions.
    pub fn cardinality(&self) -> u32 {
        let mut marked = self.marked.get();
        if marked < 0 {
            marked = self.words.iter().map(|w| w.count_ones() as i64).sum();
            self.marked.set(marked);
        }
        marked as u32
    }

    /// Collect the marked partition ids in ascending order.
    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    /// A uniformly random marked partition, or `None` if the set is empty.
    pub fn rnd(&self) -> Option<u32> {
        let marked = self.cardinality();
        if marked == 0 {
            return None;
        }

        let mut pid = self.first()?;
        for _ in 0..fastrand::u32(0..marked) {
            pid = self.next(pid + 1)?;
        }
        Some(pid)
    }

    /// Detach roughly half of the marked partitions into a new disjoint set.
    ///
    /// Returns `None` if the set holds fewer than two partitions and cannot
    /// be split.
    pub fn split(&mut self) -> Option<PartitionSet> {
        let half = self.cardinality() / 2;
        if half == 0 {
            return None;
        }

        let mut detached = PartitionSet::new(self.partition_count);
        let mut pid = self.first();
        for _ in 0..half {
            let current = pid.expect("cardinality under-reported during split");
            detached.add(current);
            self.remove(current);
            pid = self.next(current + 1);
        }

        Some(detached)
    }

    /// Union of two optional sets; either side may be consumed.
    pub fn union(a: Option<PartitionSet>, b: Option<PartitionSet>) -> Option<PartitionSet> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(mut a), Some(b)) => {
                a.add_all(&b);
                Some(a)
            }
        }
    }

    /// Iterate the marked partitions in ascending order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            set: self,
            next: self.first(),
        }
    }
}

fn tail_mask(partition_count: u32) -> u64 {
    u64::MAX >> ((64 - (partition_count & 63)) & 63)
}

/// Iterator over the marked partitions of a [`PartitionSet`].
pub struct Iter<'a> {
    set: &'a PartitionSet,
    next: Option<u32>,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        self.next = self.set.next(current + 1);
        Some(current)
    }
}

impl<'a> IntoIterator for &'a PartitionSet {
    type Item = u32;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

impl Clone for PartitionSet {
    fn clone(&self) -> Self {
        PartitionSet {
            partition_count: self.partition_count,
            words: self.words.clone(),
            tail_mask: self.tail_mask,
            marked: Cell::new(self.marked.get()),
        }
    }
}

impl PartialEq for PartitionSet {
    fn eq(&self, other: &Self) -> bool {
        if self.partition_count != other.partition_count {
            return false;
        }

        // shortcut on cached counts when both are clean
        let (marked, other_marked) = (self.marked.get(), other.marked.get());
        if marked >= 0 && other_marked >= 0 && marked != other_marked {
            return false;
        }

        self.words == other.words
    }
}

impl Eq for PartitionSet {}

impl Hash for PartitionSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.partition_count.hash(state);
        self.words.hash(state);
    }
}

impl fmt::Debug for PartitionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for PartitionSet {
    /// Renders the marked partitions with consecutive runs compressed,
    /// e.g. `PartitionSet{0..3, 7}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionSet{{")?;

        let mut first = true;
        let mut run_start: Option<u32> = None;
        let mut prev: Option<u32> = None;

        for pid in self.iter().chain(std::iter::once(u32::MAX)) {
            match prev {
                Some(p) if pid == p.wrapping_add(1) => {
                    run_start.get_or_insert(p);
                }
                _ => {
                    if let (Some(start), Some(p)) = (run_start.take(), prev) {
                        if p - start > 1 {
                            write!(f, "..{p}")?;
                        } else {
                            write!(f, ", {p}")?;
                        }
                    }
                    if pid != u32::MAX {
                        if !first {
                            write!(f, ", ")?;
                        }
                        first = false;
                        write!(f, "{pid}")?;
                    }
                }
            }
            prev = Some(pid);
        }

        write!(f, "}}")
    }
}

impl WireCodec for PartitionSet {
    /// Encode in the legacy-lite format: `u16` partition count, one format
    /// byte, then a format-dependent payload. The most compact of the four
    /// formats is chosen from the cardinality.
    fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let partition_count = self.partition_count;
        if partition_count > u16::MAX as u32 {
            return Err(Error::WireEncoding(format!(
                "partition count {partition_count} exceeds the legacy-lite range"
            )));
        }
        buf.put_u16(partition_count as u16);

        let marked = self.cardinality();
        if marked == 0 {
            buf.put_u8(MARKED_NONE);
        } else if marked == partition_count {
            buf.put_u8(MARKED_ALL);
        } else if marked < partition_count >> 5 {
            // likely to be optimal with the "few" format
            buf.put_u8(MARKED_FEW);
            let mut last = 0u32;
            for pid in self.iter() {
                encode::put_packed_i32(buf, (pid - last) as i32);
                last = pid;
            }
            encode::put_packed_i32(buf, -1);
        } else {
            buf.put_u8(MARKED_MANY);
            for word in self.words.iter() {
                buf.put_u64(*word);
            }
        }

        Ok(())
    }

    fn read_from<B: Buf>(buf: &mut B) -> Result<Self> {
        let partition_count = encode::get_u16(buf)? as u32;
        if partition_count == 0 {
            return Err(Error::WireEncoding(
                "partition count must be positive".to_string(),
            ));
        }

        let mut set = PartitionSet::new(partition_count);
        let format = encode::get_u8(buf)?;
        match format {
            MARKED_NONE => {}

            MARKED_FEW => {
                let mut last: i64 = 0;
                loop {
                    let gap = encode::get_packed_i32(buf)?;
                    if gap < 0 {
                        break;
                    }
                    last += gap as i64;
                    if last >= partition_count as i64 {
                        return Err(Error::WireEncoding(format!(
                            "marked partition {last} out of range [0, {partition_count})"
                        )));
                    }
                    set.add(last as u32);
                }
            }

            MARKED_MANY => {
                let mut marked = 0i64;
                for word in set.words.iter_mut() {
                    let bits = encode::get_u64(buf)?;
                    *word = bits;
                    marked += bits.count_ones() as i64;
                }
                set.marked.set(marked);
                if set.words[set.words.len() - 1] & !set.tail_mask != 0 {
                    return Err(Error::WireEncoding(
                        "bits set beyond the partition count".to_string(),
                    ));
                }
            }

            MARKED_ALL => set.fill(),

            _ => return Err(Error::CorruptedStream(format)),
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encoded(set: &PartitionSet) -> BytesMut {
        let mut buf = BytesMut::new();
        set.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn add_remove_contains() {
        let mut set = PartitionSet::new(100);
        assert!(set.add(42));
        assert!(!set.add(42));
        assert!(set.contains(42));
        assert_eq!(set.cardinality(), 1);
        assert!(set.remove(42));
        assert!(!set.remove(42));
        assert!(set.is_empty());
    }

    #[test]
    #[should_panic(expected = "not in [0, 100)")]
    fn out_of_range_panics() {
        let mut set = PartitionSet::new(100);
        set.add(100);
    }

    #[test]
    fn next_iterates_all_marked() {
        let set = PartitionSet::with_partitions(300, [0, 63, 64, 65, 128, 299]);
        assert_eq!(set.to_vec(), vec![0, 63, 64, 65, 128, 299]);
        assert_eq!(set.next(66), Some(128));
        assert_eq!(set.next(300), None);
    }

    #[test]
    fn remove_next_wraps() {
        let mut set = PartitionSet::with_partitions(16, [2, 9]);
        assert_eq!(set.remove_next(5), Some(9));
        assert_eq!(set.remove_next(5), Some(2));
        assert_eq!(set.remove_next(5), None);
    }

    #[test]
    fn invert_twice_restores() {
        let mut set = PartitionSet::with_partitions(130, [0, 64, 129]);
        let original = set.clone();
        set.invert();
        assert_eq!(set.cardinality(), 127);
        assert!(!set.contains(64));
        set.invert();
        assert_eq!(set, original);
    }

    #[test]
    fn fill_and_clear() {
        let mut set = PartitionSet::new(77);
        set.fill();
        assert!(set.is_full());
        assert_eq!(set.cardinality(), 77);
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn bulk_ops_track_cardinality() {
        let mut a = PartitionSet::with_partitions(128, 0..40);
        let b = PartitionSet::with_partitions(128, 20..60);

        assert!(!a.add_all(&b), "overlapping add is not disjoint");
        assert_eq!(a.cardinality(), 60);

        assert!(a.remove_all(&b));
        assert_eq!(a.cardinality(), 20);

        let c = PartitionSet::with_partitions(128, 10..50);
        assert!(a.retain(&c));
        assert_eq!(a.to_vec(), (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn intersects_and_contains_all() {
        let a = PartitionSet::with_partitions(64, [1, 2, 3]);
        let b = PartitionSet::with_partitions(64, [3, 4]);
        let c = PartitionSet::with_partitions(64, [1, 3]);

        assert!(a.intersects(&b));
        assert!(!a.contains_all(&b));
        assert!(a.contains_all(&c));
        assert!(!a.intersects(&PartitionSet::new(64)));
    }

    #[test]
    fn split_detaches_half() {
        let mut set = PartitionSet::with_partitions(100, 0..10);
        let detached = set.split().unwrap();
        assert_eq!(detached.cardinality(), 5);
        assert_eq!(set.cardinality(), 5);
        assert!(!detached.intersects(&set));

        let mut single = PartitionSet::with_partition(100, 7);
        assert!(single.split().is_none());
    }

    #[test]
    fn rnd_returns_marked_partition() {
        let set = PartitionSet::with_partitions(1000, [5, 500, 999]);
        for _ in 0..20 {
            let pid = set.rnd().unwrap();
            assert!(set.contains(pid));
        }
        assert_eq!(PartitionSet::new(10).rnd(), None);
    }

    #[test]
    fn display_compresses_ranges() {
        let set = PartitionSet::with_partitions(50, [0, 1, 2, 3, 7, 9, 10]);
        assert_eq!(set.to_string(), "PartitionSet{0..3, 7, 9, 10}");
        assert_eq!(PartitionSet::new(8).to_string(), "PartitionSet{}");
    }

    #[test]
    fn wire_format_selection() {
        // empty -> NONE
        assert_eq!(encoded(&PartitionSet::new(1000))[2], MARKED_NONE);

        // 3 of 1000 marked -> FEW (3 < 1000/32)
        let sparse = PartitionSet::with_partitions(1000, [1, 500, 999]);
        assert_eq!(encoded(&sparse)[2], MARKED_FEW);

        // boundary: cardinality == N/32 chooses MANY
        let boundary = PartitionSet::with_partitions(1024, 0..32);
        assert_eq!(encoded(&boundary)[2], MARKED_MANY);

        // full -> ALL
        assert_eq!(encoded(&PartitionSet::full(1000))[2], MARKED_ALL);
    }

    #[test]
    fn wire_round_trip_all_formats() {
        let cases = [
            PartitionSet::new(1000),
            PartitionSet::with_partition(1000, 0),
            PartitionSet::with_partitions(1000, [1, 500, 999]),
            PartitionSet::with_partitions(1024, 0..16),
            PartitionSet::with_partitions(1024, 0..512),
            PartitionSet::with_partitions(1000, 0..999),
            PartitionSet::full(1000),
            PartitionSet::full(64),
            PartitionSet::with_partitions(65, [0, 64]),
        ];

        for set in cases {
            let mut buf = encoded(&set).freeze();
            let decoded = PartitionSet::read_from(&mut buf).unwrap();
            assert_eq!(decoded, set);
            assert_eq!(decoded.cardinality(), set.cardinality());
            assert!(!buf.has_remaining(), "decoder left trailing bytes");
        }
    }

    #[test]
    fn wire_rejects_unknown_format() {
        let mut buf = BytesMut::new();
        buf.put_u16(100);
        buf.put_u8(9);
        assert!(matches!(
            PartitionSet::read_from(&mut buf.freeze()),
            Err(Error::CorruptedStream(9))
        ));
    }

    #[test]
    fn wire_rejects_truncated_many() {
        let set = PartitionSet::with_partitions(1024, 0..512);
        let buf = encoded(&set);
        let mut short = buf.freeze().slice(0..20);
        assert!(matches!(
            PartitionSet::read_from(&mut short),
            Err(Error::TruncatedStream { .. })
        ));
    }
}
