//! Map from ranges of local ids to values.

use std::collections::BTreeMap;

/// A value stored for a range; reading at `offset` cells into the range
/// yields `offset_by(offset)`.
pub trait RangeValue: Clone + PartialEq {
    fn offset_by(&self, offset: u32) -> Self;
}

impl<T: Clone + Ord> RangeValue for std::collections::BTreeSet<T> {
    fn offset_by(&self, _offset: u32) -> Self {
        self.clone()
    }
}

/// Result of a lookup: the value for the first cells and how many cells it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQueryResult<V> {
    pub value: Option<V>,
    pub length: u32,
}

/// Non-overlapping ranges keyed by their first id.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeMap<V> {
    entries: BTreeMap<u32, (u32, V)>,
}

impl<V> Default for RangeMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: RangeValue> RangeMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up `start`. `length` is the number of cells from `start`
    /// (at most `count`) sharing the same answer.
    pub fn get(&self, start: u32, count: u32) -> RangeQueryResult<V> {
        if let Some((&first, (len, value))) = self.entries.range(..=start).next_back() {
            let end = first + len;
            if start < end {
                return RangeQueryResult {
                    value: Some(value.offset_by(start - first)),
                    length: count.min(end - start),
                };
            }
        }
        let length = match self.entries.range(start..).next() {
            Some((&next, _)) if next < start + count => next - start,
            _ => count,
        };
        RangeQueryResult {
            value: None,
            length,
        }
    }

    pub fn set(&mut self, start: u32, count: u32, value: V) {
        if count == 0 {
            return;
        }
        self.delete(start, count);
        self.entries.insert(start, (count, value));
    }

    pub fn delete(&mut self, start: u32, count: u32) {
        let end = start + count;
        let mut overlapping: Vec<u32> = Vec::new();
        if let Some((&first, (len, _))) = self.entries.range(..start).next_back() {
            if first + len > start {
                overlapping.push(first);
            }
        }
        overlapping.extend(self.entries.range(start..end).map(|(&first, _)| first));
        for first in overlapping {
            let Some((len, value)) = self.entries.remove(&first) else {
                continue;
            };
            if first < start {
                self.entries.insert(first, (start - first, value.clone()));
            }
            let last = first + len;
            if last > end {
                self.entries
                    .insert(end, (last - end, value.offset_by(end - first)));
            }
        }
    }

    /// Every stored entry as `(start, count, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &V)> {
        self.entries
            .iter()
            .map(|(&start, (count, value))| (start, *count, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Base(u32);

    impl RangeValue for Base {
        fn offset_by(&self, offset: u32) -> Self {
            Base(self.0 + offset)
        }
    }

    #[test]
    fn get_inside_entry_offsets_value() {
        let mut map = RangeMap::new();
        map.set(10, 5, Base(100));
        assert_eq!(
            map.get(12, 10),
            RangeQueryResult {
                value: Some(Base(102)),
                length: 3
            }
        );
    }

    #[test]
    fn get_before_entry_reports_gap() {
        let mut map = RangeMap::new();
        map.set(10, 5, Base(100));
        assert_eq!(
            map.get(7, 10),
            RangeQueryResult {
                value: None,
                length: 3
            }
        );
        assert_eq!(map.get(20, 2).length, 2);
    }

    #[test]
    fn set_splits_overlapping_entries() {
        let mut map = RangeMap::new();
        map.set(0, 10, Base(0));
        map.set(3, 2, Base(50));
        let entries: Vec<_> = map.iter().map(|(s, c, v)| (s, c, v.0)).collect();
        assert_eq!(entries, vec![(0, 3, 0), (3, 2, 50), (5, 5, 5)]);
    }

    #[test]
    fn delete_trims_both_ends() {
        let mut map = RangeMap::new();
        map.set(0, 4, Base(0));
        map.set(6, 4, Base(6));
        map.delete(2, 6);
        let entries: Vec<_> = map.iter().map(|(s, c, v)| (s, c, v.0)).collect();
        assert_eq!(entries, vec![(0, 2, 0), (8, 2, 8)]);
    }
}
