//! Partition-key index over the series of one shard
//!
//! An [`IndexSnapshot`] is immutable once built. Shards publish a new snapshot
//! with a single pointer swap, so readers always see one complete index.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::vec;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::filter::LabelFilter;
use crate::query::{TermInfo, TimeRange};
use crate::store::{Labels, PartKeyRecord};

/// Byte-comparable key identifying one series within a shard
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartKey(Arc<[u8]>);

impl PartKey {
    /// Canonical key of a label set, in name order
    ///
    /// Each name and value is written as a big-endian `u32` byte length
    /// followed by its bytes, so label text can never be mistaken for a
    /// boundary between labels.
    pub fn from_labels(labels: &Labels) -> Self {
        let mut bytes = Vec::with_capacity(labels.iter().map(|(k, v)| k.len() + v.len() + 8).sum());
        for (name, value) in labels {
            put_field(&mut bytes, name);
            put_field(&mut bytes, value);
        }
        Self(bytes.into())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Label pairs of a key built by [`PartKey::from_labels`]
    fn decode(&self) -> Option<Vec<(&str, &str)>> {
        let mut rest: &[u8] = &self.0;
        let mut pairs = Vec::new();
        while !rest.is_empty() {
            let name = take_field(&mut rest)?;
            let value = take_field(&mut rest)?;
            pairs.push((name, value));
        }
        Some(pairs)
    }
}

fn put_field(bytes: &mut Vec<u8>, field: &str) {
    bytes.extend_from_slice(&(field.len() as u32).to_be_bytes());
    bytes.extend_from_slice(field.as_bytes());
}

fn take_field<'a>(rest: &mut &'a [u8]) -> Option<&'a str> {
    if rest.len() < 4 {
        return None;
    }
    let (len, tail) = rest.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if tail.len() < len {
        return None;
    }
    let (field, tail) = tail.split_at(len);
    *rest = tail;
    std::str::from_utf8(field).ok()
}

impl fmt::Debug for PartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Some(pairs) => {
                let text: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "PartKey({})", text.join(","))
            }
            None => write!(f, "PartKey({})", String::from_utf8_lossy(&self.0)),
        }
    }
}

/// An indexed series
#[derive(Debug, Clone, PartialEq)]
pub struct PartRecord {
    pub part_key: PartKey,
    pub labels: Labels,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl PartRecord {
    fn matches(&self, filters: &[LabelFilter], range: &TimeRange) -> bool {
        range.overlaps(&self.start_time, &self.end_time)
            && filters
                .iter()
                .all(|f| f.matches(self.labels.get(&f.label).map(String::as_str)))
    }
}

/// Accumulates recovered records into a snapshot
#[derive(Debug, Default)]
pub struct IndexSnapshotBuilder {
    records: HashMap<PartKey, PartRecord>,
}

impl IndexSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; a key seen before widens the existing time span
    pub fn add(&mut self, record: PartKeyRecord) {
        let part_key = PartKey::from_labels(&record.labels);
        self.records
            .entry(part_key.clone())
            .and_modify(|existing| {
                existing.start_time = existing.start_time.min(record.start_time);
                existing.end_time = existing.end_time.max(record.end_time);
            })
            .or_insert_with(|| PartRecord {
                part_key,
                labels: record.labels,
                start_time: record.start_time,
                end_time: record.end_time,
            });
    }

    /// Number of distinct series added so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn build(self, generation: u64) -> IndexSnapshot {
        let mut parts: Vec<PartRecord> = self.records.into_values().collect();
        parts.sort_by(|a, b| a.part_key.cmp(&b.part_key));

        let mut postings: BTreeMap<String, BTreeMap<String, Vec<u32>>> = BTreeMap::new();
        let mut by_key = HashMap::with_capacity(parts.len());
        for (id, part) in parts.iter().enumerate() {
            let id = id as u32;
            by_key.insert(part.part_key.clone(), id);
            for (name, value) in &part.labels {
                postings
                    .entry(name.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .push(id);
            }
        }

        IndexSnapshot {
            generation,
            built_at: Utc::now(),
            parts: parts.into_iter().map(Arc::new).collect(),
            by_key,
            postings,
        }
    }
}

/// Immutable label and partition-key index of one shard
#[derive(Debug)]
pub struct IndexSnapshot {
    generation: u64,
    built_at: DateTime<Utc>,
    parts: Vec<Arc<PartRecord>>,
    by_key: HashMap<PartKey, u32>,
    /// label name -> label value -> ascending part ids
    postings: BTreeMap<String, BTreeMap<String, Vec<u32>>>,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn num_partitions(&self) -> usize {
        self.parts.len()
    }

    pub fn num_label_names(&self) -> usize {
        self.postings.len()
    }

    pub fn get(&self, part_key: &PartKey) -> Option<&Arc<PartRecord>> {
        self.by_key.get(part_key).map(|id| &self.parts[*id as usize])
    }

    /// Up to `limit` label names, in name order
    pub fn label_names(&self, limit: usize) -> impl Iterator<Item = &str> {
        self.postings.keys().take(limit).map(String::as_str)
    }

    /// The `top_k` most frequent values of a label, ties broken by value
    pub fn label_values(&self, label: &str, top_k: usize) -> Vec<TermInfo> {
        let Some(values) = self.postings.get(label) else {
            return Vec::new();
        };
        let mut terms: Vec<TermInfo> = values
            .iter()
            .map(|(value, ids)| TermInfo::new(value.clone(), ids.len()))
            .collect();
        terms.sort_by(|a, b| b.freq.cmp(&a.freq).then_with(|| a.value.cmp(&b.value)));
        terms.truncate(top_k);
        terms
    }

    /// Smallest id set that must contain every match
    fn candidates(&self, filters: &[LabelFilter]) -> Candidates {
        let mut best: Option<Vec<u32>> = None;
        for filter in filters {
            let Some(values) = filter.exact_values() else {
                continue;
            };
            let mut ids: Vec<u32> = match self.postings.get(&filter.label) {
                Some(by_value) => values
                    .iter()
                    .filter_map(|v| by_value.get(*v))
                    .flatten()
                    .copied()
                    .collect(),
                None => Vec::new(),
            };
            ids.sort_unstable();
            ids.dedup();
            if best.as_ref().map_or(true, |b| ids.len() < b.len()) {
                best = Some(ids);
            }
        }
        match best {
            Some(ids) => Candidates::Listed(ids.into_iter()),
            None => Candidates::All(0..self.parts.len() as u32),
        }
    }

    /// Collect all matches, fanning out over rayon when the candidate list is large
    pub fn filter_parts(
        &self,
        filters: &[LabelFilter],
        range: &TimeRange,
        parallelism: usize,
        parallel_threshold: usize,
    ) -> Vec<Arc<PartRecord>> {
        let candidates: Vec<u32> = self.candidates(filters).collect();
        let check = |id: &u32| {
            let part = &self.parts[*id as usize];
            part.matches(filters, range).then(|| part.clone())
        };

        if parallelism > 1 && candidates.len() >= parallel_threshold {
            let chunk_size = candidates.len().div_ceil(parallelism).max(1);
            candidates
                .par_chunks(chunk_size)
                .map(|chunk| chunk.iter().filter_map(&check).collect::<Vec<_>>())
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        } else {
            candidates.iter().filter_map(&check).collect()
        }
    }

    /// Lazily matching series; the snapshot is kept alive by the iterator
    pub fn matching_parts(self: &Arc<Self>, filters: Vec<LabelFilter>, range: TimeRange) -> MatchingParts {
        MatchingParts {
            candidates: self.candidates(&filters),
            snapshot: self.clone(),
            filters,
            range,
        }
    }
}

enum Candidates {
    All(Range<u32>),
    Listed(vec::IntoIter<u32>),
}

impl Iterator for Candidates {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            Self::All(range) => range.next(),
            Self::Listed(ids) => ids.next(),
        }
    }
}

/// Pull-based iterator over the series matching a filter conjunction
pub struct MatchingParts {
    snapshot: Arc<IndexSnapshot>,
    candidates: Candidates,
    filters: Vec<LabelFilter>,
    range: TimeRange,
}

impl Iterator for MatchingParts {
    type Item = Arc<PartRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.candidates.by_ref() {
            let part = &self.snapshot.parts[id as usize];
            if part.matches(&self.filters, &self.range) {
                return Some(part.clone());
            }
        }
        None
    }
}

impl fmt::Debug for MatchingParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchingParts")
            .field("generation", &self.snapshot.generation)
            .field("filters", &self.filters)
            .field("range", &self.range)
            .finish()
    }
}

/// Lazy sequence of matching partition keys, at most `limit` long
#[derive(Debug)]
pub struct PartKeyIter {
    inner: std::iter::Take<MatchingParts>,
}

impl PartKeyIter {
    pub(crate) fn new(parts: MatchingParts, limit: usize) -> Self {
        Self {
            inner: parts.take(limit),
        }
    }
}

impl Iterator for PartKeyIter {
    type Item = PartKey;

    fn next(&mut self) -> Option<PartKey> {
        self.inner.next().map(|p| p.part_key.clone())
    }
}

/// Lazy sequence of distinct label projections, at most `limit` long
#[derive(Debug)]
pub struct LabelValuesIter {
    parts: MatchingParts,
    label_names: Vec<String>,
    seen: HashSet<Labels>,
    remaining: usize,
}

impl LabelValuesIter {
    pub(crate) fn new(parts: MatchingParts, label_names: Vec<String>, limit: usize) -> Self {
        Self {
            parts,
            label_names,
            seen: HashSet::new(),
            remaining: limit,
        }
    }
}

impl Iterator for LabelValuesIter {
    type Item = Labels;

    fn next(&mut self) -> Option<Labels> {
        if self.remaining == 0 {
            return None;
        }
        for part in self.parts.by_ref() {
            let projected: Labels = self
                .label_names
                .iter()
                .filter_map(|name| part.labels.get(name).map(|v| (name.clone(), v.clone())))
                .collect();
            if projected.is_empty() || !self.seen.insert(projected.clone()) {
                continue;
            }
            self.remaining -= 1;
            return Some(projected);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn record(pairs: &[(&str, &str)], start: u32, end: u32) -> PartKeyRecord {
        let labels = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        PartKeyRecord::new(labels, t(start), t(end))
    }

    fn sample_snapshot() -> Arc<IndexSnapshot> {
        let mut builder = IndexSnapshotBuilder::new();
        for (i, host) in ["a", "a", "a", "b", "b", "c"].iter().enumerate() {
            let id = i.to_string();
            builder.add(record(&[("host", host), ("id", &id), ("job", "api")], 0, 10));
        }
        builder.add(record(&[("job", "batch"), ("id", "late")], 12, 14));
        Arc::new(builder.build(1))
    }

    #[test]
    fn test_part_key_is_canonical() {
        let a = record(&[("b", "2"), ("a", "1")], 0, 1);
        let b = record(&[("a", "1"), ("b", "2")], 0, 1);
        assert_eq!(PartKey::from_labels(&a.labels), PartKey::from_labels(&b.labels));
        assert_eq!(format!("{:?}", PartKey::from_labels(&a.labels)), "PartKey(a=1,b=2)");
        assert_eq!(format!("{:?}", PartKey::from_bytes(b"k".to_vec())), "PartKey(k)");
    }

    #[test]
    fn test_part_key_separators_in_values() {
        let packed = record(&[("a", "b\0c\x01d")], 0, 1);
        let split = record(&[("a", "b"), ("c", "d")], 0, 1);
        assert_ne!(PartKey::from_labels(&packed.labels), PartKey::from_labels(&split.labels));

        let mut builder = IndexSnapshotBuilder::new();
        builder.add(packed);
        builder.add(split);
        assert_eq!(builder.len(), 2);

        let snapshot = builder.build(1);
        let found = snapshot.filter_parts(&[LabelFilter::equals("c", "d")], &TimeRange::all(), 1, usize::MAX);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].labels["a"], "b");
    }

    #[test]
    fn test_builder_merges_duplicate_keys() {
        let mut builder = IndexSnapshotBuilder::new();
        builder.add(record(&[("host", "a")], 2, 4));
        builder.add(record(&[("host", "a")], 1, 3));
        builder.add(record(&[("host", "a")], 3, 6));
        assert_eq!(builder.len(), 1);

        let snapshot = builder.build(1);
        let part = &snapshot.parts[0];
        assert_eq!(part.start_time, t(1));
        assert_eq!(part.end_time, t(6));
    }

    #[test]
    fn test_label_values_top_k() {
        let snapshot = sample_snapshot();
        assert_eq!(
            snapshot.label_values("host", 2),
            vec![TermInfo::new("a", 3), TermInfo::new("b", 2)]
        );
        assert_eq!(snapshot.label_values("host", 10).len(), 3);
        assert!(snapshot.label_values("missing", 10).is_empty());
    }

    #[test]
    fn test_label_values_ties_break_by_value() {
        let mut builder = IndexSnapshotBuilder::new();
        for host in ["z", "m", "b"] {
            builder.add(record(&[("host", host)], 0, 1));
        }
        let snapshot = builder.build(1);
        let values: Vec<String> = snapshot.label_values("host", 3).into_iter().map(|t| t.value).collect();
        assert_eq!(values, vec!["b", "m", "z"]);
    }

    #[test]
    fn test_label_names_limit() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.label_names(10).collect::<Vec<_>>(), vec!["host", "id", "job"]);
        assert_eq!(snapshot.label_names(1).count(), 1);
    }

    #[test]
    fn test_filters_are_conjunctive_and_time_bounded() {
        let snapshot = sample_snapshot();
        let filters = vec![
            LabelFilter::equals("job", "api"),
            LabelFilter::one_of("host", ["a", "c"]),
        ];
        let found = snapshot.filter_parts(&filters, &TimeRange::all(), 1, usize::MAX);
        assert_eq!(found.len(), 4);

        let later = TimeRange::new(t(11), t(20));
        let found = snapshot.filter_parts(&filters, &later, 1, usize::MAX);
        assert!(found.is_empty());

        let found = snapshot.filter_parts(&[], &later, 1, usize::MAX);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].labels["id"], "late");
    }

    #[test]
    fn test_absent_label_matches_empty_filter() {
        let snapshot = sample_snapshot();
        let found = snapshot.filter_parts(&[LabelFilter::equals("host", "")], &TimeRange::all(), 1, usize::MAX);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].labels["job"], "batch");
    }

    #[test]
    fn test_parallel_filter_matches_serial() {
        let mut builder = IndexSnapshotBuilder::new();
        for i in 0..500 {
            let id = i.to_string();
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            builder.add(record(&[("id", &id), ("parity", parity)], 0, 1));
        }
        let snapshot = builder.build(1);
        let filters = vec![LabelFilter::regex("parity", "ev.*").unwrap()];

        let serial = snapshot.filter_parts(&filters, &TimeRange::all(), 1, usize::MAX);
        let parallel = snapshot.filter_parts(&filters, &TimeRange::all(), 4, 10);
        assert_eq!(serial.len(), 250);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_matching_parts_is_lazy_and_bounded() {
        let snapshot = sample_snapshot();
        let mut keys = PartKeyIter::new(snapshot.matching_parts(Vec::new(), TimeRange::all()), 2);
        assert!(keys.next().is_some());
        assert!(keys.next().is_some());
        assert!(keys.next().is_none());
    }

    #[test]
    fn test_label_values_iter_dedupes() {
        let snapshot = sample_snapshot();
        let parts = snapshot.matching_parts(vec![LabelFilter::equals("job", "api")], TimeRange::all());
        let values: Vec<Labels> = LabelValuesIter::new(parts, vec!["host".to_string()], 10).collect();
        assert_eq!(values.len(), 3);

        let parts = snapshot.matching_parts(Vec::new(), TimeRange::new(t(0), t(0) + Duration::hours(30)));
        let values: Vec<Labels> = LabelValuesIter::new(parts, vec!["host".to_string()], 2).collect();
        assert_eq!(values.len(), 2);
    }
}
