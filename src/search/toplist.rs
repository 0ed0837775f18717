//! Bounded best-candidates list

use crate::capability::RelationOperator;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Maximum number of candidates a [`TopList`] holds
pub const TOP_LIST_CAPACITY: usize = 10;

/// A full list only accepts candidates better than its worst entry by more than this
pub const REPLACEMENT_TOLERANCE: f64 = 0.01;

/// One scored key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub cost: f64,
    pub key_bytes: Vec<u8>,
    pub decryption: Vec<u8>,
}

impl CandidateResult {
    pub fn new(cost: f64, key_bytes: Vec<u8>, decryption: Vec<u8>) -> Self {
        Self {
            cost,
            key_bytes,
            decryption,
        }
    }
}

/// Best-first order: cost under `relation`, then key bytes so equal costs sort deterministically
pub(crate) fn rank(relation: RelationOperator, a: &CandidateResult, b: &CandidateResult) -> Ordering {
    relation
        .compare(a.cost, b.cost)
        .then_with(|| a.key_bytes.cmp(&b.key_bytes))
}

/// At most [`TOP_LIST_CAPACITY`] candidates, best first, unique by key bytes
///
/// Deserialization rejects input that breaks these invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TopListData")]
pub struct TopList {
    relation: RelationOperator,
    entries: Vec<CandidateResult>,
}

/// Unchecked wire form of a [`TopList`]
#[derive(Deserialize)]
struct TopListData {
    relation: RelationOperator,
    entries: Vec<CandidateResult>,
}

impl TryFrom<TopListData> for TopList {
    type Error = String;

    fn try_from(data: TopListData) -> Result<Self, Self::Error> {
        let TopListData { relation, entries } = data;
        if entries.len() > TOP_LIST_CAPACITY {
            return Err(format!(
                "top list holds {} entries, at most {} allowed",
                entries.len(),
                TOP_LIST_CAPACITY
            ));
        }
        if entries.iter().any(|e| e.cost.is_nan()) {
            return Err("top list contains a NaN cost".into());
        }
        if entries
            .windows(2)
            .any(|pair| rank(relation, &pair[0], &pair[1]) != Ordering::Less)
        {
            return Err("top list entries are not in best-first order".into());
        }
        let mut keys = HashSet::with_capacity(entries.len());
        if !entries.iter().all(|e| keys.insert(e.key_bytes.as_slice())) {
            return Err("top list contains a key twice".into());
        }
        Ok(Self { relation, entries })
    }
}

impl TopList {
    pub fn new(relation: RelationOperator) -> Self {
        Self {
            relation,
            entries: Vec::with_capacity(TOP_LIST_CAPACITY + 1),
        }
    }

    /// Build a list from entries that already satisfy the list invariants
    pub(crate) fn from_sorted(relation: RelationOperator, entries: Vec<CandidateResult>) -> Self {
        debug_assert!(entries.len() <= TOP_LIST_CAPACITY);
        Self { relation, entries }
    }

    pub fn relation(&self) -> RelationOperator {
        self.relation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= TOP_LIST_CAPACITY
    }

    /// Best candidate, if any
    pub fn best(&self) -> Option<&CandidateResult> {
        self.entries.first()
    }

    /// Worst retained candidate, if any
    pub fn worst(&self) -> Option<&CandidateResult> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[CandidateResult] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateResult> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<CandidateResult> {
        self.entries
    }

    /// True if a candidate with `cost` would be admitted
    pub fn qualifies(&self, cost: f64) -> bool {
        if cost.is_nan() {
            return false;
        }
        match self.entries.last() {
            Some(worst) if self.is_full() => {
                self.relation.beats(cost, worst.cost, REPLACEMENT_TOLERANCE)
            }
            _ => true,
        }
    }

    /// Offer a candidate. Returns true if it was inserted.
    ///
    /// `key` is only copied when the candidate is admitted. A key already in
    /// the list is not added twice.
    pub fn offer(&mut self, cost: f64, key: &[u8], decryption: Vec<u8>) -> bool {
        if !self.qualifies(cost) || self.entries.iter().any(|e| e.key_bytes == key) {
            return false;
        }
        let candidate = CandidateResult::new(cost, key.to_vec(), decryption);
        let relation = self.relation;
        let at = self
            .entries
            .partition_point(|e| rank(relation, e, &candidate) != Ordering::Greater);
        self.entries.insert(at, candidate);
        self.entries.truncate(TOP_LIST_CAPACITY);
        true
    }
}

impl<'a> IntoIterator for &'a TopList {
    type Item = &'a CandidateResult;
    type IntoIter = std::slice::Iter<'a, CandidateResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(list: &mut TopList, costs: &[f64]) {
        for (i, &cost) in costs.iter().enumerate() {
            list.offer(cost, &[i as u8], Vec::new());
        }
    }

    #[test]
    fn test_orders_best_first() {
        let mut list = TopList::new(RelationOperator::Maximize);
        fill(&mut list, &[0.3, 0.9, 0.1, 0.5]);
        let costs: Vec<f64> = list.iter().map(|c| c.cost).collect();
        assert_eq!(costs, vec![0.9, 0.5, 0.3, 0.1]);

        let mut list = TopList::new(RelationOperator::Minimize);
        fill(&mut list, &[0.3, 0.9, 0.1, 0.5]);
        assert_eq!(list.best().unwrap().cost, 0.1);
    }

    #[test]
    fn test_capacity_and_tolerance() {
        let mut list = TopList::new(RelationOperator::Maximize);
        fill(&mut list, &[1.0; 10]);
        assert!(list.is_full());

        // Not better by more than the tolerance
        assert!(!list.offer(1.005, b"x", Vec::new()));
        assert!(list.offer(1.5, b"y", Vec::new()));
        assert_eq!(list.len(), TOP_LIST_CAPACITY);
        assert_eq!(list.best().unwrap().key_bytes, b"y");
    }

    #[test]
    fn test_tolerance_only_when_full() {
        let mut list = TopList::new(RelationOperator::Minimize);
        assert!(list.offer(5.0, b"a", Vec::new()));
        assert!(list.offer(5.0, b"b", Vec::new()));
        assert!(list.offer(5.001, b"c", Vec::new()));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_rejects_duplicates_and_nan() {
        let mut list = TopList::new(RelationOperator::Minimize);
        assert!(list.offer(1.0, b"k", Vec::new()));
        assert!(!list.offer(0.5, b"k", Vec::new()));
        assert!(!list.offer(f64::NAN, b"n", Vec::new()));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_equal_costs_sorted_by_key() {
        let mut list = TopList::new(RelationOperator::Maximize);
        list.offer(2.0, b"b", Vec::new());
        list.offer(2.0, b"a", Vec::new());
        list.offer(2.0, b"c", Vec::new());
        let keys: Vec<&[u8]> = list.iter().map(|c| c.key_bytes.as_slice()).collect();
        assert_eq!(keys, vec![b"a" as &[u8], b"b", b"c"]);
    }

    fn entry(cost: f64, key: u8) -> serde_json::Value {
        serde_json::json!({ "cost": cost, "key_bytes": [key], "decryption": [] })
    }

    fn decode(entries: Vec<serde_json::Value>) -> serde_json::Result<TopList> {
        serde_json::from_value(serde_json::json!({
            "relation": "maximize",
            "entries": entries,
        }))
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut list = TopList::new(RelationOperator::Maximize);
        fill(&mut list, &[0.3, 0.9, 0.1]);
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(serde_json::from_str::<TopList>(&json).unwrap(), list);
    }

    #[test]
    fn test_deserialize_rejects_broken_lists() {
        assert!(decode(vec![entry(0.9, 1), entry(0.5, 2)]).is_ok());

        // Worst first
        assert!(decode(vec![entry(0.5, 2), entry(0.9, 1)]).is_err());
        // Same key twice
        assert!(decode(vec![entry(0.9, 1), entry(0.5, 1)]).is_err());
        // Equal cost and key
        assert!(decode(vec![entry(0.9, 1), entry(0.9, 1)]).is_err());
        // Over capacity
        let crowded = (0..=TOP_LIST_CAPACITY as u8)
            .map(|k| entry(100.0 - f64::from(k), k))
            .collect();
        assert!(decode(crowded).is_err());
    }
}
