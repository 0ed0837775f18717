//! Folding result lists together
//!
//! The runtime may deliver block results more than once, in any order, or
//! after a retry. Merging is therefore a pure function of its inputs: the
//! output only depends on the set of candidates offered, never on call order.

use crate::capability::RelationOperator;
use crate::search::toplist::{rank, CandidateResult, TopList, TOP_LIST_CAPACITY};
use std::collections::HashSet;

/// Merges result lists into a single bounded list
pub struct ResultMerger;

impl ResultMerger {
    /// Concatenate `new` and `old`, drop duplicate keys (keeping the best
    /// ranked copy), order best first and keep the top entries.
    pub fn merge(old: &TopList, new: &TopList) -> TopList {
        Self::merge_candidates(
            old.relation(),
            new.iter().chain(old.iter()).cloned().collect(),
        )
    }

    /// Fold an arbitrary list of candidates into a [`TopList`]
    pub fn merge_candidates(relation: RelationOperator, mut all: Vec<CandidateResult>) -> TopList {
        all.retain(|c| !c.cost.is_nan());
        all.sort_by(|a, b| rank(relation, a, b));

        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(TOP_LIST_CAPACITY);
        let mut kept = Vec::with_capacity(TOP_LIST_CAPACITY);
        for candidate in all {
            if kept.len() == TOP_LIST_CAPACITY {
                break;
            }
            if seen.insert(candidate.key_bytes.clone()) {
                kept.push(candidate);
            }
        }
        TopList::from_sorted(relation, kept)
    }
}
