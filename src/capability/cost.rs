//! Plaintext cost functions

use crate::capability::{CostFunction, RelationOperator};
use crate::error::CapabilityResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cost functions a job definition can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    /// Index of coincidence (maximize)
    #[default]
    IndexOfCoincidence,

    /// Shannon entropy (minimize)
    Entropy,
}

impl CostKind {
    pub fn build(&self) -> Arc<dyn CostFunction> {
        match self {
            CostKind::IndexOfCoincidence => Arc::new(IndexOfCoincidence),
            CostKind::Entropy => Arc::new(ShannonEntropy),
        }
    }
}

/// Index of coincidence of the letters a-z, case-insensitive
///
/// Letter coincidences are measured against every byte pair of the
/// plaintext, so bytes outside the alphabet lower the score. Letter-only
/// English scores around 0.066. Fewer than two letters score 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOfCoincidence;

impl CostFunction for IndexOfCoincidence {
    fn calculate_cost(&self, plaintext: &[u8]) -> CapabilityResult<f64> {
        let mut counts = [0u64; 26];
        let mut letters = 0u64;
        for &b in plaintext {
            let lower = b.to_ascii_lowercase();
            if lower.is_ascii_lowercase() {
                counts[(lower - b'a') as usize] += 1;
                letters += 1;
            }
        }
        if letters < 2 {
            return Ok(0.0);
        }
        let total = plaintext.len() as u64;
        let pairs: u64 = counts.iter().map(|&n| n * n.saturating_sub(1)).sum();
        Ok(pairs as f64 / (total * (total - 1)) as f64)
    }

    fn relation_operator(&self) -> RelationOperator {
        RelationOperator::Maximize
    }

    fn name(&self) -> &str {
        "ioc"
    }
}

/// Shannon entropy of the byte distribution, in bits per byte
#[derive(Debug, Clone, Copy, Default)]
pub struct ShannonEntropy;

impl CostFunction for ShannonEntropy {
    fn calculate_cost(&self, plaintext: &[u8]) -> CapabilityResult<f64> {
        if plaintext.is_empty() {
            return Ok(0.0);
        }
        let mut counts = [0u64; 256];
        for &b in plaintext {
            counts[b as usize] += 1;
        }
        let len = plaintext.len() as f64;
        let entropy: f64 = counts
            .iter()
            .filter(|&&n| n > 0)
            .map(|&n| {
                let p = n as f64 / len;
                -p * p.log2()
            })
            .sum();
        Ok(entropy)
    }

    fn relation_operator(&self) -> RelationOperator {
        RelationOperator::Minimize
    }

    fn name(&self) -> &str {
        "entropy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioc_values() {
        let ioc = IndexOfCoincidence;
        assert_eq!(ioc.calculate_cost(b"").unwrap(), 0.0);
        assert_eq!(ioc.calculate_cost(b"a!!").unwrap(), 0.0);
        assert_eq!(ioc.calculate_cost(b"aA").unwrap(), 1.0);
        assert_eq!(ioc.calculate_cost(b"ab").unwrap(), 0.0);
        // Non-letters dilute the score
        assert_eq!(ioc.calculate_cost(b"aa..").unwrap(), 2.0 / 12.0);

        let english = ioc
            .calculate_cost(b"the quick brown fox jumps over the lazy dog and then sleeps in the sun")
            .unwrap();
        let noise = ioc.calculate_cost(&[0xF3, 0x91, 0x07, 0x44, 0x2C]).unwrap();
        assert!(english > noise);
    }

    #[test]
    fn test_entropy_values() {
        let h = ShannonEntropy;
        assert_eq!(h.calculate_cost(b"aaaa").unwrap(), 0.0);
        assert!((h.calculate_cost(b"abab").unwrap() - 1.0).abs() < 1e-12);
        let all: Vec<u8> = (0..=255).collect();
        assert!((h.calculate_cost(&all).unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_relation_operators() {
        assert_eq!(
            CostKind::IndexOfCoincidence.build().relation_operator(),
            RelationOperator::Maximize
        );
        assert_eq!(CostKind::Entropy.build().relation_operator(), RelationOperator::Minimize);
    }
}
