//! Exhaustive search of a single block
//!
//! For every key of the block the worker:
//! - decrypts the ciphertext (respecting IV and byte limit)
//! - scores the plaintext with the job's cost function
//! - offers the candidate to a fresh [`TopList`]
//!
//! The loop takes no locks. Cancellation is polled every
//! `cancel_check_interval` keys, progress is reported every
//! `progress_interval` keys and once more at the end.

use crate::config::SearchTuning;
use crate::error::{BlockOutcome, WorkerError};
use crate::keyspace::{BlockId, KeyRange};
use crate::search::{BlockProgress, BlockResult, CancelToken, JobContext, TopList};
use tracing::{debug, trace};

/// Searches blocks of one job
pub struct BlockWorker<'a> {
    ctx: &'a JobContext,
    tuning: SearchTuning,
}

impl<'a> BlockWorker<'a> {
    pub fn new(ctx: &'a JobContext, tuning: SearchTuning) -> Self {
        Self { ctx, tuning }
    }

    /// Search every key in `range`
    ///
    /// Returns [`BlockOutcome::Cancelled`] without a result if `cancel` fires
    /// before the block is exhausted. Collaborator errors abort the block.
    pub fn compute_block<F>(
        &self,
        block_id: &BlockId,
        range: &KeyRange,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<BlockOutcome, WorkerError>
    where
        F: FnMut(BlockProgress),
    {
        let ctx = self.ctx;
        let cancel_every = self.tuning.cancel_check_interval.max(1);
        let report_every = self.tuning.progress_interval.max(1);

        let fail = |source| WorkerError::BlockFailed {
            block: block_id.clone(),
            source,
        };

        if cancel.is_cancelled() {
            return Ok(BlockOutcome::Cancelled {
                block_id: block_id.clone(),
                evaluated: 0,
            });
        }

        let mut keys = ctx.key_iterator();
        keys.set_keys(range).map_err(fail)?;

        debug!(block = %block_id, range = %range, "Searching block");

        let mut top = TopList::new(ctx.relation());
        let mut evaluated: u64 = 0;

        while keys.next_key() {
            let key = keys.key();
            let plaintext = ctx
                .decryptor
                .decrypt(&ctx.ciphertext, key, &ctx.iv, ctx.bytes_to_use)
                .map_err(fail)?;
            let cost = ctx.cost.calculate_cost(&plaintext).map_err(fail)?;

            if top.qualifies(cost) {
                // Scored on a prefix; keep the whole plaintext for the list
                let decryption = if ctx.bytes_to_use == 0 {
                    plaintext
                } else {
                    ctx.decryptor
                        .decrypt(&ctx.ciphertext, key, &ctx.iv, 0)
                        .map_err(fail)?
                };
                top.offer(cost, key, decryption);
            }
            evaluated += 1;

            if evaluated % cancel_every == 0 && cancel.is_cancelled() {
                debug!(block = %block_id, evaluated, "Block cancelled");
                return Ok(BlockOutcome::Cancelled {
                    block_id: block_id.clone(),
                    evaluated,
                });
            }
            if evaluated % report_every == 0 {
                progress(BlockProgress {
                    evaluated,
                    block_size: range.len,
                });
            }
        }

        progress(BlockProgress {
            evaluated,
            block_size: range.len,
        });
        trace!(
            block = %block_id,
            evaluated,
            best = top.best().map(|c| c.cost),
            "Block finished"
        );

        Ok(BlockOutcome::Completed(BlockResult {
            block_id: block_id.clone(),
            local_results: top,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CostFunction, IndexOfCoincidence, RelationOperator, XorCipher};
    use crate::error::{CapabilityError, CapabilityResult};
    use crate::keyspace::{KeyEncoding, KeyPattern};
    use num_bigint::BigUint;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn xor_context(plaintext: &[u8], key: u8) -> JobContext {
        let ciphertext = XorCipher::encrypt(plaintext, &[key]).unwrap();
        let pattern = KeyPattern::new("[0-9A-F][0-9A-F]", KeyEncoding::Hex).unwrap();
        JobContext::new(
            ciphertext,
            Arc::new(XorCipher),
            Arc::new(IndexOfCoincidence),
            Arc::new(pattern),
        )
    }

    struct FailingCost;

    impl CostFunction for FailingCost {
        fn calculate_cost(&self, _plaintext: &[u8]) -> CapabilityResult<f64> {
            Err(CapabilityError::Cost("model missing".into()))
        }

        fn relation_operator(&self) -> RelationOperator {
            RelationOperator::Minimize
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Cancels the given token after a number of evaluations
    struct CancellingCost {
        token: CancelToken,
        after: u64,
        calls: AtomicU64,
    }

    impl CostFunction for CancellingCost {
        fn calculate_cost(&self, plaintext: &[u8]) -> CapabilityResult<f64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.token.cancel();
            }
            IndexOfCoincidence.calculate_cost(plaintext)
        }

        fn relation_operator(&self) -> RelationOperator {
            RelationOperator::Maximize
        }

        fn name(&self) -> &str {
            "cancelling"
        }
    }

    #[test]
    fn test_finds_key_in_block() {
        let ctx = xor_context(
            b"thequickbrownfoxjumpsoverthelazydogthequickbrownfoxjumpsoverthelazydog",
            0x42,
        );
        let worker = BlockWorker::new(&ctx, SearchTuning::default());
        let range = KeyRange::new(BigUint::from(64u32), 64);

        let outcome = worker
            .compute_block(&BigUint::from(1u32), &range, &CancelToken::new(), |_| {})
            .unwrap();
        let result = outcome.into_result().unwrap();
        assert_eq!(result.local_results.len(), 10);
        assert_eq!(result.local_results.best().unwrap().key_bytes, vec![0x42]);
    }

    #[test]
    fn test_prefix_scoring_keeps_full_decryption() {
        let plaintext: &[u8] = b"thequickbrownfoxjumpsoverthelazydogthequickbrownfoxjumpsoverthelazydog";
        let ctx = xor_context(plaintext, 0x42).with_bytes_to_use(20);
        let worker = BlockWorker::new(&ctx, SearchTuning::default());
        // Many keys tie on a short prefix; start the block at the real key
        let range = KeyRange::new(BigUint::from(0x42u32), 16);

        let result = worker
            .compute_block(&BigUint::from(1u32), &range, &CancelToken::new(), |_| {})
            .unwrap()
            .into_result()
            .unwrap();
        let best = result.local_results.best().unwrap();
        assert_eq!(best.key_bytes, vec![0x42]);
        assert_eq!(best.decryption, plaintext);
        assert!(result
            .local_results
            .iter()
            .all(|c| c.decryption.len() == plaintext.len()));
    }

    #[test]
    fn test_progress_reported() {
        let ctx = xor_context(b"some text", 0x01);
        let tuning = SearchTuning {
            cancel_check_interval: 4,
            progress_interval: 8,
        };
        let worker = BlockWorker::new(&ctx, tuning);
        let mut reports = Vec::new();
        worker
            .compute_block(
                &BigUint::from(0u32),
                &KeyRange::new(BigUint::from(0u32), 20),
                &CancelToken::new(),
                |p| reports.push(p.evaluated),
            )
            .unwrap();
        assert_eq!(reports, vec![8, 16, 20]);
    }

    #[test]
    fn test_cancellation_within_interval() {
        let token = CancelToken::new();
        let cost = Arc::new(CancellingCost {
            token: token.clone(),
            after: 10,
            calls: AtomicU64::new(0),
        });
        let mut ctx = xor_context(b"abc", 0x10);
        ctx.cost = cost.clone();

        let tuning = SearchTuning {
            cancel_check_interval: 16,
            progress_interval: 1_000,
        };
        let outcome = BlockWorker::new(&ctx, tuning)
            .compute_block(
                &BigUint::from(0u32),
                &KeyRange::new(BigUint::from(0u32), 256),
                &token,
                |_| {},
            )
            .unwrap();

        match outcome {
            BlockOutcome::Cancelled { evaluated, .. } => assert_eq!(evaluated, 16),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(cost.calls.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_collaborator_error_aborts_block() {
        let mut ctx = xor_context(b"abc", 0x10);
        ctx.cost = Arc::new(FailingCost);
        let err = BlockWorker::new(&ctx, SearchTuning::default())
            .compute_block(
                &BigUint::from(2u32),
                &KeyRange::new(BigUint::from(0u32), 4),
                &CancelToken::new(),
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, WorkerError::BlockFailed { .. }));
    }

    #[test]
    fn test_range_outside_space_fails() {
        let ctx = xor_context(b"abc", 0x10);
        let err = BlockWorker::new(&ctx, SearchTuning::default())
            .compute_block(
                &BigUint::from(0u32),
                &KeyRange::new(BigUint::from(250u32), 10),
                &CancelToken::new(),
                |_| {},
            )
            .unwrap_err();
        assert!(err.to_string().contains("exceeds key space"));
    }
}
