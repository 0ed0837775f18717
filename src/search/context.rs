//! Read-only inputs shared by every block of a job

use crate::capability::{CostFunction, Decryptor, KeyIterator, RelationOperator};
use crate::keyspace::KeySpace;
use std::fmt;
use std::sync::Arc;

/// Everything a block search needs. Shared across worker threads.
#[derive(Clone)]
pub struct JobContext {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    /// Bytes of ciphertext to decrypt per key (0 = all)
    pub bytes_to_use: usize,
    pub decryptor: Arc<dyn Decryptor>,
    pub cost: Arc<dyn CostFunction>,
    pub key_space: Arc<dyn KeySpace>,
}

impl JobContext {
    pub fn new(
        ciphertext: Vec<u8>,
        decryptor: Arc<dyn Decryptor>,
        cost: Arc<dyn CostFunction>,
        key_space: Arc<dyn KeySpace>,
    ) -> Self {
        Self {
            ciphertext,
            iv: Vec::new(),
            bytes_to_use: 0,
            decryptor,
            cost,
            key_space,
        }
    }

    pub fn with_iv(mut self, iv: Vec<u8>) -> Self {
        self.iv = iv;
        self
    }

    pub fn with_bytes_to_use(mut self, bytes_to_use: usize) -> Self {
        self.bytes_to_use = bytes_to_use;
        self
    }

    /// Whether lower or higher costs win for this job
    pub fn relation(&self) -> RelationOperator {
        self.cost.relation_operator()
    }

    /// A key iterator translated for this job's cipher
    pub fn key_iterator(&self) -> Box<dyn KeyIterator> {
        self.decryptor.key_translator(self.key_space.as_ref())
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iv_len", &self.iv.len())
            .field("bytes_to_use", &self.bytes_to_use)
            .field("decryptor", &self.decryptor.name())
            .field("cost", &self.cost.name())
            .field("key_space_size", &self.key_space.size())
            .finish()
    }
}
