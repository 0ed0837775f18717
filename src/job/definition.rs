//! Job definition documents
//!
//! A job definition is the serialized description of a search: what to
//! decrypt, which keys to try, how to score them and how to split the work.
//! It travels inside a [`JobPayload`](crate::job::JobPayload) as JSON bytes.

use crate::capability::{CipherKind, CostKind};
use crate::error::{CapabilityResult, PartitionError, PayloadError, PayloadResult};
use crate::keyspace::{ChunkStrategy, KeyEncoding, KeyPattern, KeySpace, KeyspacePartitioner};
use crate::search::JobContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hex-encoded blake3 digest of a job definition document
pub type IntegrityHash = String;

/// Serializable description of a key search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Human-readable job name
    pub name: String,

    pub ciphertext: Vec<u8>,

    #[serde(default)]
    pub iv: Vec<u8>,

    /// Bytes of ciphertext decrypted per key (0 = all)
    #[serde(default)]
    pub bytes_to_use: usize,

    /// Key pattern, e.g. `[0-9A-F][0-9A-F]`
    pub key_pattern: String,

    #[serde(default)]
    pub key_encoding: KeyEncoding,

    #[serde(default)]
    pub cipher: CipherKind,

    #[serde(default)]
    pub cost: CostKind,

    #[serde(default)]
    pub chunking: ChunkStrategy,
}

impl JobDefinition {
    /// Encode as a JSON document
    pub fn to_document(&self) -> PayloadResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON document
    pub fn from_document(document: &[u8]) -> PayloadResult<Self> {
        serde_json::from_slice(document).map_err(PayloadError::from)
    }

    /// Parse the key pattern
    pub fn key_space(&self) -> CapabilityResult<KeyPattern> {
        KeyPattern::new(&self.key_pattern, self.key_encoding)
    }

    /// Build the shared search context
    pub fn build_context(&self) -> CapabilityResult<JobContext> {
        let pattern = self.key_space()?;
        Ok(JobContext::new(
            self.ciphertext.clone(),
            self.cipher.build(),
            self.cost.build(),
            Arc::new(pattern),
        )
        .with_iv(self.iv.clone())
        .with_bytes_to_use(self.bytes_to_use))
    }

    /// Partition the key space of `ctx` using this job's chunking
    pub fn partitioner(&self, ctx: &JobContext) -> Result<KeyspacePartitioner, PartitionError> {
        KeyspacePartitioner::with_strategy(ctx.key_space.size(), self.chunking)
    }
}

/// Integrity hash of a definition document
pub fn integrity_hash(document: &[u8]) -> IntegrityHash {
    blake3::hash(document).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn definition() -> JobDefinition {
        JobDefinition {
            name: "demo".into(),
            ciphertext: vec![1, 2, 3],
            iv: Vec::new(),
            bytes_to_use: 0,
            key_pattern: "[0-9A-F][0-9A-F]".into(),
            key_encoding: KeyEncoding::Hex,
            cipher: CipherKind::Xor,
            cost: CostKind::IndexOfCoincidence,
            chunking: ChunkStrategy::ChunkSize(16),
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let def = definition();
        let doc = def.to_document().unwrap();
        assert_eq!(JobDefinition::from_document(&doc).unwrap(), def);
    }

    #[test]
    fn test_defaults_when_fields_missing() {
        let doc = br#"{"name":"n","ciphertext":[7],"key_pattern":"[ab]"}"#;
        let def = JobDefinition::from_document(doc).unwrap();
        assert_eq!(def.cost, CostKind::IndexOfCoincidence);
        assert_eq!(def.key_encoding, KeyEncoding::Hex);
        assert!(def.iv.is_empty());
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            JobDefinition::from_document(b"{not json"),
            Err(PayloadError::Definition(_))
        ));
    }

    #[test]
    fn test_build_context_and_partition() {
        let def = definition();
        let ctx = def.build_context().unwrap();
        assert_eq!(ctx.key_space.size(), BigUint::from(256u32));
        let partitioner = def.partitioner(&ctx).unwrap();
        assert_eq!(partitioner.block_count(), &BigUint::from(16u32));
    }

    #[test]
    fn test_integrity_hash_tracks_content() {
        let doc = definition().to_document().unwrap();
        let mut other = definition();
        other.name = "changed".into();
        let changed = other.to_document().unwrap();

        assert_eq!(integrity_hash(&doc), integrity_hash(&doc));
        assert_ne!(integrity_hash(&doc), integrity_hash(&changed));
        assert_eq!(integrity_hash(&doc).len(), 64);
    }
}
