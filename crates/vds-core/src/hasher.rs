//! Optional content-hash verification.
//!
//! The store normally trusts the `_id` a caller supplies. With verification
//! enabled, [`Project::insert_object`](crate::Project::insert_object)
//! recomputes the hash of the payload and refuses objects whose id disagrees.

use vds_types::{Object, ObjectHash, TypeError};

use crate::error::{StorageError, StorageResult};

/// Computes the content hash an object *should* carry.
pub trait ObjectHasher: Send + Sync {
    fn hash(&self, object: &Object) -> StorageResult<ObjectHash>;

    /// Check that `object`'s id equals its computed hash.
    fn verify(&self, object: &Object) -> StorageResult<()> {
        let computed = self.hash(object)?;
        if &computed == object.hash() {
            Ok(())
        } else {
            Err(StorageError::HashMismatch {
                claimed: object.hash().clone(),
                computed,
            })
        }
    }
}

/// BLAKE3 over the canonical JSON of the payload (every field except `_id`,
/// keys in sorted order), rendered as `#` followed by lowercase hex.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3ObjectHasher;

impl ObjectHasher for Blake3ObjectHasher {
    fn hash(&self, object: &Object) -> StorageResult<ObjectHash> {
        let bytes = serde_json::to_vec(&object.payload())
            .map_err(|e| TypeError::InvalidDocument(e.to_string()))?;
        let digest = blake3::hash(&bytes);
        Ok(ObjectHash::parse(&format!(
            "{}{}",
            ObjectHash::SIGIL,
            hex::encode(digest.as_bytes())
        ))?)
    }
}
