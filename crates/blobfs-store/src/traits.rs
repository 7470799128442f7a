use crate::resource::{BlobHandle, BlobSource};
use crate::{BlobError, BlobId, Result};

/// Storage of binary large objects behind opaque ids.
///
/// Callers typically keep the id (as a string, see [`BlobStore::create_id`])
/// in some other metadata record and come back with it later.
pub trait BlobStore: Send + Sync {
    /// Save the content of `source` as a new blob and return its id.
    fn save(&self, source: &mut dyn BlobSource) -> Result<BlobId>;

    /// Look up a blob. Never fails: a missing blob yields an unavailable
    /// handle.
    fn find(&self, id: &BlobId) -> BlobHandle;

    /// Like [`BlobStore::find`] but a missing blob is [`BlobError::NotFound`].
    fn load(&self, id: &BlobId) -> Result<BlobHandle> {
        let handle = self.find(id);
        if handle.is_available() {
            Ok(handle)
        } else {
            Err(BlobError::NotFound { id: id.to_string() })
        }
    }

    /// Delete a blob. Returns `false` if there was nothing to delete.
    fn delete(&self, id: &BlobId) -> Result<bool>;

    /// Turn the string form of an id back into an id.
    fn create_id(&self, id: &str) -> Result<BlobId> {
        BlobId::parse(id)
    }
}
