//! Ordered key to posting-list storage
//!
//! The per-field index only needs a small contract from its container:
//! point lookup, insert-if-absent, an ascending cursor, and teardown. Any
//! ordered associative structure (a disk-paged B-tree, an in-memory sorted
//! map, a skip list) can stand behind [`KeyedStore`]; the crate ships the
//! in-memory [`BTreeStore`].

mod btree;

use std::sync::Arc;

use crate::posting::PostingNode;
use crate::Result;

pub use btree::BTreeStore;

/// Contract the per-field index requires of its keyed container.
///
/// Implementations must be safe for concurrent `find` and `insert_unique`
/// from multiple threads.
pub trait KeyedStore: Send + Sync {
    /// Point lookup; the returned handle shares ownership of the node
    fn find(&self, key: &[u8]) -> Option<Arc<PostingNode>>;

    /// Insert under an absent key; `KeyExists` when the key is present
    fn insert_unique(&self, key: &[u8], node: Arc<PostingNode>) -> Result<()>;

    /// Ascending cursor over `(key, node)` pairs starting at `start`
    /// (`None` iterates everything)
    fn iterate_from(
        &self,
        start: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Box<[u8]>, Arc<PostingNode>)> + Send>;

    /// Number of distinct keys
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the store; every held node is dropped
    fn close(&self);
}
