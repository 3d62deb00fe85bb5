//! In-memory ordered map store

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::StoreParams;
use crate::error::IndexError;
use crate::models::FieldId;
use crate::posting::PostingNode;
use crate::store::KeyedStore;
use crate::Result;

/// Ordered in-memory key to posting-node map.
///
/// Posting lists are not persistent across restarts, so the map keeps
/// everything in memory; opening a directory previously used by a
/// disk-backed store removes its stale per-field files so the field starts
/// fresh either way.
pub struct BTreeStore {
    entries: RwLock<Option<BTreeMap<Box<[u8]>, Arc<PostingNode>>>>,
}

impl BTreeStore {
    pub fn open(path: &Path, field_id: FieldId, params: &StoreParams) -> Self {
        for stale in [
            path.join(format!("main_{field_id}.dis")),
            path.join(format!("cache_{field_id}.dis")),
        ] {
            if stale.exists() {
                if let Err(err) = std::fs::remove_file(&stale) {
                    warn!(file = %stale.display(), %err, "could not remove stale store file");
                }
            }
        }
        debug!(
            field_id,
            mainbits = params.mainbits,
            poolsize = params.poolsize,
            maxleaves = params.maxleaves,
            "opened in-memory keyed store"
        );
        Self {
            entries: RwLock::new(Some(BTreeMap::new())),
        }
    }
}

impl KeyedStore for BTreeStore {
    fn find(&self, key: &[u8]) -> Option<Arc<PostingNode>> {
        self.entries.read().as_ref()?.get(key).cloned()
    }

    fn insert_unique(&self, key: &[u8], node: Arc<PostingNode>) -> Result<()> {
        let mut guard = self.entries.write();
        let entries = guard.as_mut().ok_or(IndexError::StoreClosed)?;
        if entries.contains_key(key) {
            return Err(IndexError::KeyExists);
        }
        entries.insert(key.into(), node);
        Ok(())
    }

    fn iterate_from(
        &self,
        start: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Box<[u8]>, Arc<PostingNode>)> + Send> {
        // snapshot cursor: node handles are cheap clones, and collecting
        // under the read guard keeps lock hold times short
        let guard = self.entries.read();
        let snapshot: Vec<_> = match guard.as_ref() {
            Some(entries) => {
                let lower = match start {
                    Some(key) => Bound::Included(key),
                    None => Bound::Unbounded,
                };
                entries
                    .range::<[u8], _>((lower, Bound::Unbounded))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
            None => Vec::new(),
        };
        Box::new(snapshot.into_iter())
    }

    fn len(&self) -> usize {
        self.entries.read().as_ref().map_or(0, BTreeMap::len)
    }

    fn close(&self) {
        self.entries.write().take();
    }
}
