//! The per-document `hvml:handle` → element index.
//!
//! A sorted map keyed by `u64` gives add/remove/find in O(log n); subtree
//! walks add or remove many entries at once when a mutation grafts in or
//! tears out a chunk of the tree.

use std::collections::BTreeMap;

use crate::tree::{Document, NodeId, HVML_HANDLE_ATTR};

#[derive(Debug, Default)]
pub struct HandleIndex {
    by_handle: BTreeMap<u64, NodeId>,
}

impl HandleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: u64, id: NodeId) {
        self.by_handle.insert(handle, id);
    }

    pub fn remove(&mut self, handle: u64) -> Option<NodeId> {
        self.by_handle.remove(&handle)
    }

    pub fn find(&self, handle: u64) -> Option<NodeId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Walk every element in `ids` (comments/text/cdata/doctype nodes are
    /// skipped) and index any `hvml:handle` attribute found.
    pub fn index_nodes(&mut self, doc: &Document, ids: &[NodeId]) {
        for &id in ids {
            let Some(node) = doc.get(id) else { continue };
            if !node.is_element() {
                continue;
            }
            if let Some(raw) = node.attr(HVML_HANDLE_ATTR) {
                if let Ok(handle) = u64::from_str_radix(raw, 16) {
                    self.add(handle, id);
                }
            }
        }
    }

    /// Remove every entry in `ids` from the index (used when a subtree is
    /// torn out by `erase`/`clear`/`displace`).
    pub fn deindex_nodes(&mut self, doc: &Document, ids: &[NodeId]) {
        for &id in ids {
            // The node may already be dead (removed from the arena) by the
            // time we deindex it; fall back to a linear scrub in that case.
            if let Some(node) = doc.get(id) {
                if let Some(raw) = node.attr(HVML_HANDLE_ATTR) {
                    if let Ok(handle) = u64::from_str_radix(raw, 16) {
                        self.remove(handle);
                        continue;
                    }
                }
            }
            self.by_handle.retain(|_, &mut v| v != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse_document;

    #[test]
    fn index_tracks_handles_through_mutation() {
        let (mut doc, ids) = parse_document(
            b"<html><body><div hvml:handle='1'><span hvml:handle='2'></span></div></body></html>",
        )
        .unwrap();
        let mut index = HandleIndex::new();
        index.index_nodes(&doc, &ids);
        assert_eq!(index.len(), 2);
        assert!(index.find(1).is_some());
        assert!(index.find(2).is_some());

        let div = index.find(1).unwrap();
        let removed = doc.remove_subtree(div);
        index.deindex_nodes(&doc, &removed);
        assert_eq!(index.len(), 0);
    }
}
