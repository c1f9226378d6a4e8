//! Glues a [`Document`] to its [`HandleIndex`] so every mutation keeps both
//! in sync in one call: parse bytes → document; lookup element by
//! `hvml:handle`; apply a mutation op; destroy.

use crate::error::{DomError, Result};
use crate::handle_index::HandleIndex;
use crate::tree::{self, Document, InsertPosition, Node, NodeId, HVML_HANDLE_ATTR};

pub struct IndexedDocument {
    pub doc: Document,
    pub index: HandleIndex,
}

/// The element-mutation family: `update`'s property assignment plus the
/// subtree ops `displace`/`append`/`prepend`/`insertBefore`/
/// `insertAfter`/`clear`/`erase`.
#[derive(Debug, Clone)]
pub enum MutationOp<'a> {
    /// Set `property` (`"textContent"` or `"attr.<name>"`) to the UTF-8
    /// content of `data`.
    Update { property: &'a str, data: &'a [u8] },
    Displace { markup: &'a [u8] },
    Append { markup: &'a [u8] },
    Prepend { markup: &'a [u8] },
    InsertBefore { markup: &'a [u8] },
    InsertAfter { markup: &'a [u8] },
    Clear,
    Erase,
}

impl IndexedDocument {
    pub fn parse(markup: &[u8]) -> Result<Self> {
        let (doc, created) = tree::parse_document(markup)?;
        let mut index = HandleIndex::new();
        index.index_nodes(&doc, &created);
        Ok(Self { doc, index })
    }

    pub fn find_by_handle(&self, handle: u64) -> Option<NodeId> {
        self.index.find(handle)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.doc.get(id)
    }

    /// Apply one mutation op to the element at `target`. On success, the
    /// handle index has already been updated to reflect any nodes added or
    /// removed.
    pub fn apply(&mut self, target: NodeId, op: MutationOp<'_>) -> Result<()> {
        match op {
            MutationOp::Update { property, data } => {
                let text = std::str::from_utf8(data)
                    .map_err(|_| DomError::ParseError("non-UTF8 property value".into()))?;
                if property == "textContent" {
                    self.doc.get(target).ok_or(DomError::UnknownHandle(0))?;
                    // textContent replaces children with a single text node;
                    // deindex the replaced subtree the same way Clear does,
                    // then stash the text as a synthetic attr so readers
                    // needing it can fetch via `text_content_of`.
                    let removed = self.doc.clear_children(target);
                    self.index.deindex_nodes(&self.doc, &removed);
                    let node = self.doc.get_mut(target).ok_or(DomError::UnknownHandle(0))?;
                    node.set_attr("__textContent", text);
                } else if let Some(name) = property.strip_prefix("attr.") {
                    let node = self.doc.get_mut(target).ok_or(DomError::UnknownHandle(0))?;
                    node.set_attr(name, text);
                } else {
                    return Err(DomError::UnsupportedProperty(property.to_string()));
                }
                Ok(())
            }
            MutationOp::Displace { markup } => {
                let (removed, added) = self.doc.displace(target, markup)?;
                self.index.deindex_nodes(&self.doc, &removed);
                self.index.index_nodes(&self.doc, &added);
                Ok(())
            }
            MutationOp::Append { markup } => {
                let added = self
                    .doc
                    .insert_fragment(target, InsertPosition::Append, markup)?;
                self.index.index_nodes(&self.doc, &added);
                Ok(())
            }
            MutationOp::Prepend { markup } => {
                let added = self
                    .doc
                    .insert_fragment(target, InsertPosition::Prepend, markup)?;
                self.index.index_nodes(&self.doc, &added);
                Ok(())
            }
            MutationOp::InsertBefore { markup } => {
                let parent = self
                    .doc
                    .get(target)
                    .and_then(|n| n.parent)
                    .ok_or(DomError::NoParent)?;
                let added = self
                    .doc
                    .insert_fragment(parent, InsertPosition::Before(target), markup)?;
                self.index.index_nodes(&self.doc, &added);
                Ok(())
            }
            MutationOp::InsertAfter { markup } => {
                let parent = self
                    .doc
                    .get(target)
                    .and_then(|n| n.parent)
                    .ok_or(DomError::NoParent)?;
                let added = self
                    .doc
                    .insert_fragment(parent, InsertPosition::After(target), markup)?;
                self.index.index_nodes(&self.doc, &added);
                Ok(())
            }
            MutationOp::Clear => {
                let removed = self.doc.clear_children(target);
                self.index.deindex_nodes(&self.doc, &removed);
                Ok(())
            }
            MutationOp::Erase => {
                let removed = self.doc.remove_subtree(target);
                self.index.deindex_nodes(&self.doc, &removed);
                Ok(())
            }
        }
    }
}

/// Read back the synthetic `textContent` an `update` assigned, or the
/// element's literal text children if none was ever assigned.
pub fn text_content_of(doc: &Document, id: NodeId) -> String {
    if let Some(node) = doc.get(id) {
        if let Some(tc) = node.attr("__textContent") {
            return tc.to_string();
        }
        return node
            .children
            .iter()
            .filter_map(|&c| doc.get(c))
            .map(|n| n.text_content())
            .collect();
    }
    String::new()
}

pub const HANDLE_ATTR: &str = HVML_HANDLE_ATTR;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_text_content() {
        let mut idoc =
            IndexedDocument::parse(b"<html><body><div hvml:handle='3'></div></body></html>").unwrap();
        let el = idoc.find_by_handle(3).unwrap();
        idoc.apply(el, MutationOp::Update { property: "textContent", data: b"hi" })
            .unwrap();
        assert_eq!(text_content_of(&idoc.doc, el), "hi");
    }

    #[test]
    fn update_text_content_deindexes_replaced_descendants() {
        let mut idoc = IndexedDocument::parse(
            b"<html><body><div hvml:handle='1'><span hvml:handle='2'></span></div></body></html>",
        )
        .unwrap();
        let div = idoc.find_by_handle(1).unwrap();
        idoc.apply(div, MutationOp::Update { property: "textContent", data: b"hi" })
            .unwrap();
        assert!(idoc.find_by_handle(1).is_some());
        assert!(idoc.find_by_handle(2).is_none());
        assert_eq!(text_content_of(&idoc.doc, div), "hi");
    }

    #[test]
    fn append_indexes_new_handles() {
        let mut idoc = IndexedDocument::parse(b"<html><body></body></html>").unwrap();
        let body = idoc
            .doc
            .get(idoc.doc.root)
            .unwrap()
            .children
            .iter()
            .find(|&&c| idoc.doc.get(c).unwrap().tag() == Some("body"))
            .copied()
            .unwrap();
        idoc.apply(body, MutationOp::Append { markup: b"<span hvml:handle='9'></span>" })
            .unwrap();
        assert!(idoc.find_by_handle(9).is_some());
    }

    #[test]
    fn erase_deindexes_subtree() {
        let mut idoc = IndexedDocument::parse(
            b"<html><body><div hvml:handle='1'><span hvml:handle='2'></span></div></body></html>",
        )
        .unwrap();
        let div = idoc.find_by_handle(1).unwrap();
        idoc.apply(div, MutationOp::Erase).unwrap();
        assert!(idoc.find_by_handle(1).is_none());
        assert!(idoc.find_by_handle(2).is_none());
    }

    /// Every live element carrying `hvml:handle` has exactly one entry in
    /// the handle index, after any sequence of append/erase/clear.
    fn assert_index_matches_tree(idoc: &IndexedDocument) {
        let mut live_handles = Vec::new();
        idoc.doc.walk_preorder(idoc.doc.root, |id, node| {
            if node.is_element() {
                if let Some(raw) = node.attr(tree::HVML_HANDLE_ATTR) {
                    if let Ok(h) = u64::from_str_radix(raw, 16) {
                        live_handles.push((h, id));
                    }
                }
            }
        });
        assert_eq!(live_handles.len(), idoc.index.len());
        for (h, id) in live_handles {
            assert_eq!(idoc.index.find(h), Some(id));
        }
    }

    proptest::proptest! {
        #[test]
        fn handle_index_stays_consistent_through_mutations(handles in proptest::collection::vec(1u64..64, 1..8)) {
            let mut markup = String::from("<html><body>");
            for h in &handles {
                markup.push_str(&format!("<div hvml:handle='{h:x}'></div>"));
            }
            markup.push_str("</body></html>");
            let mut idoc = IndexedDocument::parse(markup.as_bytes()).unwrap();
            assert_index_matches_tree(&idoc);

            let body = idoc
                .doc
                .get(idoc.doc.root)
                .unwrap()
                .children
                .iter()
                .find(|&&c| idoc.doc.get(c).unwrap().tag() == Some("body"))
                .copied()
                .unwrap();

            // Append a fresh handle, then erase the first original one.
            idoc.apply(body, MutationOp::Append { markup: b"<span hvml:handle='ff'></span>" }).unwrap();
            assert_index_matches_tree(&idoc);

            if let Some(&first) = handles.first() {
                if let Some(target) = idoc.find_by_handle(first) {
                    idoc.apply(target, MutationOp::Erase).unwrap();
                    assert_index_matches_tree(&idoc);
                }
            }

            idoc.apply(body, MutationOp::Clear).unwrap();
            assert_index_matches_tree(&idoc);
        }
    }
}
