//! A minimal, tolerant markup tree. Not a conforming HTML5 parser: it
//! recognizes just enough of tags/attributes/text/comments to host
//! `hvml:handle` attributes and the element-mutation operations the
//! session layer needs.

use std::collections::BTreeMap;

use crate::error::{DomError, Result};

/// Opaque arena index for a node. Stable for the node's lifetime; reused
/// slots are never handed out while a live reference could alias them
/// because `Document` never shrinks the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

pub const HVML_HANDLE_ATTR: &str = "hvml:handle";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
    Comment(String),
    Cdata(String),
    Doctype(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    live: bool,
}

impl Node {
    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).map(|s| s.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if let NodeKind::Element { attrs, .. } = &mut self.kind {
            attrs.insert(name.into(), value.into());
        }
    }

    pub fn text_content(&self) -> String {
        match &self.kind {
            NodeKind::Text(t) => t.clone(),
            _ => String::new(),
        }
    }
}

/// An arena-backed document. Element lookup by `hvml:handle` goes through
/// the sibling [`crate::handle_index::HandleIndex`], not through this type.
pub struct Document {
    arena: Vec<Node>,
    pub root: NodeId,
}

impl Document {
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id.0).filter(|n| n.live)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.arena.get_mut(id.0).filter(|n| n.live)
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.arena.len());
        self.arena.push(node);
        id
    }

    /// Pre-order walk of `root`'s subtree (root included).
    pub fn walk_preorder(&self, root: NodeId, mut visit: impl FnMut(NodeId, &Node)) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else { continue };
            visit(id, node);
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
    }

    /// Remove `id` and its entire subtree from the tree, detaching it from
    /// its parent's child list and marking every node in the subtree dead.
    /// Returns the ids removed, pre-order, so the caller can deindex them.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        if let Some(node) = self.get(id) {
            if let Some(parent) = node.parent {
                if let Some(parent_node) = self.get_mut(parent) {
                    parent_node.children.retain(|&c| c != id);
                }
            }
        }
        let mut removed = Vec::new();
        self.walk_preorder(id, |nid, _| removed.push(nid));
        for &nid in &removed {
            if let Some(n) = self.arena.get_mut(nid.0) {
                n.live = false;
            }
        }
        removed
    }

    /// Remove all children of `id`, returning the removed subtree ids
    /// (pre-order) so the caller can deindex them.
    pub fn clear_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = match self.get(id) {
            Some(node) => node.children.clone(),
            None => return Vec::new(),
        };
        let mut removed = Vec::new();
        for child in children {
            removed.extend(self.remove_subtree(child));
        }
        removed
    }

    /// Parse `markup` into a standalone subtree (its own set of nodes,
    /// unattached to any document) and graft it under `parent` at the given
    /// position, returning the ids of every node created (pre-order), so the
    /// caller can index them.
    pub fn insert_fragment(
        &mut self,
        parent: NodeId,
        position: InsertPosition,
        markup: &[u8],
    ) -> Result<Vec<NodeId>> {
        if self.get(parent).is_none() {
            return Err(DomError::UnknownHandle(0));
        }
        let roots = parse_fragment(markup, self)?;
        let mut created = Vec::new();
        for root in &roots {
            self.walk_preorder(*root, |id, _| created.push(id));
        }
        for (i, root) in roots.iter().enumerate() {
            if let Some(node) = self.get_mut(*root) {
                node.parent = Some(parent);
            }
            let Some(parent_node) = self.get_mut(parent) else {
                continue;
            };
            match position {
                InsertPosition::Append => parent_node.children.push(*root),
                InsertPosition::Prepend => parent_node.children.insert(i, *root),
                InsertPosition::Before(sibling) | InsertPosition::After(sibling) => {
                    let idx = parent_node
                        .children
                        .iter()
                        .position(|&c| c == sibling)
                        .unwrap_or(parent_node.children.len());
                    let at = match position {
                        InsertPosition::Before(_) => idx,
                        InsertPosition::After(_) => idx + 1,
                        _ => unreachable!(),
                    };
                    parent_node.children.insert(at + i, *root);
                }
            }
        }
        Ok(created)
    }

    /// Replace `id`'s entire subtree in-place with freshly parsed markup,
    /// reusing `id`'s own slot as the new root's element if the new markup's
    /// root is itself an element (matches the `displace` semantics: the
    /// target node survives, only its content changes).
    pub fn displace(&mut self, id: NodeId, markup: &[u8]) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
        let removed = self.clear_children(id);
        let roots = parse_fragment(markup, self)?;
        let mut added = Vec::new();
        for root in &roots {
            self.walk_preorder(*root, |nid, _| added.push(nid));
        }
        for root in &roots {
            if let Some(node) = self.get_mut(*root) {
                node.parent = Some(id);
            }
        }
        if let Some(node) = self.get_mut(id) {
            node.children = roots;
        }
        Ok((removed, added))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum InsertPosition {
    Append,
    Prepend,
    Before(NodeId),
    After(NodeId),
}

/// Parse a complete document: the returned [`Document`]'s root wraps every
/// top-level node under a synthetic root element so callers always have one
/// handle to address. Returns the ids created (pre-order) for convenience
/// when building the initial handle index.
pub fn parse_document(markup: &[u8]) -> Result<(Document, Vec<NodeId>)> {
    let mut doc = Document {
        arena: Vec::new(),
        root: NodeId(0),
    };
    doc.arena.push(Node {
        kind: NodeKind::Element {
            tag: "#document".to_string(),
            attrs: BTreeMap::new(),
        },
        parent: None,
        children: Vec::new(),
        live: true,
    });
    let roots = parse_fragment(markup, &mut doc)?;
    for root in &roots {
        if let Some(node) = doc.get_mut(*root) {
            node.parent = Some(doc.root);
        }
    }
    if let Some(root_node) = doc.get_mut(doc.root) {
        root_node.children = roots;
    }
    let mut created = vec![doc.root];
    doc.walk_preorder(doc.root, |id, _| {
        if id != doc.root {
            created.push(id);
        }
    });
    Ok((doc, created))
}

/// Parse `markup` as a forest of sibling nodes, allocating them into `doc`
/// but not attaching them to any parent. Used both for a full document
/// parse and for inserting fragments.
fn parse_fragment(markup: &[u8], doc: &mut Document) -> Result<Vec<NodeId>> {
    let text = std::str::from_utf8(markup)
        .map_err(|e| DomError::ParseError(format!("non-UTF8 markup: {e}")))?;
    let mut chars = text.char_indices().peekable();
    let mut stack: Vec<(NodeId, String)> = Vec::new();
    let mut roots: Vec<NodeId> = Vec::new();

    let push_child = |doc: &mut Document, stack: &[(NodeId, String)], roots: &mut Vec<NodeId>, id: NodeId| {
        if let Some((parent, _)) = stack.last() {
            if let Some(parent_node) = doc.get_mut(*parent) {
                parent_node.children.push(id);
            }
        } else {
            roots.push(id);
        }
    };

    while let Some(&(i, c)) = chars.peek() {
        if c == '<' {
            if text[i..].starts_with("<!--") {
                let end = text[i + 4..].find("-->").map(|p| i + 4 + p).unwrap_or(text.len());
                let content = &text[i + 4..end];
                let id = doc.alloc(Node {
                    kind: NodeKind::Comment(content.to_string()),
                    parent: None,
                    children: Vec::new(),
                    live: true,
                });
                push_child(doc, &stack, &mut roots, id);
                advance_to(&mut chars, (end + 3).min(text.len()));
                continue;
            }
            if text[i..].starts_with("<![CDATA[") {
                let end = text[i + 9..].find("]]>").map(|p| i + 9 + p).unwrap_or(text.len());
                let content = &text[i + 9..end];
                let id = doc.alloc(Node {
                    kind: NodeKind::Cdata(content.to_string()),
                    parent: None,
                    children: Vec::new(),
                    live: true,
                });
                push_child(doc, &stack, &mut roots, id);
                advance_to(&mut chars, (end + 3).min(text.len()));
                continue;
            }
            if text[i..].starts_with("<!") {
                let end = text[i..].find('>').map(|p| i + p).unwrap_or(text.len());
                let content = &text[i + 2..end];
                let id = doc.alloc(Node {
                    kind: NodeKind::Doctype(content.trim().to_string()),
                    parent: None,
                    children: Vec::new(),
                    live: true,
                });
                push_child(doc, &stack, &mut roots, id);
                advance_to(&mut chars, (end + 1).min(text.len()));
                continue;
            }
            if text[i..].starts_with("</") {
                let end = text[i..]
                    .find('>')
                    .map(|p| i + p)
                    .ok_or_else(|| DomError::ParseError("unterminated close tag".into()))?;
                let name = text[i + 2..end].trim().to_ascii_lowercase();
                if let Some(pos) = stack.iter().rposition(|(_, tag)| *tag == name) {
                    stack.truncate(pos);
                }
                advance_to(&mut chars, (end + 1).min(text.len()));
                continue;
            }
            // Opening tag.
            let end = text[i..]
                .find('>')
                .map(|p| i + p)
                .ok_or_else(|| DomError::ParseError("unterminated tag".into()))?;
            let inner = &text[i + 1..end];
            let self_closing = inner.trim_end().ends_with('/');
            let inner = inner.trim_end().trim_end_matches('/');
            let (tag, attrs) = parse_open_tag(inner)?;
            let id = doc.alloc(Node {
                kind: NodeKind::Element { tag: tag.clone(), attrs },
                parent: None,
                children: Vec::new(),
                live: true,
            });
            push_child(doc, &stack, &mut roots, id);
            if !self_closing && !is_void_element(&tag) {
                stack.push((id, tag));
            }
            advance_to(&mut chars, (end + 1).min(text.len()));
            continue;
        }

        let start = i;
        let mut end = text.len();
        while let Some(&(j, c2)) = chars.peek() {
            if c2 == '<' {
                end = j;
                break;
            }
            chars.next();
        }
        let chunk = &text[start..end];
        if !chunk.trim().is_empty() {
            let id = doc.alloc(Node {
                kind: NodeKind::Text(chunk.to_string()),
                parent: None,
                children: Vec::new(),
                live: true,
            });
            push_child(doc, &stack, &mut roots, id);
        }
    }

    // Fix up parent pointers for everything we pushed as children.
    for (parent, _) in &stack {
        if let Some(node) = doc.get(*parent) {
            let children = node.children.clone();
            for child in children {
                if let Some(c) = doc.get_mut(child) {
                    c.parent = Some(*parent);
                }
            }
        }
    }
    fix_parent_pointers(doc, &roots);
    Ok(roots)
}

fn fix_parent_pointers(doc: &mut Document, roots: &[NodeId]) {
    let mut stack: Vec<NodeId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        let children = match doc.get(id) {
            Some(n) => n.children.clone(),
            None => continue,
        };
        for child in children {
            if let Some(c) = doc.get_mut(child) {
                c.parent = Some(id);
            }
            stack.push(child);
        }
    }
}

fn advance_to(chars: &mut std::iter::Peekable<std::str::CharIndices>, target: usize) {
    while let Some(&(i, _)) = chars.peek() {
        if i >= target {
            break;
        }
        chars.next();
    }
}

fn is_void_element(tag: &str) -> bool {
    matches!(
        tag.to_ascii_lowercase().as_str(),
        "br" | "img" | "input" | "hr" | "meta" | "link" | "area" | "base" | "col" | "embed" | "source" | "track" | "wbr"
    )
}

fn parse_open_tag(inner: &str) -> Result<(String, BTreeMap<String, String>)> {
    let mut parts = inner.splitn(2, char::is_whitespace);
    let tag = parts
        .next()
        .ok_or_else(|| DomError::ParseError("empty tag".into()))?
        .to_ascii_lowercase();
    let mut attrs = BTreeMap::new();
    if let Some(rest) = parts.next() {
        let mut chars = rest.char_indices().peekable();
        loop {
            while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
                chars.next();
            }
            let Some(&(name_start, _)) = chars.peek() else {
                break;
            };
            let mut name_end = name_start;
            while let Some(&(j, c)) = chars.peek() {
                if c.is_whitespace() || c == '=' {
                    break;
                }
                name_end = j + c.len_utf8();
                chars.next();
            }
            if name_end == name_start {
                break;
            }
            let name = rest[name_start..name_end].to_string();
            while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
                chars.next();
            }
            if matches!(chars.peek(), Some((_, '='))) {
                chars.next();
                while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
                    chars.next();
                }
                let value = if matches!(chars.peek(), Some((_, '"')) | Some((_, '\''))) {
                    let (_, quote) = chars.next().unwrap();
                    let val_start = chars.peek().map(|&(j, _)| j).unwrap_or(rest.len());
                    let mut val_end = val_start;
                    for (j, c) in chars.by_ref() {
                        if c == quote {
                            break;
                        }
                        val_end = j + c.len_utf8();
                    }
                    rest[val_start..val_end].to_string()
                } else {
                    let val_start = name_end;
                    let mut val_end = val_start;
                    while let Some(&(j, c)) = chars.peek() {
                        if c.is_whitespace() {
                            break;
                        }
                        val_end = j + c.len_utf8();
                        chars.next();
                    }
                    rest[val_start..val_end].to_string()
                };
                attrs.insert(name, value);
            } else {
                attrs.insert(name, String::new());
            }
        }
    }
    Ok((tag, attrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_document_with_handle_attr() {
        let (doc, ids) = parse_document(b"<html><body><div hvml:handle='3'></div></body></html>").unwrap();
        let div = ids
            .iter()
            .find(|&&id| doc.get(id).unwrap().tag() == Some("div"))
            .unwrap();
        assert_eq!(doc.get(*div).unwrap().attr(HVML_HANDLE_ATTR), Some("3"));
    }

    #[test]
    fn self_closing_and_void_elements() {
        let (doc, _) = parse_document(b"<div><br><img src='x.png'/></div>").unwrap();
        let div = doc.root;
        let div_children = &doc.get(div).unwrap().children;
        assert_eq!(div_children.len(), 1);
    }

    #[test]
    fn remove_subtree_detaches_and_kills_children() {
        let (mut doc, ids) = parse_document(b"<div hvml:handle='1'><span hvml:handle='2'></span></div>").unwrap();
        let div = ids.iter().find(|&&id| doc.get(id).unwrap().tag() == Some("div")).copied().unwrap();
        let removed = doc.remove_subtree(div);
        assert_eq!(removed.len(), 2);
        assert!(doc.get(div).is_none());
    }
}
