//! Per-endpoint session state: a session's plain windows, each with its
//! loaded DOM document and handle index. `purcrdr_dom` supplies the
//! document/index pair and the mutation application; everything here is
//! bookkeeping that maps wire handles to that state.

use std::collections::HashMap;

use purcrdr_dom::{IndexedDocument, MutationOp};

use crate::error::{Result, ServerError};

/// Opaque 64-bit handle, as it appears on the wire.
pub type Handle = u64;

#[derive(Debug, Default)]
pub struct ChunkBuffer {
    pub data: Vec<u8>,
}

pub struct PlainWindow {
    pub name: String,
    pub title: String,
    pub document: Option<IndexedDocument>,
    /// Accumulates `writeBegin`/`writeMore` bytes until `writeEnd` parses
    /// them.
    pub pending_write: Option<ChunkBuffer>,
}

impl PlainWindow {
    fn new(name: String, title: String) -> Self {
        Self { name, title, document: None, pending_write: None }
    }
}

/// One endpoint's session: its plain windows, keyed by window handle.
#[derive(Default)]
pub struct SessionInfo {
    pub handle: Handle,
    windows: HashMap<Handle, PlainWindow>,
    next_handle: Handle,
}

impl SessionInfo {
    pub fn new(handle: Handle) -> Self {
        Self { handle, windows: HashMap::new(), next_handle: 1 }
    }

    fn alloc_handle(&mut self) -> Handle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    pub fn create_window(&mut self, name: String, title: String) -> Handle {
        let handle = self.alloc_handle();
        self.windows.insert(handle, PlainWindow::new(name, title));
        handle
    }

    pub fn destroy_window(&mut self, handle: Handle) -> Option<PlainWindow> {
        self.windows.remove(&handle)
    }

    pub fn window(&self, handle: Handle) -> Option<&PlainWindow> {
        self.windows.get(&handle)
    }

    pub fn window_mut(&mut self, handle: Handle) -> Option<&mut PlainWindow> {
        self.windows.get_mut(&handle)
    }

    pub fn find_window_by_name(&self, name: &str) -> Option<Handle> {
        self.windows.iter().find(|(_, w)| w.name == name).map(|(&h, _)| h)
    }

    /// Parse `markup` as the document for `window`, replacing any document
    /// that was already there. Returns the document's own handle, which
    /// is the window handle itself: one document per window.
    pub fn load_document(&mut self, window: Handle, markup: &[u8]) -> Result<Handle> {
        let doc = IndexedDocument::parse(markup)?;
        let w = self
            .windows
            .get_mut(&window)
            .ok_or_else(|| ServerError::Config("unknown window".into()))?;
        w.document = Some(doc);
        w.pending_write = None;
        Ok(window)
    }

    pub fn begin_write(&mut self, window: Handle, initial: &[u8]) -> Result<()> {
        let w = self
            .windows
            .get_mut(&window)
            .ok_or_else(|| ServerError::Config("unknown window".into()))?;
        w.pending_write = Some(ChunkBuffer { data: initial.to_vec() });
        Ok(())
    }

    pub fn append_write(&mut self, window: Handle, chunk: &[u8]) -> Result<()> {
        let w = self
            .windows
            .get_mut(&window)
            .ok_or_else(|| ServerError::Config("unknown window".into()))?;
        match &mut w.pending_write {
            Some(buf) => buf.data.extend_from_slice(chunk),
            None => w.pending_write = Some(ChunkBuffer { data: chunk.to_vec() }),
        }
        Ok(())
    }

    pub fn end_write(&mut self, window: Handle, tail: &[u8]) -> Result<Handle> {
        let w = self
            .windows
            .get_mut(&window)
            .ok_or_else(|| ServerError::Config("unknown window".into()))?;
        let mut data = w.pending_write.take().map(|b| b.data).unwrap_or_default();
        data.extend_from_slice(tail);
        drop(w);
        self.load_document(window, &data)
    }

    /// Apply a mutation against the document whose handle is `dom`. Since a
    /// document's handle equals its owning window's handle, this resolves
    /// the window first.
    pub fn apply_mutation(
        &mut self,
        dom: Handle,
        element_handle: u64,
        op: MutationOp<'_>,
    ) -> Result<()> {
        let w = self
            .windows
            .get_mut(&dom)
            .ok_or_else(|| ServerError::Config("unknown document".into()))?;
        let doc = w.document.as_mut().ok_or_else(|| ServerError::Config("no document loaded".into()))?;
        let node = doc
            .find_by_handle(element_handle)
            .ok_or(purcrdr_dom::DomError::UnknownHandle(element_handle))?;
        doc.apply(node, op)?;
        Ok(())
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// All window handles, for `endSession`'s teardown walk.
    pub fn window_handles(&self) -> Vec<Handle> {
        self.windows.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_destroy_window() {
        let mut session = SessionInfo::new(1);
        let h = session.create_window("w0".into(), "Window 0".into());
        assert_eq!(session.window_count(), 1);
        assert!(session.destroy_window(h).is_some());
        assert_eq!(session.window_count(), 0);
    }

    #[test]
    fn load_then_mutate_element() {
        let mut session = SessionInfo::new(1);
        let h = session.create_window("w0".into(), "Window 0".into());
        let dom = session
            .load_document(h, b"<html><body><div hvml:handle='3'></div></body></html>")
            .unwrap();
        assert_eq!(dom, h);
        session
            .apply_mutation(dom, 3, MutationOp::Update { property: "textContent", data: b"hi" })
            .unwrap();
    }

    #[test]
    fn chunked_write_assembles_document() {
        let mut session = SessionInfo::new(1);
        let h = session.create_window("w0".into(), "Window 0".into());
        session.begin_write(h, b"<html><body>").unwrap();
        session.append_write(h, b"<div hvml:handle='1'>").unwrap();
        let dom = session.end_write(h, b"</div></body></html>").unwrap();
        assert_eq!(dom, h);
        assert!(session.window(h).unwrap().document.is_some());
    }
}
