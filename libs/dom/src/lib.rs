//! A minimal HTML-like parser and DOM tree, reduced to the capability set
//! the renderer core actually needs: parse bytes → document; look up an
//! element by `hvml:handle`; apply a mutation op; destroy.

pub mod error;
pub mod handle_index;
pub mod indexed_document;
pub mod tree;

pub use error::{DomError, Result};
pub use handle_index::HandleIndex;
pub use indexed_document::{text_content_of, IndexedDocument, MutationOp, HANDLE_ATTR};
pub use tree::{Document, InsertPosition, Node, NodeId, NodeKind};
