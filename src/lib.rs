//! docx-comments - threaded comment editing for Word (.docx) packages
//!
//! Word stores a comment in up to five places: the comment content, the
//! threading and resolved state, the durable ids, the people list, and the
//! anchor markers inside the document text. Tools that edit only some of
//! them produce documents Word repairs or refuses to open. This library
//! edits all of them together.
//!
//! # Features
//!
//! - **Add, reply, resolve, delete, move**: every edit either fully applies
//!   or leaves the document untouched
//! - **Anchors anywhere**: whole paragraphs, run ranges or character ranges,
//!   in the main document, headers and footers, including empty paragraphs
//! - **Lossless round-trip**: paragraphs and comments that were not edited
//!   are written back exactly as read
//! - **Load-time repair**: missing or conflicting comment metadata from other
//!   producers is fixed and reported
//! - **Default authors**: from a hint document, the local Office profile, or
//!   the document's own core properties
//!
//! # Example
//!
//! ```no_run
//! use docx_comments::ooxml::OpcPackage;
//! use docx_comments::ooxml::docx::body::ParagraphRef;
//! use docx_comments::ooxml::docx::comments::{CommentManager, CommentsConfig, Location};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let entries: Vec<(String, Vec<u8>)> = Vec::new();
//! // The container (zip) layer hands over the package members.
//! let mut package = OpcPackage::from_parts(entries)?;
//! let mut manager = CommentManager::load(&package, CommentsConfig::from_env())?;
//!
//! let root = manager.add_comment(
//!     &Location::runs(ParagraphRef::main(0), 0, 2),
//!     "Please review",
//!     "Ann Lee",
//!     Some("AL"),
//!     None,
//! )?;
//! manager.reply_to_comment(root, "Addressed", "Bo", None, None)?;
//! manager.resolve_comment(root)?;
//!
//! for thread in manager.get_comment_threads() {
//!     println!("{}: {} ({} replies)", thread.root.author, thread.root.text, thread.replies.len());
//! }
//!
//! manager.save(&mut package)?;
//! let _members = package.to_parts()?;
//! # Ok(())
//! # }
//! ```

/// Format-independent helpers: XML escaping and hex identifiers.
pub mod common;

/// Office Open XML packages, Word bodies and comments.
pub mod ooxml;

// Re-export commonly used types for convenience
pub use ooxml::docx::comments::{CommentError, CommentManager, CommentsConfig, Location};
pub use ooxml::{OpcPackage, PackURI, PartStore};
