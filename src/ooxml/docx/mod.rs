/// Word (.docx) document support.
///
/// Two layers are provided:
/// - `body`: the main document, headers and footers as editable paragraphs
///   that round-trip byte for byte where they are not edited
/// - `comments`: comment content, threading, durable ids, people and anchors,
///   kept consistent with each other and with the body
///
/// # Example
///
/// ```rust
/// use docx_comments::ooxml::docx::body::{DocumentBody, ParagraphRef};
/// use docx_comments::ooxml::docx::comments::{CommentManager, CommentsConfig, Location};
///
/// let body = DocumentBody::from_document_xml(
///     r#"<w:document><w:body><w:p><w:r><w:t>Hello world</w:t></w:r></w:p></w:body></w:document>"#,
/// )?;
/// let mut manager = CommentManager::from_body(body, CommentsConfig::default())?;
/// manager.add_comment(&Location::text(ParagraphRef::main(0), 6, 11), "Which one?", "Ann", None, None)?;
/// assert_eq!(manager.get_authors(), vec!["Ann".to_string()]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub mod body;
pub mod comments;

pub use body::{DocumentBody, ParagraphRef};
pub use comments::CommentManager;
