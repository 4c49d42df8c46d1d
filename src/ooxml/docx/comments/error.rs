/// Error types for comment editing.
use super::model::{CommentId, ParaId};
use crate::ooxml::error::OoxmlError;
use crate::ooxml::opc::error::OpcError;
use std::fmt;
use thiserror::Error;

/// Result type for comment operations.
pub type Result<T> = std::result::Result<T, CommentError>;

/// Identifier spaces handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdSpace {
    /// Numeric `w:id` of a comment and its anchor markers
    Content,
    /// `w14:paraId` of a comment's last paragraph
    Paragraph,
    /// `w16cid:durableId`
    Durable,
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdSpace::Content => "content id",
            IdSpace::Paragraph => "paragraph id",
            IdSpace::Durable => "durable id",
        })
    }
}

/// Error types for comment operations.
///
/// Every variant except [`CommentError::Ooxml`] is raised before anything
/// visible has changed: the manager rolls back partial edits first.
#[derive(Error, Debug)]
pub enum CommentError {
    /// A referenced comment, parent, anchor or person does not exist
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// The anchor location is outside the paragraph or cannot be split there
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// A thread entry would point at a parent that is not live
    #[error("Thread entry {para_id} references missing parent {parent}")]
    DanglingParent { para_id: ParaId, parent: ParaId },

    /// A single comment delete was attempted on a comment with replies
    #[error("Comment {id} has {replies} live replies; delete the thread instead")]
    HasDependents { id: CommentId, replies: usize },

    /// The allocator gave up finding an unused identifier
    #[error("{space} space exhausted after {attempts} attempts")]
    IdentitySpaceExhausted { space: IdSpace, attempts: u32 },

    /// A ledger row with this key is already live
    #[error("Duplicate {kind}: {key}")]
    Duplicate { kind: &'static str, key: String },

    /// A caller-supplied argument is unusable
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading or writing a package part failed
    #[error("OOXML error: {0}")]
    Ooxml(#[from] OoxmlError),
}

impl CommentError {
    pub(crate) fn not_found(kind: &'static str, key: impl fmt::Display) -> Self {
        CommentError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn duplicate(kind: &'static str, key: impl fmt::Display) -> Self {
        CommentError::Duplicate {
            kind,
            key: key.to_string(),
        }
    }
}

impl From<OpcError> for CommentError {
    fn from(err: OpcError) -> Self {
        CommentError::Ooxml(OoxmlError::Opc(err))
    }
}

impl From<quick_xml::Error> for CommentError {
    fn from(err: quick_xml::Error) -> Self {
        CommentError::Ooxml(err.into())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CommentError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        CommentError::Ooxml(err.into())
    }
}

impl From<quick_xml::encoding::EncodingError> for CommentError {
    fn from(err: quick_xml::encoding::EncodingError) -> Self {
        CommentError::Ooxml(err.into())
    }
}

impl From<std::fmt::Error> for CommentError {
    fn from(err: std::fmt::Error) -> Self {
        CommentError::Ooxml(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = CommentError::not_found("comment", CommentId(7));
        assert_eq!(err.to_string(), "comment not found: 7");

        let err = CommentError::IdentitySpaceExhausted {
            space: IdSpace::Paragraph,
            attempts: 3,
        };
        assert_eq!(err.to_string(), "paragraph id space exhausted after 3 attempts");

        let err = CommentError::DanglingParent {
            para_id: ParaId(1),
            parent: ParaId(0xAB),
        };
        assert_eq!(
            err.to_string(),
            "Thread entry 00000001 references missing parent 000000AB"
        );
    }

    #[test]
    fn test_opc_error_converts() {
        let err: CommentError = OpcError::PartNotFound("/word/x.xml".to_string()).into();
        assert!(matches!(err, CommentError::Ooxml(OoxmlError::Opc(_))));
    }
}
