/// Comment editing for Word documents.
///
/// A Word comment is spread over several parts of the package:
///
/// - `comments.xml`: the content (author, initials, date, text)
/// - `commentsExtended.xml`: reply links and the resolved flag, keyed by
///   the paragraph id of the comment's last paragraph
/// - `commentsIds.xml` / `commentsExtensible.xml`: durable ids
/// - `people.xml`: optional author identities
/// - the document body: `commentRangeStart`, `commentRangeEnd` and
///   `commentReference` markers carrying the comment's numeric id
///
/// [`CommentManager`] owns all of them for one document and keeps them
/// consistent across edits. The ledgers it is built from are public for
/// read access and for callers that need finer control.
///
/// # Example
///
/// ```rust,no_run
/// use docx_comments::ooxml::OpcPackage;
/// use docx_comments::ooxml::docx::body::ParagraphRef;
/// use docx_comments::ooxml::docx::comments::{CommentManager, CommentsConfig, Location};
///
/// # fn run(mut package: OpcPackage) -> Result<(), Box<dyn std::error::Error>> {
/// let mut manager = CommentManager::load(&package, CommentsConfig::from_env())?;
/// let id = manager.add_comment(
///     &Location::text(ParagraphRef::main(0), 0, 5),
///     "Check this word",
///     "Ann Lee",
///     Some("AL"),
///     None,
/// )?;
/// manager.resolve_comment(id)?;
/// manager.save(&mut package)?;
/// # Ok(())
/// # }
/// ```
pub mod anchor;
pub mod author;
pub mod config;
pub mod durable;
pub mod error;
pub mod ids;
pub mod manager;
pub mod migrate;
pub mod model;
pub mod people;
pub mod store;
pub mod thread;

pub(crate) mod fragment;
pub(crate) mod journal;
pub(crate) mod parts;
pub(crate) mod table;


pub use anchor::{AnchorEngine, AnchorHandle, AnchorPlan, MarkerPosition, Placement, locate};
pub use author::{
    AuthorDiagnostic, AuthorHint, AuthorOptions, AuthorSource, CoreAuthors, DefaultAuthor, NoSystemProfile,
    SystemProfile, SystemUser,
};
pub use config::{AUTHOR_DOCX_ENV, CommentsConfig};
pub use durable::DurableIdLedger;
pub use error::{CommentError, IdSpace, Result};
pub use ids::IdentityAllocator;
pub use manager::{CommentManager, Inconsistency};
pub use migrate::MigrationReport;
pub use model::{
    Comment, CommentId, CommentInfo, CommentThread, DurableEntry, DurableId, IdentityLink, Location, ParaId,
    PersonRecord, Presence, Span, ThreadEntry,
};
pub use people::PeopleRegistry;
pub use store::CommentStore;
pub use thread::ThreadLedger;
