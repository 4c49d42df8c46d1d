/// Records kept by the comment ledgers and the read-only views built from them.
use crate::common::id::{format_long_hex, parse_long_hex};
use crate::ooxml::docx::body::ParagraphRef;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Numeric comment id (`w:id`), shared by the content record and its anchor markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommentId(pub u64);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Paragraph id (`w14:paraId`) linking a comment to its thread entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParaId(pub u32);

/// Durable id (`w16cid:durableId`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DurableId(pub u32);

macro_rules! long_hex_id {
    ($name:ident) => {
        impl $name {
            /// Parse eight hex digits.
            #[inline]
            pub fn parse(s: &str) -> Option<Self> {
                parse_long_hex(s).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&format_long_hex(self.0))
            }
        }
    };
}

long_hex_id!(ParaId);
long_hex_id!(DurableId);

/// A comment's content record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub(crate) id: CommentId,
    pub(crate) para_id: ParaId,
    pub(crate) text_id: Option<u32>,
    pub(crate) author: String,
    pub(crate) initials: Option<String>,
    pub(crate) date: Option<DateTime<Utc>>,
    pub(crate) text: String,
    /// The `<w:comment>` element as loaded, written back verbatim while
    /// `para_id` still matches the id it carries
    pub(crate) raw: Option<RawComment>,
}

/// Verbatim XML of a loaded comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawComment {
    pub(crate) xml: String,
    pub(crate) para_id: Option<ParaId>,
    /// Byte range of the last `<w:p>` start tag within `xml`
    pub(crate) para_tag: Option<Range<usize>>,
}

impl Comment {
    /// A new comment dated now.
    pub(crate) fn new(
        id: CommentId,
        para_id: ParaId,
        text_id: u32,
        author: &str,
        initials: Option<&str>,
        text: &str,
    ) -> Self {
        Self {
            id,
            para_id,
            text_id: Some(text_id),
            author: author.to_string(),
            initials: initials.filter(|s| !s.is_empty()).map(str::to_string),
            date: Some(now_utc()),
            text: text.to_string(),
            raw: None,
        }
    }

    #[inline]
    pub fn id(&self) -> CommentId {
        self.id
    }

    #[inline]
    pub fn para_id(&self) -> ParaId {
        self.para_id
    }

    #[inline]
    pub fn author(&self) -> &str {
        &self.author
    }

    #[inline]
    pub fn initials(&self) -> Option<&str> {
        self.initials.as_deref()
    }

    #[inline]
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.date
    }

    /// Plain text, paragraphs separated by `\n`.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Threading state of one comment, keyed by its paragraph id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadEntry {
    /// Paragraph id of the comment replied to; `None` for a thread root
    pub parent: Option<ParaId>,
    /// Resolved flag
    pub done: bool,
}

/// Durable id of one comment plus its `commentsExtensible.xml` timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableEntry {
    pub durable_id: DurableId,
    pub date_utc: Option<DateTime<Utc>>,
}

/// Presence provider information of a person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Presence {
    pub provider_id: String,
    pub user_id: String,
}

impl Presence {
    pub fn new(provider_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// An entry of `people.xml`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonRecord {
    pub name: String,
    pub presence: Option<Presence>,
}

/// Request to register the author in the people registry when commenting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityLink {
    pub presence: Option<Presence>,
}

impl IdentityLink {
    /// Link by name only.
    pub fn name_only() -> Self {
        Self::default()
    }

    /// Link with presence information. Both ids must be non-empty.
    pub fn with_presence(provider_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            presence: Some(Presence::new(provider_id, user_id)),
        }
    }
}

/// Which part of a paragraph a comment covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Span {
    /// All runs, or the empty position of a paragraph without runs
    Paragraph,
    /// Runs `start..=end` by run index
    Runs { start: usize, end: usize },
    /// Characters `start..end` of the paragraph's run text
    Text { start: usize, end: usize },
}

/// Where to anchor a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub paragraph: ParagraphRef,
    pub span: Span,
}

impl Location {
    /// The whole paragraph.
    pub fn paragraph(paragraph: ParagraphRef) -> Self {
        Self {
            paragraph,
            span: Span::Paragraph,
        }
    }

    /// An inclusive run range.
    pub fn runs(paragraph: ParagraphRef, start: usize, end: usize) -> Self {
        Self {
            paragraph,
            span: Span::Runs { start, end },
        }
    }

    /// A half-open character range.
    pub fn text(paragraph: ParagraphRef, start: usize, end: usize) -> Self {
        Self {
            paragraph,
            span: Span::Text { start, end },
        }
    }
}

/// A comment joined with its thread and durable records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentInfo {
    pub id: CommentId,
    pub para_id: ParaId,
    pub durable_id: Option<DurableId>,
    pub author: String,
    pub initials: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub text: String,
    pub parent_para_id: Option<ParaId>,
    /// Content id of the parent comment
    pub parent: Option<CommentId>,
    pub resolved: bool,
}

/// A root comment and its replies, replies in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentThread {
    pub root: CommentInfo,
    pub replies: Vec<CommentInfo>,
}

impl CommentThread {
    /// Number of comments in the thread.
    pub fn len(&self) -> usize {
        1 + self.replies.len()
    }

    /// Threads always contain their root.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Current time at whole-second precision, as Word stores it.
pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Parse a `w:date` / `w16cex:dateUtc` value.
///
/// Word writes `2024-01-31T09:30:00Z`; some producers omit the zone, in
/// which case UTC is assumed.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Format a timestamp the way Word does.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hex_ids() {
        assert_eq!(ParaId(0x1A).to_string(), "0000001A");
        assert_eq!(DurableId::parse("7fffFFFe"), Some(DurableId(0x7FFF_FFFE)));
        assert_eq!(ParaId::parse("123"), None);
        assert_eq!(CommentId(42).to_string(), "42");
    }

    #[test]
    fn test_timestamps() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 31, 9, 30, 0).unwrap();
        assert_eq!(format_timestamp(&dt), "2024-01-31T09:30:00Z");
        assert_eq!(parse_timestamp("2024-01-31T09:30:00Z"), Some(dt));
        assert_eq!(parse_timestamp("2024-01-31T10:30:00+01:00"), Some(dt));
        assert_eq!(parse_timestamp("2024-01-31T09:30:00"), Some(dt));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(now_utc().timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_new_comment_drops_empty_initials() {
        let c = Comment::new(CommentId(1), ParaId(2), 3, "Ann", Some(""), "Hi");
        assert_eq!(c.initials(), None);
        assert_eq!(c.text_id, Some(3));
        assert!(c.raw.is_none());
    }
}
