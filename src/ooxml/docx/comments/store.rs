/// The comment content records and the `comments.xml` codec.
use super::error::{CommentError, Result};
use super::fragment::{self, attr};
use super::model::{
    Comment, CommentId, ParaId, RawComment, format_timestamp, parse_timestamp,
};
use super::table::Table;
use crate::common::id::parse_long_hex;
use crate::common::xml::{escape_xml, resolve_entity};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fmt::Write;
use std::ops::Range;

const ANNOTATION_REF_RUN: &str =
    r#"<w:r><w:rPr><w:rStyle w:val="CommentReference"/></w:rPr><w:annotationRef/></w:r>"#;
const COMMENT_TEXT_PPR: &str = r#"<w:pPr><w:pStyle w:val="CommentText"/></w:pPr>"#;

/// Comments by content id, in the order they appear in `comments.xml`.
///
/// That order is the order Word lists comments in, so edits never re-sort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentStore {
    comments: Table<CommentId, Comment>,
    by_para: HashMap<ParaId, CommentId>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a comment at the end.
    ///
    /// # Errors
    /// `Duplicate` when the content id or paragraph id is already live.
    pub fn create(&mut self, comment: Comment) -> Result<CommentId> {
        let position = self.comments.len();
        self.insert_at(position, comment)
    }

    /// Put a comment back at a given position (used to undo a removal).
    pub(crate) fn insert_at(&mut self, position: usize, comment: Comment) -> Result<CommentId> {
        let id = comment.id;
        let para_id = comment.para_id;
        if self.by_para.contains_key(&para_id) {
            return Err(CommentError::duplicate("paragraph id", para_id));
        }
        self.comments
            .insert_at(position, id, comment)
            .map_err(|(id, _)| CommentError::duplicate("comment", id))?;
        self.by_para.insert(para_id, id);
        Ok(id)
    }

    /// Get a comment.
    ///
    /// # Errors
    /// `NotFound` when no live comment has this id.
    pub fn get(&self, id: CommentId) -> Result<&Comment> {
        self.comments
            .get(&id)
            .ok_or_else(|| CommentError::not_found("comment", id))
    }

    #[inline]
    pub fn contains(&self, id: CommentId) -> bool {
        self.comments.contains(&id)
    }

    /// The comment whose paragraph id is `para_id`.
    pub fn by_para_id(&self, para_id: ParaId) -> Option<&Comment> {
        self.by_para.get(&para_id).and_then(|id| self.comments.get(id))
    }

    /// All comments in document order.
    pub fn list(&self) -> impl Iterator<Item = &Comment> {
        self.comments.values()
    }

    /// Remove a comment, returning its former position and record.
    pub fn remove(&mut self, id: CommentId) -> Option<(usize, Comment)> {
        let (position, comment) = self.comments.remove(&id)?;
        self.by_para.remove(&comment.para_id);
        Some((position, comment))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Serialize as `comments.xml`.
    ///
    /// # Arguments
    /// * `root` - Root start tag of the part this store was loaded from
    pub(crate) fn to_xml(&self, root: Option<&str>) -> Result<String> {
        let mut records = String::with_capacity(self.len() * 512);
        for comment in self.list() {
            write_comment(comment, &mut records)?;
        }
        Ok(fragment::COMMENTS.write(root, &records))
    }
}

fn write_comment(comment: &Comment, xml: &mut String) -> Result<()> {
    if let Some(raw) = &comment.raw {
        if raw.para_id == Some(comment.para_id) {
            xml.push_str(&raw.xml);
            return Ok(());
        }
        if let Some(tag) = &raw.para_tag {
            let patched = with_para_id(&raw.xml[tag.clone()], comment.para_id);
            xml.push_str(&raw.xml[..tag.start]);
            xml.push_str(&patched);
            xml.push_str(&raw.xml[tag.end..]);
            return Ok(());
        }
    }

    write!(
        xml,
        r#"<w:comment w:id="{}" w:author="{}""#,
        comment.id,
        escape_xml(&comment.author)
    )?;
    if let Some(date) = &comment.date {
        write!(xml, r#" w:date="{}""#, format_timestamp(date))?;
    }
    if let Some(initials) = &comment.initials {
        write!(xml, r#" w:initials="{}""#, escape_xml(initials))?;
    }
    xml.push('>');

    let lines: Vec<&str> = comment.text.split('\n').collect();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim_end_matches('\r');
        xml.push_str("<w:p");
        if i + 1 == lines.len() {
            write!(xml, r#" w14:paraId="{}""#, comment.para_id)?;
            if let Some(text_id) = comment.text_id {
                write!(xml, r#" w14:textId="{}""#, ParaId(text_id))?;
            }
        }
        xml.push('>');
        xml.push_str(COMMENT_TEXT_PPR);
        if i == 0 {
            xml.push_str(ANNOTATION_REF_RUN);
        }
        if !line.is_empty() {
            write!(
                xml,
                r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#,
                escape_xml(line)
            )?;
        }
        xml.push_str("</w:p>");
    }
    xml.push_str("</w:comment>");
    Ok(())
}

/// Rewrite a `<w:p ...>` start tag to carry `para_id`.
fn with_para_id(tag: &str, para_id: ParaId) -> String {
    const ATTR: &str = "w14:paraId=\"";
    if let Some(at) = tag.find(ATTR) {
        let value_start = at + ATTR.len();
        if let Some(len) = tag[value_start..].find('"') {
            let mut out = tag.to_string();
            out.replace_range(value_start..value_start + len, &para_id.to_string());
            return out;
        }
    }
    // "<w:p" is four bytes; the attribute goes right after the name.
    format!(r#"{} w14:paraId="{}"{}"#, &tag[..4], para_id, &tag[4..])
}

/// One `<w:comment>` as read from the part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedComment {
    /// `None` when `w:id` is missing or not a number
    pub id: Option<CommentId>,
    pub para_id: Option<ParaId>,
    pub text_id: Option<u32>,
    pub author: String,
    pub initials: Option<String>,
    pub date: Option<chrono::DateTime<chrono::Utc>>,
    pub text: String,
    pub xml: String,
    pub para_tag: Option<Range<usize>>,
}

impl ParsedComment {
    /// Turn into a store record using `para_id` as its identity.
    pub(crate) fn into_comment(self, id: CommentId, para_id: ParaId) -> Comment {
        Comment {
            id,
            para_id,
            text_id: self.text_id,
            author: self.author,
            initials: self.initials.filter(|s| !s.is_empty()),
            date: self.date,
            text: self.text,
            raw: Some(RawComment {
                xml: self.xml,
                para_id: self.para_id,
                para_tag: self.para_tag,
            }),
        }
    }
}

/// The parsed content of `comments.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommentsPart {
    pub root: Option<String>,
    pub comments: Vec<ParsedComment>,
}

#[derive(Default)]
struct Pending {
    start: usize,
    comment: Option<ParsedComment>,
    paragraphs: usize,
    in_text: bool,
}

/// Parse `comments.xml`.
pub(crate) fn parse_comments(xml: &str) -> Result<CommentsPart> {
    let mut reader = Reader::from_str(xml);
    let mut part = CommentsPart::default();
    let mut depth = 0usize;
    let mut pending = Pending::default();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(_) | Event::Empty(_) if depth == 0 => {
                part.root = Some(xml[start..end].to_string());
                if matches!(event, Event::Empty(_)) {
                    break;
                }
                depth = 1;
            },
            Event::Start(ref e) => {
                if depth == 1 && e.local_name().as_ref() == b"comment" {
                    pending = Pending {
                        start,
                        comment: Some(comment_header(e)?),
                        ..Pending::default()
                    };
                } else if let Some(comment) = pending.comment.as_mut() {
                    match e.local_name().as_ref() {
                        b"p" => {
                            begin_paragraph(comment, e, start..end, pending.start, pending.paragraphs)?;
                            pending.paragraphs += 1;
                        },
                        b"t" => pending.in_text = true,
                        _ => {},
                    }
                }
                depth += 1;
            },
            Event::Empty(ref e) => {
                if depth == 1 && e.local_name().as_ref() == b"comment" {
                    let mut comment = comment_header(e)?;
                    comment.xml = xml[start..end].to_string();
                    part.comments.push(comment);
                } else if let Some(comment) = pending.comment.as_mut()
                    && e.local_name().as_ref() == b"p"
                {
                    begin_paragraph(comment, e, start..end, pending.start, pending.paragraphs)?;
                    pending.paragraphs += 1;
                }
            },
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                if e.local_name().as_ref() == b"t" {
                    pending.in_text = false;
                }
                if depth == 1
                    && e.local_name().as_ref() == b"comment"
                    && let Some(mut comment) = pending.comment.take()
                {
                    comment.xml = xml[pending.start..end].to_string();
                    part.comments.push(comment);
                }
                if depth == 0 {
                    break;
                }
            },
            Event::Text(ref t) if pending.in_text => {
                if let Some(comment) = pending.comment.as_mut() {
                    comment.text.push_str(&t.decode()?);
                }
            },
            Event::CData(ref t) if pending.in_text => {
                if let Some(comment) = pending.comment.as_mut() {
                    comment.text.push_str(&t.decode()?);
                }
            },
            Event::GeneralRef(ref r) if pending.in_text => {
                if let Some(comment) = pending.comment.as_mut()
                    && let Some(ch) = resolve_entity(&r.decode()?)
                {
                    comment.text.push(ch);
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    Ok(part)
}

fn comment_header(e: &BytesStart<'_>) -> Result<ParsedComment> {
    let id = attr(e, b"id")?.and_then(|v| atoi_simd::parse::<u64, false, false>(v.trim().as_bytes()).ok());
    Ok(ParsedComment {
        id: id.map(CommentId),
        para_id: None,
        text_id: None,
        author: attr(e, b"author")?.unwrap_or_default(),
        initials: attr(e, b"initials")?,
        date: attr(e, b"date")?.as_deref().and_then(parse_timestamp),
        text: String::new(),
        xml: String::new(),
        para_tag: None,
    })
}

/// Record a paragraph start: separates text and tracks the last paragraph's ids.
fn begin_paragraph(
    comment: &mut ParsedComment,
    e: &BytesStart<'_>,
    tag: Range<usize>,
    comment_start: usize,
    seen: usize,
) -> Result<()> {
    if seen > 0 {
        comment.text.push('\n');
    }
    comment.para_id = attr(e, b"paraId")?.as_deref().and_then(ParaId::parse);
    comment.text_id = attr(e, b"textId")?.as_deref().and_then(parse_long_hex);
    comment.para_tag = Some(tag.start - comment_start..tag.end - comment_start);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::constants::namespace as ns;
    use pretty_assertions::assert_eq;

    const COMMENTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:comments xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:w14="http://schemas.microsoft.com/office/word/2010/wordml"><w:comment w:id="0" w:author="Ann Lee" w:date="2024-03-01T10:00:00Z" w:initials="AL"><w:p w14:paraId="00000A01" w14:textId="77777777"><w:pPr><w:pStyle w:val="CommentText"/></w:pPr><w:r><w:annotationRef/></w:r><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p></w:comment><w:comment w:id="3" w:author="Bo"><w:p w14:paraId="00000B01"><w:r><w:t>first</w:t></w:r></w:p><w:p w14:paraId="00000B02"><w:r><w:rPr><w:b/></w:rPr><w:t>second</w:t></w:r></w:p></w:comment><w:comment w:id="x" w:author="Cy"/></w:comments>"#;

    #[test]
    fn test_parse_comments() {
        let part = parse_comments(COMMENTS_XML).unwrap();
        assert!(part.root.as_deref().unwrap().starts_with("<w:comments xmlns:w="));
        assert_eq!(part.comments.len(), 3);

        let first = &part.comments[0];
        assert_eq!(first.id, Some(CommentId(0)));
        assert_eq!(first.author, "Ann Lee");
        assert_eq!(first.initials.as_deref(), Some("AL"));
        assert_eq!(first.text, "Fish & chips");
        assert_eq!(first.para_id, Some(ParaId(0xA01)));
        assert_eq!(first.text_id, Some(0x7777_7777));
        assert!(first.date.is_some());

        let second = &part.comments[1];
        assert_eq!(second.text, "first\nsecond");
        assert_eq!(second.para_id, Some(ParaId(0xB02)));
        let tag = second.para_tag.clone().unwrap();
        assert_eq!(&second.xml[tag], r#"<w:p w14:paraId="00000B02">"#);

        let third = &part.comments[2];
        assert_eq!(third.id, None);
        assert_eq!(third.xml, r#"<w:comment w:id="x" w:author="Cy"/>"#);
    }

    #[test]
    fn test_loaded_comments_are_written_verbatim() {
        let part = parse_comments(COMMENTS_XML).unwrap();
        let mut store = CommentStore::new();
        for parsed in part.comments.into_iter().take(2) {
            let id = parsed.id.unwrap();
            let para_id = parsed.para_id.unwrap();
            store.create(parsed.into_comment(id, para_id)).unwrap();
        }
        let xml = store.to_xml(part.root.as_deref()).unwrap();
        let records_start = COMMENTS_XML.find("<w:comment ").unwrap();
        let records_end = COMMENTS_XML.find(r#"<w:comment w:id="x""#).unwrap();
        assert!(xml.contains(&COMMENTS_XML[records_start..records_end]));
        assert!(xml.contains(r#"mc:Ignorable="w14""#));
    }

    #[test]
    fn test_reassigned_para_id_patches_last_paragraph() {
        let part = parse_comments(COMMENTS_XML).unwrap();
        let parsed = part.comments[1].clone();
        let mut store = CommentStore::new();
        store
            .create(parsed.into_comment(CommentId(3), ParaId(0xC0FFEE)))
            .unwrap();
        let xml = store.to_xml(None).unwrap();
        assert!(xml.contains(r#"<w:p w14:paraId="00000B01"><w:r><w:t>first"#));
        assert!(xml.contains(r#"<w:p w14:paraId="00C0FFEE"><w:r><w:rPr><w:b/>"#));
    }

    #[test]
    fn test_with_para_id() {
        assert_eq!(with_para_id("<w:p>", ParaId(1)), r#"<w:p w14:paraId="00000001">"#);
        assert_eq!(
            with_para_id(r#"<w:p w14:paraId="0000000A" w14:textId="1">"#, ParaId(2)),
            r#"<w:p w14:paraId="00000002" w14:textId="1">"#
        );
    }

    #[test]
    fn test_new_comment_xml() {
        let mut comment = Comment::new(CommentId(5), ParaId(0x10), 0x20, "A & B", Some("AB"), "one\ntwo <3");
        comment.date = parse_timestamp("2024-05-06T07:08:09Z");
        let mut xml = String::new();
        write_comment(&comment, &mut xml).unwrap();
        assert_eq!(
            xml,
            concat!(
                r#"<w:comment w:id="5" w:author="A &amp; B" w:date="2024-05-06T07:08:09Z" w:initials="AB">"#,
                r#"<w:p><w:pPr><w:pStyle w:val="CommentText"/></w:pPr>"#,
                r#"<w:r><w:rPr><w:rStyle w:val="CommentReference"/></w:rPr><w:annotationRef/></w:r>"#,
                r#"<w:r><w:t xml:space="preserve">one</w:t></w:r></w:p>"#,
                r#"<w:p w14:paraId="00000010" w14:textId="00000020"><w:pPr><w:pStyle w:val="CommentText"/></w:pPr>"#,
                r#"<w:r><w:t xml:space="preserve">two &lt;3</w:t></w:r></w:p></w:comment>"#,
            )
        );

        let mut store = CommentStore::new();
        store.create(comment).unwrap();
        let reparsed = parse_comments(&store.to_xml(None).unwrap()).unwrap();
        assert_eq!(reparsed.comments[0].text, "one\ntwo <3");
        assert_eq!(reparsed.comments[0].para_id, Some(ParaId(0x10)));
        assert!(reparsed.root.unwrap().contains(ns::W14));
    }

    #[test]
    fn test_store_keys() {
        let mut store = CommentStore::new();
        store
            .create(Comment::new(CommentId(1), ParaId(1), 1, "A", None, "x"))
            .unwrap();
        store
            .create(Comment::new(CommentId(2), ParaId(2), 1, "A", None, "y"))
            .unwrap();
        assert!(matches!(
            store.create(Comment::new(CommentId(1), ParaId(9), 1, "A", None, "z")),
            Err(CommentError::Duplicate { kind: "comment", .. })
        ));
        assert!(matches!(
            store.create(Comment::new(CommentId(9), ParaId(2), 1, "A", None, "z")),
            Err(CommentError::Duplicate { kind: "paragraph id", .. })
        ));
        assert_eq!(store.by_para_id(ParaId(2)).unwrap().text(), "y");
        assert!(matches!(store.get(CommentId(7)), Err(CommentError::NotFound { .. })));

        let (position, removed) = store.remove(CommentId(1)).unwrap();
        assert_eq!(position, 0);
        assert!(store.by_para_id(ParaId(1)).is_none());
        store.insert_at(position, removed).unwrap();
        let ids: Vec<CommentId> = store.list().map(Comment::id).collect();
        assert_eq!(ids, vec![CommentId(1), CommentId(2)]);
    }
}
