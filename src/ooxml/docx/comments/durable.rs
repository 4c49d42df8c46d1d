/// Durable comment ids, persisted as `commentsIds.xml` and `commentsExtensible.xml`.
///
/// Word keys `commentsIds.xml` by paragraph id, but the ledger is keyed by
/// content id so that it stays independent of threading. The paragraph id is
/// looked up when writing.
use super::error::{CommentError, Result};
use super::fragment::{self, attr};
use super::model::{CommentId, DurableEntry, DurableId, ParaId, format_timestamp, parse_timestamp};
use super::table::Table;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurableIdLedger {
    entries: Table<CommentId, DurableEntry>,
    owners: HashMap<DurableId, CommentId>,
}

impl DurableIdLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the durable id of a comment.
    ///
    /// # Errors
    /// `Duplicate` when the comment already has one or the durable id is taken.
    pub fn create(&mut self, id: CommentId, durable_id: DurableId, date_utc: Option<DateTime<Utc>>) -> Result<()> {
        let position = self.entries.len();
        self.insert_at(position, id, DurableEntry { durable_id, date_utc })
    }

    pub(crate) fn insert_at(&mut self, position: usize, id: CommentId, entry: DurableEntry) -> Result<()> {
        if self.owners.contains_key(&entry.durable_id) {
            return Err(CommentError::duplicate("durable id", entry.durable_id));
        }
        let durable_id = entry.durable_id;
        self.entries
            .insert_at(position, id, entry)
            .map_err(|(key, _)| CommentError::duplicate("durable entry", key))?;
        self.owners.insert(durable_id, id);
        Ok(())
    }

    pub fn get(&self, id: CommentId) -> Result<&DurableEntry> {
        self.entries
            .get(&id)
            .ok_or_else(|| CommentError::not_found("durable entry", id))
    }

    #[inline]
    pub fn contains(&self, id: CommentId) -> bool {
        self.entries.contains(&id)
    }

    /// Remove the entry of a comment, returning its position and value.
    pub fn remove(&mut self, id: CommentId) -> Option<(usize, DurableEntry)> {
        let (position, entry) = self.entries.remove(&id)?;
        self.owners.remove(&entry.durable_id);
        Some((position, entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CommentId, &DurableEntry)> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize as `commentsIds.xml`.
    ///
    /// # Arguments
    /// * `root` - Root start tag of the loaded part, if any
    /// * `para_of` - Paragraph id of a live comment
    pub(crate) fn to_ids_xml(
        &self,
        root: Option<&str>,
        para_of: impl Fn(CommentId) -> Option<ParaId>,
    ) -> Result<String> {
        let mut records = String::with_capacity(self.len() * 96);
        for (id, entry) in self.entries.iter() {
            let Some(para_id) = para_of(*id) else {
                tracing::warn!(comment = %id, "durable entry without a comment, not written");
                continue;
            };
            write!(
                records,
                r#"<w16cid:commentId w16cid:paraId="{}" w16cid:durableId="{}"/>"#,
                para_id, entry.durable_id
            )?;
        }
        Ok(fragment::COMMENTS_IDS.write(root, &records))
    }

    /// Serialize as `commentsExtensible.xml`.
    pub(crate) fn to_extensible_xml(&self, root: Option<&str>) -> Result<String> {
        let mut records = String::with_capacity(self.len() * 96);
        for entry in self.entries.values() {
            write!(
                records,
                r#"<w16cex:commentExtensible w16cex:durableId="{}""#,
                entry.durable_id
            )?;
            if let Some(date) = &entry.date_utc {
                write!(records, r#" w16cex:dateUtc="{}""#, format_timestamp(date))?;
            }
            records.push_str("/>");
        }
        Ok(fragment::COMMENTS_EXTENSIBLE.write(root, &records))
    }
}

/// The parsed content of `commentsIds.xml`: `(paraId, durableId)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IdsPart {
    pub root: Option<String>,
    pub entries: Vec<(Option<ParaId>, Option<DurableId>)>,
}

/// The parsed content of `commentsExtensible.xml`: `(durableId, dateUtc)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExtensiblePart {
    pub root: Option<String>,
    pub entries: Vec<(Option<DurableId>, Option<DateTime<Utc>>)>,
}

/// Parse `commentsIds.xml`.
pub(crate) fn parse_comments_ids(xml: &str) -> Result<IdsPart> {
    let mut part = IdsPart::default();
    part.root = scan_records(xml, b"commentId", |e| {
        part.entries.push((
            attr(e, b"paraId")?.as_deref().and_then(ParaId::parse),
            attr(e, b"durableId")?.as_deref().and_then(DurableId::parse),
        ));
        Ok(())
    })?;
    Ok(part)
}

/// Parse `commentsExtensible.xml`.
pub(crate) fn parse_comments_extensible(xml: &str) -> Result<ExtensiblePart> {
    let mut part = ExtensiblePart::default();
    part.root = scan_records(xml, b"commentExtensible", |e| {
        part.entries.push((
            attr(e, b"durableId")?.as_deref().and_then(DurableId::parse),
            attr(e, b"dateUtc")?.as_deref().and_then(parse_timestamp),
        ));
        Ok(())
    })?;
    Ok(part)
}

/// Visit every top-level record named `local`. Returns the root start tag.
fn scan_records(
    xml: &str,
    local: &[u8],
    mut visit: impl FnMut(&BytesStart<'_>) -> Result<()>,
) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    let mut root = None;
    let mut depth = 0usize;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(_) | Event::Empty(_) if depth == 0 => {
                root = Some(xml[start..end].to_string());
                if matches!(event, Event::Empty(_)) {
                    break;
                }
                depth = 1;
            },
            Event::Start(ref e) | Event::Empty(ref e) => {
                if depth == 1 && e.local_name().as_ref() == local {
                    visit(e)?;
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            },
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_uniqueness() {
        let mut ledger = DurableIdLedger::new();
        ledger.create(CommentId(1), DurableId(0x10), None).unwrap();
        assert!(matches!(
            ledger.create(CommentId(2), DurableId(0x10), None),
            Err(CommentError::Duplicate { kind: "durable id", .. })
        ));
        assert!(matches!(
            ledger.create(CommentId(1), DurableId(0x11), None),
            Err(CommentError::Duplicate { kind: "durable entry", .. })
        ));
        // A failed create leaves no trace.
        ledger.create(CommentId(2), DurableId(0x11), None).unwrap();

        let (position, entry) = ledger.remove(CommentId(1)).unwrap();
        assert_eq!((position, entry.durable_id), (0, DurableId(0x10)));
        ledger.create(CommentId(3), DurableId(0x10), None).unwrap();
        assert!(ledger.get(CommentId(1)).is_err());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_ids_xml() {
        let mut ledger = DurableIdLedger::new();
        let date = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        ledger.create(CommentId(1), DurableId(0x1234), Some(date)).unwrap();
        ledger.create(CommentId(2), DurableId(0x5678), None).unwrap();

        let ids = ledger
            .to_ids_xml(None, |id| (id == CommentId(1)).then_some(ParaId(0xAB)))
            .unwrap();
        assert!(ids.contains(r#"<w16cid:commentId w16cid:paraId="000000AB" w16cid:durableId="00001234"/></w16cid:commentsIds>"#));
        let parsed = parse_comments_ids(&ids).unwrap();
        assert_eq!(parsed.entries, vec![(Some(ParaId(0xAB)), Some(DurableId(0x1234)))]);

        let ext = ledger.to_extensible_xml(None).unwrap();
        assert!(ext.contains(r#"<w16cex:commentExtensible w16cex:durableId="00001234" w16cex:dateUtc="2024-02-03T04:05:06Z"/>"#));
        let parsed = parse_comments_extensible(&ext).unwrap();
        assert_eq!(
            parsed.entries,
            vec![
                (Some(DurableId(0x1234)), Some(date)),
                (Some(DurableId(0x5678)), None)
            ]
        );
        assert!(parsed.root.unwrap().contains("mc:Ignorable=\"w16cex\""));
    }
}
