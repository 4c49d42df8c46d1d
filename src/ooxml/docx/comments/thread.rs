/// Reply and resolved state, persisted as `commentsExtended.xml`.
use super::error::{CommentError, Result};
use super::fragment::{self, attr, on_off};
use super::model::{ParaId, ThreadEntry};
use super::table::Table;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::fmt::Write;

/// Thread entries keyed by paragraph id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadLedger {
    entries: Table<ParaId, ThreadEntry>,
}

impl ThreadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unresolved entry.
    ///
    /// # Errors
    /// * `DanglingParent` when `parent` has no entry of its own
    /// * `Duplicate` when `para_id` already has one
    pub fn create(&mut self, para_id: ParaId, parent: Option<ParaId>) -> Result<()> {
        let position = self.entries.len();
        self.insert_at(position, para_id, ThreadEntry { parent, done: false })
    }

    pub(crate) fn insert_at(&mut self, position: usize, para_id: ParaId, entry: ThreadEntry) -> Result<()> {
        if let Some(parent) = entry.parent
            && (parent == para_id || !self.entries.contains(&parent))
        {
            return Err(CommentError::DanglingParent { para_id, parent });
        }
        self.entries
            .insert_at(position, para_id, entry)
            .map_err(|(key, _)| CommentError::duplicate("thread entry", key))
    }

    pub fn get(&self, para_id: ParaId) -> Result<&ThreadEntry> {
        self.entries
            .get(&para_id)
            .ok_or_else(|| CommentError::not_found("thread entry", para_id))
    }

    #[inline]
    pub fn contains(&self, para_id: ParaId) -> bool {
        self.entries.contains(&para_id)
    }

    /// Set the resolved flag. Returns the previous value.
    pub fn set_done(&mut self, para_id: ParaId, done: bool) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(&para_id)
            .ok_or_else(|| CommentError::not_found("thread entry", para_id))?;
        Ok(std::mem::replace(&mut entry.done, done))
    }

    /// Point an entry at a new parent, or make it a root. Returns the previous parent.
    pub fn reparent(&mut self, para_id: ParaId, parent: Option<ParaId>) -> Result<Option<ParaId>> {
        if let Some(parent) = parent
            && (parent == para_id || !self.entries.contains(&parent))
        {
            return Err(CommentError::DanglingParent { para_id, parent });
        }
        let entry = self
            .entries
            .get_mut(&para_id)
            .ok_or_else(|| CommentError::not_found("thread entry", para_id))?;
        Ok(std::mem::replace(&mut entry.parent, parent))
    }

    /// Remove an entry, returning its position and value.
    pub fn remove(&mut self, para_id: ParaId) -> Option<(usize, ThreadEntry)> {
        self.entries.remove(&para_id)
    }

    /// Direct replies of `para_id`, in ledger order.
    pub fn children_of(&self, para_id: ParaId) -> Vec<ParaId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.parent == Some(para_id))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Walk up from `para_id` to the root of its thread.
    ///
    /// Stops at the first repeated entry, so a corrupted parent cycle cannot
    /// loop forever.
    pub fn root_of(&self, para_id: ParaId) -> ParaId {
        let mut current = para_id;
        for _ in 0..=self.entries.len() {
            match self.entries.get(&current).and_then(|e| e.parent) {
                Some(parent) if self.entries.contains(&parent) => current = parent,
                _ => break,
            }
        }
        current
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParaId, &ThreadEntry)> {
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

    /// Serialize as `commentsExtended.xml`.
    pub(crate) fn to_xml(&self, root: Option<&str>) -> Result<String> {
        let mut records = String::with_capacity(self.len() * 96);
        for (para_id, entry) in self.entries.iter() {
            write!(records, r#"<w15:commentEx w15:paraId="{}""#, para_id)?;
            if let Some(parent) = entry.parent {
                write!(records, r#" w15:paraIdParent="{}""#, parent)?;
            }
            write!(records, r#" w15:done="{}"/>"#, if entry.done { 1 } else { 0 })?;
        }
        Ok(fragment::COMMENTS_EXTENDED.write(root, &records))
    }
}

/// One `<w15:commentEx>` record as written in the part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedThreadEntry {
    pub para_id: Option<ParaId>,
    pub parent: Option<ParaId>,
    pub done: bool,
}

/// The parsed content of `commentsExtended.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExtendedPart {
    pub root: Option<String>,
    pub entries: Vec<ParsedThreadEntry>,
}

/// Parse `commentsExtended.xml`.
pub(crate) fn parse_comments_extended(xml: &str) -> Result<ExtendedPart> {
    let mut reader = Reader::from_str(xml);
    let mut part = ExtendedPart::default();
    let mut depth = 0usize;

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
            Event::Start(ref e) | Event::Empty(ref e) => {
                if depth == 1 && e.local_name().as_ref() == b"commentEx" {
                    part.entries.push(ParsedThreadEntry {
                        para_id: attr(e, b"paraId")?.as_deref().and_then(ParaId::parse),
                        parent: attr(e, b"paraIdParent")?.as_deref().and_then(ParaId::parse),
                        done: attr(e, b"done")?.as_deref().is_some_and(on_off),
                    });
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

    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_children() {
        let mut ledger = ThreadLedger::new();
        ledger.create(ParaId(1), None).unwrap();
        ledger.create(ParaId(2), Some(ParaId(1))).unwrap();
        ledger.create(ParaId(3), Some(ParaId(1))).unwrap();
        ledger.create(ParaId(4), Some(ParaId(2))).unwrap();

        assert_eq!(ledger.children_of(ParaId(1)), vec![ParaId(2), ParaId(3)]);
        assert_eq!(ledger.root_of(ParaId(4)), ParaId(1));
        assert_eq!(ledger.root_of(ParaId(1)), ParaId(1));

        let err = ledger.create(ParaId(5), Some(ParaId(9))).unwrap_err();
        assert!(matches!(
            err,
            CommentError::DanglingParent {
                para_id: ParaId(5),
                parent: ParaId(9)
            }
        ));
        assert!(matches!(
            ledger.create(ParaId(2), None),
            Err(CommentError::Duplicate { .. })
        ));
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn test_set_done_is_idempotent() {
        let mut ledger = ThreadLedger::new();
        ledger.create(ParaId(1), None).unwrap();
        assert!(!ledger.set_done(ParaId(1), true).unwrap());
        assert!(ledger.set_done(ParaId(1), true).unwrap());
        assert!(ledger.get(ParaId(1)).unwrap().done);
        assert!(ledger.set_done(ParaId(8), true).is_err());
    }

    #[test]
    fn test_reparent() {
        let mut ledger = ThreadLedger::new();
        ledger.create(ParaId(1), None).unwrap();
        ledger.create(ParaId(2), None).unwrap();
        assert_eq!(ledger.reparent(ParaId(2), Some(ParaId(1))).unwrap(), None);
        assert_eq!(ledger.reparent(ParaId(2), None).unwrap(), Some(ParaId(1)));
        assert!(ledger.reparent(ParaId(2), Some(ParaId(2))).is_err());
        assert!(ledger.reparent(ParaId(2), Some(ParaId(7))).is_err());
    }

    #[test]
    fn test_xml_roundtrip() {
        let mut ledger = ThreadLedger::new();
        ledger.create(ParaId(0xA), None).unwrap();
        ledger.create(ParaId(0xB), Some(ParaId(0xA))).unwrap();
        ledger.set_done(ParaId(0xA), true).unwrap();

        let xml = ledger.to_xml(None).unwrap();
        assert!(xml.contains(r#"<w15:commentEx w15:paraId="0000000A" w15:done="1"/><w15:commentEx w15:paraId="0000000B" w15:paraIdParent="0000000A" w15:done="0"/>"#));

        let part = parse_comments_extended(&xml).unwrap();
        assert_eq!(
            part.entries,
            vec![
                ParsedThreadEntry {
                    para_id: Some(ParaId(0xA)),
                    parent: None,
                    done: true
                },
                ParsedThreadEntry {
                    para_id: Some(ParaId(0xB)),
                    parent: Some(ParaId(0xA)),
                    done: false
                },
            ]
        );
        assert!(part.root.unwrap().starts_with("<w15:commentsEx "));
    }

    #[test]
    fn test_parse_tolerates_bad_ids() {
        let xml = r#"<w15:commentsEx xmlns:w15="x"><w15:commentEx w15:paraId="zz" w15:done="1"/></w15:commentsEx>"#;
        let part = parse_comments_extended(xml).unwrap();
        assert_eq!(part.entries.len(), 1);
        assert_eq!(part.entries[0].para_id, None);
    }
}
