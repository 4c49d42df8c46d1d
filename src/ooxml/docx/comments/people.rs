/// Known comment authors, persisted as `people.xml`.
///
/// The registry is advisory. Comments carry their author as a plain display
/// name, so a person record never takes part in comment identity or
/// threading; it only lets Word show presence information for a name.
use super::error::{CommentError, Result};
use super::fragment::{self, attr};
use super::model::{PersonRecord, Presence};
use super::parts;
use crate::common::xml::escape_xml;
use crate::ooxml::opc::PartStore;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::fmt::Write;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeopleRegistry {
    people: Vec<PersonRecord>,
}

impl PeopleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the people part of a package, if it has one.
    pub fn from_package(store: &dyn PartStore) -> Result<Option<Self>> {
        let main = parts::main_document(store)?;
        let Some(partname) = parts::PEOPLE.find(store, &main) else {
            return Ok(None);
        };
        match parts::part_text(store, &partname)? {
            Some(xml) => Ok(Some(parse_people(xml)?.registry)),
            None => Ok(None),
        }
    }

    /// Return the record for `name`, creating it if needed.
    ///
    /// An existing record is returned as is: the first record registered for
    /// a name wins, and `presence` is only attached to new records.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty name or a presence with an empty id.
    pub fn ensure(&mut self, name: &str, presence: Option<Presence>) -> Result<&PersonRecord> {
        validate_person(name, presence.as_ref())?;
        if let Some(i) = self.position(name) {
            if presence.is_some() && self.people[i].presence != presence {
                tracing::debug!(name, "person already registered, keeping existing presence");
            }
            return Ok(&self.people[i]);
        }
        self.people.push(PersonRecord {
            name: name.to_string(),
            presence,
        });
        Ok(&self.people[self.people.len() - 1])
    }

    /// # Errors
    /// `NotFound` when no record has exactly this name.
    pub fn get(&self, name: &str) -> Result<&PersonRecord> {
        self.position(name)
            .map(|i| &self.people[i])
            .ok_or_else(|| CommentError::not_found("person", name))
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Copy in every person of `other` missing here.
    ///
    /// Existing records are never touched. Returns the records added.
    pub fn merge_from(&mut self, other: &PeopleRegistry, include_presence: bool) -> Vec<PersonRecord> {
        let mut added = Vec::new();
        for person in &other.people {
            if person.name.is_empty() || self.contains(&person.name) {
                continue;
            }
            let record = PersonRecord {
                name: person.name.clone(),
                presence: if include_presence {
                    person.presence.clone()
                } else {
                    None
                },
            };
            self.people.push(record.clone());
            added.push(record);
        }
        added
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<PersonRecord> {
        let i = self.position(name)?;
        Some(self.people.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersonRecord> {
        self.people.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.people.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.people.iter().position(|p| p.name == name)
    }

    /// Serialize as `people.xml`.
    pub(crate) fn to_xml(&self, root: Option<&str>) -> Result<String> {
        let mut records = String::with_capacity(self.len() * 128);
        for person in &self.people {
            write!(records, r#"<w15:person w15:author="{}""#, escape_xml(&person.name))?;
            match &person.presence {
                Some(presence) => write!(
                    records,
                    r#"><w15:presenceInfo w15:providerId="{}" w15:userId="{}"/></w15:person>"#,
                    escape_xml(&presence.provider_id),
                    escape_xml(&presence.user_id)
                )?,
                None => records.push_str("/>"),
            }
        }
        Ok(fragment::PEOPLE.write(root, &records))
    }
}

/// Check a person's name and presence.
pub(crate) fn validate_person(name: &str, presence: Option<&Presence>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CommentError::InvalidArgument(
            "person name must not be empty".to_string(),
        ));
    }
    if let Some(p) = presence
        && (p.provider_id.trim().is_empty() || p.user_id.trim().is_empty())
    {
        return Err(CommentError::InvalidArgument(
            "presence needs both a provider id and a user id".to_string(),
        ));
    }
    Ok(())
}

/// The parsed content of `people.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PeoplePart {
    pub root: Option<String>,
    pub registry: PeopleRegistry,
}

/// Parse `people.xml`.
///
/// Duplicate names keep their first record. A presence block missing either
/// id is dropped.
pub(crate) fn parse_people(xml: &str) -> Result<PeoplePart> {
    let mut reader = Reader::from_str(xml);
    let mut part = PeoplePart::default();
    let mut depth = 0usize;
    let mut current: Option<PersonRecord> = None;

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
                match e.local_name().as_ref() {
                    b"person" if depth == 1 => {
                        let person = PersonRecord {
                            name: attr(e, b"author")?.unwrap_or_default(),
                            presence: None,
                        };
                        if matches!(event, Event::Empty(_)) {
                            push_person(&mut part.registry, person);
                        } else {
                            current = Some(person);
                        }
                    },
                    b"presenceInfo" if depth == 2 => {
                        if let Some(person) = current.as_mut() {
                            let provider_id = attr(e, b"providerId")?.unwrap_or_default();
                            let user_id = attr(e, b"userId")?.unwrap_or_default();
                            if provider_id.is_empty() || user_id.is_empty() {
                                tracing::warn!(name = %person.name, "ignoring incomplete presence info");
                            } else {
                                person.presence = Some(Presence { provider_id, user_id });
                            }
                        }
                    },
                    _ => {},
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            },
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1
                    && let Some(person) = current.take()
                {
                    push_person(&mut part.registry, person);
                }
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

fn push_person(registry: &mut PeopleRegistry, person: PersonRecord) {
    if person.name.is_empty() {
        tracing::warn!("ignoring person without an author name");
    } else if !registry.contains(&person.name) {
        registry.people.push(person);
    }
}
