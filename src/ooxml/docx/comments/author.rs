/// Default author resolution.
///
/// When a caller does not name an author, one is taken from the first
/// source that has one:
///
/// 1. a hint document whose `people.xml` lists exactly one person,
/// 2. the local Office user profile,
/// 3. the current document's core properties (`dc:creator`, then
///    `cp:lastModifiedBy`).
///
/// Nothing is ever made up: when no source yields a name the result is
/// `NotFound`.
use super::error::{CommentError, Result};
use super::model::PersonRecord;
use super::parts;
use super::people::PeopleRegistry;
use super::store::parse_comments;
use crate::common::xml::resolve_entity;
use crate::ooxml::opc::PartStore;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;

/// The local user as known to an Office installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemUser {
    pub name: String,
    pub initials: Option<String>,
}

/// Access to the local Office user profile.
///
/// Reading the registry or Office settings files is platform specific and
/// left to implementors.
pub trait SystemProfile {
    fn office_user(&self) -> Option<SystemUser>;
}

/// A profile source that never yields a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSystemProfile;

impl SystemProfile for NoSystemProfile {
    fn office_user(&self) -> Option<SystemUser> {
        None
    }
}

/// The hint document, as far as the caller could open it.
#[derive(Clone, Copy)]
pub enum AuthorHint<'a> {
    /// No hint configured
    None,
    /// A hint was configured but could not be opened
    Unavailable(&'a str),
    /// The opened hint package
    Package(&'a dyn PartStore),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorOptions {
    /// Carry presence information over from the hint document
    pub include_presence: bool,
    /// Fail instead of falling back when the hint document is unusable
    pub strict: bool,
}

/// Which source produced the default author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthorSource {
    HintDocument,
    SystemProfile,
    CoreCreator,
    CoreLastModifiedBy,
}

/// Recoverable problems met while resolving the default author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthorDiagnostic {
    /// The hint document lists more or fewer than one person
    Multiplicity { count: usize },
    /// The hint document could not be opened
    HintUnavailable { reason: String },
    /// The hint document has no people part
    NoPeoplePart,
    /// The hint document's people part could not be read
    InvalidPeoplePart { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultAuthor {
    pub person: PersonRecord,
    pub initials: Option<String>,
    pub source: AuthorSource,
    pub diagnostics: Vec<AuthorDiagnostic>,
}

/// Author names from `docProps/core.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreAuthors {
    pub creator: Option<String>,
    pub last_modified_by: Option<String>,
}

impl CoreAuthors {
    /// Parse a core properties part.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut core = CoreAuthors::default();
        let mut current: Option<&'static str> = None;
        let mut text = String::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    current = match e.local_name().as_ref() {
                        b"creator" => Some("creator"),
                        b"lastModifiedBy" => Some("lastModifiedBy"),
                        _ => None,
                    };
                    text.clear();
                },
                Event::Text(t) if current.is_some() => text.push_str(&t.decode()?),
                Event::CData(t) if current.is_some() => text.push_str(&t.decode()?),
                Event::GeneralRef(r) if current.is_some() => {
                    if let Some(ch) = resolve_entity(&r.decode()?) {
                        text.push(ch);
                    }
                },
                Event::End(_) => {
                    let value = Some(text.trim().to_string()).filter(|s| !s.is_empty());
                    match current.take() {
                        Some("creator") => core.creator = value,
                        Some(_) => core.last_modified_by = value,
                        None => {},
                    }
                    text.clear();
                },
                Event::Eof => break,
                _ => {},
            }
        }

        Ok(core)
    }

    /// Read the core properties of a package; empty when it has none.
    pub fn load(store: &dyn PartStore) -> Result<Self> {
        let Some(partname) = parts::core_properties(store) else {
            return Ok(Self::default());
        };
        match parts::part_text(store, &partname)? {
            Some(xml) => Self::from_xml(xml),
            None => Ok(Self::default()),
        }
    }

    /// The document's author: creator, else last modifier.
    pub fn author(&self) -> Option<&str> {
        self.creator.as_deref().or(self.last_modified_by.as_deref())
    }
}

impl PeopleRegistry {
    /// Work out who new comments should be attributed to.
    ///
    /// # Arguments
    /// * `hint` - The hint document, if one is configured
    /// * `profile` - Local Office profile lookup
    /// * `core` - Core properties of the document being edited
    /// * `initials_of` - Initials already used for a name in that document
    /// * `options` - Presence and strictness switches
    ///
    /// # Errors
    /// `NotFound` when no source has a name, or in strict mode when the hint
    /// document is unusable.
    pub fn resolve_default_author(
        hint: AuthorHint<'_>,
        profile: &dyn SystemProfile,
        core: &CoreAuthors,
        initials_of: impl Fn(&str) -> Option<String>,
        options: AuthorOptions,
    ) -> Result<DefaultAuthor> {
        let mut diagnostics = Vec::new();

        if let Some((person, initials)) = from_hint(hint, &options, &mut diagnostics) {
            let initials = initials.or_else(|| initials_of(&person.name));
            return Ok(DefaultAuthor {
                person,
                initials,
                source: AuthorSource::HintDocument,
                diagnostics,
            });
        }
        for diagnostic in &diagnostics {
            tracing::warn!(?diagnostic, "default author hint not usable, falling back");
        }

        let hint_failed = !diagnostics.is_empty();
        if options.strict
            && let Some(diagnostic) = diagnostics
                .iter()
                .find(|d| !matches!(d, AuthorDiagnostic::Multiplicity { .. }))
        {
            return Err(CommentError::not_found(
                "default author",
                format!("hint document unusable: {:?}", diagnostic),
            ));
        }

        if let Some(user) = profile.office_user().filter(|u| !u.name.trim().is_empty()) {
            let initials = user
                .initials
                .filter(|s| !s.is_empty())
                .or_else(|| initials_of(&user.name));
            return Ok(DefaultAuthor {
                person: PersonRecord {
                    name: user.name,
                    presence: None,
                },
                initials,
                source: AuthorSource::SystemProfile,
                diagnostics,
            });
        }

        if options.strict && hint_failed {
            return Err(CommentError::not_found(
                "default author",
                "hint document is ambiguous and no system profile is available",
            ));
        }

        for (name, source) in [
            (core.creator.as_deref(), AuthorSource::CoreCreator),
            (core.last_modified_by.as_deref(), AuthorSource::CoreLastModifiedBy),
        ] {
            if let Some(name) = name.map(str::trim).filter(|s| !s.is_empty()) {
                return Ok(DefaultAuthor {
                    person: PersonRecord {
                        name: name.to_string(),
                        presence: None,
                    },
                    initials: initials_of(name),
                    source,
                    diagnostics,
                });
            }
        }

        Err(CommentError::not_found("default author", "no identity source"))
    }
}

/// The single person of the hint document, with initials from its comments.
fn from_hint(
    hint: AuthorHint<'_>,
    options: &AuthorOptions,
    diagnostics: &mut Vec<AuthorDiagnostic>,
) -> Option<(PersonRecord, Option<String>)> {
    let store = match hint {
        AuthorHint::None => return None,
        AuthorHint::Unavailable(reason) => {
            diagnostics.push(AuthorDiagnostic::HintUnavailable {
                reason: reason.to_string(),
            });
            return None;
        },
        AuthorHint::Package(store) => store,
    };

    let registry = match PeopleRegistry::from_package(store) {
        Ok(Some(registry)) => registry,
        Ok(None) => {
            diagnostics.push(AuthorDiagnostic::NoPeoplePart);
            return None;
        },
        Err(err) => {
            diagnostics.push(AuthorDiagnostic::InvalidPeoplePart {
                reason: err.to_string(),
            });
            return None;
        },
    };
    if registry.len() != 1 {
        diagnostics.push(AuthorDiagnostic::Multiplicity {
            count: registry.len(),
        });
        return None;
    }

    let mut person = registry.iter().next()?.clone();
    if !options.include_presence {
        person.presence = None;
    }
    let initials = hint_initials(store, &person.name);
    Some((person, initials))
}

/// First non-empty initials the hint document's comments use for `name`.
fn hint_initials(store: &dyn PartStore, name: &str) -> Option<String> {
    let main = parts::main_document(store).ok()?;
    let partname = parts::COMMENTS.find(store, &main)?;
    let xml = parts::part_text(store, &partname).ok()??;
    parse_comments(xml)
        .ok()?
        .comments
        .into_iter()
        .filter(|c| c.author == name)
        .find_map(|c| c.initials.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::docx::comments::model::Presence;
    use crate::ooxml::opc::constants::{content_type as ct, relationship_type as rt};
    use crate::ooxml::opc::{OpcPackage, PackURI};

    struct Profile(Option<&'static str>);

    impl SystemProfile for Profile {
        fn office_user(&self) -> Option<SystemUser> {
            self.0.map(|name| SystemUser {
                name: name.to_string(),
                initials: None,
            })
        }
    }

    fn hint_package(people: Option<&str>) -> OpcPackage {
        let mut pkg = OpcPackage::new();
        let main = PackURI::new("/word/document.xml").unwrap();
        pkg.put_part(&main, ct::WML_DOCUMENT_MAIN, b"<w:document/>".to_vec());
        pkg.ensure_relationship(&PackURI::package(), &main, rt::OFFICE_DOCUMENT);
        if let Some(people) = people {
            let partname = PackURI::new("/word/people.xml").unwrap();
            pkg.put_part(&partname, ct::WML_PEOPLE, people.as_bytes().to_vec());
            pkg.ensure_relationship(&main, &partname, rt::PEOPLE);
        }
        let comments = PackURI::new("/word/comments.xml").unwrap();
        pkg.put_part(
            &comments,
            ct::WML_COMMENTS,
            br#"<w:comments><w:comment w:id="1" w:author="Hint Person" w:initials=""/><w:comment w:id="2" w:author="Hint Person" w:initials="HP"/></w:comments>"#.to_vec(),
        );
        pkg.ensure_relationship(&main, &comments, rt::COMMENTS);
        pkg
    }

    const ONE: &str = r#"<w15:people><w15:person w15:author="Hint Person"><w15:presenceInfo w15:providerId="AD" w15:userId="hp"/></w15:person></w15:people>"#;
    const TWO: &str = r#"<w15:people><w15:person w15:author="A"/><w15:person w15:author="B"/></w15:people>"#;

    fn core() -> CoreAuthors {
        CoreAuthors {
            creator: Some("Creator".to_string()),
            last_modified_by: Some("Editor".to_string()),
        }
    }

    fn no_initials(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_hint_document_wins() {
        let pkg = hint_package(Some(ONE));
        let author = PeopleRegistry::resolve_default_author(
            AuthorHint::Package(&pkg),
            &Profile(Some("Local")),
            &core(),
            no_initials,
            AuthorOptions::default(),
        )
        .unwrap();
        assert_eq!(author.source, AuthorSource::HintDocument);
        assert_eq!(author.person.name, "Hint Person");
        assert_eq!(author.person.presence, None);
        assert_eq!(author.initials.as_deref(), Some("HP"));
        assert!(author.diagnostics.is_empty());

        let with_presence = PeopleRegistry::resolve_default_author(
            AuthorHint::Package(&pkg),
            &NoSystemProfile,
            &core(),
            no_initials,
            AuthorOptions {
                include_presence: true,
                strict: false,
            },
        )
        .unwrap();
        assert_eq!(with_presence.person.presence, Some(Presence::new("AD", "hp")));
    }

    #[test]
    fn test_multiplicity_falls_back() {
        let pkg = hint_package(Some(TWO));
        let author = PeopleRegistry::resolve_default_author(
            AuthorHint::Package(&pkg),
            &Profile(Some("Local")),
            &core(),
            no_initials,
            AuthorOptions::default(),
        )
        .unwrap();
        assert_eq!(author.source, AuthorSource::SystemProfile);
        assert_eq!(author.person.name, "Local");
        assert_eq!(author.diagnostics, vec![AuthorDiagnostic::Multiplicity { count: 2 }]);

        // Strict mode still accepts the profile after an ambiguous hint.
        let strict = AuthorOptions {
            include_presence: false,
            strict: true,
        };
        let author = PeopleRegistry::resolve_default_author(
            AuthorHint::Package(&pkg),
            &Profile(Some("Local")),
            &core(),
            no_initials,
            strict,
        )
        .unwrap();
        assert_eq!(author.source, AuthorSource::SystemProfile);

        let err = PeopleRegistry::resolve_default_author(
            AuthorHint::Package(&pkg),
            &NoSystemProfile,
            &core(),
            no_initials,
            strict,
        )
        .unwrap_err();
        assert!(matches!(err, CommentError::NotFound { .. }));
    }

    #[test]
    fn test_core_properties_fallback() {
        let pkg = hint_package(None);
        let author = PeopleRegistry::resolve_default_author(
            AuthorHint::Package(&pkg),
            &NoSystemProfile,
            &core(),
            |name| (name == "Creator").then(|| "CR".to_string()),
            AuthorOptions::default(),
        )
        .unwrap();
        assert_eq!(author.source, AuthorSource::CoreCreator);
        assert_eq!(author.initials.as_deref(), Some("CR"));
        assert_eq!(author.diagnostics, vec![AuthorDiagnostic::NoPeoplePart]);

        let only_editor = CoreAuthors {
            creator: Some("  ".to_string()),
            last_modified_by: Some("Editor".to_string()),
        };
        let author = PeopleRegistry::resolve_default_author(
            AuthorHint::None,
            &NoSystemProfile,
            &only_editor,
            no_initials,
            AuthorOptions::default(),
        )
        .unwrap();
        assert_eq!(author.source, AuthorSource::CoreLastModifiedBy);
        assert_eq!(author.person.name, "Editor");
    }

    #[test]
    fn test_strict_unusable_hint() {
        let pkg = hint_package(None);
        let strict = AuthorOptions {
            include_presence: false,
            strict: true,
        };
        for hint in [AuthorHint::Package(&pkg), AuthorHint::Unavailable("/missing.docx")] {
            let err = PeopleRegistry::resolve_default_author(
                hint,
                &Profile(Some("Local")),
                &core(),
                no_initials,
                strict,
            )
            .unwrap_err();
            assert!(matches!(err, CommentError::NotFound { .. }));
        }
    }

    #[test]
    fn test_nothing_found() {
        let err = PeopleRegistry::resolve_default_author(
            AuthorHint::None,
            &NoSystemProfile,
            &CoreAuthors::default(),
            no_initials,
            AuthorOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CommentError::NotFound { kind: "default author", .. }));
    }

    #[test]
    fn test_core_authors_from_xml() {
        let xml = r#"<?xml version="1.0"?><cp:coreProperties xmlns:cp="c" xmlns:dc="d"><dc:title>T</dc:title><dc:creator>Ann &amp; Bo</dc:creator><cp:lastModifiedBy></cp:lastModifiedBy></cp:coreProperties>"#;
        let core = CoreAuthors::from_xml(xml).unwrap();
        assert_eq!(core.creator.as_deref(), Some("Ann & Bo"));
        assert_eq!(core.last_modified_by, None);
        assert_eq!(core.author(), Some("Ann & Bo"));
    }
}
