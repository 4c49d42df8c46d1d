/// Locating the comment fragments inside a package.
use super::error::Result;
use crate::ooxml::error::OoxmlError;
use crate::ooxml::opc::constants::{content_type as ct, relationship_type as rt};
use crate::ooxml::opc::{PackURI, PartStore};

/// A fragment part kind: how it is related from the main document and
/// where Word puts it when creating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartKind {
    pub reltype: &'static str,
    pub content_type: &'static str,
    pub default_partname: &'static str,
}

pub(crate) const COMMENTS: PartKind = PartKind {
    reltype: rt::COMMENTS,
    content_type: ct::WML_COMMENTS,
    default_partname: "/word/comments.xml",
};

pub(crate) const COMMENTS_EXTENDED: PartKind = PartKind {
    reltype: rt::COMMENTS_EXTENDED,
    content_type: ct::WML_COMMENTS_EXTENDED,
    default_partname: "/word/commentsExtended.xml",
};

pub(crate) const COMMENTS_IDS: PartKind = PartKind {
    reltype: rt::COMMENTS_IDS,
    content_type: ct::WML_COMMENTS_IDS,
    default_partname: "/word/commentsIds.xml",
};

pub(crate) const COMMENTS_EXTENSIBLE: PartKind = PartKind {
    reltype: rt::COMMENTS_EXTENSIBLE,
    content_type: ct::WML_COMMENTS_EXTENSIBLE,
    default_partname: "/word/commentsExtensible.xml",
};

pub(crate) const PEOPLE: PartKind = PartKind {
    reltype: rt::PEOPLE,
    content_type: ct::WML_PEOPLE,
    default_partname: "/word/people.xml",
};

impl PartKind {
    /// Partname of this fragment in `store`, if the package has one.
    ///
    /// Prefers the relationship from the main document and falls back to the
    /// conventional name.
    pub(crate) fn find(&self, store: &dyn PartStore, main: &PackURI) -> Option<PackURI> {
        if let Some(partname) = store
            .related_parts(main, self.reltype)
            .into_iter()
            .find(|p| store.contains_part(p))
        {
            return Some(partname);
        }
        let fallback = PackURI::new(self.default_partname).ok()?;
        store.contains_part(&fallback).then_some(fallback)
    }

    /// The partname to write a new fragment of this kind to.
    pub(crate) fn default_uri(&self) -> Result<PackURI> {
        Ok(PackURI::new(self.default_partname)?)
    }

    /// Write `xml` to `partname` and relate it from the main document.
    pub(crate) fn save(
        &self,
        store: &mut dyn PartStore,
        main: &PackURI,
        partname: &PackURI,
        xml: String,
    ) {
        store.put_part(partname, self.content_type, xml.into_bytes());
        store.ensure_relationship(main, partname, self.reltype);
    }
}

/// Partname of the main document part.
pub(crate) fn main_document(store: &dyn PartStore) -> Result<PackURI> {
    if let Some(main) = store.related_part(&PackURI::package(), rt::OFFICE_DOCUMENT) {
        return Ok(main);
    }
    let fallback = PackURI::new("/word/document.xml")?;
    if store.contains_part(&fallback) {
        return Ok(fallback);
    }
    Err(OoxmlError::PartNotFound("main document part".to_string()).into())
}

/// Partname of the core properties part, if present.
pub(crate) fn core_properties(store: &dyn PartStore) -> Option<PackURI> {
    store
        .related_part(&PackURI::package(), rt::CORE_PROPERTIES)
        .filter(|p| store.contains_part(p))
        .or_else(|| {
            let fallback = PackURI::new("/docProps/core.xml").ok()?;
            store.contains_part(&fallback).then_some(fallback)
        })
}

/// A part's content as text, without a leading byte order mark.
pub(crate) fn part_text<'a>(store: &'a dyn PartStore, partname: &PackURI) -> Result<Option<&'a str>> {
    let Some(blob) = store.get_part(partname) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(blob).map_err(|source| OoxmlError::Utf8 {
        part: partname.to_string(),
        source,
    })?;
    Ok(Some(text.strip_prefix('\u{feff}').unwrap_or(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::OpcPackage;

    #[test]
    fn test_find_by_relationship_and_fallback() {
        let mut pkg = OpcPackage::new();
        let main = PackURI::new("/word/document.xml").unwrap();
        pkg.put_part(&main, ct::WML_DOCUMENT_MAIN, b"<w:document/>".to_vec());
        assert_eq!(main_document(&pkg).unwrap(), main);
        assert_eq!(COMMENTS.find(&pkg, &main), None);

        let odd = PackURI::new("/word/notes.xml").unwrap();
        COMMENTS.save(&mut pkg, &main, &odd, "<w:comments/>".to_string());
        assert_eq!(COMMENTS.find(&pkg, &main), Some(odd));
        assert_eq!(pkg.content_type(&PackURI::new("/word/notes.xml").unwrap()), Some(ct::WML_COMMENTS));

        let people = PEOPLE.default_uri().unwrap();
        pkg.put_part(&people, ct::WML_PEOPLE, b"\xEF\xBB\xBF<w15:people/>".to_vec());
        assert_eq!(PEOPLE.find(&pkg, &main), Some(people.clone()));
        assert_eq!(part_text(&pkg, &people).unwrap(), Some("<w15:people/>"));
    }

    #[test]
    fn test_missing_main_document() {
        let pkg = OpcPackage::new();
        assert!(main_document(&pkg).is_err());
        assert_eq!(core_properties(&pkg), None);
    }
}
