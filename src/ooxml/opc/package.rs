/// In-memory OPC package.
///
/// This module provides the OpcPackage type, which represents an Open Packaging
/// Convention package as a set of named parts plus their relationships and
/// content types. The zip container itself is handled by the caller: a package
/// is built from and flattened back to `(member name, bytes)` entries.
use crate::ooxml::opc::constants::relationship_type;
use crate::ooxml::opc::content_types::ContentTypes;
use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::packuri::{CONTENT_TYPES_URI, PackURI};
use crate::ooxml::opc::part::PartStore;
use crate::ooxml::opc::rel::Relationships;
use std::collections::BTreeMap;

/// Main API class for working with OPC packages.
#[derive(Debug, Clone, Default)]
pub struct OpcPackage {
    /// Part content, indexed by partname. Excludes `.rels` parts and the
    /// content types item, which are kept parsed below.
    parts: BTreeMap<PackURI, Vec<u8>>,

    /// Relationships, indexed by source partname (`/` for the package).
    rels: BTreeMap<PackURI, Relationships>,

    content_types: ContentTypes,
}

impl OpcPackage {
    /// Create a new empty OPC package.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a package from container entries.
    ///
    /// # Arguments
    /// * `entries` - `(member name, content)` pairs, e.g. `("word/document.xml", bytes)`
    ///
    /// # Example
    /// ```
    /// use docx_comments::ooxml::opc::OpcPackage;
    ///
    /// let pkg = OpcPackage::from_parts(vec![(
    ///     "word/document.xml".to_string(),
    ///     b"<w:document/>".to_vec(),
    /// )])
    /// .unwrap();
    /// assert_eq!(pkg.part_count(), 1);
    /// ```
    pub fn from_parts<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut pkg = Self::new();
        let mut rels_blobs = Vec::new();

        for (name, blob) in entries {
            if name.ends_with('/') {
                continue;
            }
            let partname = PackURI::from_membername(&name)?;
            if partname.as_str() == CONTENT_TYPES_URI {
                pkg.content_types = ContentTypes::from_xml(&blob)?;
            } else if let Some(source) = partname.rels_source() {
                rels_blobs.push((source, blob));
            } else {
                pkg.parts.insert(partname, blob);
            }
        }

        for (source, blob) in rels_blobs {
            let rels = Relationships::from_xml(&blob, source.base_uri())?;
            pkg.rels.insert(source, rels);
        }

        Ok(pkg)
    }

    /// Flatten the package back to container entries.
    ///
    /// The content types item comes first, then package relationships, then
    /// every part followed by its own relationships.
    pub fn to_parts(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::with_capacity(self.parts.len() * 2 + 2);
        entries.push((
            CONTENT_TYPES_URI[1..].to_string(),
            self.content_types.to_xml()?.into_bytes(),
        ));

        let package = PackURI::package();
        if let Some(rels) = self.rels.get(&package) {
            entries.push((
                package.rels_uri().membername().to_string(),
                rels.to_xml()?.into_bytes(),
            ));
        }

        for (partname, blob) in &self.parts {
            entries.push((partname.membername().to_string(), blob.clone()));
            if let Some(rels) = self.rels.get(partname).filter(|r| !r.is_empty()) {
                entries.push((
                    partname.rels_uri().membername().to_string(),
                    rels.to_xml()?.into_bytes(),
                ));
            }
        }

        Ok(entries)
    }

    /// Partname of the main document part.
    pub fn main_document_partname(&self) -> Result<PackURI> {
        self.related_part(&PackURI::package(), relationship_type::OFFICE_DOCUMENT)
            .ok_or_else(|| {
                OpcError::PartNotFound("no officeDocument relationship in package".to_string())
            })
    }

    /// Relationships whose source is `source`, if any were recorded.
    pub fn rels(&self, source: &PackURI) -> Option<&Relationships> {
        self.rels.get(source)
    }

    /// Get the number of parts in the package.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

impl PartStore for OpcPackage {
    fn get_part(&self, partname: &PackURI) -> Option<&[u8]> {
        self.parts.get(partname).map(Vec::as_slice)
    }

    fn content_type(&self, partname: &PackURI) -> Option<&str> {
        self.content_types.get(partname)
    }

    fn put_part(&mut self, partname: &PackURI, content_type: &str, blob: Vec<u8>) {
        self.content_types.set(partname, content_type);
        self.parts.insert(partname.clone(), blob);
    }

    fn ensure_relationship(
        &mut self,
        source: &PackURI,
        target: &PackURI,
        reltype: &str,
    ) -> String {
        let base_uri = source.base_uri().to_string();
        let rels = self
            .rels
            .entry(source.clone())
            .or_insert_with(|| Relationships::new(base_uri.clone()));

        // A relationship written with a different but equivalent target
        // (absolute path, "./" prefix) still counts as present.
        if let Some(rel) = rels.with_reltype(reltype).find(|rel| {
            rel.target_partname()
                .map(|name| &name == target)
                .unwrap_or(false)
        }) {
            return rel.r_id().to_string();
        }

        let target_ref = target.relative_ref(&base_uri);
        rels.get_or_add(reltype, &target_ref).r_id().to_string()
    }

    fn related_parts(&self, source: &PackURI, reltype: &str) -> Vec<PackURI> {
        let Some(rels) = self.rels.get(source) else {
            return Vec::new();
        };
        rels.with_reltype(reltype)
            .filter_map(|rel| match rel.target_partname() {
                Ok(name) => Some(name),
                Err(err) => {
                    tracing::warn!(r_id = rel.r_id(), %err, "skipping unresolvable relationship");
                    None
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::constants::content_type as ct;

    fn minimal_docx() -> Vec<(String, Vec<u8>)> {
        vec![
            (
                "[Content_Types].xml".to_string(),
                br#"<?xml version="1.0"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
    <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
    <Default Extension="xml" ContentType="application/xml"/>
    <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
</Types>"#
                    .to_vec(),
            ),
            (
                "_rels/.rels".to_string(),
                br#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
    <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#
                    .to_vec(),
            ),
            (
                "word/document.xml".to_string(),
                br#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body/></w:document>"#
                    .to_vec(),
            ),
        ]
    }

    #[test]
    fn test_main_document_part() {
        let pkg = OpcPackage::from_parts(minimal_docx()).unwrap();
        let main = pkg.main_document_partname().unwrap();
        assert_eq!(main.as_str(), "/word/document.xml");
        assert_eq!(pkg.content_type(&main), Some(ct::WML_DOCUMENT_MAIN));
        assert!(pkg.get_part(&main).is_some());
        assert_eq!(pkg.part_count(), 1);
    }

    #[test]
    fn test_put_part_and_relate() {
        let mut pkg = OpcPackage::from_parts(minimal_docx()).unwrap();
        let main = pkg.main_document_partname().unwrap();
        let comments = PackURI::new("/word/comments.xml").unwrap();

        pkg.put_part(&comments, ct::WML_COMMENTS, b"<w:comments/>".to_vec());
        let r1 = pkg.ensure_relationship(&main, &comments, relationship_type::COMMENTS);
        let r2 = pkg.ensure_relationship(&main, &comments, relationship_type::COMMENTS);
        assert_eq!(r1, r2);
        assert_eq!(
            pkg.related_parts(&main, relationship_type::COMMENTS),
            vec![comments.clone()]
        );
        assert_eq!(pkg.content_type(&comments), Some(ct::WML_COMMENTS));

        let entries = pkg.to_parts().unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"word/_rels/document.xml.rels"));
        assert!(names.contains(&"word/comments.xml"));

        let reloaded = OpcPackage::from_parts(entries).unwrap();
        assert_eq!(
            reloaded.related_part(&main, relationship_type::COMMENTS),
            Some(comments)
        );
    }
}
