/// The `[Content_Types].xml` item.
///
/// Implements the OPC content type discovery algorithm using Default and
/// Override elements, and writes the item back out.
use crate::common::xml::escape_xml;
use crate::ooxml::opc::constants::content_type as ct;
use crate::ooxml::opc::error::{OpcError, Result};
use crate::ooxml::opc::packuri::PackURI;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Content type map for looking up content types by part name or extension.
#[derive(Debug, Clone)]
pub struct ContentTypes {
    /// Maps lowercase file extensions to default content types
    defaults: BTreeMap<String, String>,

    /// Maps specific partnames to override content types
    overrides: BTreeMap<String, String>,
}

impl ContentTypes {
    /// Create a map holding only the standard `rels` and `xml` defaults.
    pub fn new() -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("rels".to_string(), ct::OPC_RELATIONSHIPS.to_string());
        defaults.insert("xml".to_string(), ct::XML.to_string());
        Self {
            defaults,
            overrides: BTreeMap::new(),
        }
    }

    /// Parse content types from [Content_Types].xml.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut map = Self {
            defaults: BTreeMap::new(),
            overrides: BTreeMap::new(),
        };
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                    let is_default = match e.local_name().as_ref() {
                        b"Default" => true,
                        b"Override" => false,
                        _ => {
                            buf.clear();
                            continue;
                        },
                    };

                    let mut key = None;
                    let mut content_type = None;

                    for attr in e.attributes() {
                        let attr = attr?;
                        match attr.key.as_ref() {
                            b"Extension" | b"PartName" => {
                                key = Some(attr.unescape_value()?.to_string());
                            },
                            b"ContentType" => {
                                content_type = Some(attr.unescape_value()?.to_string());
                            },
                            _ => {},
                        }
                    }

                    if let (Some(key), Some(ct)) = (key, content_type) {
                        if is_default {
                            map.defaults.insert(key.to_lowercase(), ct);
                        } else {
                            map.overrides.insert(key, ct);
                        }
                    }
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(OpcError::XmlError(format!(
                        "Content types parse error: {}",
                        e
                    )));
                },
                _ => {},
            }
            buf.clear();
        }

        Ok(map)
    }

    /// Get the content type for a partname.
    ///
    /// First checks for an override, then falls back to the default
    /// based on file extension.
    pub fn get(&self, pack_uri: &PackURI) -> Option<&str> {
        if let Some(ct) = self.overrides.get(pack_uri.as_str()) {
            return Some(ct);
        }
        self.defaults
            .get(&pack_uri.ext().to_lowercase())
            .map(String::as_str)
    }

    /// Register the content type of a part.
    ///
    /// Parts already covered by their extension's default need no override.
    pub fn set(&mut self, partname: &PackURI, content_type: &str) {
        let ext = partname.ext().to_lowercase();
        if self.defaults.get(&ext).map(String::as_str) == Some(content_type) {
            self.overrides.remove(partname.as_str());
        } else {
            self.overrides
                .insert(partname.to_string(), content_type.to_string());
        }
    }

    /// Generate the XML for [Content_Types].xml.
    pub fn to_xml(&self) -> Result<String> {
        let mut xml = String::with_capacity(4096);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        );

        for (ext, content_type) in &self.defaults {
            write!(
                &mut xml,
                r#"<Default Extension="{}" ContentType="{}"/>"#,
                escape_xml(ext),
                escape_xml(content_type)
            )?;
        }

        for (partname, content_type) in &self.overrides {
            write!(
                &mut xml,
                r#"<Override PartName="{}" ContentType="{}"/>"#,
                escape_xml(partname),
                escape_xml(content_type)
            )?;
        }

        xml.push_str("</Types>");

        Ok(xml)
    }
}

impl Default for ContentTypes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_lookup() {
        let xml = br#"<?xml version="1.0"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
    <Default Extension="XML" ContentType="application/xml"/>
    <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
</Types>"#;
        let map = ContentTypes::from_xml(xml).unwrap();

        let doc = PackURI::new("/word/document.xml").unwrap();
        assert_eq!(map.get(&doc), Some(ct::WML_DOCUMENT_MAIN));

        let other = PackURI::new("/word/styles.xml").unwrap();
        assert_eq!(map.get(&other), Some(ct::XML));

        let png = PackURI::new("/word/media/image1.png").unwrap();
        assert_eq!(map.get(&png), None);
    }

    #[test]
    fn test_set_and_serialize() {
        let mut map = ContentTypes::new();
        let comments = PackURI::new("/word/comments.xml").unwrap();
        map.set(&comments, ct::WML_COMMENTS);
        let plain = PackURI::new("/customXml/item1.xml").unwrap();
        map.set(&plain, ct::XML);

        let xml = map.to_xml().unwrap();
        assert!(xml.contains(r#"<Override PartName="/word/comments.xml""#));
        assert!(!xml.contains("/customXml/item1.xml"));
        assert!(xml.contains(r#"<Default Extension="rels""#));
    }
}
