/// Shared plumbing for the comment fragment parts.
///
/// Each fragment is a flat list of records under one root element. When a
/// fragment is rewritten its original root start tag is reused, so namespace
/// declarations Word put there survive; declarations the new records need
/// are added if missing.
use super::error::Result;
use crate::ooxml::opc::constants::namespace as ns;
use quick_xml::events::BytesStart;
use std::fmt::Write;

pub(crate) const XML_DECLARATION: &str =
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Root element and namespaces of one fragment kind.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FragmentShape {
    /// Qualified root name, e.g. `w15:commentsEx`
    pub root: &'static str,
    /// `(prefix, uri)` pairs the records use
    pub namespaces: &'static [(&'static str, &'static str)],
    /// Prefixes listed in `mc:Ignorable`
    pub ignorable: &'static [&'static str],
}

pub(crate) const COMMENTS: FragmentShape = FragmentShape {
    root: "w:comments",
    namespaces: &[("mc", ns::MC), ("w", ns::WML_MAIN), ("w14", ns::W14)],
    ignorable: &["w14"],
};

pub(crate) const COMMENTS_EXTENDED: FragmentShape = FragmentShape {
    root: "w15:commentsEx",
    namespaces: &[("mc", ns::MC), ("w15", ns::W15)],
    ignorable: &["w15"],
};

pub(crate) const COMMENTS_IDS: FragmentShape = FragmentShape {
    root: "w16cid:commentsIds",
    namespaces: &[("mc", ns::MC), ("w16cid", ns::W16CID)],
    ignorable: &["w16cid"],
};

pub(crate) const COMMENTS_EXTENSIBLE: FragmentShape = FragmentShape {
    root: "w16cex:commentsExtensible",
    namespaces: &[("mc", ns::MC), ("w16cex", ns::W16CEX)],
    ignorable: &["w16cex"],
};

pub(crate) const PEOPLE: FragmentShape = FragmentShape {
    root: "w15:people",
    namespaces: &[("mc", ns::MC), ("w15", ns::W15)],
    ignorable: &["w15"],
};

impl FragmentShape {
    /// Serialize a fragment around already-serialized records.
    ///
    /// # Arguments
    /// * `root` - The root start tag captured at load time, if any
    /// * `records` - Serialized child elements
    pub(crate) fn write(&self, root: Option<&str>, records: &str) -> String {
        let open = match root {
            Some(tag) => self.complete_tag(tag),
            None => self.fresh_tag(),
        };
        let mut xml = String::with_capacity(XML_DECLARATION.len() + open.len() + records.len() + 64);
        xml.push_str(XML_DECLARATION);
        xml.push_str(&open);
        xml.push_str(records);
        xml.push_str("</");
        xml.push_str(self.root);
        xml.push('>');
        xml
    }

    fn fresh_tag(&self) -> String {
        let mut tag = format!("<{}", self.root);
        for (prefix, uri) in self.namespaces {
            let _ = write!(tag, r#" xmlns:{}="{}""#, prefix, uri);
        }
        let _ = write!(tag, r#" mc:Ignorable="{}">"#, self.ignorable.join(" "));
        tag
    }

    /// Add whatever declarations `tag` lacks.
    fn complete_tag(&self, tag: &str) -> String {
        let mut tag = tag
            .trim_end()
            .trim_end_matches('>')
            .trim_end_matches('/')
            .trim_end()
            .to_string();

        for (prefix, uri) in self.namespaces {
            if !tag.contains(&format!("xmlns:{}=", prefix)) {
                let _ = write!(tag, r#" xmlns:{}="{}""#, prefix, uri);
            }
        }

        const IGNORABLE: &str = "mc:Ignorable=\"";
        match tag.find(IGNORABLE) {
            Some(at) => {
                let value_start = at + IGNORABLE.len();
                let value_end = tag[value_start..]
                    .find('"')
                    .map(|len| value_start + len)
                    .unwrap_or(tag.len());
                let mut listed: Vec<String> = tag[value_start..value_end]
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                for prefix in self.ignorable {
                    if !listed.iter().any(|p| p == prefix) {
                        listed.push(prefix.to_string());
                    }
                }
                tag.replace_range(value_start..value_end, &listed.join(" "));
            },
            None => {
                let _ = write!(tag, r#" mc:Ignorable="{}""#, self.ignorable.join(" "));
            },
        }

        tag.push('>');
        tag
    }
}

/// Value of the attribute with local name `local`, unescaped.
pub(crate) fn attr(e: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.local_name().as_ref() == local {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Parse an `ST_OnOff` value.
pub(crate) fn on_off(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "on")
}
