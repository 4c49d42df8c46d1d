/// Story parts: the main document, headers and footers.
///
/// A story is split into top-level paragraphs and the raw XML between them.
/// Raw segments are written back byte for byte, so a story whose paragraphs
/// were not touched serializes to exactly the input.
use super::paragraph::Paragraph;
use crate::ooxml::error::{OoxmlError, Result};
use crate::ooxml::opc::PackURI;
use crate::ooxml::opc::constants::content_type as ct;
use quick_xml::Reader;
use quick_xml::events::Event;

/// Which kind of part a story came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryKind {
    Main,
    Header,
    Footer,
}

impl StoryKind {
    /// Content type used when the package does not say otherwise.
    pub fn default_content_type(self) -> &'static str {
        match self {
            StoryKind::Main => ct::WML_DOCUMENT_MAIN,
            StoryKind::Header => ct::WML_HEADER,
            StoryKind::Footer => ct::WML_FOOTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Raw(String),
    Paragraph(Paragraph),
}

/// One story part, parsed into paragraphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
    partname: PackURI,
    kind: StoryKind,
    content_type: String,
    segments: Vec<Segment>,
    /// Segment index of each top-level paragraph, in document order
    paragraphs: Vec<usize>,
}

impl Story {
    /// Parse a story part.
    ///
    /// # Arguments
    /// * `partname` - Partname the story is saved back to
    /// * `kind` - Main document, header or footer
    /// * `content_type` - Content type to register on save
    /// * `xml` - The part's XML
    pub fn parse(partname: PackURI, kind: StoryKind, content_type: &str, xml: &str) -> Result<Self> {
        let mut story = Story {
            partname,
            kind,
            content_type: content_type.to_string(),
            segments: Vec::new(),
            paragraphs: Vec::new(),
        };

        let mut reader = Reader::from_str(xml);
        let mut raw_start = 0usize;
        let mut para_start: Option<usize> = None;
        let mut depth = 0usize;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event()?;
            let end = reader.buffer_position() as usize;

            match event {
                Event::Start(ref e) => {
                    if para_start.is_some() {
                        depth += 1;
                    } else if e.name().as_ref() == b"w:p" {
                        story.push_raw(&xml[raw_start..start]);
                        para_start = Some(start);
                        depth = 1;
                    }
                },
                Event::Empty(ref e) if para_start.is_none() && e.name().as_ref() == b"w:p" => {
                    story.push_raw(&xml[raw_start..start]);
                    story.push_paragraph(Paragraph::parse(&xml[start..end])?);
                    raw_start = end;
                },
                Event::End(_) => {
                    if let Some(p_start) = para_start {
                        depth -= 1;
                        if depth == 0 {
                            story.push_paragraph(Paragraph::parse(&xml[p_start..end])?);
                            para_start = None;
                            raw_start = end;
                        }
                    }
                },
                Event::Eof => break,
                _ => {},
            }
        }

        if para_start.is_some() {
            return Err(OoxmlError::InvalidFormat(format!(
                "unterminated paragraph in {}",
                story.partname
            )));
        }
        story.push_raw(&xml[raw_start..]);

        Ok(story)
    }

    /// Parse a story from raw part bytes.
    pub fn from_bytes(partname: PackURI, kind: StoryKind, content_type: &str, blob: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(blob).map_err(|source| OoxmlError::Utf8 {
            part: partname.to_string(),
            source,
        })?;
        Self::parse(partname, kind, content_type, xml)
    }

    fn push_raw(&mut self, raw: &str) {
        if !raw.is_empty() {
            self.segments.push(Segment::Raw(raw.to_string()));
        }
    }

    fn push_paragraph(&mut self, paragraph: Paragraph) {
        self.paragraphs.push(self.segments.len());
        self.segments.push(Segment::Paragraph(paragraph));
    }

    #[inline]
    pub fn partname(&self) -> &PackURI {
        &self.partname
    }

    #[inline]
    pub fn kind(&self) -> StoryKind {
        self.kind
    }

    #[inline]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Number of top-level paragraphs.
    #[inline]
    pub fn paragraph_count(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn paragraph(&self, index: usize) -> Option<&Paragraph> {
        match self.segments.get(*self.paragraphs.get(index)?) {
            Some(Segment::Paragraph(p)) => Some(p),
            _ => None,
        }
    }

    pub fn paragraph_mut(&mut self, index: usize) -> Option<&mut Paragraph> {
        let seg = *self.paragraphs.get(index)?;
        match self.segments.get_mut(seg) {
            Some(Segment::Paragraph(p)) => Some(p),
            _ => None,
        }
    }

    /// Iterate over the top-level paragraphs in document order.
    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Paragraph(p) => Some(p),
            Segment::Raw(_) => None,
        })
    }

    /// Serialize the story.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(
            self.segments
                .iter()
                .map(|seg| match seg {
                    Segment::Raw(raw) => raw.len(),
                    Segment::Paragraph(_) => 256,
                })
                .sum(),
        );
        for seg in &self.segments {
            match seg {
                Segment::Raw(raw) => xml.push_str(raw),
                Segment::Paragraph(p) => p.to_xml(&mut xml),
            }
        }
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::docx::body::paragraph::RunSequence;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>One</w:t></w:r></w:p>
<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
<w:p/>
<w:p><w:r><w:txbxContent><w:p><w:r><w:t>Inner</w:t></w:r></w:p></w:txbxContent></w:r></w:p>
<w:sectPr/></w:body></w:document>"#;

    fn parse() -> Story {
        Story::parse(
            PackURI::new("/word/document.xml").unwrap(),
            StoryKind::Main,
            ct::WML_DOCUMENT_MAIN,
            DOC,
        )
        .unwrap()
    }

    #[test]
    fn test_top_level_paragraphs() {
        let story = parse();
        assert_eq!(story.paragraph_count(), 4);
        assert_eq!(story.paragraph(0).unwrap().text(), "One");
        assert_eq!(story.paragraph(1).unwrap().text(), "Cell");
        assert_eq!(story.paragraph(2).unwrap().run_count(), 0);
        // Text box paragraphs stay inside their host run.
        assert_eq!(story.paragraph(3).unwrap().run_count(), 1);
        assert!(story.paragraph(4).is_none());
    }

    #[test]
    fn test_untouched_story_roundtrips() {
        assert_eq!(parse().to_xml(), DOC);
    }

    #[test]
    fn test_edit_is_local() {
        let mut story = parse();
        story
            .paragraph_mut(2)
            .unwrap()
            .insert_marker(0, crate::ooxml::docx::body::MarkerKind::RangeStart, 4);
        let xml = story.to_xml();
        assert!(xml.contains(r#"<w:p><w:commentRangeStart w:id="4"/></w:p>"#));
        assert!(xml.contains("<w:p><w:r><w:t>One</w:t></w:r></w:p>"));
    }
}
