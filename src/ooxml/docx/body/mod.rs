/// Editable document bodies.
///
/// Comment anchors live inside the paragraphs of the main document and of
/// header/footer parts. This module loads those story parts into paragraphs
/// whose children can be inspected and edited through [`RunSequence`], and
/// writes them back without disturbing anything that was not edited.
mod paragraph;
mod run;
mod story;

pub use paragraph::{Paragraph, RunSequence};
pub use run::{Container, Marker, MarkerKind, NestedMarker, Node, Run};
pub use story::{Story, StoryKind};

use crate::ooxml::error::{OoxmlError, Result};
use crate::ooxml::opc::constants::relationship_type;
use crate::ooxml::opc::{PackURI, PartStore};

/// Address of a top-level paragraph: story index and paragraph index within it.
///
/// Story 0 is always the main document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParagraphRef {
    pub story: usize,
    pub index: usize,
}

impl ParagraphRef {
    /// A paragraph of the main document.
    #[inline]
    pub fn main(index: usize) -> Self {
        Self { story: 0, index }
    }
}

/// All stories of a document that can carry comment anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBody {
    stories: Vec<Story>,
}

impl DocumentBody {
    /// Build a body from its main story.
    pub fn new(main: Story) -> Self {
        Self {
            stories: vec![main],
        }
    }

    /// Parse a body from `document.xml` alone.
    ///
    /// # Example
    /// ```
    /// use docx_comments::ooxml::docx::body::DocumentBody;
    ///
    /// let body = DocumentBody::from_document_xml(
    ///     r#"<w:document><w:body><w:p><w:r><w:t>Hi</w:t></w:r></w:p></w:body></w:document>"#,
    /// )
    /// .unwrap();
    /// assert_eq!(body.story(0).unwrap().paragraph_count(), 1);
    /// ```
    pub fn from_document_xml(xml: &str) -> Result<Self> {
        let partname = PackURI::new("/word/document.xml")?;
        let main = Story::parse(
            partname,
            StoryKind::Main,
            StoryKind::Main.default_content_type(),
            xml,
        )?;
        Ok(Self::new(main))
    }

    /// Load the main document and every header and footer it references.
    pub fn load(store: &dyn PartStore, main: &PackURI) -> Result<Self> {
        let mut body = Self::new(load_story(store, main.clone(), StoryKind::Main)?);
        for (reltype, kind) in [
            (relationship_type::HEADER, StoryKind::Header),
            (relationship_type::FOOTER, StoryKind::Footer),
        ] {
            for partname in store.related_parts(main, reltype) {
                if body.stories.iter().any(|s| s.partname() == &partname) {
                    continue;
                }
                body.add_story(load_story(store, partname, kind)?);
            }
        }
        Ok(body)
    }

    /// Write every story back to the package.
    pub fn save(&self, store: &mut dyn PartStore) {
        for story in &self.stories {
            store.put_part(
                story.partname(),
                story.content_type(),
                story.to_xml().into_bytes(),
            );
        }
    }

    /// Add a header or footer story. Returns its story index.
    pub fn add_story(&mut self, story: Story) -> usize {
        self.stories.push(story);
        self.stories.len() - 1
    }

    #[inline]
    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    #[inline]
    pub fn story(&self, index: usize) -> Option<&Story> {
        self.stories.get(index)
    }

    /// The main document story.
    #[inline]
    pub fn main(&self) -> &Story {
        &self.stories[0]
    }

    pub fn paragraph(&self, at: ParagraphRef) -> Option<&Paragraph> {
        self.stories.get(at.story)?.paragraph(at.index)
    }

    pub fn paragraph_mut(&mut self, at: ParagraphRef) -> Option<&mut Paragraph> {
        self.stories.get_mut(at.story)?.paragraph_mut(at.index)
    }

    /// Every paragraph address, story by story, in document order.
    pub fn paragraph_refs(&self) -> impl Iterator<Item = ParagraphRef> + '_ {
        self.stories
            .iter()
            .enumerate()
            .flat_map(|(story, s)| (0..s.paragraph_count()).map(move |index| ParagraphRef { story, index }))
    }

    /// `w14:paraId` values already used by body paragraphs.
    pub fn para_ids(&self) -> impl Iterator<Item = &str> {
        self.stories
            .iter()
            .flat_map(|s| s.paragraphs())
            .filter_map(Paragraph::para_id)
    }
}

fn load_story(store: &dyn PartStore, partname: PackURI, kind: StoryKind) -> Result<Story> {
    let blob = store
        .get_part(&partname)
        .ok_or_else(|| OoxmlError::PartNotFound(partname.to_string()))?;
    let content_type = store
        .content_type(&partname)
        .unwrap_or(kind.default_content_type())
        .to_string();
    Story::from_bytes(partname, kind, &content_type, blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::opc::OpcPackage;

    #[test]
    fn test_load_with_header() {
        let mut pkg = OpcPackage::new();
        let main = PackURI::new("/word/document.xml").unwrap();
        let header = PackURI::new("/word/header1.xml").unwrap();
        pkg.put_part(
            &main,
            StoryKind::Main.default_content_type(),
            br#"<w:document><w:body><w:p/><w:p/></w:body></w:document>"#.to_vec(),
        );
        pkg.put_part(
            &header,
            StoryKind::Header.default_content_type(),
            br#"<w:hdr><w:p><w:r><w:t>Head</w:t></w:r></w:p></w:hdr>"#.to_vec(),
        );
        pkg.ensure_relationship(&main, &header, relationship_type::HEADER);

        let body = DocumentBody::load(&pkg, &main).unwrap();
        assert_eq!(body.stories().len(), 2);
        assert_eq!(body.story(1).unwrap().kind(), StoryKind::Header);
        let refs: Vec<ParagraphRef> = body.paragraph_refs().collect();
        assert_eq!(
            refs,
            vec![
                ParagraphRef::main(0),
                ParagraphRef::main(1),
                ParagraphRef { story: 1, index: 0 }
            ]
        );
        assert_eq!(
            body.paragraph(ParagraphRef { story: 1, index: 0 }).unwrap().text(),
            "Head"
        );
    }
}
