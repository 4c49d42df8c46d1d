/// Paragraphs as editable run sequences.
use super::run::{Marker, MarkerKind, Node, Run, comment_id_attr};
use crate::ooxml::error::{OoxmlError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;

/// An editable view over one paragraph's ordered children.
///
/// Positions come in two flavors: *run indices* count only addressable runs
/// (markers and opaque content are skipped), while *slots* index every child
/// node and are what markers are inserted at. Inserting at slot `n` places the
/// new node before the node currently at `n`; `slot_count()` appends.
pub trait RunSequence {
    /// Number of addressable runs.
    fn run_count(&self) -> usize;

    /// Number of child slots.
    fn slot_count(&self) -> usize;

    /// Slot holding run `index`.
    fn run_slot(&self, index: usize) -> Option<usize>;

    /// First slot after the paragraph properties.
    fn content_start(&self) -> usize;

    /// The marker node at `slot`, if that slot holds one.
    fn marker_at(&self, slot: usize) -> Option<(MarkerKind, u64)>;

    /// Slot of the marker of `kind` for comment `id`.
    ///
    /// References embedded in an ordinary run, and markers nested inside a
    /// hyperlink or tracked change, are reported at the enclosing node's slot.
    fn find_marker(&self, id: u64, kind: MarkerKind) -> Option<usize>;

    /// Character length of run `index`.
    fn run_text_len(&self, index: usize) -> Option<usize>;

    /// Whether run `index` can be split by [`RunSequence::split_run`].
    fn can_split_run(&self, index: usize) -> bool;

    /// Split run `index` at a character offset. The left part keeps `index`,
    /// the right part becomes `index + 1`.
    fn split_run(&mut self, index: usize, offset: usize) -> Result<()>;

    /// Insert a new marker before `slot`.
    fn insert_marker(&mut self, slot: usize, kind: MarkerKind, id: u64);

    /// Remove every marker of `kind` for comment `id`. Returns whether
    /// anything was removed.
    fn remove_marker(&mut self, id: u64, kind: MarkerKind) -> Result<bool>;
}

/// A `<w:p>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    /// The opening tag as written, e.g. `<w:p w14:paraId="1A2B3C4D">`
    open: String,
    /// Closing tag, or `None` when the source was self-closed (`<w:p/>`)
    close: Option<String>,
    nodes: Vec<Node>,
    para_id: Option<String>,
}

impl Paragraph {
    /// Parse a paragraph from its XML.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut para = Paragraph {
            open: String::new(),
            close: None,
            nodes: Vec::new(),
            para_id: None,
        };
        let mut depth = 0usize;
        let mut child_start = 0usize;
        let mut child_name: Vec<u8> = Vec::new();
        let mut child_id: Option<u64> = None;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event()?;
            let end = reader.buffer_position() as usize;
            let raw = &xml[start..end];

            match event {
                Event::Start(ref e) | Event::Empty(ref e) if depth == 0 => {
                    if e.local_name().as_ref() != b"p" {
                        return Err(OoxmlError::InvalidFormat(
                            "paragraph XML must start with <w:p>".to_string(),
                        ));
                    }
                    para.open = raw.to_string();
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.as_ref() == b"w14:paraId" {
                            para.para_id = Some(attr.unescape_value()?.to_string());
                        }
                    }
                    if matches!(event, Event::Empty(_)) {
                        break;
                    }
                    depth = 1;
                },
                Event::Start(ref e) => {
                    if depth == 1 {
                        child_start = start;
                        child_name = e.local_name().as_ref().to_vec();
                        child_id = comment_id_attr(e)?;
                    }
                    depth += 1;
                },
                Event::Empty(ref e) if depth == 1 => {
                    let name = e.local_name().as_ref().to_vec();
                    let id = comment_id_attr(e)?;
                    para.nodes.push(classify(&name, id, raw.to_string())?);
                },
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    match depth {
                        0 => {
                            para.close = Some(raw.to_string());
                            break;
                        },
                        1 => {
                            let node_xml = xml[child_start..end].to_string();
                            para.nodes.push(classify(&child_name, child_id, node_xml)?);
                        },
                        _ => {},
                    }
                },
                Event::Eof => {
                    return Err(OoxmlError::InvalidFormat(
                        "unterminated <w:p> element".to_string(),
                    ));
                },
                _ if depth == 1 => para.nodes.push(Node::Other(raw.to_string())),
                _ => {},
            }
        }

        Ok(para)
    }

    /// The `w14:paraId` attribute, if present.
    #[inline]
    pub fn para_id(&self) -> Option<&str> {
        self.para_id.as_deref()
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Concatenated text of the addressable runs.
    pub fn text(&self) -> String {
        self.runs().map(Run::text).collect()
    }

    /// Iterate over the addressable runs.
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Run(run) => Some(run),
            _ => None,
        })
    }

    /// Append a plain text run.
    pub fn push_text_run(&mut self, text: &str) {
        self.nodes.push(Node::Run(Run::from_text(text)));
    }

    /// Serialize the paragraph.
    pub(crate) fn to_xml(&self, xml: &mut String) {
        match &self.close {
            Some(close) => {
                xml.push_str(&self.open);
                for node in &self.nodes {
                    xml.push_str(node.xml());
                }
                xml.push_str(close);
            },
            None if self.nodes.is_empty() => xml.push_str(&self.open),
            None => {
                let open = self.open.trim_end_matches('>').trim_end_matches('/').trim_end();
                xml.push_str(open);
                xml.push('>');
                for node in &self.nodes {
                    xml.push_str(node.xml());
                }
                xml.push_str("</w:p>");
            },
        }
    }
}

fn classify(name: &[u8], id: Option<u64>, xml: String) -> Result<Node> {
    Ok(match (name, id) {
        (b"pPr", _) => Node::Properties(xml),
        (b"r", _) => Node::from_run_xml(xml)?,
        (b"commentRangeStart", Some(id)) => {
            Node::Marker(Marker::parsed(MarkerKind::RangeStart, id, xml))
        },
        (b"commentRangeEnd", Some(id)) => {
            Node::Marker(Marker::parsed(MarkerKind::RangeEnd, id, xml))
        },
        _ => Node::from_other_xml(xml)?,
    })
}

impl RunSequence for Paragraph {
    fn run_count(&self) -> usize {
        self.runs().count()
    }

    fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    fn run_slot(&self, index: usize) -> Option<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, Node::Run(_)))
            .nth(index)
            .map(|(slot, _)| slot)
    }

    fn content_start(&self) -> usize {
        self.nodes
            .iter()
            .position(|node| matches!(node, Node::Properties(_)))
            .map(|slot| slot + 1)
            .unwrap_or(0)
    }

    fn marker_at(&self, slot: usize) -> Option<(MarkerKind, u64)> {
        match self.nodes.get(slot) {
            Some(Node::Marker(marker)) => Some((marker.kind(), marker.id())),
            _ => None,
        }
    }

    fn find_marker(&self, id: u64, kind: MarkerKind) -> Option<usize> {
        self.nodes.iter().position(|node| match node {
            Node::Marker(marker) => marker.kind() == kind && marker.id() == id,
            Node::Run(run) => kind == MarkerKind::Reference && run.references().contains(&id),
            Node::Container(container) => container.contains(id, kind),
            _ => false,
        })
    }

    fn run_text_len(&self, index: usize) -> Option<usize> {
        self.runs().nth(index).map(Run::text_len)
    }

    fn can_split_run(&self, index: usize) -> bool {
        self.runs().nth(index).is_some_and(Run::is_splittable)
    }

    fn split_run(&mut self, index: usize, offset: usize) -> Result<()> {
        let slot = self.run_slot(index).ok_or_else(|| {
            OoxmlError::InvalidFormat(format!("run {} does not exist", index))
        })?;
        let Node::Run(run) = &self.nodes[slot] else {
            return Err(OoxmlError::InvalidFormat(format!("slot {} is not a run", slot)));
        };
        let (left, right) = run.split_at(offset)?;
        self.nodes[slot] = Node::Run(left);
        self.nodes.insert(slot + 1, Node::Run(right));
        Ok(())
    }

    fn insert_marker(&mut self, slot: usize, kind: MarkerKind, id: u64) {
        let slot = slot.min(self.nodes.len());
        self.nodes.insert(slot, Node::Marker(Marker::new(kind, id)));
    }

    fn remove_marker(&mut self, id: u64, kind: MarkerKind) -> Result<bool> {
        let before = self.nodes.len();
        self.nodes.retain(|node| {
            !matches!(node, Node::Marker(marker) if marker.kind() == kind && marker.id() == id)
        });
        let mut removed = self.nodes.len() != before;

        for node in &mut self.nodes {
            match node {
                Node::Run(run) if kind == MarkerKind::Reference => {
                    if let Some(stripped) = run.without_reference(id)? {
                        *run = stripped;
                        removed = true;
                    }
                },
                Node::Container(container) => {
                    if let Some(stripped) = container.without(id, kind)? {
                        *node = stripped;
                        removed = true;
                    }
                },
                _ => {},
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARA: &str = r#"<w:p w14:paraId="0A1B2C3D" w14:textId="77777777"><w:pPr><w:pStyle w:val="Body"/></w:pPr><w:r><w:t>Hello </w:t></w:r><w:bookmarkStart w:id="0" w:name="b"/><w:r><w:rPr><w:i/></w:rPr><w:t>world</w:t></w:r></w:p>"#;

    fn render(para: &Paragraph) -> String {
        let mut xml = String::new();
        para.to_xml(&mut xml);
        xml
    }

    #[test]
    fn test_parse_is_lossless() {
        let para = Paragraph::parse(PARA).unwrap();
        assert_eq!(para.para_id(), Some("0A1B2C3D"));
        assert_eq!(para.run_count(), 2);
        assert_eq!(para.text(), "Hello world");
        assert_eq!(para.content_start(), 1);
        assert_eq!(render(&para), PARA);
    }

    #[test]
    fn test_insert_and_remove_markers() {
        let mut para = Paragraph::parse(PARA).unwrap();
        let first = para.run_slot(0).unwrap();
        para.insert_marker(first, MarkerKind::RangeStart, 5);
        let last = para.run_slot(1).unwrap();
        para.insert_marker(last + 1, MarkerKind::RangeEnd, 5);
        para.insert_marker(last + 2, MarkerKind::Reference, 5);

        assert_eq!(para.run_count(), 2);
        assert_eq!(para.find_marker(5, MarkerKind::RangeStart), Some(1));
        assert_eq!(para.marker_at(1), Some((MarkerKind::RangeStart, 5)));

        let reparsed = Paragraph::parse(&render(&para)).unwrap();
        assert_eq!(reparsed, para);

        for kind in [MarkerKind::RangeStart, MarkerKind::RangeEnd, MarkerKind::Reference] {
            assert!(para.remove_marker(5, kind).unwrap());
        }
        assert!(!para.remove_marker(5, MarkerKind::Reference).unwrap());
        assert_eq!(render(&para), PARA);
    }

    #[test]
    fn test_split_run() {
        let mut para = Paragraph::parse(PARA).unwrap();
        assert!(para.can_split_run(1));
        para.split_run(1, 2).unwrap();
        assert_eq!(para.run_count(), 3);
        assert_eq!(para.text(), "Hello world");
        assert_eq!(para.run_text_len(1), Some(2));
        assert_eq!(para.run_text_len(2), Some(3));
        assert!(para.split_run(9, 0).is_err());
    }

    #[test]
    fn test_self_closed_paragraph() {
        let mut para = Paragraph::parse(r#"<w:p w14:paraId="00000001"/>"#).unwrap();
        assert_eq!(para.run_count(), 0);
        assert_eq!(render(&para), r#"<w:p w14:paraId="00000001"/>"#);

        para.insert_marker(0, MarkerKind::RangeStart, 1);
        assert_eq!(
            render(&para),
            r#"<w:p w14:paraId="00000001"><w:commentRangeStart w:id="1"/></w:p>"#
        );
    }

    #[test]
    fn test_nested_markers_are_found_and_removed() {
        let xml = r#"<w:p><w:hyperlink r:id="rId4"><w:commentRangeStart w:id="5"/><w:r><w:t>link</w:t></w:r></w:hyperlink><w:r><w:t>tail</w:t></w:r><w:commentRangeEnd w:id="5"/><w:ins w:id="1" w:author="A"><w:r><w:rPr><w:rStyle w:val="CommentReference"/></w:rPr><w:commentReference w:id="5"/></w:r></w:ins></w:p>"#;
        let mut para = Paragraph::parse(xml).unwrap();
        assert_eq!(para.run_count(), 1);
        assert_eq!(para.find_marker(5, MarkerKind::RangeStart), Some(0));
        assert_eq!(para.find_marker(5, MarkerKind::RangeEnd), Some(2));
        assert_eq!(para.find_marker(5, MarkerKind::Reference), Some(3));
        assert_eq!(render(&para), xml);

        for kind in [MarkerKind::RangeStart, MarkerKind::RangeEnd, MarkerKind::Reference] {
            assert!(para.remove_marker(5, kind).unwrap());
            assert_eq!(para.find_marker(5, kind), None);
        }
        assert_eq!(
            render(&para),
            r#"<w:p><w:hyperlink r:id="rId4"><w:r><w:t>link</w:t></w:r></w:hyperlink><w:r><w:t>tail</w:t></w:r><w:ins w:id="1" w:author="A"></w:ins></w:p>"#
        );
    }
}
