/// Runs and comment markers as they appear inside a paragraph.
///
/// Runs are kept as their original XML so that formatting, fields and
/// drawings survive a load/save cycle untouched. Only the pieces the comment
/// engine needs are extracted: the visible text, whether the run is a plain
/// text run that can be split, and any comment references it carries.
use crate::common::xml::{escape_xml, resolve_entity};
use crate::ooxml::error::{OoxmlError, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::ops::Range;

/// The three structural markers binding a comment to a range of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// `<w:commentRangeStart/>`
    RangeStart,
    /// `<w:commentRangeEnd/>`
    RangeEnd,
    /// A run holding `<w:commentReference/>`
    Reference,
}

impl MarkerKind {
    /// Local name of the element carrying the comment id.
    pub fn element_name(self) -> &'static str {
        match self {
            MarkerKind::RangeStart => "commentRangeStart",
            MarkerKind::RangeEnd => "commentRangeEnd",
            MarkerKind::Reference => "commentReference",
        }
    }
}

/// A comment marker node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    kind: MarkerKind,
    id: u64,
    xml: String,
}

impl Marker {
    /// Create a freshly generated marker.
    ///
    /// Reference markers are emitted as a run styled `CommentReference`, the
    /// way Word writes them.
    pub fn new(kind: MarkerKind, id: u64) -> Self {
        let xml = match kind {
            MarkerKind::Reference => format!(
                r#"<w:r><w:rPr><w:rStyle w:val="CommentReference"/></w:rPr><w:commentReference w:id="{}"/></w:r>"#,
                id
            ),
            _ => format!(r#"<w:{} w:id="{}"/>"#, kind.element_name(), id),
        };
        Self { kind, id, xml }
    }

    pub(crate) fn parsed(kind: MarkerKind, id: u64, xml: String) -> Self {
        Self { kind, id, xml }
    }

    #[inline]
    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn xml(&self) -> &str {
        &self.xml
    }
}

/// A text run (`<w:r>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    xml: String,
    text: String,
    splittable: bool,
    references: Vec<u64>,
}

impl Run {
    /// Parse a run from its XML.
    pub fn parse(xml: String) -> Result<Self> {
        let scan = RunScan::scan(&xml)?;
        Ok(Self {
            text: scan.text.clone(),
            splittable: scan.is_plain_text(),
            references: scan.references().collect(),
            xml,
        })
    }

    /// Build a plain text run.
    pub fn from_text(text: &str) -> Self {
        Self {
            xml: format!(
                r#"<w:r><w:t xml:space="preserve">{}</w:t></w:r>"#,
                escape_xml(text)
            ),
            text: text.to_string(),
            splittable: true,
            references: Vec::new(),
        }
    }

    /// Text of the run's `<w:t>` children.
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length of [`Run::text`] in characters.
    #[inline]
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    /// True when the run holds only properties and a single `<w:t>`.
    #[inline]
    pub fn is_splittable(&self) -> bool {
        self.splittable
    }

    /// Comment ids referenced from inside this run.
    #[inline]
    pub fn references(&self) -> &[u64] {
        &self.references
    }

    #[inline]
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Split into two runs at a character offset, both keeping the run properties.
    pub(crate) fn split_at(&self, offset: usize) -> Result<(Run, Run)> {
        if !self.splittable {
            return Err(OoxmlError::InvalidFormat(
                "only plain text runs can be split".to_string(),
            ));
        }
        let byte_offset = self
            .text
            .char_indices()
            .nth(offset)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        let (left, right) = self.text.split_at(byte_offset);

        let scan = RunScan::scan(&self.xml)?;
        let open = &self.xml[scan.open.clone()];
        let rpr = scan.rpr.map(|r| &self.xml[r]).unwrap_or("");
        let build = |text: &str| -> Run {
            Run {
                xml: format!(
                    r#"{}{}<w:t xml:space="preserve">{}</w:t></w:r>"#,
                    open,
                    rpr,
                    escape_xml(text)
                ),
                text: text.to_string(),
                splittable: true,
                references: Vec::new(),
            }
        };
        Ok((build(left), build(right)))
    }

    /// A copy of this run with the `<w:commentReference>` for `id` cut out.
    pub(crate) fn without_reference(&self, id: u64) -> Result<Option<Run>> {
        if !self.references.contains(&id) {
            return Ok(None);
        }
        let scan = RunScan::scan(&self.xml)?;
        let mut xml = self.xml.clone();
        for child in scan.children.iter().rev() {
            if child.kind == ChildKind::Reference(Some(id)) {
                xml.replace_range(child.range.clone(), "");
            }
        }
        Run::parse(xml).map(Some)
    }
}

/// A direct child of a paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// `<w:pPr>`
    Properties(String),
    /// An addressable run
    Run(Run),
    /// A comment marker
    Marker(Marker),
    /// An inline container (hyperlink, tracked change, content control)
    /// with comment markers somewhere inside it
    Container(Container),
    /// Anything else (bookmarks, whitespace, containers without markers)
    Other(String),
}

impl Node {
    /// The XML this node serializes to.
    pub fn xml(&self) -> &str {
        match self {
            Node::Properties(xml) | Node::Other(xml) => xml,
            Node::Run(run) => run.xml(),
            Node::Marker(marker) => marker.xml(),
            Node::Container(container) => container.xml(),
        }
    }

    /// Classify a child that is neither a run nor a top-level marker.
    pub(crate) fn from_other_xml(xml: String) -> Result<Node> {
        let markers = scan_nested_markers(&xml)?;
        if markers.is_empty() {
            Ok(Node::Other(xml))
        } else {
            Ok(Node::Container(Container { xml, markers }))
        }
    }

    /// Classify a run's XML: a run whose only content is a comment reference
    /// is a reference marker, anything else is an ordinary run.
    pub(crate) fn from_run_xml(xml: String) -> Result<Node> {
        let scan = RunScan::scan(&xml)?;
        if let [only] = scan.children.as_slice()
            && let ChildKind::Reference(Some(id)) = only.kind
        {
            return Ok(Node::Marker(Marker::parsed(MarkerKind::Reference, id, xml)));
        }
        Ok(Node::Run(Run {
            text: scan.text.clone(),
            splittable: scan.is_plain_text(),
            references: scan.references().collect(),
            xml,
        }))
    }
}

/// A comment marker found below the top level of a paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedMarker {
    pub kind: MarkerKind,
    pub id: u64,
    /// Bytes removed along with the marker: the element itself, or the
    /// whole run when a reference is the run's only content
    range: Range<usize>,
}

/// A paragraph child kept as raw XML that holds comment markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    xml: String,
    markers: Vec<NestedMarker>,
}

impl Container {
    #[inline]
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Markers inside the container, in document order.
    #[inline]
    pub fn markers(&self) -> &[NestedMarker] {
        &self.markers
    }

    pub fn contains(&self, id: u64, kind: MarkerKind) -> bool {
        self.markers.iter().any(|m| m.id == id && m.kind == kind)
    }

    /// The container with every `kind` marker of `id` cut out, or `None` if
    /// it holds no such marker.
    pub(crate) fn without(&self, id: u64, kind: MarkerKind) -> Result<Option<Node>> {
        if !self.contains(id, kind) {
            return Ok(None);
        }
        let mut xml = self.xml.clone();
        for marker in self.markers.iter().rev() {
            if marker.id == id && marker.kind == kind {
                xml.replace_range(marker.range.clone(), "");
            }
        }
        Node::from_other_xml(xml).map(Some)
    }
}

/// An open `<w:r>` while scanning a container.
struct OpenRun {
    start: usize,
    level: usize,
    references: Vec<(Option<u64>, Range<usize>)>,
    has_content: bool,
}

/// Find comment markers at any depth of `xml`.
fn scan_nested_markers(xml: &str) -> Result<Vec<NestedMarker>> {
    let mut reader = Reader::from_str(xml);
    let mut markers = Vec::new();
    let mut depth = 0usize;
    let mut run: Option<OpenRun> = None;
    // Range markers written as start/end pairs: (level, kind, id, start)
    let mut open: Vec<(usize, MarkerKind, Option<u64>, usize)> = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                depth += 1;
                let marker_kind = match e.local_name().as_ref() {
                    b"commentRangeStart" => Some(MarkerKind::RangeStart),
                    b"commentRangeEnd" => Some(MarkerKind::RangeEnd),
                    b"commentReference" => Some(MarkerKind::Reference),
                    _ => None,
                };
                if let Some(kind) = marker_kind {
                    open.push((depth, kind, comment_id_attr(&e)?, start));
                } else if let Some(r) = run.as_mut() {
                    if depth == r.level + 1 && e.local_name().as_ref() != b"rPr" {
                        r.has_content = true;
                    }
                } else if e.local_name().as_ref() == b"r" {
                    run = Some(OpenRun {
                        start,
                        level: depth,
                        references: Vec::new(),
                        has_content: false,
                    });
                }
            },
            Event::Empty(e) => {
                let level = depth + 1;
                let kind = match e.local_name().as_ref() {
                    b"commentRangeStart" => Some(MarkerKind::RangeStart),
                    b"commentRangeEnd" => Some(MarkerKind::RangeEnd),
                    b"commentReference" => Some(MarkerKind::Reference),
                    b"rPr" => None,
                    _ => {
                        if let Some(r) = run.as_mut()
                            && level == r.level + 1
                        {
                            r.has_content = true;
                        }
                        None
                    },
                };
                if let Some(kind) = kind {
                    let id = comment_id_attr(&e)?;
                    match run.as_mut() {
                        Some(r) if kind == MarkerKind::Reference && level == r.level + 1 => {
                            r.references.push((id, start..end));
                        },
                        _ => {
                            if let Some(id) = id {
                                markers.push(NestedMarker { kind, id, range: start..end });
                            }
                        },
                    }
                }
            },
            Event::End(_) => {
                if let Some(&(level, kind, id, from)) = open.last()
                    && level == depth
                {
                    open.pop();
                    match run.as_mut() {
                        Some(r) if kind == MarkerKind::Reference && level == r.level + 1 => {
                            r.references.push((id, from..end));
                        },
                        _ => {
                            if let Some(id) = id {
                                markers.push(NestedMarker { kind, id, range: from..end });
                            }
                        },
                    }
                }
                if let Some(r) = run.take_if(|r| r.level == depth) {
                    match r.references.as_slice() {
                        [(Some(id), _)] if !r.has_content => markers.push(NestedMarker {
                            kind: MarkerKind::Reference,
                            id: *id,
                            range: r.start..end,
                        }),
                        refs => markers.extend(refs.iter().filter_map(|(id, range)| {
                            id.map(|id| NestedMarker {
                                kind: MarkerKind::Reference,
                                id,
                                range: range.clone(),
                            })
                        })),
                    }
                }
                depth = depth.saturating_sub(1);
            },
            Event::Eof => break,
            _ => {},
        }
    }

    markers.sort_by_key(|m| m.range.start);
    Ok(markers)
}

/// Read a `w:id` attribute as a comment id.
pub(crate) fn comment_id_attr(e: &BytesStart<'_>) -> Result<Option<u64>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == b"id" {
            let value = attr.unescape_value()?;
            return Ok(value.trim().parse::<u64>().ok());
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Text,
    Reference(Option<u64>),
    Other,
}

#[derive(Debug)]
struct RunChild {
    kind: ChildKind,
    range: Range<usize>,
}

/// Byte layout of a run's XML.
#[derive(Debug, Default)]
struct RunScan {
    open: Range<usize>,
    rpr: Option<Range<usize>>,
    /// Direct children other than `<w:rPr>`
    children: Vec<RunChild>,
    text: String,
}

impl RunScan {
    fn scan(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut scan = RunScan::default();
        let mut depth = 0usize;
        let mut child_start = 0usize;
        let mut child_kind = ChildKind::Other;
        let mut in_rpr = false;
        let mut in_text = false;

        loop {
            let start = reader.buffer_position() as usize;
            let event = reader.read_event()?;
            let end = reader.buffer_position() as usize;

            match event {
                Event::Start(e) => {
                    match depth {
                        0 => scan.open = start..end,
                        1 => {
                            child_start = start;
                            in_rpr = false;
                            child_kind = match e.local_name().as_ref() {
                                b"rPr" => {
                                    in_rpr = true;
                                    ChildKind::Other
                                },
                                b"t" => {
                                    in_text = true;
                                    ChildKind::Text
                                },
                                b"commentReference" => ChildKind::Reference(comment_id_attr(&e)?),
                                _ => ChildKind::Other,
                            };
                        },
                        _ => {},
                    }
                    depth += 1;
                },
                Event::Empty(e) => match depth {
                    0 => scan.open = start..end,
                    1 => match e.local_name().as_ref() {
                        b"rPr" => scan.rpr = Some(start..end),
                        b"t" => scan.children.push(RunChild {
                            kind: ChildKind::Text,
                            range: start..end,
                        }),
                        b"commentReference" => scan.children.push(RunChild {
                            kind: ChildKind::Reference(comment_id_attr(&e)?),
                            range: start..end,
                        }),
                        _ => scan.children.push(RunChild {
                            kind: ChildKind::Other,
                            range: start..end,
                        }),
                    },
                    _ => {},
                },
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if depth == 1 {
                        if in_rpr {
                            scan.rpr = Some(child_start..end);
                            in_rpr = false;
                        } else {
                            scan.children.push(RunChild {
                                kind: child_kind,
                                range: child_start..end,
                            });
                        }
                        in_text = false;
                    }
                },
                Event::Text(t) if in_text && depth == 2 => {
                    scan.text.push_str(&t.decode()?);
                },
                Event::CData(t) if in_text && depth == 2 => {
                    scan.text.push_str(&t.decode()?);
                },
                Event::GeneralRef(r) if in_text && depth == 2 => {
                    let name = r.decode()?;
                    if let Some(ch) = resolve_entity(&name) {
                        scan.text.push(ch);
                    }
                },
                Event::Eof => break,
                _ => {},
            }
        }

        Ok(scan)
    }

    fn is_plain_text(&self) -> bool {
        matches!(self.children.as_slice(), [only] if only.kind == ChildKind::Text)
    }

    fn references(&self) -> impl Iterator<Item = u64> + '_ {
        self.children.iter().filter_map(|c| match c.kind {
            ChildKind::Reference(id) => id,
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_text_and_split() {
        let run = Run::parse(
            r#"<w:r w:rsidR="00A1"><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">Tom &amp; Jerry</w:t></w:r>"#
                .to_string(),
        )
        .unwrap();
        assert_eq!(run.text(), "Tom & Jerry");
        assert_eq!(run.text_len(), 11);
        assert!(run.is_splittable());

        let (left, right) = run.split_at(4).unwrap();
        assert_eq!(left.text(), "Tom ");
        assert_eq!(right.text(), "& Jerry");
        assert!(left.xml().starts_with(r#"<w:r w:rsidR="00A1"><w:rPr><w:b/></w:rPr>"#));
        assert!(right.xml().contains("&amp; Jerry"));
    }

    #[test]
    fn test_non_plain_run_is_not_splittable() {
        let run = Run::parse(r#"<w:r><w:t>a</w:t><w:tab/><w:t>b</w:t></w:r>"#.to_string()).unwrap();
        assert_eq!(run.text(), "ab");
        assert!(!run.is_splittable());
        assert!(run.split_at(1).is_err());
    }

    #[test]
    fn test_reference_run_classification() {
        let marker = Node::from_run_xml(
            r#"<w:r><w:rPr><w:rStyle w:val="CommentReference"/></w:rPr><w:commentReference w:id="7"/></w:r>"#
                .to_string(),
        )
        .unwrap();
        match marker {
            Node::Marker(m) => {
                assert_eq!(m.kind(), MarkerKind::Reference);
                assert_eq!(m.id(), 7);
            },
            other => panic!("expected marker, got {:?}", other),
        }

        let mixed = Node::from_run_xml(
            r#"<w:r><w:t>x</w:t><w:commentReference w:id="9"/></w:r>"#.to_string(),
        )
        .unwrap();
        let Node::Run(run) = mixed else {
            panic!("expected run");
        };
        assert_eq!(run.references(), &[9]);
        let stripped = run.without_reference(9).unwrap().unwrap();
        assert_eq!(stripped.xml(), "<w:r><w:t>x</w:t></w:r>");
        assert!(stripped.references().is_empty());
        assert!(run.without_reference(1).unwrap().is_none());
    }

    #[test]
    fn test_generated_markers() {
        assert_eq!(
            Marker::new(MarkerKind::RangeStart, 3).xml(),
            r#"<w:commentRangeStart w:id="3"/>"#
        );
        let reference = Marker::new(MarkerKind::Reference, 3);
        let reparsed = Node::from_run_xml(reference.xml().to_string()).unwrap();
        assert_eq!(reparsed, Node::Marker(reference));
    }

    #[test]
    fn test_markers_nested_in_containers() {
        let ins = r#"<w:ins w:id="90" w:author="A"><w:r><w:rPr><w:rStyle w:val="CommentReference"/></w:rPr><w:commentReference w:id="5"/></w:r></w:ins>"#;
        let Node::Container(container) = Node::from_other_xml(ins.to_string()).unwrap() else {
            panic!("expected container");
        };
        assert!(container.contains(5, MarkerKind::Reference));
        assert!(!container.contains(5, MarkerKind::RangeStart));
        // A run holding nothing but the reference goes with it.
        let stripped = container.without(5, MarkerKind::Reference).unwrap().unwrap();
        assert_eq!(stripped, Node::Other(r#"<w:ins w:id="90" w:author="A"></w:ins>"#.to_string()));
        assert!(container.without(6, MarkerKind::Reference).unwrap().is_none());

        let link = r#"<w:hyperlink r:id="rId4"><w:commentRangeStart w:id="5"/><w:r><w:t>site</w:t><w:commentReference w:id="6"/></w:r><w:commentRangeEnd w:id="5"/></w:hyperlink>"#;
        let Node::Container(container) = Node::from_other_xml(link.to_string()).unwrap() else {
            panic!("expected container");
        };
        let found: Vec<(MarkerKind, u64)> = container.markers().iter().map(|m| (m.kind, m.id)).collect();
        assert_eq!(
            found,
            vec![
                (MarkerKind::RangeStart, 5),
                (MarkerKind::Reference, 6),
                (MarkerKind::RangeEnd, 5)
            ]
        );
        let Some(Node::Container(rest)) = container.without(5, MarkerKind::RangeStart).unwrap() else {
            panic!("expected container");
        };
        let rest = rest.without(5, MarkerKind::RangeEnd).unwrap().unwrap();
        let Node::Container(rest) = rest else {
            panic!("reference 6 is still inside");
        };
        // Text stays, only the reference element is cut from a run with content.
        let stripped = rest.without(6, MarkerKind::Reference).unwrap().unwrap();
        assert_eq!(
            stripped,
            Node::Other(r#"<w:hyperlink r:id="rId4"><w:r><w:t>site</w:t></w:r></w:hyperlink>"#.to_string())
        );

        let plain = Node::from_other_xml(r#"<w:bookmarkStart w:id="5" w:name="x"/>"#.to_string()).unwrap();
        assert!(matches!(plain, Node::Other(_)));
    }
}
