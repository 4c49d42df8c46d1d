/// Anchor placement in the document body.
///
/// A comment is bound to the text by three markers carrying its content id:
/// `commentRangeStart`, `commentRangeEnd` and a reference run. The engine
/// inserts, moves and removes those triples. It only edits paragraphs; the
/// comment ledgers are never touched from here.
use super::error::{CommentError, Result};
use super::model::{CommentId, Location, Span};
use crate::ooxml::docx::body::{
    DocumentBody, MarkerKind, Node, Paragraph, ParagraphRef, RunSequence,
};
use std::collections::{BTreeMap, HashMap};

/// Where a new anchor goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement<'a> {
    /// Around a caller-chosen location.
    Root(&'a Location),
    /// Co-located with the anchor of `parent`.
    Reply { parent: CommentId },
}

/// Position of one marker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerPosition {
    pub paragraph: ParagraphRef,
    pub slot: usize,
}

/// Where a comment's markers currently are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorHandle {
    pub id: CommentId,
    pub start: MarkerPosition,
    pub end: MarkerPosition,
    pub reference: Option<MarkerPosition>,
}

/// A root location checked against the current body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorPlan {
    paragraph: ParagraphRef,
    kind: PlanKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanKind {
    /// Paragraph without runs: markers go right after the properties
    Empty,
    /// Inclusive run range, with optional character splits of the boundary runs
    Runs {
        start: usize,
        end: usize,
        start_split: Option<usize>,
        end_split: Option<usize>,
    },
}

impl AnchorPlan {
    #[inline]
    pub fn paragraph(&self) -> ParagraphRef {
        self.paragraph
    }
}

/// Saved copies of paragraphs, restored when an edit has to be undone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ParagraphSnapshot(Vec<(ParagraphRef, Paragraph)>);

impl ParagraphSnapshot {
    /// Copy every paragraph holding a marker of one of `ids`, plus `extra`.
    pub(crate) fn capture(
        body: &DocumentBody,
        ids: &[CommentId],
        extra: Option<ParagraphRef>,
    ) -> Self {
        let mut saved = BTreeMap::new();
        for at in body.paragraph_refs() {
            let Some(para) = body.paragraph(at) else {
                continue;
            };
            let touched = Some(at) == extra
                || ids.iter().any(|id| {
                    [MarkerKind::RangeStart, MarkerKind::RangeEnd, MarkerKind::Reference]
                        .into_iter()
                        .any(|kind| para.find_marker(id.0, kind).is_some())
                });
            if touched {
                saved.insert(at, para.clone());
            }
        }
        Self(saved.into_iter().collect())
    }

    pub(crate) fn restore(self, body: &mut DocumentBody) {
        for (at, para) in self.0 {
            if let Some(slot) = body.paragraph_mut(at) {
                *slot = para;
            }
        }
    }
}

/// Anchor edits over one document body.
pub struct AnchorEngine<'a> {
    body: &'a mut DocumentBody,
}

impl<'a> AnchorEngine<'a> {
    pub fn new(body: &'a mut DocumentBody) -> Self {
        Self { body }
    }

    /// Check a root location without changing anything.
    ///
    /// # Errors
    /// `InvalidRange` when the paragraph does not exist, the run range is out
    /// of bounds, or a text boundary falls inside a run that cannot be split.
    pub fn validate(body: &DocumentBody, location: &Location) -> Result<AnchorPlan> {
        let para = body.paragraph(location.paragraph).ok_or_else(|| {
            CommentError::InvalidRange(format!(
                "paragraph {} of story {} does not exist",
                location.paragraph.index, location.paragraph.story
            ))
        })?;
        let runs = para.run_count();

        let kind = match location.span {
            Span::Paragraph if runs == 0 => PlanKind::Empty,
            Span::Paragraph => PlanKind::Runs {
                start: 0,
                end: runs - 1,
                start_split: None,
                end_split: None,
            },
            Span::Runs { start: 0, end: 0 } if runs == 0 => PlanKind::Empty,
            Span::Runs { start, end } => {
                if start > end || end >= runs {
                    return Err(CommentError::InvalidRange(format!(
                        "runs {}..={} outside paragraph with {} runs",
                        start, end, runs
                    )));
                }
                PlanKind::Runs {
                    start,
                    end,
                    start_split: None,
                    end_split: None,
                }
            },
            Span::Text { start, end } => text_plan(para, start, end)?,
        };

        Ok(AnchorPlan {
            paragraph: location.paragraph,
            kind,
        })
    }

    /// Insert the markers for `id`.
    ///
    /// Root anchors wrap the location and put the reference run right after
    /// the range end. Replies join the parent's marker clusters: the new
    /// range start follows the parent's run of starts, the range end follows
    /// its run of ends, and the reference follows the references there.
    pub fn insert_anchor(&mut self, id: CommentId, placement: Placement<'_>) -> Result<AnchorHandle> {
        let (snapshot, result) = match placement {
            Placement::Root(location) => {
                let plan = Self::validate(&*self.body, location)?;
                let snapshot = ParagraphSnapshot::capture(&*self.body, &[], Some(plan.paragraph));
                (snapshot, self.apply_root(&plan, id))
            },
            Placement::Reply { parent } => {
                let snapshot = ParagraphSnapshot::capture(&*self.body, &[parent], None);
                (snapshot, self.apply_reply(parent, id))
            },
        };

        match result.and_then(|_| self.located(id)) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                snapshot.restore(self.body);
                Err(err)
            },
        }
    }

    /// Replace the markers of `id` with a root anchor at `location`.
    ///
    /// The location is validated first; on any failure the old markers stay
    /// where they were.
    pub fn move_anchor(&mut self, id: CommentId, location: &Location) -> Result<AnchorHandle> {
        self.move_cluster(id, location, &[])
    }

    /// Move `root` to `location` and re-place `followers` as replies to it.
    pub fn move_cluster(
        &mut self,
        root: CommentId,
        location: &Location,
        followers: &[CommentId],
    ) -> Result<AnchorHandle> {
        let plan = Self::validate(&*self.body, location)?;
        let mut ids = Vec::with_capacity(followers.len() + 1);
        ids.push(root);
        ids.extend_from_slice(followers);
        let snapshot = ParagraphSnapshot::capture(&*self.body, &ids, Some(plan.paragraph));

        match self.relocate(&plan, root, followers) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                snapshot.restore(self.body);
                Err(err)
            },
        }
    }

    fn relocate(&mut self, plan: &AnchorPlan, root: CommentId, followers: &[CommentId]) -> Result<AnchorHandle> {
        self.remove_anchor(root)?;
        for &id in followers {
            self.remove_anchor(id)?;
        }
        self.apply_root(plan, root)?;
        for &id in followers {
            self.apply_reply(root, id)?;
        }
        self.located(root)
    }

    /// Remove every marker of `id` in every story.
    ///
    /// Returns whether anything was removed; an id without markers is not an
    /// error.
    pub fn remove_anchor(&mut self, id: CommentId) -> Result<bool> {
        let refs: Vec<ParagraphRef> = self.body.paragraph_refs().collect();
        let mut removed = false;
        for at in refs {
            if let Some(para) = self.body.paragraph_mut(at) {
                for kind in [MarkerKind::RangeStart, MarkerKind::RangeEnd, MarkerKind::Reference] {
                    removed |= para.remove_marker(id.0, kind)?;
                }
            }
        }
        Ok(removed)
    }

    fn located(&self, id: CommentId) -> Result<AnchorHandle> {
        locate(&*self.body, id).ok_or_else(|| CommentError::not_found("anchor", id))
    }

    fn paragraph_mut(&mut self, at: ParagraphRef) -> Result<&mut Paragraph> {
        self.body.paragraph_mut(at).ok_or_else(|| {
            CommentError::InvalidRange(format!(
                "paragraph {} of story {} does not exist",
                at.index, at.story
            ))
        })
    }

    fn apply_root(&mut self, plan: &AnchorPlan, id: CommentId) -> Result<()> {
        let para = self.paragraph_mut(plan.paragraph)?;
        match plan.kind {
            PlanKind::Empty => {
                let slot = para.content_start();
                para.insert_marker(slot, MarkerKind::RangeStart, id.0);
                para.insert_marker(slot + 1, MarkerKind::RangeEnd, id.0);
                para.insert_marker(slot + 2, MarkerKind::Reference, id.0);
            },
            PlanKind::Runs {
                mut start,
                mut end,
                start_split,
                end_split,
            } => {
                // Split the end first so the start run index stays valid.
                if let Some(offset) = end_split {
                    para.split_run(end, offset)?;
                }
                if let Some(offset) = start_split {
                    para.split_run(start, offset)?;
                    start += 1;
                    end += 1;
                }
                let end_slot = run_slot(para, end)?;
                para.insert_marker(end_slot + 1, MarkerKind::RangeEnd, id.0);
                para.insert_marker(end_slot + 2, MarkerKind::Reference, id.0);
                let start_slot = run_slot(para, start)?;
                para.insert_marker(start_slot, MarkerKind::RangeStart, id.0);
            },
        }
        Ok(())
    }

    fn apply_reply(&mut self, parent: CommentId, id: CommentId) -> Result<()> {
        let handle = self.located(parent)?;

        let para = self.paragraph_mut(handle.end.paragraph)?;
        let end = skip_cluster(para, handle.end.slot, MarkerKind::RangeEnd);
        para.insert_marker(end + 1, MarkerKind::RangeEnd, id.0);
        let reference = skip_cluster(para, end + 1, MarkerKind::Reference);
        para.insert_marker(reference + 1, MarkerKind::Reference, id.0);

        let para = self.paragraph_mut(handle.start.paragraph)?;
        let start_slot = para
            .find_marker(parent.0, MarkerKind::RangeStart)
            .ok_or_else(|| CommentError::not_found("anchor", parent))?;
        let start = skip_cluster(para, start_slot, MarkerKind::RangeStart);
        para.insert_marker(start + 1, MarkerKind::RangeStart, id.0);
        Ok(())
    }
}

/// Last slot of the run of consecutive `kind` markers beginning at `slot`.
fn skip_cluster(para: &Paragraph, mut slot: usize, kind: MarkerKind) -> usize {
    while matches!(para.marker_at(slot + 1), Some((k, _)) if k == kind) {
        slot += 1;
    }
    slot
}

fn run_slot(para: &Paragraph, index: usize) -> Result<usize> {
    para.run_slot(index)
        .ok_or_else(|| CommentError::InvalidRange(format!("run {} does not exist", index)))
}

fn text_plan(para: &Paragraph, start: usize, end: usize) -> Result<PlanKind> {
    let lens: Vec<usize> = (0..para.run_count())
        .map(|i| para.run_text_len(i).unwrap_or(0))
        .collect();
    let total: usize = lens.iter().sum();
    if start >= end || end > total {
        return Err(CommentError::InvalidRange(format!(
            "text range {}..{} outside paragraph text of length {}",
            start, end, total
        )));
    }

    let mut first = None;
    let mut last = None;
    let mut offset = 0usize;
    for (i, &len) in lens.iter().enumerate() {
        if first.is_none() && start < offset + len {
            first = Some((i, start - offset));
        }
        if last.is_none() && end > offset && end <= offset + len {
            last = Some((i, end - offset));
        }
        offset += len;
    }
    let (Some((start_run, start_offset)), Some((end_run, end_offset))) = (first, last) else {
        return Err(CommentError::InvalidRange(format!(
            "text range {}..{} does not map onto runs",
            start, end
        )));
    };

    let start_split = (start_offset > 0).then_some(start_offset);
    let end_split = (end_offset < lens[end_run]).then_some(end_offset);
    for (split, run) in [(start_split, start_run), (end_split, end_run)] {
        if split.is_some() && !para.can_split_run(run) {
            return Err(CommentError::InvalidRange(format!(
                "run {} cannot be split at a character offset",
                run
            )));
        }
    }

    Ok(PlanKind::Runs {
        start: start_run,
        end: end_run,
        start_split,
        end_split,
    })
}

/// Find the markers of `id` anywhere in the body.
///
/// Returns `None` unless both range markers exist.
pub fn locate(body: &DocumentBody, id: CommentId) -> Option<AnchorHandle> {
    let mut start = None;
    let mut end = None;
    let mut reference = None;
    for at in body.paragraph_refs() {
        let para = body.paragraph(at)?;
        for (found, kind) in [
            (&mut start, MarkerKind::RangeStart),
            (&mut end, MarkerKind::RangeEnd),
            (&mut reference, MarkerKind::Reference),
        ] {
            if found.is_none() {
                *found = para
                    .find_marker(id.0, kind)
                    .map(|slot| MarkerPosition { paragraph: at, slot });
            }
        }
        if start.is_some() && end.is_some() && reference.is_some() {
            break;
        }
    }
    Some(AnchorHandle {
        id,
        start: start?,
        end: end?,
        reference,
    })
}

/// How many markers of each kind exist per comment id.
pub(crate) fn marker_counts(body: &DocumentBody) -> HashMap<(u64, MarkerKind), usize> {
    let mut counts = HashMap::new();
    for story in body.stories() {
        for para in story.paragraphs() {
            for node in para.nodes() {
                match node {
                    Node::Marker(marker) => {
                        *counts.entry((marker.id(), marker.kind())).or_default() += 1;
                    },
                    Node::Run(run) => {
                        for &id in run.references() {
                            *counts.entry((id, MarkerKind::Reference)).or_default() += 1;
                        }
                    },
                    Node::Container(container) => {
                        for marker in container.markers() {
                            *counts.entry((marker.id, marker.kind)).or_default() += 1;
                        }
                    },
                    _ => {},
                }
            }
        }
    }
    counts
}
