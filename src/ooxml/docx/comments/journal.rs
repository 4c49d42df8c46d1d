/// Undo records for staged edits.
///
/// Each step of a manager operation records how to reverse itself. When a
/// later step fails, the recorded steps are replayed backwards.
use super::anchor::ParagraphSnapshot;
use super::model::{Comment, CommentId, DurableEntry, DurableId, ParaId, ThreadEntry};

#[derive(Debug)]
pub(crate) enum Undo {
    ContentIdRegistered(CommentId),
    ParaIdRegistered(ParaId),
    DurableIdRegistered(DurableId),
    CommentCreated(CommentId),
    CommentRemoved {
        position: usize,
        comment: Comment,
    },
    ThreadCreated(ParaId),
    ThreadRemoved {
        position: usize,
        para_id: ParaId,
        entry: ThreadEntry,
    },
    DurableCreated(CommentId),
    DurableRemoved {
        position: usize,
        id: CommentId,
        entry: DurableEntry,
    },
    PersonAdded(String),
    /// Paragraphs as they were before an anchor edit
    Paragraphs(ParagraphSnapshot),
}

#[derive(Debug, Default)]
pub(crate) struct Journal {
    steps: Vec<Undo>,
}

impl Journal {
    #[inline]
    pub(crate) fn record(&mut self, step: Undo) {
        self.steps.push(step);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    /// Steps in the order they must be undone.
    pub(crate) fn unwind(self) -> impl Iterator<Item = Undo> {
        self.steps.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwind_is_reverse_order() {
        let mut journal = Journal::default();
        journal.record(Undo::ContentIdRegistered(CommentId(1)));
        journal.record(Undo::CommentCreated(CommentId(1)));
        journal.record(Undo::ThreadCreated(ParaId(2)));
        assert_eq!(journal.len(), 3);

        let steps: Vec<Undo> = journal.unwind().collect();
        assert!(matches!(steps[0], Undo::ThreadCreated(ParaId(2))));
        assert!(matches!(steps[2], Undo::ContentIdRegistered(CommentId(1))));
    }
}
