/// Building consistent ledgers from the fragments of a loaded document.
///
/// Documents written by other tools, or by older Word versions, often lack
/// some of the metadata fragments or disagree between them. Loading repairs
/// what it can and records every repair in a [`MigrationReport`].
use super::anchor::locate;
use super::durable::DurableIdLedger;
use super::error::Result;
use super::ids::IdentityAllocator;
use super::model::{CommentId, DurableId, ParaId, ThreadEntry};
use super::store::{CommentStore, ParsedComment};
use super::thread::{ParsedThreadEntry, ThreadLedger};
use crate::ooxml::docx::body::DocumentBody;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Repairs made while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Comments without a usable `w:id`, or repeating one
    pub comments_dropped: usize,
    /// Comments given a new paragraph id (missing, malformed or repeated)
    pub para_ids_assigned: usize,
    /// Root thread entries added for comments without one
    pub thread_entries_added: usize,
    /// Thread entries for no live comment, or repeated
    pub orphan_thread_entries: usize,
    /// Parent links to missing comments, to themselves or in a cycle
    pub dangling_parents_detached: usize,
    /// Durable ids added for comments without one
    pub durable_ids_assigned: usize,
    /// Durable records for no live comment, repeated, or malformed
    pub orphan_durable_entries: usize,
    /// Comments with no complete anchor in the body
    pub unanchored: Vec<CommentId>,
}

impl MigrationReport {
    /// Whether the document loaded without any repair.
    pub fn is_clean(&self) -> bool {
        self.comments_dropped == 0
            && self.para_ids_assigned == 0
            && self.thread_entries_added == 0
            && self.orphan_thread_entries == 0
            && self.dangling_parents_detached == 0
            && self.durable_ids_assigned == 0
            && self.orphan_durable_entries == 0
            && self.unanchored.is_empty()
    }
}

/// Records read from the comment fragments, before any repair.
#[derive(Debug, Default)]
pub(crate) struct ParsedRecords {
    pub comments: Vec<ParsedComment>,
    pub threads: Vec<ParsedThreadEntry>,
    pub ids: Vec<(Option<ParaId>, Option<DurableId>)>,
    pub extensible: Vec<(Option<DurableId>, Option<DateTime<Utc>>)>,
}

impl ParsedRecords {
    /// Reserve every identifier the records use, valid or not.
    pub(crate) fn reserve_ids(&self, ids: &mut IdentityAllocator) {
        for comment in &self.comments {
            if let Some(id) = comment.id {
                ids.register_content_id(id);
            }
            if let Some(para_id) = comment.para_id {
                ids.register_paragraph_id(para_id);
            }
        }
        for entry in &self.threads {
            for para_id in [entry.para_id, entry.parent].into_iter().flatten() {
                ids.register_paragraph_id(para_id);
            }
        }
        for durable_id in self
            .ids
            .iter()
            .filter_map(|(_, d)| *d)
            .chain(self.extensible.iter().filter_map(|(d, _)| *d))
        {
            ids.register_durable_id(durable_id);
        }
    }
}

/// Consistent ledgers plus what it took to get them.
#[derive(Debug, Default)]
pub(crate) struct Migrated {
    pub store: CommentStore,
    pub threads: ThreadLedger,
    pub durable: DurableIdLedger,
    pub report: MigrationReport,
}

/// Turn parsed records into ledgers that satisfy the cross-part invariants.
///
/// `ids` must already hold every identifier in use, see
/// [`ParsedRecords::reserve_ids`].
pub(crate) fn migrate(
    records: ParsedRecords,
    body: &DocumentBody,
    ids: &mut IdentityAllocator,
) -> Result<Migrated> {
    let mut out = Migrated::default();

    load_comments(records.comments, ids, &mut out)?;
    load_threads(&records.threads, &mut out)?;
    load_durable_ids(&records.ids, &records.extensible, ids, &mut out)?;

    for comment in out.store.list() {
        if locate(body, comment.id()).is_none() {
            tracing::warn!(comment = %comment.id(), "comment has no anchor in the document body");
            out.report.unanchored.push(comment.id());
        }
    }

    Ok(out)
}

fn load_comments(comments: Vec<ParsedComment>, ids: &mut IdentityAllocator, out: &mut Migrated) -> Result<()> {
    for parsed in comments {
        let Some(id) = parsed.id.filter(|id| !out.store.contains(*id)) else {
            tracing::warn!(id = ?parsed.id, author = %parsed.author, "dropping comment without a unique id");
            out.report.comments_dropped += 1;
            continue;
        };
        let para_id = match parsed.para_id {
            Some(para_id) if out.store.by_para_id(para_id).is_none() => para_id,
            previous => {
                let para_id = ids.next_paragraph_id()?;
                ids.register_paragraph_id(para_id);
                tracing::warn!(comment = %id, ?previous, assigned = %para_id, "assigned paragraph id");
                out.report.para_ids_assigned += 1;
                para_id
            },
        };
        out.store.create(parsed.into_comment(id, para_id))?;
    }
    Ok(())
}

fn load_threads(entries: &[ParsedThreadEntry], out: &mut Migrated) -> Result<()> {
    // Keep the first entry of every live comment, in file order.
    let mut kept: Vec<(ParaId, Option<ParaId>, bool)> = Vec::new();
    let mut seen = HashSet::new();
    for entry in entries {
        match entry.para_id {
            Some(para_id) if out.store.by_para_id(para_id).is_some() && seen.insert(para_id) => {
                kept.push((para_id, entry.parent, entry.done));
            },
            _ => {
                tracing::warn!(para_id = ?entry.para_id, "dropping orphan thread entry");
                out.report.orphan_thread_entries += 1;
            },
        }
    }

    let mut parents: HashMap<ParaId, Option<ParaId>> = kept.iter().map(|&(p, parent, _)| (p, parent)).collect();
    for &(para_id, parent, _) in &kept {
        if let Some(parent) = parent
            && (parent == para_id || !parents.contains_key(&parent))
        {
            tracing::warn!(%para_id, %parent, "detaching reply from missing parent");
            parents.insert(para_id, None);
            out.report.dangling_parents_detached += 1;
        }
    }
    for &(para_id, _, _) in &kept {
        if in_cycle(&parents, para_id) {
            tracing::warn!(%para_id, "detaching reply from a parent cycle");
            parents.insert(para_id, None);
            out.report.dangling_parents_detached += 1;
        }
    }

    // Parents may come after their replies in the file: insert everything
    // as roots first, then link.
    for &(para_id, _, done) in &kept {
        out.threads.create(para_id, None)?;
        out.threads.set_done(para_id, done)?;
    }
    for &(para_id, _, _) in &kept {
        if let Some(parent) = parents.get(&para_id).copied().flatten() {
            out.threads.reparent(para_id, Some(parent))?;
        }
    }

    let missing: Vec<ParaId> = out
        .store
        .list()
        .map(|c| c.para_id())
        .filter(|p| !out.threads.contains(*p))
        .collect();
    for para_id in missing {
        out.threads.create(para_id, None)?;
        out.report.thread_entries_added += 1;
    }
    if out.report.thread_entries_added > 0 {
        tracing::warn!(added = out.report.thread_entries_added, "added missing thread entries");
    }
    Ok(())
}

/// Whether following parents from `start` comes back to `start`.
fn in_cycle(parents: &HashMap<ParaId, Option<ParaId>>, start: ParaId) -> bool {
    let mut current = start;
    for _ in 0..parents.len() {
        match parents.get(&current).copied().flatten() {
            Some(parent) if parent == start => return true,
            Some(parent) => current = parent,
            None => return false,
        }
    }
    false
}

fn load_durable_ids(
    entries: &[(Option<ParaId>, Option<DurableId>)],
    extensible: &[(Option<DurableId>, Option<DateTime<Utc>>)],
    ids: &mut IdentityAllocator,
    out: &mut Migrated,
) -> Result<()> {
    let mut dates: HashMap<DurableId, Option<DateTime<Utc>>> = HashMap::new();
    for &(durable_id, date) in extensible {
        if let Some(durable_id) = durable_id {
            dates.entry(durable_id).or_insert(date);
        }
    }

    for &(para_id, durable_id) in entries {
        let owner = para_id.and_then(|p| out.store.by_para_id(p)).map(|c| (c.id(), c.date()));
        match (owner, durable_id) {
            (Some((id, date)), Some(durable_id)) if !out.durable.contains(id) => {
                let date_utc = dates.get(&durable_id).copied().flatten().or(date);
                if out.durable.create(id, durable_id, date_utc).is_err() {
                    // Taken by another comment; a fresh one is assigned below.
                    out.report.orphan_durable_entries += 1;
                }
            },
            _ => {
                tracing::warn!(?para_id, ?durable_id, "dropping orphan durable id record");
                out.report.orphan_durable_entries += 1;
            },
        }
    }

    let missing: Vec<(CommentId, Option<DateTime<Utc>>)> = out
        .store
        .list()
        .filter(|c| !out.durable.contains(c.id()))
        .map(|c| (c.id(), c.date()))
        .collect();
    for (id, date) in missing {
        let durable_id = ids.next_durable_id()?;
        ids.register_durable_id(durable_id);
        out.durable.create(id, durable_id, date)?;
        out.report.durable_ids_assigned += 1;
    }
    if out.report.durable_ids_assigned > 0 {
        tracing::warn!(assigned = out.report.durable_ids_assigned, "assigned missing durable ids");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::docx::comments::config::CommentsConfig;
    use crate::ooxml::docx::comments::store::parse_comments;

    const BODY: &str = r#"<w:document><w:body><w:p><w:commentRangeStart w:id="1"/><w:r><w:t>x</w:t></w:r><w:commentRangeEnd w:id="1"/><w:r><w:commentReference w:id="1"/></w:r></w:p></w:body></w:document>"#;

    const COMMENTS: &str = r#"<w:comments><w:comment w:id="1" w:author="A"><w:p w14:paraId="00000001"><w:r><w:t>one</w:t></w:r></w:p></w:comment><w:comment w:id="2" w:author="B"><w:p w14:paraId="00000002"/></w:comment><w:comment w:id="2" w:author="dup"/><w:comment w:id="3" w:author="C"><w:p/></w:comment><w:comment w:id="4" w:author="D"><w:p w14:paraId="00000001"/></w:comment></w:comments>"#;

    fn records() -> ParsedRecords {
        ParsedRecords {
            comments: parse_comments(COMMENTS).unwrap().comments,
            threads: vec![
                ParsedThreadEntry {
                    para_id: Some(ParaId(2)),
                    parent: Some(ParaId(1)),
                    done: true,
                },
                ParsedThreadEntry {
                    para_id: Some(ParaId(1)),
                    parent: Some(ParaId(0x99)),
                    done: false,
                },
                ParsedThreadEntry {
                    para_id: Some(ParaId(0x77)),
                    parent: None,
                    done: false,
                },
            ],
            ids: vec![
                (Some(ParaId(1)), Some(DurableId(0x100))),
                (Some(ParaId(2)), Some(DurableId(0x100))),
                (Some(ParaId(0x77)), Some(DurableId(0x300))),
            ],
            extensible: Vec::new(),
        }
    }

    #[test]
    fn test_migrate_repairs() {
        let body = DocumentBody::from_document_xml(BODY).unwrap();
        let mut ids = IdentityAllocator::new(&CommentsConfig::seeded(3));
        let records = records();
        records.reserve_ids(&mut ids);
        let out = migrate(records, &body, &mut ids).unwrap();

        assert_eq!(out.store.len(), 4);
        assert_eq!(out.threads.len(), 4);
        assert_eq!(out.durable.len(), 4);

        let report = &out.report;
        assert_eq!(report.comments_dropped, 1);
        // Comment 3 had no paragraph id, comment 4 repeated comment 1's.
        assert_eq!(report.para_ids_assigned, 2);
        assert_eq!(report.orphan_thread_entries, 1);
        assert_eq!(report.dangling_parents_detached, 1);
        assert_eq!(report.thread_entries_added, 2);
        assert_eq!(report.orphan_durable_entries, 2);
        assert_eq!(report.durable_ids_assigned, 3);
        assert_eq!(report.unanchored, vec![CommentId(2), CommentId(3), CommentId(4)]);
        assert!(!report.is_clean());

        // The reply link that arrived before its parent survives.
        let reply = out.threads.get(ParaId(2)).unwrap();
        assert_eq!(*reply, ThreadEntry { parent: Some(ParaId(1)), done: true });
        assert_eq!(out.threads.get(ParaId(1)).unwrap().parent, None);
        assert_eq!(out.durable.get(CommentId(1)).unwrap().durable_id, DurableId(0x100));
        assert_ne!(out.durable.get(CommentId(2)).unwrap().durable_id, DurableId(0x100));
    }

    #[test]
    fn test_cycles_are_broken() {
        let mut parents = HashMap::new();
        parents.insert(ParaId(1), Some(ParaId(2)));
        parents.insert(ParaId(2), Some(ParaId(1)));
        parents.insert(ParaId(3), Some(ParaId(1)));
        assert!(in_cycle(&parents, ParaId(1)));
        assert!(!in_cycle(&parents, ParaId(3)));
        parents.insert(ParaId(1), None);
        assert!(!in_cycle(&parents, ParaId(2)));
    }
}
