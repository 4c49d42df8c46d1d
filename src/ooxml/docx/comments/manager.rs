/// The comment manager: one loaded document and all of its comment state.
///
/// A comment lives in five places at once: the content record in
/// `comments.xml`, its thread entry in `commentsExtended.xml`, its durable id
/// in `commentsIds.xml` (and `commentsExtensible.xml`), an optional person
/// in `people.xml`, and the anchor markers in the document body. Every
/// public mutation here keeps them in step.
///
/// Mutations are staged: preconditions are checked and identifiers drawn
/// before anything changes, then each step records its inverse in a
/// journal. If a step fails the journal is replayed backwards, so an error
/// never leaves a partial edit behind.
///
/// # Example
///
/// ```
/// use docx_comments::ooxml::docx::body::{DocumentBody, ParagraphRef};
/// use docx_comments::ooxml::docx::comments::{CommentManager, CommentsConfig, Location};
///
/// let body = DocumentBody::from_document_xml(
///     r#"<w:document><w:body><w:p><w:r><w:t>Hello</w:t></w:r></w:p></w:body></w:document>"#,
/// )?;
/// let mut manager = CommentManager::from_body(body, CommentsConfig::seeded(7))?;
///
/// let root = manager.add_comment(
///     &Location::paragraph(ParagraphRef::main(0)),
///     "Please review",
///     "Ann",
///     Some("A"),
///     None,
/// )?;
/// manager.reply_to_comment(root, "Done", "Bo", None, None)?;
/// manager.resolve_comment(root)?;
///
/// let threads = manager.get_comment_threads();
/// assert_eq!(threads[0].replies[0].text, "Done");
/// assert!(manager.check_consistency().is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
use super::anchor::{AnchorEngine, AnchorHandle, ParagraphSnapshot, Placement, locate, marker_counts};
use super::author::{AuthorHint, AuthorOptions, CoreAuthors, DefaultAuthor, SystemProfile};
use super::config::CommentsConfig;
use super::durable::{DurableIdLedger, parse_comments_extensible, parse_comments_ids};
use super::error::{CommentError, Result};
use super::ids::IdentityAllocator;
use super::journal::{Journal, Undo};
use super::migrate::{MigrationReport, ParsedRecords, migrate};
use super::model::{
    Comment, CommentId, CommentInfo, CommentThread, DurableId, IdentityLink, Location, ParaId, PersonRecord,
    Presence,
};
use super::parts::{self, PartKind};
use super::people::{PeopleRegistry, parse_people, validate_person};
use super::store::{CommentStore, parse_comments};
use super::thread::{ThreadLedger, parse_comments_extended};
use crate::ooxml::docx::body::{DocumentBody, MarkerKind};
use crate::ooxml::opc::{PackURI, PartStore};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Where a fragment was loaded from and its original root tag.
#[derive(Debug, Clone, Default)]
struct FragmentSlot {
    partname: Option<PackURI>,
    root: Option<String>,
}

impl FragmentSlot {
    fn loaded(partname: PackURI, root: Option<String>) -> Self {
        Self {
            partname: Some(partname),
            root,
        }
    }

    #[inline]
    fn exists(&self) -> bool {
        self.partname.is_some()
    }
}

#[derive(Debug, Clone, Default)]
struct Fragments {
    comments: FragmentSlot,
    extended: FragmentSlot,
    ids: FragmentSlot,
    extensible: FragmentSlot,
    people: FragmentSlot,
}

/// A broken cross-part invariant, as found by [`CommentManager::check_consistency`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Inconsistency {
    CountMismatch {
        comments: usize,
        thread_entries: usize,
        durable_entries: usize,
    },
    MissingThreadEntry(CommentId),
    MissingDurableEntry(CommentId),
    OrphanThreadEntry(ParaId),
    OrphanDurableEntry(CommentId),
    DanglingParent {
        para_id: ParaId,
        parent: ParaId,
    },
    /// A live comment without exactly one marker of each kind
    AnchorMarkers {
        id: CommentId,
        starts: usize,
        ends: usize,
        references: usize,
    },
    /// Markers whose id belongs to no live comment
    StrayMarkers(CommentId),
}

/// Comment state of one document.
#[derive(Debug, Clone)]
pub struct CommentManager {
    config: CommentsConfig,
    body: DocumentBody,
    store: CommentStore,
    threads: ThreadLedger,
    durable: DurableIdLedger,
    people: PeopleRegistry,
    ids: IdentityAllocator,
    fragments: Fragments,
    core: CoreAuthors,
    report: MigrationReport,
}

impl CommentManager {
    /// Start from a document body with no comment parts.
    pub fn from_body(body: DocumentBody, config: CommentsConfig) -> Result<Self> {
        config.validate()?;
        let mut ids = IdentityAllocator::new(&config);
        reserve_body_ids(&body, &mut ids);
        Ok(Self {
            config,
            body,
            store: CommentStore::new(),
            threads: ThreadLedger::new(),
            durable: DurableIdLedger::new(),
            people: PeopleRegistry::new(),
            ids,
            fragments: Fragments::default(),
            core: CoreAuthors::default(),
            report: MigrationReport::default(),
        })
    }

    /// Load the body stories and every comment part of a package.
    ///
    /// Inconsistent comment metadata is repaired on the way in; see
    /// [`CommentManager::migration_report`].
    ///
    /// # Errors
    /// Fails when the main document is missing or a part is not well-formed XML.
    pub fn load(store: &dyn PartStore, config: CommentsConfig) -> Result<Self> {
        config.validate()?;
        let main = parts::main_document(store)?;
        let body = DocumentBody::load(store, &main)?;

        let mut fragments = Fragments::default();
        let mut records = ParsedRecords::default();
        if let Some((partname, xml)) = read_fragment(store, &main, &parts::COMMENTS)? {
            let part = parse_comments(xml)?;
            fragments.comments = FragmentSlot::loaded(partname, part.root);
            records.comments = part.comments;
        }
        if let Some((partname, xml)) = read_fragment(store, &main, &parts::COMMENTS_EXTENDED)? {
            let part = parse_comments_extended(xml)?;
            fragments.extended = FragmentSlot::loaded(partname, part.root);
            records.threads = part.entries;
        }
        if let Some((partname, xml)) = read_fragment(store, &main, &parts::COMMENTS_IDS)? {
            let part = parse_comments_ids(xml)?;
            fragments.ids = FragmentSlot::loaded(partname, part.root);
            records.ids = part.entries;
        }
        if let Some((partname, xml)) = read_fragment(store, &main, &parts::COMMENTS_EXTENSIBLE)? {
            let part = parse_comments_extensible(xml)?;
            fragments.extensible = FragmentSlot::loaded(partname, part.root);
            records.extensible = part.entries;
        }
        let mut people = PeopleRegistry::new();
        if let Some((partname, xml)) = read_fragment(store, &main, &parts::PEOPLE)? {
            let part = parse_people(xml)?;
            fragments.people = FragmentSlot::loaded(partname, part.root);
            people = part.registry;
        }
        let core = CoreAuthors::load(store)?;

        let mut ids = IdentityAllocator::new(&config);
        reserve_body_ids(&body, &mut ids);
        records.reserve_ids(&mut ids);
        let migrated = migrate(records, &body, &mut ids)?;

        tracing::info!(
            comments = migrated.store.len(),
            people = people.len(),
            stories = body.stories().len(),
            repaired = !migrated.report.is_clean(),
            "loaded comments"
        );

        Ok(Self {
            config,
            body,
            store: migrated.store,
            threads: migrated.threads,
            durable: migrated.durable,
            people,
            ids,
            fragments,
            core,
            report: migrated.report,
        })
    }

    /// Write the body stories and comment parts back to a package.
    ///
    /// Parts that were loaded are rewritten in place. Missing parts are only
    /// created when there is something to put in them, and are related from
    /// the main document.
    pub fn save(&self, store: &mut dyn PartStore) -> Result<()> {
        let main = self.body.main().partname().clone();
        self.body.save(store);

        let has_comments = !self.store.is_empty();
        write_fragment(store, &main, &parts::COMMENTS, &self.fragments.comments, has_comments, |root| {
            self.store.to_xml(root)
        })?;
        write_fragment(
            store,
            &main,
            &parts::COMMENTS_EXTENDED,
            &self.fragments.extended,
            has_comments,
            |root| self.threads.to_xml(root),
        )?;
        write_fragment(store, &main, &parts::COMMENTS_IDS, &self.fragments.ids, has_comments, |root| {
            self.durable
                .to_ids_xml(root, |id| self.store.get(id).ok().map(Comment::para_id))
        })?;
        write_fragment(
            store,
            &main,
            &parts::COMMENTS_EXTENSIBLE,
            &self.fragments.extensible,
            has_comments && self.config.write_extensible,
            |root| self.durable.to_extensible_xml(root),
        )?;
        write_fragment(
            store,
            &main,
            &parts::PEOPLE,
            &self.fragments.people,
            !self.people.is_empty(),
            |root| self.people.to_xml(root),
        )?;

        tracing::debug!(comments = self.store.len(), people = self.people.len(), "saved comments");
        Ok(())
    }

    /// Add a root comment anchored at `location`.
    ///
    /// # Arguments
    /// * `location` - Paragraph and span to comment on
    /// * `text` - Comment text; `\n` starts a new paragraph
    /// * `author` - Display name stored on the comment
    /// * `initials` - Optional initials stored on the comment
    /// * `link` - Also register the author in the people part
    ///
    /// # Errors
    /// * `InvalidArgument` for an empty author or an incomplete presence
    /// * `InvalidRange` when the location does not exist in the body
    /// * `IdentitySpaceExhausted` when no free identifier could be found
    pub fn add_comment(
        &mut self,
        location: &Location,
        text: &str,
        author: &str,
        initials: Option<&str>,
        link: Option<IdentityLink>,
    ) -> Result<CommentId> {
        check_author(author, link.as_ref())?;
        AnchorEngine::validate(&self.body, location)?;
        let (id, para_id, durable_id) = self.allocate()?;
        let comment = Comment::new(id, para_id, self.ids.next_text_id(), author, initials, text);

        self.transact(|this, journal| {
            this.create_records(journal, comment, None, durable_id)?;
            if let Some(link) = link {
                this.link_person(journal, author, link)?;
            }
            // Restores its own paragraphs on failure, so it runs last.
            AnchorEngine::new(&mut this.body).insert_anchor(id, Placement::Root(location))?;
            Ok(())
        })?;

        tracing::debug!(comment = %id, %para_id, %durable_id, "added comment");
        Ok(id)
    }

    /// Reply to a comment.
    ///
    /// Word threads are two levels deep, so a reply to a reply is attached
    /// to the root of the thread. The reply's anchor joins the root's
    /// markers.
    ///
    /// # Errors
    /// `NotFound` when `parent` is not a live comment or its thread root has
    /// no anchor, plus the argument errors of [`CommentManager::add_comment`].
    pub fn reply_to_comment(
        &mut self,
        parent: CommentId,
        text: &str,
        author: &str,
        initials: Option<&str>,
        link: Option<IdentityLink>,
    ) -> Result<CommentId> {
        check_author(author, link.as_ref())?;
        let root_para = self.threads.root_of(self.store.get(parent)?.para_id());
        let root = self
            .store
            .by_para_id(root_para)
            .map(Comment::id)
            .ok_or_else(|| CommentError::not_found("comment", root_para))?;
        if locate(&self.body, root).is_none() {
            return Err(CommentError::not_found("anchor", root));
        }
        let (id, para_id, durable_id) = self.allocate()?;
        let comment = Comment::new(id, para_id, self.ids.next_text_id(), author, initials, text);

        self.transact(|this, journal| {
            this.create_records(journal, comment, Some(root_para), durable_id)?;
            if let Some(link) = link {
                this.link_person(journal, author, link)?;
            }
            AnchorEngine::new(&mut this.body).insert_anchor(id, Placement::Reply { parent: root })?;
            Ok(())
        })?;

        tracing::debug!(comment = %id, %parent, %root, %para_id, "added reply");
        Ok(id)
    }

    #[inline]
    pub fn resolve_comment(&mut self, id: CommentId) -> Result<()> {
        self.set_comment_resolved(id, true)
    }

    #[inline]
    pub fn unresolve_comment(&mut self, id: CommentId) -> Result<()> {
        self.set_comment_resolved(id, false)
    }

    /// Set the resolved flag of one comment. Setting the current value is a no-op.
    pub fn set_comment_resolved(&mut self, id: CommentId, resolved: bool) -> Result<()> {
        let para_id = self.store.get(id)?.para_id();
        let previous = self.threads.set_done(para_id, resolved)?;
        if previous != resolved {
            tracing::debug!(comment = %id, resolved, "changed resolved state");
        }
        Ok(())
    }

    /// Delete one comment without replies.
    ///
    /// # Errors
    /// * `NotFound` when `id` is not a live comment
    /// * `HasDependents` when it has replies; use [`CommentManager::delete_thread`]
    pub fn delete_comment(&mut self, id: CommentId) -> Result<()> {
        let para_id = self.store.get(id)?.para_id();
        let replies = self.threads.children_of(para_id).len();
        if replies > 0 {
            return Err(CommentError::HasDependents { id, replies });
        }
        self.transact(|this, journal| this.remove_member(journal, id))?;
        tracing::debug!(comment = %id, "deleted comment");
        Ok(())
    }

    /// Delete a comment together with all replies below it.
    ///
    /// Returns the deleted ids, `id` first.
    pub fn delete_thread(&mut self, id: CommentId) -> Result<Vec<CommentId>> {
        let members = self.thread_members(id)?;
        self.transact(|this, journal| {
            // Replies go before their parents so that every intermediate
            // state, and the undo order, keeps parents live.
            for &member in members.iter().rev() {
                this.remove_member(journal, member)?;
            }
            Ok(())
        })?;
        tracing::debug!(comment = %id, removed = members.len(), "deleted thread");
        Ok(members)
    }

    /// Re-anchor one comment. Its identity and thread membership stay as they are.
    pub fn move_comment(&mut self, id: CommentId, location: &Location) -> Result<AnchorHandle> {
        self.store.get(id)?;
        let handle = AnchorEngine::new(&mut self.body).move_anchor(id, location)?;
        tracing::debug!(comment = %id, paragraph = ?location.paragraph, "moved comment");
        Ok(handle)
    }

    /// Re-anchor the thread `id` belongs to.
    ///
    /// The root goes to `location` and the replies are placed with it, in
    /// the order they were added.
    pub fn move_thread(&mut self, id: CommentId, location: &Location) -> Result<AnchorHandle> {
        let root_para = self.threads.root_of(self.store.get(id)?.para_id());
        let root = self
            .store
            .by_para_id(root_para)
            .map(Comment::id)
            .ok_or_else(|| CommentError::not_found("comment", root_para))?;
        let replies: HashSet<CommentId> = self.thread_members(root)?.into_iter().skip(1).collect();
        let followers: Vec<CommentId> = self
            .store
            .list()
            .map(Comment::id)
            .filter(|c| replies.contains(c))
            .collect();

        let handle = AnchorEngine::new(&mut self.body).move_cluster(root, location, &followers)?;
        tracing::debug!(comment = %root, replies = followers.len(), "moved thread");
        Ok(handle)
    }

    /// Every comment in document order.
    pub fn list_comments(&self) -> Vec<CommentInfo> {
        self.store.list().map(|c| self.info(c)).collect()
    }

    pub fn get_comment(&self, id: CommentId) -> Result<CommentInfo> {
        Ok(self.info(self.store.get(id)?))
    }

    /// Comments grouped by thread: roots in document order, replies in the
    /// order they were added.
    pub fn get_comment_threads(&self) -> Vec<CommentThread> {
        let mut threads: Vec<CommentThread> = Vec::new();
        let mut by_root: HashMap<ParaId, usize> = HashMap::new();
        for comment in self.store.list() {
            if self.threads.root_of(comment.para_id()) == comment.para_id() {
                by_root.insert(comment.para_id(), threads.len());
                threads.push(CommentThread {
                    root: self.info(comment),
                    replies: Vec::new(),
                });
            }
        }
        for comment in self.store.list() {
            let root = self.threads.root_of(comment.para_id());
            if root != comment.para_id()
                && let Some(&i) = by_root.get(&root)
            {
                threads[i].replies.push(self.info(comment));
            }
        }
        threads
    }

    /// Distinct author names, first seen first.
    pub fn get_authors(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.store
            .list()
            .filter(|c| seen.insert(c.author()))
            .map(|c| c.author().to_string())
            .collect()
    }

    /// The first non-empty initials each author used.
    pub fn get_author_initials(&self) -> Vec<(String, String)> {
        let mut found: Vec<(String, String)> = Vec::new();
        for comment in self.store.list() {
            if let Some(initials) = comment.initials()
                && !found.iter().any(|(name, _)| name == comment.author())
            {
                found.push((comment.author().to_string(), initials.to_string()));
            }
        }
        found
    }

    /// The author recorded in the core properties, with initials if that
    /// author has commented.
    pub fn document_author(&self) -> Option<(String, Option<String>)> {
        let name = self.core.author()?;
        Some((name.to_string(), self.initials_of(name)))
    }

    /// Resolve who new comments should be attributed to.
    ///
    /// See [`PeopleRegistry::resolve_default_author`]; this document's core
    /// properties and comment initials are the last fallback.
    pub fn default_author(
        &self,
        hint: AuthorHint<'_>,
        profile: &dyn SystemProfile,
        options: AuthorOptions,
    ) -> Result<DefaultAuthor> {
        PeopleRegistry::resolve_default_author(hint, profile, &self.core, |name| self.initials_of(name), options)
    }

    #[inline]
    pub fn people(&self) -> &PeopleRegistry {
        &self.people
    }

    pub fn get_person(&self, name: &str) -> Result<&PersonRecord> {
        self.people.get(name)
    }

    /// Register a person, or return the existing record of that name.
    pub fn ensure_person(&mut self, name: &str, presence: Option<Presence>) -> Result<PersonRecord> {
        let existed = self.people.contains(name);
        let person = self.people.ensure(name, presence)?.clone();
        if !existed {
            tracing::debug!(name, "registered person");
        }
        Ok(person)
    }

    /// Copy people missing here from another registry. Returns the records added.
    pub fn merge_people_from(&mut self, other: &PeopleRegistry, include_presence: bool) -> Vec<PersonRecord> {
        let added = self.people.merge_from(other, include_presence);
        tracing::debug!(added = added.len(), "merged people");
        added
    }

    /// Check every cross-part invariant. An empty list means the state is consistent.
    pub fn check_consistency(&self) -> Vec<Inconsistency> {
        let mut found = Vec::new();

        let (comments, thread_entries, durable_entries) =
            (self.store.len(), self.threads.len(), self.durable.len());
        if comments != thread_entries || comments != durable_entries {
            found.push(Inconsistency::CountMismatch {
                comments,
                thread_entries,
                durable_entries,
            });
        }

        for comment in self.store.list() {
            if !self.threads.contains(comment.para_id()) {
                found.push(Inconsistency::MissingThreadEntry(comment.id()));
            }
            if !self.durable.contains(comment.id()) {
                found.push(Inconsistency::MissingDurableEntry(comment.id()));
            }
        }
        for (&para_id, entry) in self.threads.iter() {
            if self.store.by_para_id(para_id).is_none() {
                found.push(Inconsistency::OrphanThreadEntry(para_id));
            }
            if let Some(parent) = entry.parent
                && self.store.by_para_id(parent).is_none()
            {
                found.push(Inconsistency::DanglingParent { para_id, parent });
            }
        }
        for (&id, _) in self.durable.iter() {
            if !self.store.contains(id) {
                found.push(Inconsistency::OrphanDurableEntry(id));
            }
        }

        let counts = marker_counts(&self.body);
        for comment in self.store.list() {
            let count = |kind: MarkerKind| counts.get(&(comment.id().0, kind)).copied().unwrap_or(0);
            let (starts, ends, references) = (
                count(MarkerKind::RangeStart),
                count(MarkerKind::RangeEnd),
                count(MarkerKind::Reference),
            );
            if (starts, ends, references) != (1, 1, 1) {
                found.push(Inconsistency::AnchorMarkers {
                    id: comment.id(),
                    starts,
                    ends,
                    references,
                });
            }
        }
        let mut stray: Vec<u64> = counts
            .keys()
            .map(|&(id, _)| id)
            .filter(|&id| !self.store.contains(CommentId(id)))
            .collect();
        stray.sort_unstable();
        stray.dedup();
        found.extend(stray.into_iter().map(|id| Inconsistency::StrayMarkers(CommentId(id))));

        found
    }

    /// Repairs made when this document was loaded.
    #[inline]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    #[inline]
    pub fn config(&self) -> &CommentsConfig {
        &self.config
    }

    #[inline]
    pub fn body(&self) -> &DocumentBody {
        &self.body
    }

    #[inline]
    pub fn into_body(self) -> DocumentBody {
        self.body
    }

    #[inline]
    pub fn comments(&self) -> &CommentStore {
        &self.store
    }

    #[inline]
    pub fn threads(&self) -> &ThreadLedger {
        &self.threads
    }

    #[inline]
    pub fn durable_ids(&self) -> &DurableIdLedger {
        &self.durable
    }

    #[inline]
    pub fn core_authors(&self) -> &CoreAuthors {
        &self.core
    }

    fn info(&self, comment: &Comment) -> CommentInfo {
        let entry = self.threads.get(comment.para_id()).ok().copied().unwrap_or_default();
        CommentInfo {
            id: comment.id(),
            para_id: comment.para_id(),
            durable_id: self.durable.get(comment.id()).ok().map(|e| e.durable_id),
            author: comment.author().to_string(),
            initials: comment.initials().map(str::to_string),
            date: comment.date(),
            text: comment.text().to_string(),
            parent_para_id: entry.parent,
            parent: entry
                .parent
                .and_then(|p| self.store.by_para_id(p))
                .map(Comment::id),
            resolved: entry.done,
        }
    }

    fn initials_of(&self, name: &str) -> Option<String> {
        self.store
            .list()
            .filter(|c| c.author() == name)
            .find_map(|c| c.initials().map(str::to_string))
    }

    /// `id` followed by every comment below it, breadth first.
    fn thread_members(&self, id: CommentId) -> Result<Vec<CommentId>> {
        let start = self.store.get(id)?.para_id();
        let mut members = vec![id];
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(para_id) = queue.pop_front() {
            for child in self.threads.children_of(para_id) {
                if !seen.insert(child) {
                    continue;
                }
                if let Some(comment) = self.store.by_para_id(child) {
                    members.push(comment.id());
                }
                queue.push_back(child);
            }
        }
        Ok(members)
    }

    /// Draw the three identifiers of a new comment without registering them.
    fn allocate(&mut self) -> Result<(CommentId, ParaId, DurableId)> {
        Ok((
            self.ids.next_content_id()?,
            self.ids.next_paragraph_id()?,
            self.ids.next_durable_id()?,
        ))
    }

    fn transact<T>(&mut self, op: impl FnOnce(&mut Self, &mut Journal) -> Result<T>) -> Result<T> {
        let mut journal = Journal::default();
        match op(self, &mut journal) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.rollback(journal);
                Err(err)
            },
        }
    }

    fn rollback(&mut self, journal: Journal) {
        let steps = journal.len();
        for step in journal.unwind() {
            let outcome = match step {
                Undo::ContentIdRegistered(id) => {
                    self.ids.release_content_id(id);
                    Ok(())
                },
                Undo::ParaIdRegistered(para_id) => {
                    self.ids.release_paragraph_id(para_id);
                    Ok(())
                },
                Undo::DurableIdRegistered(durable_id) => {
                    self.ids.release_durable_id(durable_id);
                    Ok(())
                },
                Undo::CommentCreated(id) => {
                    self.store.remove(id);
                    Ok(())
                },
                Undo::CommentRemoved { position, comment } => self.store.insert_at(position, comment).map(drop),
                Undo::ThreadCreated(para_id) => {
                    self.threads.remove(para_id);
                    Ok(())
                },
                Undo::ThreadRemoved {
                    position,
                    para_id,
                    entry,
                } => self.threads.insert_at(position, para_id, entry),
                Undo::DurableCreated(id) => {
                    self.durable.remove(id);
                    Ok(())
                },
                Undo::DurableRemoved { position, id, entry } => self.durable.insert_at(position, id, entry),
                Undo::PersonAdded(name) => {
                    self.people.remove(&name);
                    Ok(())
                },
                Undo::Paragraphs(snapshot) => {
                    snapshot.restore(&mut self.body);
                    Ok(())
                },
            };
            if let Err(err) = outcome {
                tracing::error!(%err, "failed to undo a step of a partial edit");
            }
        }
        tracing::debug!(steps, "rolled back partial edit");
    }

    /// Register identifiers and create the ledger rows of a new comment.
    fn create_records(
        &mut self,
        journal: &mut Journal,
        comment: Comment,
        parent: Option<ParaId>,
        durable_id: DurableId,
    ) -> Result<()> {
        let (id, para_id, date) = (comment.id(), comment.para_id(), comment.date());
        if self.ids.register_content_id(id) {
            journal.record(Undo::ContentIdRegistered(id));
        }
        if self.ids.register_paragraph_id(para_id) {
            journal.record(Undo::ParaIdRegistered(para_id));
        }
        if self.ids.register_durable_id(durable_id) {
            journal.record(Undo::DurableIdRegistered(durable_id));
        }

        self.store.create(comment)?;
        journal.record(Undo::CommentCreated(id));
        self.threads.create(para_id, parent)?;
        journal.record(Undo::ThreadCreated(para_id));
        self.durable.create(id, durable_id, date)?;
        journal.record(Undo::DurableCreated(id));
        Ok(())
    }

    fn link_person(&mut self, journal: &mut Journal, author: &str, link: IdentityLink) -> Result<()> {
        let existed = self.people.contains(author);
        self.people.ensure(author, link.presence)?;
        if !existed {
            journal.record(Undo::PersonAdded(author.to_string()));
        }
        Ok(())
    }

    /// Remove the anchor and every ledger row of one comment.
    fn remove_member(&mut self, journal: &mut Journal, id: CommentId) -> Result<()> {
        journal.record(Undo::Paragraphs(ParagraphSnapshot::capture(&self.body, &[id], None)));
        AnchorEngine::new(&mut self.body).remove_anchor(id)?;

        if let Some((position, comment)) = self.store.remove(id) {
            let para_id = comment.para_id();
            journal.record(Undo::CommentRemoved { position, comment });
            if let Some((position, entry)) = self.threads.remove(para_id) {
                journal.record(Undo::ThreadRemoved {
                    position,
                    para_id,
                    entry,
                });
            }
        }
        if let Some((position, entry)) = self.durable.remove(id) {
            journal.record(Undo::DurableRemoved { position, id, entry });
        }
        Ok(())
    }
}

fn check_author(author: &str, link: Option<&IdentityLink>) -> Result<()> {
    if author.trim().is_empty() {
        return Err(CommentError::InvalidArgument(
            "comment author must not be empty".to_string(),
        ));
    }
    if let Some(link) = link {
        validate_person(author, link.presence.as_ref())?;
    }
    Ok(())
}

/// Keep new identifiers clear of body paragraph ids and of marker ids
/// already in the text.
fn reserve_body_ids(body: &DocumentBody, ids: &mut IdentityAllocator) {
    for para_id in body.para_ids() {
        ids.reserve_body_para_id(para_id);
    }
    for &(id, _) in marker_counts(body).keys() {
        ids.register_content_id(CommentId(id));
    }
}

fn read_fragment<'a>(
    store: &'a dyn PartStore,
    main: &PackURI,
    kind: &PartKind,
) -> Result<Option<(PackURI, &'a str)>> {
    let Some(partname) = kind.find(store, main) else {
        return Ok(None);
    };
    Ok(parts::part_text(store, &partname)?.map(|xml| (partname, xml)))
}

fn write_fragment(
    store: &mut dyn PartStore,
    main: &PackURI,
    kind: &PartKind,
    slot: &FragmentSlot,
    needed: bool,
    xml: impl FnOnce(Option<&str>) -> Result<String>,
) -> Result<()> {
    if !needed && !slot.exists() {
        return Ok(());
    }
    let partname = match &slot.partname {
        Some(partname) => partname.clone(),
        None => kind.default_uri()?,
    };
    let xml = xml(slot.root.as_deref())?;
    kind.save(store, main, &partname, xml);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::docx::body::ParagraphRef;

    const DOC: &str = r#"<w:document><w:body><w:p w14:paraId="00000010"><w:r><w:t xml:space="preserve">One </w:t></w:r><w:r><w:t xml:space="preserve">two </w:t></w:r><w:r><w:t>three</w:t></w:r></w:p><w:p/></w:body></w:document>"#;

    fn manager() -> CommentManager {
        let body = DocumentBody::from_document_xml(DOC).unwrap();
        CommentManager::from_body(body, CommentsConfig::seeded(11)).unwrap()
    }

    #[test]
    fn test_add_comment_creates_all_records() {
        let mut m = manager();
        let id = m
            .add_comment(&Location::runs(ParagraphRef::main(0), 0, 2), "Please review", "A", Some("A"), None)
            .unwrap();

        let info = m.get_comment(id).unwrap();
        assert_eq!(info.text, "Please review");
        assert_eq!(info.parent_para_id, None);
        assert!(!info.resolved);
        assert!(info.durable_id.is_some());
        assert_ne!(info.para_id, ParaId(0x10));
        assert!(locate(m.body(), id).is_some());
        assert!(m.check_consistency().is_empty());
        assert!(m.people().is_empty());
    }

    #[test]
    fn test_bad_arguments_change_nothing() {
        let mut m = manager();
        let before = (m.comments().clone(), m.body().clone());

        let err = m
            .add_comment(&Location::runs(ParagraphRef::main(0), 1, 5), "x", "A", None, None)
            .unwrap_err();
        assert!(matches!(err, CommentError::InvalidRange(_)));
        let err = m
            .add_comment(&Location::paragraph(ParagraphRef::main(0)), "x", " ", None, None)
            .unwrap_err();
        assert!(matches!(err, CommentError::InvalidArgument(_)));
        let err = m
            .add_comment(
                &Location::paragraph(ParagraphRef::main(0)),
                "x",
                "A",
                None,
                Some(IdentityLink::with_presence("AD", "")),
            )
            .unwrap_err();
        assert!(matches!(err, CommentError::InvalidArgument(_)));
        let err = m.reply_to_comment(CommentId(404), "x", "A", None, None).unwrap_err();
        assert!(matches!(err, CommentError::NotFound { .. }));

        assert_eq!((m.comments().clone(), m.body().clone()), before);
        assert!(m.people().is_empty());
    }

    #[test]
    fn test_rollback_restores_every_ledger() {
        let mut m = manager();
        let id = m
            .add_comment(&Location::paragraph(ParagraphRef::main(0)), "root", "A", None, None)
            .unwrap();
        let before = (
            m.comments().clone(),
            m.threads().clone(),
            m.durable_ids().clone(),
            m.body().clone(),
        );

        // Fail after the records exist but before the anchor is placed.
        let result: Result<()> = m.transact(|this, journal| {
            let comment = Comment::new(CommentId(77), ParaId(0x77), 1, "B", None, "late");
            this.create_records(journal, comment, Some(this.store.get(id)?.para_id()), DurableId(0x77))?;
            this.link_person(journal, "B", IdentityLink::name_only())?;
            this.remove_member(journal, id)?;
            Err(CommentError::InvalidRange("forced".to_string()))
        });
        assert!(result.is_err());

        let after = (
            m.comments().clone(),
            m.threads().clone(),
            m.durable_ids().clone(),
            m.body().clone(),
        );
        assert_eq!(after, before);
        assert!(!m.people().contains("B"));
        assert!(!m.ids.is_content_id_used(CommentId(77)));
        assert!(m.ids.is_content_id_used(id));
    }

    #[test]
    fn test_link_registers_person_once() {
        let mut m = manager();
        let at = Location::paragraph(ParagraphRef::main(1));
        let root = m
            .add_comment(&at, "a", "Ann", None, Some(IdentityLink::with_presence("AD", "ann")))
            .unwrap();
        m.reply_to_comment(root, "b", "Ann", None, Some(IdentityLink::name_only()))
            .unwrap();
        assert_eq!(m.people().len(), 1);
        assert!(m.get_person("Ann").unwrap().presence.is_some());
    }

    #[test]
    fn test_check_consistency_reports_problems() {
        let mut m = manager();
        let id = m
            .add_comment(&Location::paragraph(ParagraphRef::main(0)), "x", "A", None, None)
            .unwrap();
        AnchorEngine::new(&mut m.body).remove_anchor(id).unwrap();
        m.durable.remove(id);

        let found = m.check_consistency();
        assert!(found.contains(&Inconsistency::MissingDurableEntry(id)));
        assert!(found.contains(&Inconsistency::AnchorMarkers {
            id,
            starts: 0,
            ends: 0,
            references: 0
        }));
        assert!(matches!(found[0], Inconsistency::CountMismatch { .. }));
    }
}
