/// Identifier allocation for new comments.
///
/// Three spaces are handed out: numeric content ids, paragraph ids and
/// durable ids. Each draw is checked against an exclusion set seeded from
/// the loaded document; callers register what they actually use.
use super::config::CommentsConfig;
use super::error::{CommentError, IdSpace, Result};
use super::model::{CommentId, DurableId, ParaId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct IdentityAllocator {
    rng: StdRng,
    retry_limit: u32,
    content_max: u64,
    hex_max: u32,
    content: HashSet<CommentId>,
    paragraphs: HashSet<u32>,
    durable: HashSet<DurableId>,
}

impl IdentityAllocator {
    /// Create an allocator with empty exclusion sets.
    pub fn new(config: &CommentsConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            retry_limit: config.id_retry_limit.max(1),
            content_max: config.content_id_max.max(1),
            hex_max: config.hex_id_max.max(1),
            content: HashSet::new(),
            paragraphs: HashSet::new(),
            durable: HashSet::new(),
        }
    }

    /// A content id unused by any registered comment.
    pub fn next_content_id(&mut self) -> Result<CommentId> {
        let max = self.content_max;
        self.draw(IdSpace::Content, |rng| rng.random_range(1..=max), |this, v| {
            this.content.contains(&CommentId(v))
        })
        .map(CommentId)
    }

    /// A paragraph id unused by any comment or body paragraph.
    pub fn next_paragraph_id(&mut self) -> Result<ParaId> {
        let max = self.hex_max;
        self.draw(IdSpace::Paragraph, |rng| rng.random_range(1..=max), |this, v| {
            this.paragraphs.contains(&v)
        })
        .map(ParaId)
    }

    /// A durable id unused by any registered comment.
    pub fn next_durable_id(&mut self) -> Result<DurableId> {
        let max = self.hex_max;
        self.draw(IdSpace::Durable, |rng| rng.random_range(1..=max), |this, v| {
            this.durable.contains(&DurableId(v))
        })
        .map(DurableId)
    }

    /// A `w14:textId` value. These only need to be well formed, so nothing is tracked.
    pub fn next_text_id(&mut self) -> u32 {
        self.rng.random_range(1..=self.hex_max)
    }

    fn draw<T: Copy>(
        &mut self,
        space: IdSpace,
        mut sample: impl FnMut(&mut StdRng) -> T,
        taken: impl Fn(&Self, T) -> bool,
    ) -> Result<T> {
        for _ in 0..self.retry_limit {
            let candidate = sample(&mut self.rng);
            if !taken(self, candidate) {
                return Ok(candidate);
            }
        }
        tracing::warn!(%space, attempts = self.retry_limit, "identifier space exhausted");
        Err(CommentError::IdentitySpaceExhausted {
            space,
            attempts: self.retry_limit,
        })
    }

    pub fn register_content_id(&mut self, id: CommentId) -> bool {
        self.content.insert(id)
    }

    pub fn register_paragraph_id(&mut self, id: ParaId) -> bool {
        self.paragraphs.insert(id.0)
    }

    /// Reserve a body paragraph's `w14:paraId` so comments never reuse it.
    pub fn reserve_body_para_id(&mut self, raw: &str) {
        if let Some(id) = ParaId::parse(raw) {
            self.paragraphs.insert(id.0);
        }
    }

    pub fn register_durable_id(&mut self, id: DurableId) -> bool {
        self.durable.insert(id)
    }

    pub fn release_content_id(&mut self, id: CommentId) {
        self.content.remove(&id);
    }

    pub fn release_paragraph_id(&mut self, id: ParaId) {
        self.paragraphs.remove(&id.0);
    }

    pub fn release_durable_id(&mut self, id: DurableId) {
        self.durable.remove(&id);
    }

    #[inline]
    pub fn is_content_id_used(&self, id: CommentId) -> bool {
        self.content.contains(&id)
    }

    #[inline]
    pub fn is_paragraph_id_used(&self, id: ParaId) -> bool {
        self.paragraphs.contains(&id.0)
    }

    #[inline]
    pub fn is_durable_id_used(&self, id: DurableId) -> bool {
        self.durable.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hex_id_max: u32) -> CommentsConfig {
        CommentsConfig {
            seed: Some(7),
            hex_id_max,
            ..CommentsConfig::default()
        }
    }

    #[test]
    fn test_no_collisions_against_seeded_set() {
        let mut ids = IdentityAllocator::new(&config(0x7FFF_FFFE));
        let mut seen = HashSet::new();
        for _ in 0..5_000 {
            let id = ids.next_paragraph_id().unwrap();
            ids.register_paragraph_id(id);
            seen.insert(id);
        }
        for _ in 0..10_000 {
            let id = ids.next_paragraph_id().unwrap();
            assert!(seen.insert(id), "collision on {}", id);
            assert!(ids.register_paragraph_id(id));
        }
        assert_eq!(seen.len(), 15_000);
        assert!(seen.iter().all(|id| id.0 >= 1 && id.0 <= 0x7FFF_FFFE));
    }

    #[test]
    fn test_exhaustion_in_tiny_space() {
        let mut ids = IdentityAllocator::new(&config(4));
        for v in 1..=4 {
            ids.register_paragraph_id(ParaId(v));
        }
        let err = ids.next_paragraph_id().unwrap_err();
        assert!(matches!(
            err,
            CommentError::IdentitySpaceExhausted {
                space: IdSpace::Paragraph,
                attempts: 64
            }
        ));

        ids.release_paragraph_id(ParaId(3));
        assert_eq!(ids.next_paragraph_id().unwrap(), ParaId(3));
    }

    #[test]
    fn test_spaces_are_independent() {
        let mut ids = IdentityAllocator::new(&config(1));
        ids.register_paragraph_id(ParaId(1));
        assert_eq!(ids.next_durable_id().unwrap(), DurableId(1));
        ids.reserve_body_para_id("not hex");
        ids.reserve_body_para_id("00000001");
        assert!(ids.is_paragraph_id_used(ParaId(1)));
    }

    #[test]
    fn test_seeded_allocators_agree() {
        let mut a = IdentityAllocator::new(&config(0x7FFF_FFFE));
        let mut b = IdentityAllocator::new(&config(0x7FFF_FFFE));
        for _ in 0..16 {
            assert_eq!(a.next_content_id().unwrap(), b.next_content_id().unwrap());
        }
        let id = a.next_content_id().unwrap();
        assert!(id.0 >= 1 && id.0 <= i32::MAX as u64);
    }
}
