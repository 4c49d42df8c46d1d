/// Configuration for the comment engine.
use super::error::{CommentError, Result};
use crate::common::id::MAX_LONG_HEX;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a document to take the default author from.
pub const AUTHOR_DOCX_ENV: &str = "DOCX_COMMENTS_AUTHOR_DOCX";

/// Tunables for identifier allocation and fragment maintenance.
///
/// Every field has a default, so a partial serialized config is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    /// Regeneration attempts per identifier before giving up
    pub id_retry_limit: u32,
    /// Content ids are drawn from `1..=content_id_max`
    pub content_id_max: u64,
    /// Paragraph and durable ids are drawn from `1..=hex_id_max`
    pub hex_id_max: u32,
    /// Fixed RNG seed; OS entropy when `None`
    pub seed: Option<u64>,
    /// Environment variable consulted by [`CommentsConfig::from_env`]
    pub author_docx_env: String,
    /// Document to mine for a default author identity
    pub author_docx: Option<PathBuf>,
    /// Maintain `commentsExtensible.xml` alongside `commentsIds.xml`
    pub write_extensible: bool,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            id_retry_limit: 64,
            content_id_max: i32::MAX as u64,
            hex_id_max: MAX_LONG_HEX - 1,
            seed: None,
            author_docx_env: AUTHOR_DOCX_ENV.to_string(),
            author_docx: None,
            write_extensible: true,
        }
    }
}

impl CommentsConfig {
    /// Defaults, plus the author hint path from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.author_docx = read_path_var(&config.author_docx_env);
        config
    }

    /// A config with a fixed seed, for reproducible identifiers.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// The document named as the default author source, if any.
    #[inline]
    pub fn author_hint_path(&self) -> Option<&Path> {
        self.author_docx.as_deref()
    }

    /// Reject settings the allocator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.id_retry_limit == 0 {
            return Err(CommentError::InvalidArgument(
                "id_retry_limit must be at least 1".to_string(),
            ));
        }
        if self.content_id_max == 0 {
            return Err(CommentError::InvalidArgument(
                "content_id_max must be at least 1".to_string(),
            ));
        }
        if self.hex_id_max == 0 || self.hex_id_max > MAX_LONG_HEX {
            return Err(CommentError::InvalidArgument(format!(
                "hex_id_max must be within 1..={:#X}",
                MAX_LONG_HEX
            )));
        }
        Ok(())
    }
}

fn read_path_var(name: &str) -> Option<PathBuf> {
    let value = std::env::var_os(name)?;
    let trimmed = value.to_str().map(str::trim);
    match trimmed {
        Some("") => None,
        Some(s) => Some(PathBuf::from(s)),
        None => Some(PathBuf::from(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommentsConfig::default();
        assert_eq!(config.id_retry_limit, 64);
        assert_eq!(config.content_id_max, 2_147_483_647);
        assert_eq!(config.hex_id_max, 0x7FFF_FFFE);
        assert_eq!(config.author_docx_env, "DOCX_COMMENTS_AUTHOR_DOCX");
        assert!(config.write_extensible);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let config = CommentsConfig {
            hex_id_max: 0x8000_0000,
            ..CommentsConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CommentError::InvalidArgument(_))
        ));
        let config = CommentsConfig {
            id_retry_limit: 0,
            ..CommentsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_reads_named_variable() {
        let name = "DOCX_COMMENTS_TEST_AUTHOR_HINT";
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var(name, " /tmp/author.docx ") };
        let config = CommentsConfig {
            author_docx: read_path_var(name),
            author_docx_env: name.to_string(),
            ..CommentsConfig::default()
        };
        assert_eq!(config.author_hint_path(), Some(Path::new("/tmp/author.docx")));
        unsafe { std::env::set_var(name, "") };
        assert_eq!(read_path_var(name), None);
        unsafe { std::env::remove_var(name) };
    }
}
