//! Rollback configuration.
//!
//! # Responsibility
//! - Hold the switches that change how rollback treats attachments.
//! - Load them from a TOML document or file.
//!
//! # Invariants
//! - `RollbackConfig::default()` enables attachment reconciliation and the
//!   trash, and selects trash records newest first.
//! - Missing keys take their default; unknown keys and malformed values are
//!   rejected.

use crate::model::version::Version;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_COMMENT_PREFIX: &str = "Rollback to version";

/// Which trash record restores an attachment when several were deleted
/// after the target revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrashSelection {
    /// First record, newest first, deleted at or after the target revision date.
    #[default]
    MostRecent,
    /// Oldest record still deleted at or after the target revision date.
    EarliestAfterRevision,
}

/// Configuration load failure.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    InvalidValue {
        key: &'static str,
        value: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read rollback config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid rollback config: {err}"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for `{key}`")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

/// Switches applied by `RollbackService`.
///
/// ```toml
/// rollback_attachments = true
/// attachment_trash = true
/// trash_selection = "most_recent"
/// comment_prefix = "Rollback to version"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollbackConfig {
    /// Reconcile attachments with the target revision. When false, the
    /// current attachments are kept untouched.
    pub rollback_attachments: bool,
    /// Use the attachment trash. When false the trash behaves as unavailable.
    pub attachment_trash: bool,
    pub trash_selection: TrashSelection,
    /// Save comment prefix; the target version is appended.
    pub comment_prefix: String,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            rollback_attachments: true,
            attachment_trash: true,
            trash_selection: TrashSelection::default(),
            comment_prefix: DEFAULT_COMMENT_PREFIX.to_string(),
        }
    }
}

impl RollbackConfig {
    /// Parses a TOML document on top of the defaults.
    ///
    /// # Errors
    /// - `Parse` for TOML syntax errors, unknown keys or mistyped values.
    /// - `InvalidValue` for a blank `comment_prefix`.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()
    }

    /// Reads and parses a TOML config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Save comment recorded on the revision produced by a rollback.
    pub fn comment_for(&self, target: &Version) -> String {
        format!("{} {target}", self.comment_prefix)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.comment_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "comment_prefix",
                value: self.comment_prefix,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RollbackConfig, TrashSelection};
    use crate::model::version::Version;
    use std::io::Write;

    #[test]
    fn defaults_enable_attachments_and_trash() {
        let config = RollbackConfig::default();
        assert!(config.rollback_attachments);
        assert!(config.attachment_trash);
        assert_eq!(config.trash_selection, TrashSelection::MostRecent);
        assert_eq!(config.comment_for(&Version::new(1, 2)), "Rollback to version 1.2");
        assert_eq!(RollbackConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn parses_every_key() {
        let config = RollbackConfig::from_toml_str(
            r#"
            # rollback settings
            rollback_attachments = false
            attachment_trash = true
            trash_selection = "earliest_after_revision"
            comment_prefix = "Restored version"
            "#,
        )
        .expect("valid config");

        assert!(!config.rollback_attachments);
        assert!(config.attachment_trash);
        assert_eq!(config.trash_selection, TrashSelection::EarliestAfterRevision);
        assert_eq!(config.comment_for(&Version::new(2, 1)), "Restored version 2.1");
    }

    #[test]
    fn rejects_bad_values_and_unknown_keys() {
        for text in [
            "attachment_trash = \"maybe\"",
            "trash_selection = \"oldest\"",
            "rollback.attachments = false",
            "rollback_attachments = ",
        ] {
            assert!(
                matches!(RollbackConfig::from_toml_str(text), Err(ConfigError::Parse(_))),
                "`{text}` should be rejected"
            );
        }

        let err = RollbackConfig::from_toml_str("comment_prefix = \"  \"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "comment_prefix", .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "attachment_trash = false").unwrap();

        let config = RollbackConfig::from_path(file.path()).unwrap();
        assert!(!config.attachment_trash);
        assert!(config.rollback_attachments);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            RollbackConfig::from_path(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
