//! Newtype identifiers.
//!
//! The project and log identities the session is bound to are distinct
//! newtypes so a log name can never be passed where a project ID is expected.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, as_str(), Display. Construction is per type.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of the cloud project the process is deployed to.
    ProjectId
);

impl ProjectId {
    /// Creates a project ID, returning `None` if the value is blank.
    ///
    /// Surrounding whitespace is trimmed; the metadata server answers with a
    /// bare string but configuration values may carry a trailing newline.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }
}

string_id!(
    /// Name of the log every entry is written to.
    ///
    /// Limited to 512 characters from `[A-Za-z0-9_\-./]`, the set the logging
    /// API accepts before URL encoding.
    LogName
);

/// Maximum length of a [`LogName`].
pub const MAX_LOG_NAME_LEN: usize = 512;

impl LogName {
    /// Creates a log name, returning `None` if the value is empty, too long,
    /// or contains a character outside the permitted set.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let valid = !v.is_empty()
            && v.len() <= MAX_LOG_NAME_LEN
            && v
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
        if valid {
            Some(Self(v))
        } else {
            None
        }
    }

    /// Returns the name with `/` percent-encoded, as required inside a
    /// `projects/<id>/logs/<name>` resource path.
    pub fn url_encoded(&self) -> String {
        self.0.replace('/', "%2F")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_trims_and_rejects_blank() {
        assert_eq!(
            ProjectId::new("my-project\n").map(|p| p.to_string()),
            Some("my-project".to_string())
        );
        assert!(ProjectId::new("").is_none());
        assert!(ProjectId::new("  \n").is_none());
    }

    #[test]
    fn test_log_name_validation() {
        assert!(LogName::new("audit-log-forwarder").is_some());
        assert!(LogName::new("cloudaudit.googleapis.com/activity").is_some());
        assert!(LogName::new("").is_none());
        assert!(LogName::new("has space").is_none());
        assert!(LogName::new("x".repeat(MAX_LOG_NAME_LEN + 1)).is_none());
    }

    #[test]
    fn test_log_name_url_encoding() {
        let name = LogName::new("cloudaudit.googleapis.com/activity").unwrap();
        assert_eq!(name.url_encoded(), "cloudaudit.googleapis.com%2Factivity");
    }
}
