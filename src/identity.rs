use std::fmt;

use crate::error::ServeError;

const MAX_LENGTH: usize = 64;

/// A validated user identity.
///
/// User ids name directories under the data dir, so every id is checked
/// before any path is built from it: 1-64 ASCII characters from
/// `[A-Za-z0-9._-]`, not starting with a dot. Constructing a `UserId` is the
/// only way to hand an identity to the store, cache, or correction log,
/// which keeps path traversal unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: &str) -> Result<Self, ServeError> {
        if raw.is_empty() {
            return Err(ServeError::Validation("user id is empty".to_string()));
        }
        if raw.len() > MAX_LENGTH {
            return Err(ServeError::Validation(format!(
                "user id is too long ({} chars, max is {})",
                raw.len(),
                MAX_LENGTH
            )));
        }
        if raw.starts_with('.') {
            return Err(ServeError::Validation(
                "user id must not start with '.'".to_string(),
            ));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(ServeError::Validation(format!(
                "user id contains forbidden character {:?}",
                bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
