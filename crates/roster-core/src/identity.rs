//! Case-normalized friend identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// The join key used for every merge and lookup.
///
/// Two identities refer to the same friend iff their normalized keys are
/// equal. Normalization trims surrounding whitespace and lowercases the
/// display identifier, so `"Aria"`, `" aria"` and `"ARIA"` collapse to the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FriendIdentity(String);

impl FriendIdentity {
    /// Derive an identity from a display identifier.
    pub fn new(name: &str) -> Result<Self> {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return Err(CoreError::EmptyIdentity);
        }
        Ok(Self(key))
    }

    /// The normalized key.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `name` normalizes to this identity.
    pub fn matches(&self, name: &str) -> bool {
        name.trim().to_lowercase() == self.0
    }
}

impl fmt::Display for FriendIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FriendIdentity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl TryFrom<&str> for FriendIdentity {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FriendIdentity> for String {
    fn from(identity: FriendIdentity) -> Self {
        identity.0
    }
}

impl AsRef<str> for FriendIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
