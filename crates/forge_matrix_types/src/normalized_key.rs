use serde::{Deserialize, Serialize};
use std::{fmt, hash::Hash};

/// A key in a variant (e.g. `python`, `c_compiler_version`).
///
/// Keys compare and hash by their normalized form, so `libarrow-all`,
/// `libarrow.all` and `libarrow_all` denote the same build dimension.
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizedKey(pub String);

impl NormalizedKey {
    /// Returns the normalized form of the key.
    pub fn normalize(&self) -> String {
        self.0
            .chars()
            .map(|c| match c {
                '-' | '_' | '.' => '_',
                x => x,
            })
            .collect()
    }

    /// The key as it was written.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalize())
    }
}

impl Serialize for NormalizedKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.normalize().serialize(serializer)
    }
}

impl Hash for NormalizedKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalize().hash(state)
    }
}

impl PartialEq for NormalizedKey {
    fn eq(&self, other: &Self) -> bool {
        self.normalize() == other.normalize()
    }
}

impl Eq for NormalizedKey {}

impl PartialOrd for NormalizedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NormalizedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normalize().cmp(&other.normalize())
    }
}

impl From<String> for NormalizedKey {
    fn from(s: String) -> Self {
        NormalizedKey(s)
    }
}

impl From<&str> for NormalizedKey {
    fn from(s: &str) -> Self {
        NormalizedKey(s.to_string())
    }
}
