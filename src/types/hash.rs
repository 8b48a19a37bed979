//! Object hashes and dependency identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker separating a base hash from an output selector.
pub const SELECTOR_MARKER: char = '#';

/// Kind of object a content hash names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// A pending computation.
    Thunk,
    /// A final value or blob.
    Value,
}

impl ObjectType {
    /// Classify a hash by its type prefix.
    ///
    /// Thunk hashes start with `T`; everything else is a value.
    pub fn from_hash(hash: &str) -> Self {
        if hash.starts_with('T') {
            Self::Thunk
        } else {
            Self::Value
        }
    }

    /// Prefix used when minting hashes of this type.
    pub fn prefix(&self) -> char {
        match self {
            Self::Thunk => 'T',
            Self::Value => 'V',
        }
    }

    /// Whether this names a thunk.
    pub fn is_thunk(&self) -> bool {
        matches!(self, Self::Thunk)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thunk => write!(f, "thunk"),
            Self::Value => write!(f, "value"),
        }
    }
}

/// Error parsing a dependency identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyIdError {
    /// The base hash was empty.
    #[error("Empty hash in dependency identifier: {0:?}")]
    EmptyHash(String),
    /// The selector after the marker was empty.
    #[error("Empty output selector in dependency identifier: {0:?}")]
    EmptySelector(String),
}

/// A dependency identifier: a content hash, optionally naming one output.
///
/// The raw form is `hash` or `hash#selector`. It is parsed once at the
/// boundary and serialized back to the raw form.
///
/// Ordering is by raw string form so dependency maps iterate the same way
/// they serialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DependencyId {
    hash: String,
    selector: Option<String>,
}

impl DependencyId {
    /// Identifier naming a whole object.
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            selector: None,
        }
    }

    /// Identifier naming one output of a thunk.
    pub fn with_selector(hash: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            selector: Some(selector.into()),
        }
    }

    /// Parse a raw `hash[#selector]` string.
    pub fn parse(raw: &str) -> Result<Self, DependencyIdError> {
        match raw.split_once(SELECTOR_MARKER) {
            Some(("", _)) => Err(DependencyIdError::EmptyHash(raw.to_string())),
            Some((_, "")) => Err(DependencyIdError::EmptySelector(raw.to_string())),
            Some((hash, selector)) => Ok(Self::with_selector(hash, selector)),
            None if raw.is_empty() => Err(DependencyIdError::EmptyHash(raw.to_string())),
            None => Ok(Self::new(raw)),
        }
    }

    /// The base hash with any selector removed.
    ///
    /// Never fails: this is the lenient path used on hashes that came from
    /// collaborators and only need their selector dropped.
    pub fn base_of(raw: &str) -> &str {
        raw.split_once(SELECTOR_MARKER).map_or(raw, |(hash, _)| hash)
    }

    /// The base content hash.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The output selector, if any.
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    /// Whether this names a specific output.
    pub fn has_selector(&self) -> bool {
        self.selector.is_some()
    }

    /// Same selector, different base hash.
    pub fn rebased(&self, hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            selector: self.selector.clone(),
        }
    }

    /// Raw string form.
    pub fn to_raw(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Some(selector) => write!(f, "{}{}{}", self.hash, SELECTOR_MARKER, selector),
            None => write!(f, "{}", self.hash),
        }
    }
}

impl FromStr for DependencyId {
    type Err = DependencyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DependencyId> for String {
    fn from(id: DependencyId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for DependencyId {
    type Error = DependencyIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl PartialOrd for DependencyId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DependencyId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}
