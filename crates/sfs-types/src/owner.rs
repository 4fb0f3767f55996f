use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Reference namespace a blob reference belongs to.
///
/// Each domain is independent: an owner may hold one reference per domain,
/// and releasing a reference in one domain never touches another.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainTag(String);

impl DomainTag {
    /// Create a domain tag. Empty tags are rejected.
    pub fn new(tag: impl Into<String>) -> Result<Self, TypeError> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(TypeError::Empty("domain tag"));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DomainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainTag({})", self.0)
    }
}

impl fmt::Display for DomainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which ownership domain an owner identifier comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// A stable identifier for an entity native to this installation.
    Local,
    /// An identifier supplied by the remote synchronization service.
    Sync,
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// One owner able to hold a blob reference.
///
/// Local and sync owners share this single tagged shape so that setting and
/// releasing references is the same code path for both domains. An owner
/// points at no more than one checksum at a time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerKey {
    pub kind: OwnerKind,
    pub domain: DomainTag,
    pub id: String,
}

impl OwnerKey {
    pub fn new(kind: OwnerKind, domain: DomainTag, id: impl Into<String>) -> Self {
        Self {
            kind,
            domain,
            id: id.into(),
        }
    }

    /// An owner local to this installation.
    pub fn local(domain: DomainTag, id: impl Into<String>) -> Self {
        Self::new(OwnerKind::Local, domain, id)
    }

    /// An owner known to the sync service.
    pub fn sync(domain: DomainTag, id: impl Into<String>) -> Self {
        Self::new(OwnerKind::Sync, domain, id)
    }

    pub fn is_local(&self) -> bool {
        self.kind == OwnerKind::Local
    }

    pub fn is_sync(&self) -> bool {
        self.kind == OwnerKind::Sync
    }
}

impl fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerKey({self})")
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind, self.domain, self.id)
    }
}
