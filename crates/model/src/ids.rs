use derive_more::{Display, From};

/// Opaque identifier of a single chapter, as handed out by the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
pub struct ChapterId(String);
impl ChapterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for ChapterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
impl AsRef<str> for ChapterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque identifier of a manga (the parent of many chapters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
pub struct MangaId(String);
impl MangaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for MangaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
impl AsRef<str> for MangaId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
