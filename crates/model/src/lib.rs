//! Domain types for the chapter download cache.
//!
//! Nothing in here talks to the network or the disk. These are the shapes
//! passed between the blob store, the metadata store and the coordinator.

mod chapter;
mod ids;
mod manga;

pub use crate::chapter::{ChapterMetadata, ChapterRecord};
pub use crate::ids::{ChapterId, MangaId};
pub use crate::manga::MangaRecord;
