//! Chapter download & cache coordination.
//!
//! The [`Coordinator`] downloads chapters page by page into the blob store
//! and commits them to the metadata store, publishing a [`DownloadState`]
//! stream per chapter. A chapter is either fully cached (record and every
//! page present) or not cached at all; partial downloads are rolled back.
//!
//! The [`MemoryIndex`] answers "which chapters of this manga are cached?"
//! synchronously and is rebuilt from the metadata store with
//! [`Coordinator::reconcile`].

mod coordinator;
pub mod error;
mod index;
mod read;
mod reconcile;
mod retry;
mod state;
mod sweep;
#[cfg(test)]
mod testing;

pub use crate::coordinator::{Coordinator, Options};
pub use crate::index::MemoryIndex;
pub use crate::retry::RetryPolicy;
pub use crate::state::{DownloadState, FailureReason};
pub use crate::sweep::SweepEvent;
pub use tankobon_config::NetworkPolicy;
