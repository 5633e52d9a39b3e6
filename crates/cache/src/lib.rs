//! SQLite metadata store for the chapter cache.
//!
//! This crate holds the durable half of "is this chapter cached?": a record
//! per fully-downloaded chapter and a record per tracked manga. Page bytes
//! live in the blob store; a chapter row here promises that all of its pages
//! are there.
//!
//! # Architecture
//! - **Chapters**: one row per committed chapter, keyed by chapter ID, with
//!   the page count and the attributes reported by the source.
//! - **Mangas**: one row per tracked manga. Deleting a manga cascades to its
//!   chapters; a manga with no chapters and no last-read pointer is removed
//!   by the same transaction that removed its last chapter.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::repo::{ChapterPages, Deletion, Repository};
