//! newsvec - news vector similarity search
//!
//! Maintains an approximate-nearest-neighbor index over news-article embeddings,
//! supports incremental insertion with write-through persistence, migrates a
//! flat exact index to a clustered one, and serves similarity queries used to
//! find historically comparable news.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod migration;
pub mod runtime;
pub mod search;
pub mod store;

pub use error::{NewsvecError, Result};
