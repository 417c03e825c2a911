//! Per-topic-map engine.
//!
//! A [TopicMap] is the explicit context every operation runs against: the backing store handle,
//! the construct cache of this topic map, its configuration and an optional subscriber channel.
//!
//! # Module Organization
//!
//! - [`cache`]: identity map by id and by identifier, tombstones, eviction
//! - `txn`: staging overlay a mutating call works in until commit
//! - `lookup`: candidate lookup by defining key or identifier
//! - `merge`: the merge engine and duplicate association suppression
//! - `monitor`: the consistency monitor reacting to mutation events
//! - `base`: [TopicMap] itself, reads and diagnostics
//! - `api`: typed creation, mutation and removal operations

pub mod cache;

mod api;
mod base;
mod lookup;
mod merge;
mod monitor;
mod txn;

#[cfg(test)]
mod tests;

pub use base::TopicMap;
pub use cache::ConstructCache;
