//! # topicstore
//!
//! A Topic Maps engine: a store of typed, interlinked constructs (topics, associations, roles,
//! names, occurrences, variants) whose identity follows explicit identifier equivalence rules
//! instead of storage location.
//!
//! ## Overview
//!
//! Clients mutate a topic map through a typed API. The engine detects when two constructs denote
//! the same thing and merges them, cascading the merge through every construct that referenced
//! either of them. Merging is never a separate step: it falls out of ordinary mutation.
//!
//! ### Key Features
//!
//! - **Identity resolution**: topics sharing an item identifier, subject identifier or subject
//!   locator merge; names, occurrences, variants, roles and associations with the same defining
//!   key never coexist
//! - **Forwarding tombstones**: ids of merged-away constructs keep resolving to the survivor
//! - **Duplicate association suppression**: merging topics merges the associations that became
//!   duplicates through it
//! - **All-or-nothing calls**: every mutating call is computed in a staging overlay; a failing
//!   call leaves graph, cache and store as they were
//! - **Optimistic concurrency**: revision-checked writes with retryable conflicts
//! - **Pluggable backing store**: in-memory, or SQLite with the `service` feature
//!
//! ## Architecture
//!
//! - **[`topicmap`]**: the per-topic-map context: cache, candidate lookup, merge engine,
//!   consistency monitor and the typed API
//! - **[`store`]**: the [`store::DocumentStore`] client trait and its implementations
//! - **[`construct`]** / **[`document`]**: in-memory constructs and their flat store records
//! - **[`index`]**: type-instance, scope and literal views
//! - **[`system`]**: creating, opening and removing topic maps
//! - **[`config`]**: TOML configuration and feature switches
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use topicstore::{
//!     config::StoreConfig, properties::Locator, store::MemoryStore, system::TopicMapSystem,
//! };
//!
//! # fn main() -> Result<(), topicstore::TopicStoreError> {
//! let system = TopicMapSystem::new(Arc::new(MemoryStore::new()), StoreConfig::default())?;
//! let mut tm = system.create_topic_map(&Locator::parse("http://example.org/map")?)?;
//!
//! let puccini = Locator::parse("http://en.wikipedia.org/wiki/Puccini")?;
//! let a = tm.create_topic_by_subject_identifier(&puccini)?;
//! let b = tm.create_topic()?;
//! tm.create_name(b, None, "Giacomo Puccini", &[])?;
//!
//! // b now claims the same subject as a: the two topics merge.
//! let survivor = tm.add_subject_identifier(b, &puccini)?;
//! assert_eq!(survivor, a);
//! assert_eq!(tm.resolve(b)?, a);
//! assert_eq!(tm.names_of(a)?.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: engine, in-memory store
//! - **service**: SQLite backing store (`sqlx`)
//! - **bin**: the `tmstore` command line tool

pub mod config;
pub mod construct;
pub mod document;
pub mod error;
pub mod event;
pub mod index;
pub mod properties;
pub mod store;
pub mod system;
pub mod topicmap;

pub use error::*;
