//! Persistent storage for `workitems`.
//!
//! A single embedded `SQLite` database holds projects, their catalogs,
//! issues with their associations, preferences and the side-effect tables.
//! Engine predicates are rendered to SQL by [`sql`].

pub mod activity;
pub mod schema;
pub mod sql;
pub mod sqlite;

pub use sqlite::{AssociationChanges, Committed, MutationContext, SqliteStorage};
