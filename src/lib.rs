//! `workitems`: a project issue engine over a SQLite store.
//!
//! The listing engine in [`query`] compiles filter parameters, orders,
//! groups and paginates issues; [`service`] wraps it with access control,
//! validation and side effects; the `wi` binary exposes it on the command
//! line.

pub mod access;
pub mod cli;
pub mod config;
pub mod effects;
pub mod error;
pub mod format;
pub mod logging;
pub mod model;
pub mod output;
pub mod query;
pub mod service;
pub mod storage;
pub mod util;
pub mod validation;

pub use error::{ErrorCode, IssueError, Result, StructuredError};
