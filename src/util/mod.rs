//! Shared utilities for `workitems`.
//!
//! - Time parsing and formatting (RFC3339, calendar dates, relative dates)
//! - User timezone conversion for display fields

pub mod time;
