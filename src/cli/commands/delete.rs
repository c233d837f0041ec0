use serde::Serialize;
use uuid::Uuid;

use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::output::OutputContext;

/// Result of a delete operation for JSON output.
#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub requested: usize,
    pub deleted_count: usize,
}

/// Execute the delete command.
///
/// # Errors
///
/// `Forbidden` unless admin or creator; `IssueNotFound` otherwise.
pub fn execute(id: Uuid, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    ws.service.delete_issue(&ws.ctx, id)?;
    let result = DeleteResult {
        requested: 1,
        deleted_count: 1,
    };
    out.emit(&result, || format!("Deleted {id}"))
}

/// Execute the bulk-delete command.
///
/// # Errors
///
/// `Forbidden` unless admin; `Validation` for an empty id list.
pub fn execute_bulk(ids: &[Uuid], cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    let deleted_count = ws.service.bulk_delete(&ws.ctx, ids)?;
    let result = DeleteResult {
        requested: ids.len(),
        deleted_count,
    };
    out.emit(&result, || {
        format!("Deleted {deleted_count} of {} issue(s)", ids.len())
    })
}
