use crate::cli::SyncArgs;
use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::output::{OutputContext, render_page};
use crate::service::SyncRequest;
use crate::util::time::parse_flexible_timestamp;

/// Execute the sync command: one page of the update-ordered export.
///
/// # Errors
///
/// `Validation` for a malformed `--since`, `InvalidCursor` for a bad cursor.
pub fn execute(args: &SyncArgs, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let updated_since = args
        .since
        .as_deref()
        .map(|raw| parse_flexible_timestamp(raw, "since"))
        .transpose()?;
    let ws = Workspace::open(cli)?;
    let request = SyncRequest {
        cursor: args.cursor.clone(),
        updated_since,
        include_description: args.description,
        per_page: args.per_page,
    };
    let page = ws.service.list_paginated_sync(&ws.ctx, &request)?;
    out.emit(&page, || render_page(&page))
}
