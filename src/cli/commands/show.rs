use uuid::Uuid;

use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::output::{OutputContext, render_detail};

/// Execute the show command.
///
/// # Errors
///
/// `Forbidden` or `IssueNotFound` from the service.
pub fn execute(id: Uuid, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let detail = ws.service.retrieve_issue(&ws.ctx, id)?;
    out.emit(&detail, || render_detail(&detail))
}

/// Print an issue's recorded activity.
///
/// # Errors
///
/// `Forbidden` or `IssueNotFound` from the service.
pub fn activity(id: Uuid, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let events = ws.service.issue_activity(&ws.ctx, id)?;
    out.emit(&events, || {
        events
            .iter()
            .map(|event| format!("{} {} by {}", event.epoch, event.kind, event.actor_id))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
