//! Issue sub-resources: links, attachments, reactions and subscriptions.

use serde_json::json;
use uuid::Uuid;

use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::output::OutputContext;

/// # Errors
///
/// `Forbidden`, `IssueNotFound` or `Validation` from the service.
pub fn link(
    id: Uuid,
    url: &str,
    title: Option<String>,
    cli: &CliOverrides,
    out: &OutputContext,
) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    let link = ws.service.add_link(&ws.ctx, id, url, title)?;
    out.emit(&link, || format!("Linked {} to {id}", link.url))
}

/// # Errors
///
/// `Forbidden`, `IssueNotFound` or `Validation` from the service.
pub fn attach(id: Uuid, asset: &str, size: i64, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    let attachment = ws.service.add_attachment(&ws.ctx, id, asset, size)?;
    out.emit(&attachment, || format!("Attached {} to {id}", attachment.asset))
}

/// # Errors
///
/// `Forbidden`, `IssueNotFound` or `Validation` from the service.
pub fn react(id: Uuid, reaction: &str, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    let added = ws.service.add_reaction(&ws.ctx, id, reaction)?;
    out.emit(&json!({ "issue_id": id, "reaction": reaction, "added": added }), || {
        if added {
            format!("Reacted {reaction} to {id}")
        } else {
            format!("Already reacted {reaction} to {id}")
        }
    })
}

/// # Errors
///
/// `Forbidden` or `IssueNotFound` from the service.
pub fn subscribe(id: Uuid, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    let added = ws.service.subscribe(&ws.ctx, id)?;
    out.emit(&json!({ "issue_id": id, "subscribed": true, "added": added }), || {
        format!("Subscribed to {id}")
    })
}
