use crate::cli::PropsCommands;
use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::{IssueError, Result};
use crate::model::{UserProperties, UserPropertiesPatch};
use crate::output::OutputContext;

/// Execute a props subcommand.
///
/// # Errors
///
/// `Forbidden` for non-members, `Validation` for a malformed patch.
pub fn execute(command: &PropsCommands, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    let props = match command {
        PropsCommands::Get => ws.service.get_user_properties(&ws.ctx)?,
        PropsCommands::Set { patch } => {
            let patch: UserPropertiesPatch = serde_json::from_str(patch)
                .map_err(|err| IssueError::validation("patch", err.to_string()))?;
            ws.service.set_user_properties(&ws.ctx, patch)?
        }
    };
    out.emit(&props, || render(&props))
}

fn render(props: &UserProperties) -> String {
    let filters = &props.display_filters;
    format!(
        "layout: {}\norder_by: {}\ngroup_by: {}\nsub_group_by: {}\nfilters: {}",
        filters.layout,
        filters.order_by,
        filters.group_by.as_deref().unwrap_or("-"),
        filters.sub_group_by.as_deref().unwrap_or("-"),
        props.filters
    )
}
