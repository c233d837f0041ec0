use crate::cli::UpdateArgs;
use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::{IssueError, Result};
use crate::model::Priority;
use crate::output::OutputContext;
use crate::service::IssuePatch;

/// Build the patch: `--patch` JSON first, then the individual flags on top.
///
/// # Errors
///
/// `Validation` for malformed JSON, an unknown priority, or an empty patch.
pub fn patch_from_args(args: &UpdateArgs) -> Result<IssuePatch> {
    let mut patch = match &args.patch {
        Some(raw) => serde_json::from_str::<IssuePatch>(raw)
            .map_err(|err| IssueError::validation("patch", err.to_string()))?,
        None => IssuePatch::default(),
    };
    if let Some(name) = &args.name {
        patch.name = Some(name.clone());
    }
    if let Some(description) = &args.description {
        patch.description_html = Some(Some(description.clone()));
    }
    if let Some(state) = args.state {
        patch.state_id = Some(Some(state));
    }
    if let Some(priority) = &args.priority {
        patch.priority = Some(Some(priority.parse::<Priority>()?));
    }
    if patch.is_empty() {
        return Err(IssueError::validation("patch", "nothing to update"));
    }
    Ok(patch)
}

/// Execute the update command.
///
/// # Errors
///
/// `Forbidden`, `IssueNotFound` or `ValidationErrors` from the service.
pub fn execute(args: &UpdateArgs, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let patch = patch_from_args(args)?;
    let mut ws = Workspace::open(cli)?;
    ws.service.update_issue(&ws.ctx, args.id, patch)?;
    out.emit(&serde_json::json!({ "updated": args.id }), || {
        format!("Updated {}", args.id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn flags_override_json() {
        let args = UpdateArgs {
            id: Uuid::nil(),
            patch: Some(r#"{"name": "from json", "cycle_id": null}"#.into()),
            name: Some("from flag".into()),
            ..UpdateArgs::default()
        };
        let patch = patch_from_args(&args).unwrap();
        assert_eq!(patch.name.as_deref(), Some("from flag"));
        assert_eq!(patch.cycle_id, Some(None));
    }

    #[test]
    fn empty_update_is_rejected() {
        let args = UpdateArgs {
            id: Uuid::nil(),
            ..UpdateArgs::default()
        };
        assert!(matches!(
            patch_from_args(&args),
            Err(IssueError::Validation { .. })
        ));
    }
}
