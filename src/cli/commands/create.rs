use crate::cli::CreateArgs;
use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::model::Priority;
use crate::output::{OutputContext, issue_line};
use crate::service::IssueCreate;
use crate::util::time::parse_date;

/// Build the create payload from command-line arguments.
///
/// # Errors
///
/// `Validation` for an unknown priority or a malformed date.
pub fn payload_from_args(args: &CreateArgs) -> Result<IssueCreate> {
    Ok(IssueCreate {
        name: args.name.clone(),
        description_html: args.description.clone(),
        state_id: args.state,
        priority: args
            .priority
            .as_deref()
            .map(str::parse::<Priority>)
            .transpose()?
            .unwrap_or_default(),
        sort_order: None,
        start_date: args
            .start
            .as_deref()
            .map(|raw| parse_date(raw, "start_date"))
            .transpose()?,
        target_date: args
            .target
            .as_deref()
            .map(|raw| parse_date(raw, "target_date"))
            .transpose()?,
        parent_id: args.parent,
        cycle_id: args.cycle,
        label_ids: args.labels.iter().copied().collect(),
        assignee_ids: args.assignees.iter().copied().collect(),
        module_ids: args.modules.iter().copied().collect(),
        is_draft: args.draft,
    })
}

/// Execute the create command.
///
/// # Errors
///
/// `Forbidden` or `ValidationErrors` from the service.
pub fn execute(args: &CreateArgs, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let payload = payload_from_args(args)?;
    let mut ws = Workspace::open(cli)?;
    let issue = ws.service.create_issue(&ws.ctx, payload)?;
    out.emit(&issue, || format!("Created {}", issue_line(&issue)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn args_map_onto_the_payload() {
        let label = Uuid::now_v7();
        let args = CreateArgs {
            name: "Write docs".into(),
            priority: Some("High".into()),
            target: Some("2025-03-01".into()),
            labels: vec![label, label],
            ..CreateArgs::default()
        };
        let payload = payload_from_args(&args).unwrap();
        assert_eq!(payload.priority, Priority::High);
        assert_eq!(payload.target_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(payload.label_ids.len(), 1);
    }

    #[test]
    fn bad_priority_is_rejected_before_opening_anything() {
        let args = CreateArgs {
            name: "x".into(),
            priority: Some("p0".into()),
            ..CreateArgs::default()
        };
        assert!(payload_from_args(&args).is_err());
    }
}
