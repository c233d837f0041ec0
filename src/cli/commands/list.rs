use std::fmt::Write as _;

use crate::cli::ListArgs;
use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::{IssueError, Result};
use crate::output::{OutputContext, issue_line, render_page};
use crate::query::FilterParams;
use crate::service::{ListRequest, Listing};

/// Parse repeated `key=value` arguments. A repeated key keeps the last value.
///
/// # Errors
///
/// `Validation` for an argument without `=` or with an empty key.
pub fn parse_filters(raw: &[String]) -> Result<FilterParams> {
    let mut params = FilterParams::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            return Err(IssueError::validation(
                "filter",
                format!("expected KEY=VALUE, got '{item}'"),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(IssueError::validation("filter", "empty filter key"));
        }
        params.insert(key.to_string(), value.trim().to_string());
    }
    Ok(params)
}

/// Execute the list command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be opened or the listing fails.
pub fn execute(args: &ListArgs, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let ws = Workspace::open(cli)?;
    let mut params = parse_filters(&args.filters)?;
    let by_ids = args.ids.is_some();
    if let Some(ids) = &args.ids {
        params.insert("issues".to_string(), ids.clone());
    }
    let request = ListRequest {
        params,
        order_by: args.order_by.clone(),
        group_by: args.group_by.clone(),
        sub_group_by: args.sub_group_by.clone(),
        cursor: args.cursor.clone(),
        per_page: args.per_page,
    };

    if by_ids {
        let listing = ws.service.list_issues_by_ids(&ws.ctx, &request)?;
        return out.emit(&listing, || render_listing(&listing));
    }

    let page = ws.service.list_issues(&ws.ctx, &request)?;
    out.emit(&page, || render_page(&page))
}

fn render_listing(listing: &Listing) -> String {
    let mut text = String::new();
    match listing {
        Listing::Flat(items) => {
            for issue in items {
                let _ = writeln!(text, "{}", issue_line(issue));
            }
        }
        Listing::Grouped(groups) => {
            for (key, items) in groups.iter() {
                let _ = writeln!(text, "{key} ({})", items.len());
                for issue in items {
                    let _ = writeln!(text, "  {}", issue_line(issue));
                }
            }
        }
        Listing::SubGrouped(groups) => {
            for (key, subs) in groups.iter() {
                let _ = writeln!(text, "{key}");
                for (sub_key, items) in subs.iter() {
                    let _ = writeln!(text, "  {sub_key} ({})", items.len());
                    for issue in items {
                        let _ = writeln!(text, "    {}", issue_line(issue));
                    }
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_split_on_first_equals() {
        let params = parse_filters(&[
            "priority=high,urgent".to_string(),
            "name= a=b ".to_string(),
        ])
        .unwrap();
        assert_eq!(params["priority"], "high,urgent");
        assert_eq!(params["name"], "a=b");
    }

    #[test]
    fn filters_without_equals_are_rejected() {
        let err = parse_filters(&["priority".to_string()]).unwrap_err();
        assert!(matches!(err, IssueError::Validation { .. }));
        assert!(parse_filters(&["=x".to_string()]).is_err());
    }
}
