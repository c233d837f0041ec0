//! Response shapes for `workitems`.
//!
//! Stored issues carry UTC timestamps. The views here are what callers see:
//! audit timestamps shifted into the viewer's timezone, the description only
//! when asked for, and the detail view with its sub-resources.

use chrono::{DateTime, FixedOffset, NaiveDate};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::model::{Issue, IssueAttachment, IssueLink, IssueReaction, Priority, StateGroup};
use crate::util::time::{UserTimezone, to_user_timezone};

/// An issue as returned by list, retrieve and sync.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct IssueView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub sequence_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_html: Option<String>,
    pub state_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_group: Option<StateGroup>,
    pub priority: Priority,
    pub sort_order: f64,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<FixedOffset>>,
    pub parent_id: Option<Uuid>,
    pub cycle_id: Option<Uuid>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub archived_at: Option<DateTime<FixedOffset>>,
    pub is_draft: bool,
    pub label_ids: BTreeSet<Uuid>,
    pub assignee_ids: BTreeSet<Uuid>,
    pub module_ids: BTreeSet<Uuid>,
    pub sub_issues_count: u32,
    pub link_count: u32,
    pub attachment_count: u32,
}

impl IssueView {
    /// Render `issue` for a viewer in `tz`.
    #[must_use]
    pub fn new(issue: Issue, tz: UserTimezone, include_description: bool) -> Self {
        let shift = |dt| to_user_timezone(&dt, tz);
        Self {
            id: issue.id,
            project_id: issue.project_id,
            sequence_id: issue.sequence_id,
            name: issue.name,
            description_html: issue.description_html.filter(|_| include_description),
            state_id: issue.state_id,
            state_group: issue.state_group,
            priority: issue.priority,
            sort_order: issue.sort_order,
            start_date: issue.start_date,
            target_date: issue.target_date,
            completed_at: issue.completed_at.map(shift),
            parent_id: issue.parent_id,
            cycle_id: issue.cycle_id,
            created_at: shift(issue.created_at),
            updated_at: shift(issue.updated_at),
            created_by: issue.created_by,
            updated_by: issue.updated_by,
            archived_at: issue.archived_at.map(shift),
            is_draft: issue.is_draft,
            label_ids: issue.label_ids,
            assignee_ids: issue.assignee_ids,
            module_ids: issue.module_ids,
            sub_issues_count: issue.sub_issues_count,
            link_count: issue.link_count,
            attachment_count: issue.attachment_count,
        }
    }
}

/// A single issue with its sub-resources.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: IssueView,
    pub links: Vec<IssueLink>,
    pub attachments: Vec<IssueAttachment>,
    pub reactions: Vec<IssueReaction>,
    pub is_subscribed: bool,
}
