//! Core data types for `workitems`.
//!
//! This module defines the records the engine reads and writes:
//! - `Issue` - The core work item, with its annotation fields
//! - `Priority` / `StateGroup` - Ranked enums used by ordering and grouping
//! - `Project`, `State`, `Label`, `Module`, `Cycle` - Project catalog
//! - `ProjectMember` / `Role` - Membership used by access checks
//! - `IssueLink`, `IssueAttachment`, `IssueReaction` - Detail sub-resources
//! - `ActivityEvent` / `Visit` - Side-effect payloads

mod properties;

pub use properties::{DisplayFilters, DisplayProperties, UserProperties, UserPropertiesPatch};

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IssueError;

/// Default `sort_order` for new issues.
pub const DEFAULT_SORT_ORDER: f64 = 65535.0;

/// Maximum issue name length, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Issue priority. Declaration order is rank order (urgent first).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Priority {
    /// All priorities, most urgent first.
    pub const ALL: [Self; 5] = [Self::Urgent, Self::High, Self::Medium, Self::Low, Self::None];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }

    /// Sort rank: urgent=0 through none=4.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::None => 4,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "none" | "null" => Ok(Self::None),
            other => Err(IssueError::validation(
                "priority",
                format!("'{other}' is not a valid priority"),
            )),
        }
    }
}

/// The workflow category a state belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum StateGroup {
    Backlog,
    Unstarted,
    Started,
    Completed,
    Cancelled,
}

impl StateGroup {
    /// All groups in workflow order.
    pub const ALL: [Self; 5] = [
        Self::Backlog,
        Self::Unstarted,
        Self::Started,
        Self::Completed,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Unstarted => "unstarted",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Sort rank: backlog=0 through cancelled=4.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Backlog => 0,
            Self::Unstarted => 1,
            Self::Started => 2,
            Self::Completed => 3,
            Self::Cancelled => 4,
        }
    }
}

impl fmt::Display for StateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateGroup {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backlog" => Ok(Self::Backlog),
            "unstarted" => Ok(Self::Unstarted),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(IssueError::validation(
                "state_group",
                format!("'{other}' is not a valid state group"),
            )),
        }
    }
}

/// Project membership role. The numeric values are stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
    Viewer,
    Guest,
}

impl Role {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Admin => 20,
            Self::Member => 15,
            Self::Viewer => 10,
            Self::Guest => 5,
        }
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            20 => Some(Self::Admin),
            15 => Some(Self::Member),
            10 => Some(Self::Viewer),
            5 => Some(Self::Guest),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
            Self::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "viewer" => Ok(Self::Viewer),
            "guest" => Ok(Self::Guest),
            other => other
                .parse::<i64>()
                .ok()
                .and_then(Self::from_i64)
                .ok_or_else(|| {
                    IssueError::validation("role", format!("'{other}' is not a valid role"))
                }),
        }
    }
}

/// A work item.
///
/// The fields after `is_draft` are annotations: they are not stored on the
/// issue row and are filled in by the annotator after a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Issue {
    pub id: Uuid,
    pub project_id: Uuid,
    pub sequence_id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_html: Option<String>,
    pub state_id: Option<Uuid>,
    /// Derived from the referenced state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_group: Option<StateGroup>,
    pub priority: Priority,
    pub sort_order: f64,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_id: Option<Uuid>,
    pub cycle_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub archived_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_draft: bool,

    #[serde(default)]
    pub label_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub assignee_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub module_ids: BTreeSet<Uuid>,
    #[serde(default, skip_serializing)]
    pub subscriber_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub sub_issues_count: u32,
    #[serde(default)]
    pub link_count: u32,
    #[serde(default)]
    pub attachment_count: u32,
}

impl Issue {
    /// A fresh, unannotated issue with default fields.
    #[must_use]
    pub fn new(project_id: Uuid, sequence_id: i64, name: impl Into<String>) -> Self {
        let now = crate::util::time::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            sequence_id,
            name: name.into(),
            description_html: None,
            state_id: None,
            state_group: None,
            priority: Priority::None,
            sort_order: DEFAULT_SORT_ORDER,
            start_date: None,
            target_date: None,
            completed_at: None,
            parent_id: None,
            cycle_id: None,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
            archived_at: None,
            deleted_at: None,
            is_draft: false,
            label_ids: BTreeSet::new(),
            assignee_ids: BTreeSet::new(),
            module_ids: BTreeSet::new(),
            subscriber_ids: BTreeSet::new(),
            sub_issues_count: 0,
            link_count: 0,
            attachment_count: 0,
        }
    }

    /// Live means not soft-deleted.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub identifier: String,
    pub default_assignee_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct State {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub group: StateGroup,
    pub sequence: i64,
}

impl State {
    /// The workflow a new project starts with, one state per group.
    #[must_use]
    pub fn defaults_for(project_id: Uuid) -> Vec<Self> {
        [
            ("Backlog", StateGroup::Backlog),
            ("Todo", StateGroup::Unstarted),
            ("In Progress", StateGroup::Started),
            ("Done", StateGroup::Completed),
            ("Cancelled", StateGroup::Cancelled),
        ]
        .into_iter()
        .zip(1_i64..)
        .map(|((name, group), sequence)| Self {
            id: Uuid::now_v7(),
            project_id,
            name: name.to_string(),
            group,
            sequence: sequence * 1000,
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Label {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Module {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Cycle {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub member_id: Uuid,
    pub role: Role,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IssueLink {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IssueAttachment {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub asset: String,
    pub size: i64,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IssueReaction {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub actor_id: Uuid,
    pub reaction: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of activity recorded for an issue mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Created,
    Updated,
    Deleted,
}

impl ActivityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "issue.activity.created",
            Self::Updated => "issue.activity.updated",
            Self::Deleted => "issue.activity.deleted",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue.activity.created" => Ok(Self::Created),
            "issue.activity.updated" => Ok(Self::Updated),
            "issue.activity.deleted" => Ok(Self::Deleted),
            other => Err(IssueError::validation(
                "activity_kind",
                format!("'{other}' is not a known activity"),
            )),
        }
    }
}

impl Serialize for ActivityKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Payload handed to the activity sink after a mutation commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub issue_id: Uuid,
    pub project_id: Uuid,
    pub actor_id: Uuid,
    /// What the caller asked for, as JSON.
    pub requested_data: Option<serde_json::Value>,
    /// The issue as it was before the mutation, as JSON.
    pub current_instance: Option<serde_json::Value>,
    /// Unix epoch seconds at the time of the mutation.
    pub epoch: i64,
}

/// What a recorded visit points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitEntity {
    Project,
    Issue,
}

impl VisitEntity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Issue => "issue",
        }
    }
}

/// A recently-visited record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub entity: VisitEntity,
    pub entity_id: Uuid,
    pub visited_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_states_cover_every_group() {
        let states = State::defaults_for(Uuid::nil());
        let groups: Vec<StateGroup> = states.iter().map(|s| s.group).collect();
        assert_eq!(groups, StateGroup::ALL);
        assert!(states.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn priority_rank_matches_declaration_order() {
        let mut sorted = Priority::ALL;
        sorted.sort();
        assert_eq!(sorted, Priority::ALL);
        assert_eq!(Priority::Urgent.rank(), 0);
        assert_eq!(Priority::None.rank(), 4);
    }

    #[test]
    fn priority_parse_is_case_insensitive() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" none ".parse::<Priority>().unwrap(), Priority::None);
        let err = "critical".parse::<Priority>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: priority: 'critical' is not a valid priority"
        );
    }

    #[test]
    fn state_group_round_trips_through_str() {
        for group in StateGroup::ALL {
            assert_eq!(group.as_str().parse::<StateGroup>().unwrap(), group);
        }
        assert!("done".parse::<StateGroup>().is_err());
    }

    #[test]
    fn role_accepts_names_and_numbers() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("5".parse::<Role>().unwrap(), Role::Guest);
        assert!("7".parse::<Role>().is_err());
        assert_eq!(Role::Member.as_i64(), 15);
    }

    #[test]
    fn activity_kind_serializes_as_dotted_name() {
        let json = serde_json::to_string(&ActivityKind::Updated).unwrap();
        assert_eq!(json, "\"issue.activity.updated\"");
        let back: ActivityKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActivityKind::Updated);
    }

    #[test]
    fn new_issue_has_product_defaults() {
        let issue = Issue::new(Uuid::nil(), 1, "First");
        assert_eq!(issue.priority, Priority::None);
        assert!((issue.sort_order - DEFAULT_SORT_ORDER).abs() < f64::EPSILON);
        assert!(issue.is_live());
        assert!(issue.label_ids.is_empty());
    }
}
