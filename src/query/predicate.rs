//! Composable filter predicates over issues.
//!
//! A [`Predicate`] is a plain value tree. It can be evaluated in memory with
//! [`Predicate::matches`] or handed to the store, which translates it to SQL.
//! Both readings must agree; in particular a missing scalar never equals
//! anything, and a multi-valued field with no values is "null".

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::model::{Issue, Priority, StateGroup};

/// An issue attribute a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Project,
    State,
    StateGroup,
    Priority,
    Parent,
    Cycle,
    CreatedBy,
    Labels,
    Assignees,
    Modules,
    Subscribers,
    Name,
    StartDate,
    TargetDate,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
    ArchivedAt,
    IsDraft,
}

impl Field {
    /// Fields holding a set of ids rather than a single value.
    #[must_use]
    pub const fn is_multi_valued(self) -> bool {
        matches!(
            self,
            Self::Labels | Self::Assignees | Self::Modules | Self::Subscribers
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Project => "project_id",
            Self::State => "state_id",
            Self::StateGroup => "state__group",
            Self::Priority => "priority",
            Self::Parent => "parent_id",
            Self::Cycle => "cycle_id",
            Self::CreatedBy => "created_by",
            Self::Labels => "labels",
            Self::Assignees => "assignees",
            Self::Modules => "modules",
            Self::Subscribers => "subscribers",
            Self::Name => "name",
            Self::StartDate => "start_date",
            Self::TargetDate => "target_date",
            Self::CompletedAt => "completed_at",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::ArchivedAt => "archived_at",
            Self::IsDraft => "is_draft",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed comparison operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Value {
    Uuid(Uuid),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Priority(Priority),
    StateGroup(StateGroup),
}

/// Filter predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    True,
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { inner: Box<Predicate> },
    FieldEquals { field: Field, value: Value },
    /// For multi-valued fields: the sets overlap.
    FieldInSet { field: Field, values: BTreeSet<Value> },
    /// Inclusive bounds; a missing value never falls in range.
    FieldRange {
        field: Field,
        lower: Option<Value>,
        upper: Option<Value>,
    },
    /// For multi-valued fields: the set is empty.
    FieldIsNull { field: Field },
    /// Case-insensitive (ASCII) substring test on a text field.
    FieldContains { field: Field, needle: String },
}

impl Predicate {
    /// Conjunction that drops `True` terms and flattens nested `And`s.
    #[must_use]
    pub fn and(parts: impl IntoIterator<Item = Self>) -> Self {
        let mut all = Vec::new();
        for part in parts {
            match part {
                Self::True => {}
                Self::And { all: nested } => all.extend(nested),
                other => all.push(other),
            }
        }
        match all.len() {
            0 => Self::True,
            1 => all.pop().unwrap_or(Self::True),
            _ => Self::And { all },
        }
    }

    /// Disjunction; a single term is returned as-is.
    #[must_use]
    pub fn or(parts: impl IntoIterator<Item = Self>) -> Self {
        let mut any: Vec<Self> = parts.into_iter().collect();
        if any.len() == 1 {
            return any.pop().unwrap_or(Self::True);
        }
        Self::Or { any }
    }

    #[must_use]
    pub fn negate(inner: Self) -> Self {
        Self::Not {
            inner: Box::new(inner),
        }
    }

    #[must_use]
    pub const fn equals(field: Field, value: Value) -> Self {
        Self::FieldEquals { field, value }
    }

    #[must_use]
    pub const fn is_null(field: Field) -> Self {
        Self::FieldIsNull { field }
    }

    #[must_use]
    pub const fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }

    /// Evaluate against one issue.
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        match self {
            Self::True => true,
            Self::And { all } => all.iter().all(|p| p.matches(issue)),
            Self::Or { any } => any.iter().any(|p| p.matches(issue)),
            Self::Not { inner } => !inner.matches(issue),
            Self::FieldEquals { field, value } => match multi_values(issue, *field) {
                Some(set) => matches!(value, Value::Uuid(id) if set.contains(id)),
                None => scalar_value(issue, *field).as_ref() == Some(value),
            },
            Self::FieldInSet { field, values } => match multi_values(issue, *field) {
                Some(set) => set.iter().any(|id| values.contains(&Value::Uuid(*id))),
                None => scalar_value(issue, *field).is_some_and(|v| values.contains(&v)),
            },
            Self::FieldRange {
                field,
                lower,
                upper,
            } => {
                if field.is_multi_valued() {
                    return false;
                }
                scalar_value(issue, *field).is_some_and(|v| {
                    lower.as_ref().is_none_or(|lo| &v >= lo)
                        && upper.as_ref().is_none_or(|hi| &v <= hi)
                })
            }
            Self::FieldIsNull { field } => match multi_values(issue, *field) {
                Some(set) => set.is_empty(),
                None => scalar_value(issue, *field).is_none(),
            },
            Self::FieldContains { field, needle } => match scalar_value(issue, *field) {
                Some(Value::Text(text)) => text
                    .to_ascii_lowercase()
                    .contains(&needle.to_ascii_lowercase()),
                _ => false,
            },
        }
    }
}

fn multi_values(issue: &Issue, field: Field) -> Option<&BTreeSet<Uuid>> {
    match field {
        Field::Labels => Some(&issue.label_ids),
        Field::Assignees => Some(&issue.assignee_ids),
        Field::Modules => Some(&issue.module_ids),
        Field::Subscribers => Some(&issue.subscriber_ids),
        _ => None,
    }
}

/// The scalar value of `field`, or `None` when unset or multi-valued.
#[must_use]
pub fn scalar_value(issue: &Issue, field: Field) -> Option<Value> {
    match field {
        Field::Id => Some(Value::Uuid(issue.id)),
        Field::Project => Some(Value::Uuid(issue.project_id)),
        Field::State => issue.state_id.map(Value::Uuid),
        Field::StateGroup => issue.state_group.map(Value::StateGroup),
        Field::Priority => Some(Value::Priority(issue.priority)),
        Field::Parent => issue.parent_id.map(Value::Uuid),
        Field::Cycle => issue.cycle_id.map(Value::Uuid),
        Field::CreatedBy => issue.created_by.map(Value::Uuid),
        Field::Name => Some(Value::Text(issue.name.clone())),
        Field::StartDate => issue.start_date.map(Value::Date),
        Field::TargetDate => issue.target_date.map(Value::Date),
        Field::CompletedAt => issue.completed_at.map(Value::Timestamp),
        Field::CreatedAt => Some(Value::Timestamp(issue.created_at)),
        Field::UpdatedAt => Some(Value::Timestamp(issue.updated_at)),
        Field::ArchivedAt => issue.archived_at.map(Value::Timestamp),
        Field::IsDraft => Some(Value::Bool(issue.is_draft)),
        Field::Labels | Field::Assignees | Field::Modules | Field::Subscribers => None,
    }
}
