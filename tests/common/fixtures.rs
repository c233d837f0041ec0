#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use uuid::Uuid;
use workitems::model::{Issue, Priority, State};

/// Builds issues with deterministic timestamps for engine tests.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new(project_id: Uuid, sequence_id: i64) -> Self {
        let base_time = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let stamp = base_time + Duration::minutes(sequence_id);
        let mut issue = Issue::new(project_id, sequence_id, format!("Issue {sequence_id}"));
        issue.id = Uuid::from_u128(u128::try_from(sequence_id).unwrap_or_default());
        issue.created_at = stamp;
        issue.updated_at = stamp;
        Self { issue }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.issue.name = name.to_string();
        self
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.issue.id = id;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn state(mut self, state: &State) -> Self {
        self.issue.state_id = Some(state.id);
        self.issue.state_group = Some(state.group);
        self
    }

    pub fn labels(mut self, labels: &[Uuid]) -> Self {
        self.issue.label_ids = labels.iter().copied().collect();
        self
    }

    pub fn assignees(mut self, assignees: &[Uuid]) -> Self {
        self.issue.assignee_ids = assignees.iter().copied().collect();
        self
    }

    pub fn created_by(mut self, user: Uuid) -> Self {
        self.issue.created_by = Some(user);
        self
    }

    pub fn target_date(mut self, date: NaiveDate) -> Self {
        self.issue.target_date = Some(date);
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.issue.updated_at = at;
        self
    }

    pub fn draft(mut self) -> Self {
        self.issue.is_draft = true;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.issue.deleted_at = Some(self.issue.updated_at);
        self
    }

    pub fn build(self) -> Issue {
        self.issue
    }
}

/// Five issues: two labelled `a`, one labelled `b`, two unlabelled.
pub fn labelled_five(project_id: Uuid, a: Uuid, b: Uuid) -> Vec<Issue> {
    vec![
        IssueBuilder::new(project_id, 1).labels(&[a]).build(),
        IssueBuilder::new(project_id, 2).labels(&[a]).build(),
        IssueBuilder::new(project_id, 3).labels(&[b]).build(),
        IssueBuilder::new(project_id, 4).build(),
        IssueBuilder::new(project_id, 5).build(),
    ]
}
