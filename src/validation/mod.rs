//! Validation helpers for `workitems`.
//!
//! These routines check an issue against its project's catalog and return
//! structured validation errors without mutating storage.

use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{IssueError, Result, ValidationError};
use crate::model::{Issue, MAX_NAME_LEN, State};

/// Storage-facing lookups the issue validator needs.
pub trait ProjectCatalog {
    /// The state, if it belongs to `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn project_state(&self, project_id: Uuid, state_id: Uuid) -> Result<Option<State>>;

    /// Ids among `ids` that are labels of `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn known_labels(&self, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Ids among `ids` that are non-archived modules of `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn known_modules(&self, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Ids among `ids` that are active members of `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn active_members(&self, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Return true if the cycle belongs to `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn cycle_exists(&self, project_id: Uuid, cycle_id: Uuid) -> Result<bool>;

    /// The parent of a live issue in `project_id`: `None` when the issue is
    /// not there, `Some(None)` when it has no parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn parent_of(&self, project_id: Uuid, issue_id: Uuid) -> Result<Option<Option<Uuid>>>;
}

/// Deepest parent chain walked when looking for a cycle.
const MAX_PARENT_DEPTH: usize = 256;

/// Validates issue fields and references.
pub struct IssueValidator;

impl IssueValidator {
    /// Field rules that need no storage.
    ///
    /// # Errors
    ///
    /// Returns every violated rule.
    pub fn validate_fields(issue: &Issue) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let name_len = issue.name.trim().chars().count();
        if name_len == 0 {
            errors.push(ValidationError::new("name", "cannot be empty"));
        }
        if issue.name.chars().count() > MAX_NAME_LEN {
            errors.push(ValidationError::new(
                "name",
                format!("exceeds {MAX_NAME_LEN} characters"),
            ));
        }

        if let (Some(start), Some(target)) = (issue.start_date, issue.target_date) {
            if start > target {
                errors.push(ValidationError::new(
                    "target_date",
                    "cannot be before start_date",
                ));
            }
        }

        if issue.parent_id == Some(issue.id) {
            errors.push(ValidationError::new("parent_id", "issue cannot be its own parent"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate an issue against its project catalog.
    ///
    /// `check_members` is false when the assignee set was not supplied by
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::ValidationErrors` listing every violated rule,
    /// or a storage error.
    pub fn validate(
        issue: &Issue,
        catalog: &(impl ProjectCatalog + ?Sized),
        check_members: bool,
    ) -> Result<()> {
        let mut errors = Self::validate_fields(issue).err().unwrap_or_default();
        let project_id = issue.project_id;

        if let Some(state_id) = issue.state_id {
            if catalog.project_state(project_id, state_id)?.is_none() {
                errors.push(ValidationError::new(
                    "state_id",
                    format!("state {state_id} does not belong to the project"),
                ));
            }
        }

        let labels: Vec<Uuid> = issue.label_ids.iter().copied().collect();
        let known = catalog.known_labels(project_id, &labels)?;
        for id in labels.iter().filter(|id| !known.contains(id)) {
            errors.push(ValidationError::new(
                "label_ids",
                format!("label {id} does not belong to the project"),
            ));
        }

        let modules: Vec<Uuid> = issue.module_ids.iter().copied().collect();
        let known = catalog.known_modules(project_id, &modules)?;
        for id in modules.iter().filter(|id| !known.contains(id)) {
            errors.push(ValidationError::new(
                "module_ids",
                format!("module {id} does not belong to the project"),
            ));
        }

        if check_members {
            let assignees: Vec<Uuid> = issue.assignee_ids.iter().copied().collect();
            let known = catalog.active_members(project_id, &assignees)?;
            for id in assignees.iter().filter(|id| !known.contains(id)) {
                errors.push(ValidationError::new(
                    "assignee_ids",
                    format!("{id} is not an active project member"),
                ));
            }
        }

        if let Some(cycle_id) = issue.cycle_id {
            if !catalog.cycle_exists(project_id, cycle_id)? {
                errors.push(ValidationError::new(
                    "cycle_id",
                    format!("cycle {cycle_id} does not belong to the project"),
                ));
            }
        }

        if let Some(parent_id) = issue.parent_id.filter(|p| *p != issue.id) {
            if let Some(reason) = Self::parent_problem(issue.id, parent_id, project_id, catalog)? {
                errors.push(ValidationError::new("parent_id", reason));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(IssueError::from_validation_errors(errors))
        }
    }

    fn parent_problem(
        issue_id: Uuid,
        parent_id: Uuid,
        project_id: Uuid,
        catalog: &(impl ProjectCatalog + ?Sized),
    ) -> Result<Option<String>> {
        let mut cursor = Some(parent_id);
        let mut depth = 0;
        while let Some(current) = cursor {
            let Some(next) = catalog.parent_of(project_id, current)? else {
                if current == parent_id {
                    return Ok(Some(format!(
                        "issue {parent_id} does not belong to the project"
                    )));
                }
                return Ok(None);
            };
            if next == Some(issue_id) {
                return Ok(Some("would create a parent cycle".to_string()));
            }
            depth += 1;
            if depth >= MAX_PARENT_DEPTH {
                break;
            }
            cursor = next;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StateGroup;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Catalog {
        states: Vec<State>,
        labels: HashSet<Uuid>,
        members: HashSet<Uuid>,
        parents: HashMap<Uuid, Option<Uuid>>,
    }

    impl ProjectCatalog for Catalog {
        fn project_state(&self, _project_id: Uuid, state_id: Uuid) -> Result<Option<State>> {
            Ok(self.states.iter().find(|s| s.id == state_id).cloned())
        }
        fn known_labels(&self, _project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
            Ok(ids.iter().filter(|id| self.labels.contains(id)).copied().collect())
        }
        fn known_modules(&self, _project_id: Uuid, _ids: &[Uuid]) -> Result<HashSet<Uuid>> {
            Ok(HashSet::new())
        }
        fn active_members(&self, _project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
            Ok(ids.iter().filter(|id| self.members.contains(id)).copied().collect())
        }
        fn cycle_exists(&self, _project_id: Uuid, _cycle_id: Uuid) -> Result<bool> {
            Ok(false)
        }
        fn parent_of(&self, _project_id: Uuid, issue_id: Uuid) -> Result<Option<Option<Uuid>>> {
            Ok(self.parents.get(&issue_id).copied())
        }
    }

    #[test]
    fn name_and_dates_are_checked() {
        let mut issue = Issue::new(Uuid::nil(), 1, "   ");
        issue.start_date = chrono::NaiveDate::from_ymd_opt(2024, 2, 1);
        issue.target_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1);
        let errors = IssueValidator::validate_fields(&issue).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "target_date"]);

        issue.name = "x".repeat(256);
        issue.target_date = None;
        assert!(IssueValidator::validate_fields(&issue).is_err());
        issue.name = "x".repeat(255);
        assert!(IssueValidator::validate_fields(&issue).is_ok());
    }

    #[test]
    fn foreign_references_are_reported_together() {
        let catalog = Catalog {
            states: vec![State {
                id: Uuid::from_u128(1),
                project_id: Uuid::nil(),
                name: "Todo".into(),
                group: StateGroup::Unstarted,
                sequence: 1,
            }],
            ..Catalog::default()
        };
        let mut issue = Issue::new(Uuid::nil(), 1, "ok");
        issue.state_id = Some(Uuid::from_u128(2));
        issue.label_ids.insert(Uuid::from_u128(3));
        issue.assignee_ids.insert(Uuid::from_u128(4));

        let err = IssueValidator::validate(&issue, &catalog, true).unwrap_err();
        let IssueError::ValidationErrors { errors } = err else {
            panic!("expected many errors");
        };
        assert_eq!(errors.len(), 3);

        // assignees not supplied are not re-checked
        issue.state_id = Some(Uuid::from_u128(1));
        issue.label_ids.clear();
        assert!(IssueValidator::validate(&issue, &catalog, false).is_ok());
    }

    #[test]
    fn parent_cycles_are_rejected() {
        let a = Uuid::from_u128(10);
        let b = Uuid::from_u128(11);
        let mut catalog = Catalog::default();
        catalog.parents.insert(b, Some(a));
        let mut issue = Issue::new(Uuid::nil(), 1, "a");
        issue.id = a;
        issue.parent_id = Some(b);
        assert!(IssueValidator::validate(&issue, &catalog, false).is_err());

        issue.parent_id = Some(Uuid::from_u128(99));
        assert!(IssueValidator::validate(&issue, &catalog, false).is_err());
    }
}
