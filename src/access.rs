//! Role checks for project-scoped operations.
//!
//! Membership is looked up through [`MembershipStore`]. Each operation
//! names the roles it admits; retrieve and delete also admit the issue's
//! creator whatever their role.

use tracing::debug;
use uuid::Uuid;

use crate::error::{IssueError, Result};
use crate::model::{ProjectMember, Role};
use crate::query::predicate::{Field, Predicate, Value};

/// Lookup of a user's membership in a project.
pub trait MembershipStore {
    /// The membership row, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage lookup fails.
    fn membership(&self, project_id: Uuid, user_id: Uuid) -> Result<Option<ProjectMember>>;
}

/// A guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    Delete,
    BulkDelete,
    Sync,
    Preferences,
    /// Change the project catalog: members, states, labels, modules, cycles.
    Manage,
}

impl Action {
    #[must_use]
    pub const fn allowed_roles(self) -> &'static [Role] {
        match self {
            Self::List | Self::Sync | Self::Preferences => {
                &[Role::Admin, Role::Member, Role::Viewer, Role::Guest]
            }
            Self::Retrieve => &[Role::Admin, Role::Member, Role::Viewer],
            Self::Create => &[Role::Admin, Role::Member],
            Self::Update => &[Role::Admin, Role::Member, Role::Guest],
            Self::Delete | Self::BulkDelete | Self::Manage => &[Role::Admin],
        }
    }

    /// Whether the issue's creator passes regardless of role.
    #[must_use]
    pub const fn creator_override(self) -> bool {
        matches!(self, Self::Retrieve | Self::Delete)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list issues",
            Self::Retrieve => "view issue",
            Self::Create => "create issue",
            Self::Update => "update issue",
            Self::Delete => "delete issue",
            Self::BulkDelete => "bulk delete issues",
            Self::Sync => "export issues",
            Self::Preferences => "manage display properties",
            Self::Manage => "manage the project",
        }
    }
}

/// True when `user_id` is an active member of `project_id` with one of
/// `allowed` roles.
///
/// # Errors
///
/// Returns an error if the membership lookup fails.
pub fn can_access(
    store: &(impl MembershipStore + ?Sized),
    user_id: Uuid,
    allowed: &[Role],
    project_id: Uuid,
) -> Result<bool> {
    Ok(store
        .membership(project_id, user_id)?
        .is_some_and(|m| m.is_active && allowed.contains(&m.role)))
}

/// Check `action` for `user_id`, returning the active membership when there
/// is one.
///
/// `creator` is the creator of the issue being acted on, if any.
///
/// # Errors
///
/// `Forbidden` when neither the role nor the creator override admits the
/// user. Storage failures propagate.
pub fn ensure_access(
    store: &(impl MembershipStore + ?Sized),
    user_id: Uuid,
    project_id: Uuid,
    action: Action,
    creator: Option<Uuid>,
) -> Result<Option<ProjectMember>> {
    let member = store
        .membership(project_id, user_id)?
        .filter(|m| m.is_active);
    let by_role = member
        .as_ref()
        .is_some_and(|m| action.allowed_roles().contains(&m.role));
    let by_creator = action.creator_override() && creator == Some(user_id);
    if by_role || by_creator {
        return Ok(member);
    }
    debug!(%user_id, %project_id, action = action.as_str(), "Access denied");
    Err(IssueError::Forbidden {
        action: action.as_str().to_string(),
    })
}

/// Which issues a member may see in list and sync views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuestVisibility {
    /// Guests see only issues they created.
    #[default]
    OwnIssuesOnly,
    /// Guests see everything other members see.
    All,
}

impl GuestVisibility {
    /// Extra list predicate for `member`; `True` when nothing is hidden.
    #[must_use]
    pub fn predicate(self, member: Option<&ProjectMember>) -> Predicate {
        match (self, member) {
            (Self::OwnIssuesOnly, Some(m)) if m.role == Role::Guest => {
                Predicate::equals(Field::CreatedBy, Value::Uuid(m.member_id))
            }
            _ => Predicate::True,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Members(HashMap<Uuid, ProjectMember>);

    impl MembershipStore for Members {
        fn membership(&self, _project_id: Uuid, user_id: Uuid) -> Result<Option<ProjectMember>> {
            Ok(self.0.get(&user_id).cloned())
        }
    }

    fn members(rows: &[(Uuid, Role, bool)]) -> Members {
        Members(
            rows.iter()
                .map(|&(id, role, is_active)| {
                    (
                        id,
                        ProjectMember {
                            project_id: Uuid::nil(),
                            member_id: id,
                            role,
                            is_active,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn inactive_members_are_refused() {
        let user = Uuid::now_v7();
        let store = members(&[(user, Role::Admin, false)]);
        assert!(!can_access(&store, user, &[Role::Admin], Uuid::nil()).unwrap());
    }

    #[test]
    fn creator_override_applies_to_retrieve_and_delete_only() {
        let guest = Uuid::now_v7();
        let store = members(&[(guest, Role::Guest, true)]);
        assert!(ensure_access(&store, guest, Uuid::nil(), Action::Retrieve, Some(guest)).is_ok());
        assert!(ensure_access(&store, guest, Uuid::nil(), Action::Delete, Some(guest)).is_ok());
        let err =
            ensure_access(&store, guest, Uuid::nil(), Action::Create, Some(guest)).unwrap_err();
        assert!(matches!(err, IssueError::Forbidden { .. }));
        assert!(ensure_access(&store, guest, Uuid::nil(), Action::Retrieve, None).is_err());
    }

    #[test]
    fn guests_only_see_their_own_issues() {
        let guest = Uuid::now_v7();
        let member = ProjectMember {
            project_id: Uuid::nil(),
            member_id: guest,
            role: Role::Guest,
            is_active: true,
        };
        assert_eq!(
            GuestVisibility::OwnIssuesOnly.predicate(Some(&member)),
            Predicate::equals(Field::CreatedBy, Value::Uuid(guest))
        );
        assert!(GuestVisibility::All.predicate(Some(&member)).is_true());
        let admin = ProjectMember {
            role: Role::Admin,
            ..member
        };
        assert!(GuestVisibility::OwnIssuesOnly.predicate(Some(&admin)).is_true());
    }
}
