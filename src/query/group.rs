//! Partition issues into groups and optional sub-groups.
//!
//! Groups keep the order of their domain (for example project states by
//! sequence, or priorities from urgent to none). Multi-valued fields put an
//! issue in one group per value; an issue with no value lands in the
//! reserved [`NONE_GROUP`] bucket.

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::predicate::{Field, Predicate, Value, scalar_value};
use crate::error::{IssueError, Result};
use crate::model::{Issue, Priority, StateGroup};
use crate::util::time::{format_date, parse_date};

/// Key of the bucket holding issues with no value for the grouped field.
pub const NONE_GROUP: &str = "None";

/// A group key: a UUID, enum name or date rendered as text, or `None`.
pub type GroupKey = String;

/// A field issues can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupSpec {
    State,
    StateGroup,
    Priority,
    Labels,
    Assignees,
    Modules,
    Cycle,
    CreatedBy,
    Parent,
    StartDate,
    TargetDate,
}

impl GroupSpec {
    /// Canonical parameter name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state_id",
            Self::StateGroup => "state__group",
            Self::Priority => "priority",
            Self::Labels => "labels__id",
            Self::Assignees => "assignees__id",
            Self::Modules => "issue_module__module_id",
            Self::Cycle => "cycle_id",
            Self::CreatedBy => "created_by",
            Self::Parent => "parent_id",
            Self::StartDate => "start_date",
            Self::TargetDate => "target_date",
        }
    }

    /// The predicate field this spec partitions on.
    #[must_use]
    pub const fn field(self) -> Field {
        match self {
            Self::State => Field::State,
            Self::StateGroup => Field::StateGroup,
            Self::Priority => Field::Priority,
            Self::Labels => Field::Labels,
            Self::Assignees => Field::Assignees,
            Self::Modules => Field::Modules,
            Self::Cycle => Field::Cycle,
            Self::CreatedBy => Field::CreatedBy,
            Self::Parent => Field::Parent,
            Self::StartDate => Field::StartDate,
            Self::TargetDate => Field::TargetDate,
        }
    }

    #[must_use]
    pub const fn is_multi_valued(self) -> bool {
        self.field().is_multi_valued()
    }

    /// Domain known without asking the store.
    #[must_use]
    pub fn static_domain(self) -> Option<Vec<GroupKey>> {
        match self {
            Self::Priority => Some(Priority::ALL.iter().map(|p| p.as_str().to_string()).collect()),
            Self::StateGroup => Some(
                StateGroup::ALL
                    .iter()
                    .map(|g| g.as_str().to_string())
                    .chain(std::iter::once(NONE_GROUP.to_string()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// The group keys `issue` belongs to. Never empty.
    #[must_use]
    pub fn keys_for(self, issue: &Issue) -> Vec<GroupKey> {
        let ids = match self {
            Self::Labels => Some(&issue.label_ids),
            Self::Assignees => Some(&issue.assignee_ids),
            Self::Modules => Some(&issue.module_ids),
            _ => None,
        };
        if let Some(ids) = ids {
            if ids.is_empty() {
                return vec![NONE_GROUP.to_string()];
            }
            return ids.iter().map(ToString::to_string).collect();
        }

        let key = match scalar_value(issue, self.field()) {
            Some(Value::Uuid(id)) => id.to_string(),
            Some(Value::Priority(p)) => p.as_str().to_string(),
            Some(Value::StateGroup(g)) => g.as_str().to_string(),
            Some(Value::Date(d)) => format_date(d),
            _ => NONE_GROUP.to_string(),
        };
        vec![key]
    }

    /// Predicate selecting the members of group `key`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `key` is not a valid value for the
    /// spec's field.
    pub fn member_predicate(self, key: &str) -> Result<Predicate> {
        let field = self.field();
        if key == NONE_GROUP {
            return Ok(Predicate::is_null(field));
        }
        let value = match self {
            Self::Priority => Value::Priority(key.parse()?),
            Self::StateGroup => Value::StateGroup(key.parse()?),
            Self::StartDate | Self::TargetDate => Value::Date(parse_date(key, self.as_str())?),
            _ => Value::Uuid(Uuid::parse_str(key).map_err(|_| {
                IssueError::validation(self.as_str(), format!("'{key}' is not a valid UUID"))
            })?),
        };
        Ok(Predicate::equals(field, value))
    }
}

impl fmt::Display for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupSpec {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self> {
        let spec = match s.trim() {
            "state_id" | "state" => Self::State,
            "state__group" | "state_group" => Self::StateGroup,
            "priority" => Self::Priority,
            "labels__id" | "labels" | "label" => Self::Labels,
            "assignees__id" | "assignees" | "assignee" => Self::Assignees,
            "issue_module__module_id" | "modules" | "module" => Self::Modules,
            "cycle_id" | "cycle" => Self::Cycle,
            "created_by" => Self::CreatedBy,
            "parent_id" | "parent" => Self::Parent,
            "start_date" => Self::StartDate,
            "target_date" => Self::TargetDate,
            other => {
                return Err(IssueError::validation(
                    "group_by",
                    format!("'{other}' is not a supported grouping key"),
                ));
            }
        };
        Ok(spec)
    }
}

/// Parse and cross-check `group_by` / `sub_group_by`.
///
/// A sub-group without a group is ignored. Naming the same field twice is a
/// conflict, reported before anything is parsed further.
///
/// # Errors
///
/// `Conflict` when both name the same field; `Validation` when either names
/// an unknown field.
pub fn validate_group_specs(
    group_by: Option<&str>,
    sub_group_by: Option<&str>,
) -> Result<(Option<GroupSpec>, Option<GroupSpec>)> {
    let group_by = group_by.map(str::trim).filter(|s| !s.is_empty());
    let sub_group_by = sub_group_by.map(str::trim).filter(|s| !s.is_empty());

    let conflict = |name: &str| IssueError::Conflict {
        reason: format!("group_by and sub_group_by cannot both be '{name}'"),
    };

    if let (Some(g), Some(s)) = (group_by, sub_group_by) {
        if g == s {
            return Err(conflict(g));
        }
    }

    let Some(group_by) = group_by else {
        return Ok((None, None));
    };
    let group = group_by.parse::<GroupSpec>()?;
    let sub = sub_group_by
        .map(|s| {
            s.parse::<GroupSpec>().map_err(|_| {
                IssueError::validation(
                    "sub_group_by",
                    format!("'{s}' is not a supported grouping key"),
                )
            })
        })
        .transpose()?;

    if sub == Some(group) {
        return Err(conflict(group.as_str()));
    }
    Ok((Some(group), sub))
}

/// Source of the ordered group keys for a project.
pub trait GroupDomain {
    /// Ordered keys for `spec` in `project_id`, including [`NONE_GROUP`]
    /// when the field is nullable.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn group_values(&self, project_id: Uuid, spec: GroupSpec) -> Result<Vec<GroupKey>>;
}

/// Ordered map from group key to `T`, serialized as a JSON object in
/// insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Groups<T> {
    entries: Vec<(GroupKey, T)>,
    index: HashMap<GroupKey, usize>,
}

impl<T> Default for Groups<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Groups<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, inserting `make()` at the end when missing.
    pub fn entry_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> T) -> &mut T {
        let idx = if let Some(&idx) = self.index.get(key) {
            idx
        } else {
            self.entries.push((key.to_string(), make()));
            let idx = self.entries.len() - 1;
            self.index.insert(key.to_string(), idx);
            idx
        };
        &mut self.entries[idx].1
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transform every value, keeping keys and order.
    #[must_use]
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Groups<U> {
        Groups {
            entries: self.entries.into_iter().map(|(k, v)| (k, f(v))).collect(),
            index: self.index,
        }
    }
}

impl<T: Serialize> Serialize for Groups<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<T: JsonSchema> JsonSchema for Groups<T> {
    fn schema_name() -> String {
        format!("Groups_{}", T::schema_name())
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <BTreeMap<String, T>>::json_schema(generator)
    }
}

/// One group: either its issues, or its sub-groups.
#[derive(Debug, Clone, PartialEq)]
pub enum Group {
    Items(Vec<Issue>),
    SubGroups(Groups<Vec<Issue>>),
}

impl Group {
    /// Number of memberships in this group, summed across sub-groups.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Items(items) => items.len(),
            Self::SubGroups(groups) => groups.iter().map(|(_, items)| items.len()).sum(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for Group {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Items(items) => items.serialize(serializer),
            Self::SubGroups(groups) => groups.serialize(serializer),
        }
    }
}

/// Partition `items` (already filtered and ordered) into groups.
///
/// Domain keys come first, in domain order, and are present even when
/// empty; keys outside the domain follow in first-encounter order. Within a
/// group, issues keep their input order.
#[must_use]
pub fn group(
    items: &[Issue],
    group_by: GroupSpec,
    sub_group_by: Option<GroupSpec>,
    domain: &[GroupKey],
    sub_domain: &[GroupKey],
) -> Groups<Group> {
    let mut groups: Groups<Group> = Groups::new();
    let empty = || match sub_group_by {
        Some(_) => Group::SubGroups(prefilled(sub_domain)),
        None => Group::Items(Vec::new()),
    };
    for key in domain {
        groups.entry_or_insert_with(key, empty);
    }

    for issue in items {
        for key in group_by.keys_for(issue) {
            match groups.entry_or_insert_with(&key, empty) {
                Group::Items(members) => members.push(issue.clone()),
                Group::SubGroups(subs) => {
                    if let Some(sub_spec) = sub_group_by {
                        for sub_key in sub_spec.keys_for(issue) {
                            subs.entry_or_insert_with(&sub_key, Vec::new)
                                .push(issue.clone());
                        }
                    }
                }
            }
        }
    }
    groups
}

fn prefilled(keys: &[GroupKey]) -> Groups<Vec<Issue>> {
    let mut groups = Groups::new();
    for key in keys {
        groups.entry_or_insert_with(key, Vec::new);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(n: u128) -> Issue {
        let mut issue = Issue::new(Uuid::nil(), 1, format!("Issue {n}"));
        issue.id = Uuid::from_u128(n);
        issue
    }

    #[test]
    fn same_field_twice_is_conflict() {
        let err = validate_group_specs(Some("priority"), Some("priority")).unwrap_err();
        assert!(matches!(err, IssueError::Conflict { .. }));
        // aliases of the same field conflict too
        let err = validate_group_specs(Some("labels"), Some("labels__id")).unwrap_err();
        assert!(matches!(err, IssueError::Conflict { .. }));
        // even an unknown name conflicts with itself before it is parsed
        let err = validate_group_specs(Some("colour"), Some("colour")).unwrap_err();
        assert!(matches!(err, IssueError::Conflict { .. }));
    }

    #[test]
    fn unknown_spec_is_validation_error() {
        let err = validate_group_specs(Some("colour"), None).unwrap_err();
        assert!(matches!(err, IssueError::Validation { .. }));
        let err = validate_group_specs(Some("priority"), Some("colour")).unwrap_err();
        assert!(
            matches!(err, IssueError::Validation { ref field, .. } if field == "sub_group_by")
        );
    }

    #[test]
    fn sub_group_without_group_is_ignored() {
        assert_eq!(
            validate_group_specs(None, Some("priority")).unwrap(),
            (None, None)
        );
    }

    #[test]
    fn multi_valued_membership_and_none_bucket() {
        let a = Uuid::from_u128(100);
        let b = Uuid::from_u128(200);
        let mut one = issue(1);
        one.label_ids.extend([a, b]);
        let two = issue(2);

        let domain = vec![a.to_string(), b.to_string(), NONE_GROUP.to_string()];
        let groups = group(&[one, two], GroupSpec::Labels, None, &domain, &[]);

        assert_eq!(groups.keys().collect::<Vec<_>>(), domain);
        assert_eq!(groups.get(&a.to_string()).unwrap().len(), 1);
        assert_eq!(groups.get(&b.to_string()).unwrap().len(), 1);
        assert_eq!(groups.get(NONE_GROUP).unwrap().len(), 1);
    }

    #[test]
    fn keys_outside_domain_are_appended() {
        let mut one = issue(1);
        one.priority = Priority::High;
        let groups = group(&[one], GroupSpec::Priority, None, &[], &[]);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["high"]);
    }

    #[test]
    fn sub_groups_prefill_domain() {
        let mut one = issue(1);
        one.priority = Priority::Low;
        let domain = GroupSpec::Priority.static_domain().unwrap();
        let sub_domain = vec![NONE_GROUP.to_string()];
        let groups = group(
            &[one],
            GroupSpec::Priority,
            Some(GroupSpec::Cycle),
            &domain,
            &sub_domain,
        );
        let Some(Group::SubGroups(subs)) = groups.get("urgent") else {
            panic!("expected sub-groups");
        };
        assert!(subs.get(NONE_GROUP).unwrap().is_empty());
        assert_eq!(groups.get("low").unwrap().len(), 1);
    }

    #[test]
    fn member_predicate_matches_keys_for() {
        let mut one = issue(1);
        one.start_date = chrono::NaiveDate::from_ymd_opt(2024, 4, 2);
        for key in GroupSpec::StartDate.keys_for(&one) {
            assert!(GroupSpec::StartDate.member_predicate(&key).unwrap().matches(&one));
        }
        let none = GroupSpec::Cycle.member_predicate(NONE_GROUP).unwrap();
        assert!(none.matches(&one));
    }

    #[test]
    fn groups_serialize_in_insertion_order() {
        let mut groups: Groups<u8> = Groups::new();
        groups.entry_or_insert_with("zeta", || 1);
        groups.entry_or_insert_with("alpha", || 2);
        let json = serde_json::to_string(&groups).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":2}"#);
    }
}
