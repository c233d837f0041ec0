//! Compile request filter parameters into a [`Predicate`].
//!
//! Parameters arrive as a flat string map. Each recognized key has a typed
//! parser; unknown keys are ignored and empty values are dropped. Keys are
//! visited in sorted order and value sets are ordered, so identical input
//! always yields an identical predicate.

use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};
use uuid::Uuid;

use super::predicate::{Field, Predicate, Value};
use crate::error::{IssueError, Result};
use crate::model::{Priority, StateGroup};
use crate::util::time::{end_of_day, parse_date, resolve_relative_date, start_of_day};

/// Raw request parameters, already keyed and sorted.
pub type FilterParams = BTreeMap<String, String>;

/// Where the parameters came from; POST bodies may carry JSON arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    IdSet(Field),
    Priority,
    StateGroup,
    DateTerms(Field),
    DateBound(Field, Bound),
    IsDraft,
    Subscriber,
    SubIssue,
    Archived,
    Name,
}

fn classify(key: &str) -> Option<KeyKind> {
    let (base, bound) = if let Some(base) = key.strip_suffix("__gte") {
        (base, Some(Bound::Lower))
    } else if let Some(base) = key.strip_suffix("__lte") {
        (base, Some(Bound::Upper))
    } else {
        (key, None)
    };

    let date_field = match base {
        "start_date" => Some(Field::StartDate),
        "target_date" => Some(Field::TargetDate),
        "created_at" => Some(Field::CreatedAt),
        "updated_at" => Some(Field::UpdatedAt),
        "completed_at" => Some(Field::CompletedAt),
        _ => None,
    };
    if let Some(field) = date_field {
        return Some(bound.map_or(KeyKind::DateTerms(field), |b| KeyKind::DateBound(field, b)));
    }
    if bound.is_some() {
        return None;
    }

    let kind = match key {
        "state" => KeyKind::IdSet(Field::State),
        "labels" | "label" => KeyKind::IdSet(Field::Labels),
        "assignees" | "assignee" => KeyKind::IdSet(Field::Assignees),
        "created_by" => KeyKind::IdSet(Field::CreatedBy),
        "parent" => KeyKind::IdSet(Field::Parent),
        "cycle" => KeyKind::IdSet(Field::Cycle),
        "module" | "modules" => KeyKind::IdSet(Field::Modules),
        "project" => KeyKind::IdSet(Field::Project),
        "issues" => KeyKind::IdSet(Field::Id),
        "priority" => KeyKind::Priority,
        "state_group" => KeyKind::StateGroup,
        "is_draft" => KeyKind::IsDraft,
        "subscriber" => KeyKind::Subscriber,
        "sub_issue" => KeyKind::SubIssue,
        "archived" => KeyKind::Archived,
        "name" => KeyKind::Name,
        _ => return None,
    };
    Some(kind)
}

/// Compiles filter parameters for one viewer.
#[derive(Debug, Clone)]
pub struct FilterCompiler {
    mode: FilterMode,
    viewer: Option<Uuid>,
    today: NaiveDate,
}

impl FilterCompiler {
    #[must_use]
    pub fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            viewer: None,
            today: Utc::now().date_naive(),
        }
    }

    /// The user `subscriber=true|false` resolves against.
    #[must_use]
    pub const fn with_viewer(mut self, viewer: Uuid) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Anchor for relative date terms like `2_weeks;after;fromnow`.
    #[must_use]
    pub const fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Build the conjunction of every recognized, non-empty parameter.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::Validation` when a recognized key carries a value
    /// that does not parse into the key's declared type.
    pub fn compile(&self, params: &FilterParams) -> Result<Predicate> {
        let mut parts = Vec::new();
        for (key, raw) in params {
            let Some(kind) = classify(key) else {
                trace!(key = %key, "Ignoring unknown filter key");
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }
            if let Some(predicate) = self.compile_one(key, kind, raw)? {
                parts.push(predicate);
            }
        }
        debug!(terms = parts.len(), "Compiled filter");
        Ok(Predicate::and(parts))
    }

    fn compile_one(&self, key: &str, kind: KeyKind, raw: &str) -> Result<Option<Predicate>> {
        match kind {
            KeyKind::IdSet(field) => self.id_set(key, field, raw),
            KeyKind::Priority => {
                let values = self
                    .split_values(key, raw)?
                    .iter()
                    .map(|v| v.parse::<Priority>().map(Value::Priority))
                    .collect::<Result<BTreeSet<_>>>()?;
                Ok(in_set(Field::Priority, values))
            }
            KeyKind::StateGroup => {
                let values = self
                    .split_values(key, raw)?
                    .iter()
                    .map(|v| v.parse::<StateGroup>().map(Value::StateGroup))
                    .collect::<Result<BTreeSet<_>>>()?;
                Ok(in_set(Field::StateGroup, values))
            }
            KeyKind::DateTerms(field) => self.date_terms(key, field, raw),
            KeyKind::DateBound(field, bound) => date_bound(key, field, bound, raw).map(Some),
            KeyKind::IsDraft => Ok(Some(Predicate::equals(
                Field::IsDraft,
                Value::Bool(parse_bool(key, raw)?),
            ))),
            KeyKind::Subscriber => self.subscriber(key, raw),
            KeyKind::SubIssue => Ok(if parse_bool(key, raw)? {
                None
            } else {
                Some(Predicate::is_null(Field::Parent))
            }),
            KeyKind::Archived => {
                let unarchived = Predicate::is_null(Field::ArchivedAt);
                Ok(Some(if parse_bool(key, raw)? {
                    Predicate::negate(unarchived)
                } else {
                    unarchived
                }))
            }
            KeyKind::Name => Ok(Some(Predicate::FieldContains {
                field: Field::Name,
                needle: raw.trim().to_ascii_lowercase(),
            })),
        }
    }

    /// Split a list value: comma separated, or a JSON array in POST mode.
    fn split_values(&self, key: &str, raw: &str) -> Result<Vec<String>> {
        let raw = raw.trim();
        if self.mode == FilterMode::Post && raw.starts_with('[') {
            let items: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|e| {
                IssueError::validation(key, format!("'{raw}' is not a JSON array: {e}"))
            })?;
            return Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Null => Some("null".to_string()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    serde_json::Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect());
        }
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    fn id_set(&self, key: &str, field: Field, raw: &str) -> Result<Option<Predicate>> {
        let mut ids = BTreeSet::new();
        let mut include_null = false;
        for item in self.split_values(key, raw)? {
            if item.eq_ignore_ascii_case("null") || item == "None" {
                include_null = true;
                continue;
            }
            let id = Uuid::parse_str(&item).map_err(|_| {
                IssueError::validation(key, format!("'{item}' is not a valid UUID"))
            })?;
            ids.insert(Value::Uuid(id));
        }

        let set = in_set(field, ids);
        let null = include_null.then(|| Predicate::is_null(field));
        Ok(match (set, null) {
            (Some(set), Some(null)) => Some(Predicate::or([set, null])),
            (set, null) => set.or(null),
        })
    }

    fn subscriber(&self, key: &str, raw: &str) -> Result<Option<Predicate>> {
        if let Ok(flag) = parse_bool(key, raw) {
            let Some(viewer) = self.viewer else {
                debug!("subscriber filter without a viewer, ignoring");
                return Ok(None);
            };
            let subscribed = Predicate::equals(Field::Subscribers, Value::Uuid(viewer));
            return Ok(Some(if flag {
                subscribed
            } else {
                Predicate::negate(subscribed)
            }));
        }
        self.id_set(key, Field::Subscribers, raw)
    }

    /// `2024-01-01;after,2024-02-01;before` or `2_weeks;after;fromnow`.
    fn date_terms(&self, key: &str, field: Field, raw: &str) -> Result<Option<Predicate>> {
        let mut lower: Option<NaiveDate> = None;
        let mut upper: Option<NaiveDate> = None;

        for term in self.split_values(key, raw)? {
            let parts: Vec<&str> = term.split(';').map(str::trim).collect();
            let date = match parts.get(2).copied() {
                Some(anchor) => {
                    let forward = match anchor {
                        "fromnow" => true,
                        "ago" => false,
                        other => {
                            return Err(IssueError::validation(
                                key,
                                format!("'{other}' must be 'fromnow' or 'ago'"),
                            ));
                        }
                    };
                    resolve_relative_date(parts[0], self.today, forward).ok_or_else(|| {
                        IssueError::validation(
                            key,
                            format!("'{}' is not a relative date like 2_weeks", parts[0]),
                        )
                    })?
                }
                None => match resolve_relative_date(parts[0], self.today, true) {
                    Some(date) => date,
                    None => parse_date(parts[0], key)?,
                },
            };

            match parts.get(1).copied() {
                Some("after") => lower = Some(lower.map_or(date, |d| d.max(date))),
                Some("before") => upper = Some(upper.map_or(date, |d| d.min(date))),
                None => {
                    lower = Some(lower.map_or(date, |d| d.max(date)));
                    upper = Some(upper.map_or(date, |d| d.min(date)));
                }
                Some(other) => {
                    return Err(IssueError::validation(
                        key,
                        format!("'{other}' must be 'after' or 'before'"),
                    ));
                }
            }
        }

        if lower.is_none() && upper.is_none() {
            return Ok(None);
        }
        Ok(Some(Predicate::FieldRange {
            field,
            lower: lower.map(|d| day_value(field, d, Bound::Lower)),
            upper: upper.map(|d| day_value(field, d, Bound::Upper)),
        }))
    }
}

/// Compile with a fresh compiler and no viewer.
///
/// # Errors
///
/// See [`FilterCompiler::compile`].
pub fn compile(params: &FilterParams, mode: FilterMode) -> Result<Predicate> {
    FilterCompiler::new(mode).compile(params)
}

fn in_set(field: Field, values: BTreeSet<Value>) -> Option<Predicate> {
    (!values.is_empty()).then_some(Predicate::FieldInSet { field, values })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(IssueError::validation(
            key,
            format!("'{other}' is not a boolean"),
        )),
    }
}

const fn is_timestamp_field(field: Field) -> bool {
    matches!(
        field,
        Field::CreatedAt | Field::UpdatedAt | Field::CompletedAt
    )
}

/// Date operand for `field`: whole days widen to the day's bounds on
/// timestamp fields.
fn day_value(field: Field, date: NaiveDate, bound: Bound) -> Value {
    if !is_timestamp_field(field) {
        return Value::Date(date);
    }
    match bound {
        Bound::Lower => Value::Timestamp(start_of_day(date)),
        Bound::Upper => Value::Timestamp(end_of_day(date)),
    }
}

fn date_bound(key: &str, field: Field, bound: Bound, raw: &str) -> Result<Predicate> {
    let raw = raw.trim();
    let value = if is_timestamp_field(field) && raw.contains('T') {
        Value::Timestamp(crate::util::time::parse_timestamp(raw, key)?)
    } else {
        day_value(field, parse_date(raw, key)?, bound)
    };
    let (lower, upper) = match bound {
        Bound::Lower => (Some(value), None),
        Bound::Upper => (None, Some(value)),
    };
    Ok(Predicate::FieldRange {
        field,
        lower,
        upper,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> FilterParams {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_params_compile_to_true() {
        assert!(compile(&FilterParams::new(), FilterMode::Get).unwrap().is_true());
    }

    #[test]
    fn unknown_keys_and_empty_values_are_dropped() {
        let p = compile(
            &params(&[("mentions", "x"), ("labels", ""), ("colour", "red")]),
            FilterMode::Get,
        )
        .unwrap();
        assert!(p.is_true());
    }

    #[test]
    fn id_lists_sort_and_dedupe() {
        let a = "0190a1b2-0000-7000-8000-000000000002";
        let b = "0190a1b2-0000-7000-8000-000000000001";
        let one = compile(&params(&[("state", &format!("{a},{b},{a}"))]), FilterMode::Get).unwrap();
        let two = compile(&params(&[("state", &format!("{b}, {a}"))]), FilterMode::Get).unwrap();
        assert_eq!(one, two);
        let Predicate::FieldInSet { values, .. } = one else {
            panic!("expected set membership");
        };
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn null_in_id_list_selects_missing() {
        let id = "0190a1b2-0000-7000-8000-000000000001";
        let p = compile(&params(&[("cycle", &format!("{id},null"))]), FilterMode::Get).unwrap();
        let Predicate::Or { any } = p else {
            panic!("expected disjunction");
        };
        assert_eq!(any[1], Predicate::is_null(Field::Cycle));

        let only_null = compile(&params(&[("labels", "None")]), FilterMode::Get).unwrap();
        assert_eq!(only_null, Predicate::is_null(Field::Labels));
    }

    #[test]
    fn post_mode_accepts_json_arrays() {
        let p = compile(
            &params(&[("priority", r#"["urgent", "high"]"#)]),
            FilterMode::Post,
        )
        .unwrap();
        let expected = Predicate::FieldInSet {
            field: Field::Priority,
            values: [Value::Priority(Priority::Urgent), Value::Priority(Priority::High)]
                .into_iter()
                .collect(),
        };
        assert_eq!(p, expected);
    }

    #[test]
    fn bad_values_for_known_keys_fail() {
        assert!(compile(&params(&[("state", "not-a-uuid")]), FilterMode::Get).is_err());
        assert!(compile(&params(&[("priority", "critical")]), FilterMode::Get).is_err());
        assert!(compile(&params(&[("is_draft", "maybe")]), FilterMode::Get).is_err());
        assert!(compile(&params(&[("start_date", "2024-13-01;after")]), FilterMode::Get).is_err());
        assert!(compile(&params(&[("target_date", "2024-01-01;during")]), FilterMode::Get).is_err());
    }

    #[test]
    fn date_terms_build_one_range() {
        let p = compile(
            &params(&[("start_date", "2024-01-01;after,2024-01-31;before")]),
            FilterMode::Get,
        )
        .unwrap();
        assert_eq!(
            p,
            Predicate::FieldRange {
                field: Field::StartDate,
                lower: Some(Value::Date(day(2024, 1, 1))),
                upper: Some(Value::Date(day(2024, 1, 31))),
            }
        );
    }

    #[test]
    fn relative_dates_use_anchor() {
        let compiler = FilterCompiler::new(FilterMode::Get).with_today(day(2024, 6, 15));
        let p = compiler
            .compile(&params(&[("target_date", "1_weeks;before;fromnow")]))
            .unwrap();
        assert_eq!(
            p,
            Predicate::FieldRange {
                field: Field::TargetDate,
                lower: None,
                upper: Some(Value::Date(day(2024, 6, 22))),
            }
        );
    }

    #[test]
    fn timestamp_fields_widen_days() {
        let p = compile(
            &params(&[("created_at__lte", "2024-03-01")]),
            FilterMode::Get,
        )
        .unwrap();
        let Predicate::FieldRange { upper, .. } = p else {
            panic!("expected range");
        };
        assert_eq!(upper, Some(Value::Timestamp(end_of_day(day(2024, 3, 1)))));
    }

    #[test]
    fn subscriber_resolves_against_viewer() {
        let viewer = Uuid::now_v7();
        let compiler = FilterCompiler::new(FilterMode::Get).with_viewer(viewer);
        let yes = compiler.compile(&params(&[("subscriber", "true")])).unwrap();
        assert_eq!(
            yes,
            Predicate::equals(Field::Subscribers, Value::Uuid(viewer))
        );
        let no = compiler.compile(&params(&[("subscriber", "false")])).unwrap();
        assert!(matches!(no, Predicate::Not { .. }));
    }

    #[test]
    fn sub_issue_false_means_top_level_only() {
        let p = compile(&params(&[("sub_issue", "false")]), FilterMode::Get).unwrap();
        assert_eq!(p, Predicate::is_null(Field::Parent));
        let all = compile(&params(&[("sub_issue", "true")]), FilterMode::Get).unwrap();
        assert!(all.is_true());
    }

    #[test]
    fn keys_combine_in_sorted_order() {
        let p = compile(
            &params(&[("priority", "low"), ("archived", "false")]),
            FilterMode::Get,
        )
        .unwrap();
        let Predicate::And { all } = p else {
            panic!("expected conjunction");
        };
        assert_eq!(all[0], Predicate::is_null(Field::ArchivedAt));
    }
}
