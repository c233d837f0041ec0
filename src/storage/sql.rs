//! Translate engine predicates into SQLite `WHERE` fragments.
//!
//! Every fragment reads over `issues i LEFT JOIN states s ON s.id =
//! i.state_id` and evaluates to 0 or 1, never NULL, so `NOT` composes the
//! same way [`Predicate::matches`] does.

use rusqlite::ToSql;
use std::fmt::Write as _;

use crate::query::predicate::{Field, Predicate, Value};
use crate::util::time::{format_date, format_timestamp};

/// Columns selected for every issue row, in `issue_from_row` order.
pub const ISSUE_COLUMNS: &str = "i.id, i.project_id, i.sequence_id, i.name, i.description_html, \
     i.state_id, s.group_name, i.priority, i.sort_order, i.start_date, i.target_date, \
     i.completed_at, i.parent_id, i.cycle_id, i.created_at, i.updated_at, i.created_by, \
     i.updated_by, i.archived_at, i.deleted_at, i.is_draft";

/// The row source for issue queries. Soft-deleted rows never leave it.
pub const ISSUE_FROM: &str =
    "FROM issues i LEFT JOIN states s ON s.id = i.state_id WHERE i.deleted_at IS NULL";

/// A SQL fragment and its positional parameters.
#[derive(Default)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Box<dyn ToSql>>,
}

impl SqlFragment {
    /// Borrowed parameter list for `query_map` and friends.
    #[must_use]
    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(AsRef::as_ref).collect()
    }

    fn push_value(&mut self, value: &Value) {
        self.params.push(bind(value));
    }
}

impl std::fmt::Debug for SqlFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlFragment")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

/// Render `predicate` as a boolean SQL expression.
#[must_use]
pub fn where_clause(predicate: &Predicate) -> SqlFragment {
    let mut out = SqlFragment::default();
    render(predicate, &mut out);
    out
}

fn render(predicate: &Predicate, out: &mut SqlFragment) {
    match predicate {
        Predicate::True => out.sql.push('1'),
        Predicate::And { all } => join(all, " AND ", '1', out),
        Predicate::Or { any } => join(any, " OR ", '0', out),
        Predicate::Not { inner } => {
            out.sql.push_str("NOT (");
            render(inner, out);
            out.sql.push(')');
        }
        Predicate::FieldEquals { field, value } => {
            if let Some((view, column)) = association(*field) {
                if matches!(value, Value::Uuid(_)) {
                    let _ = write!(
                        out.sql,
                        "EXISTS (SELECT 1 FROM {view} a WHERE a.issue_id = i.id AND a.{column} = ?)"
                    );
                    out.push_value(value);
                } else {
                    out.sql.push('0');
                }
            } else {
                let _ = write!(out.sql, "({} IS ?)", column_for(*field));
                out.push_value(value);
            }
        }
        Predicate::FieldInSet { field, values } => {
            let values: Vec<&Value> = if field.is_multi_valued() {
                values.iter().filter(|v| matches!(v, Value::Uuid(_))).collect()
            } else {
                values.iter().collect()
            };
            if values.is_empty() {
                out.sql.push('0');
                return;
            }
            let placeholders = vec!["?"; values.len()].join(",");
            if let Some((view, column)) = association(*field) {
                let _ = write!(
                    out.sql,
                    "EXISTS (SELECT 1 FROM {view} a WHERE a.issue_id = i.id AND a.{column} IN ({placeholders}))"
                );
            } else {
                let _ = write!(
                    out.sql,
                    "COALESCE({} IN ({placeholders}), 0)",
                    column_for(*field)
                );
            }
            for value in values {
                out.push_value(value);
            }
        }
        Predicate::FieldRange {
            field,
            lower,
            upper,
        } => {
            if field.is_multi_valued() {
                out.sql.push('0');
                return;
            }
            let ranked = matches!(field, Field::Priority | Field::StateGroup);
            let column = if ranked {
                rank_expr(*field)
            } else {
                column_for(*field)
            };
            let _ = write!(out.sql, "(({column}) IS NOT NULL");
            for (bound, op) in [(lower, ">="), (upper, "<=")] {
                if let Some(value) = bound {
                    let _ = write!(out.sql, " AND ({column}) {op} ?");
                    if ranked {
                        out.params.push(Box::new(rank_of(value)));
                    } else {
                        out.push_value(value);
                    }
                }
            }
            out.sql.push(')');
        }
        Predicate::FieldIsNull { field } => {
            if let Some((view, _)) = association(*field) {
                let _ = write!(
                    out.sql,
                    "NOT EXISTS (SELECT 1 FROM {view} a WHERE a.issue_id = i.id)"
                );
            } else {
                let _ = write!(out.sql, "({} IS NULL)", column_for(*field));
            }
        }
        Predicate::FieldContains { field, needle } => {
            if *field == Field::Name {
                out.sql.push_str("(instr(lower(i.name), ?) > 0)");
                out.params.push(Box::new(needle.to_ascii_lowercase()));
            } else {
                out.sql.push('0');
            }
        }
    }
}

fn join(parts: &[Predicate], sep: &str, empty: char, out: &mut SqlFragment) {
    if parts.is_empty() {
        out.sql.push(empty);
        return;
    }
    out.sql.push('(');
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            out.sql.push_str(sep);
        }
        render(part, out);
    }
    out.sql.push(')');
}

/// View and id column holding a multi-valued field's values.
const fn association(field: Field) -> Option<(&'static str, &'static str)> {
    match field {
        Field::Labels => Some(("issue_labels", "label_id")),
        Field::Assignees => Some(("active_issue_assignees", "assignee_id")),
        Field::Modules => Some(("live_issue_modules", "module_id")),
        Field::Subscribers => Some(("issue_subscribers", "subscriber_id")),
        _ => None,
    }
}

const fn column_for(field: Field) -> &'static str {
    match field {
        Field::Id => "i.id",
        Field::Project => "i.project_id",
        Field::State => "i.state_id",
        Field::StateGroup => "s.group_name",
        Field::Priority => "i.priority",
        Field::Parent => "i.parent_id",
        Field::Cycle => "i.cycle_id",
        Field::CreatedBy => "i.created_by",
        Field::Name => "i.name",
        Field::StartDate => "i.start_date",
        Field::TargetDate => "i.target_date",
        Field::CompletedAt => "i.completed_at",
        Field::CreatedAt => "i.created_at",
        Field::UpdatedAt => "i.updated_at",
        Field::ArchivedAt => "i.archived_at",
        Field::IsDraft => "i.is_draft",
        // Multi-valued fields are handled through `association`.
        Field::Labels | Field::Assignees | Field::Modules | Field::Subscribers => "NULL",
    }
}

const fn rank_expr(field: Field) -> &'static str {
    match field {
        Field::Priority => {
            "CASE i.priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 \
             WHEN 'medium' THEN 2 WHEN 'low' THEN 3 ELSE 4 END"
        }
        _ => {
            "CASE s.group_name WHEN 'backlog' THEN 0 WHEN 'unstarted' THEN 1 \
             WHEN 'started' THEN 2 WHEN 'completed' THEN 3 WHEN 'cancelled' THEN 4 END"
        }
    }
}

fn rank_of(value: &Value) -> Option<i64> {
    match value {
        Value::Priority(p) => Some(i64::from(p.rank())),
        Value::StateGroup(g) => Some(i64::from(g.rank())),
        _ => None,
    }
}

fn bind(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Uuid(id) => Box::new(id.to_string()),
        Value::Text(text) => Box::new(text.clone()),
        Value::Date(date) => Box::new(format_date(*date)),
        Value::Timestamp(ts) => Box::new(format_timestamp(ts)),
        Value::Bool(flag) => Box::new(i64::from(*flag)),
        Value::Priority(p) => Box::new(p.as_str()),
        Value::StateGroup(g) => Box::new(g.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use uuid::Uuid;

    #[test]
    fn scalar_equality_is_null_safe() {
        let frag = where_clause(&Predicate::negate(Predicate::equals(
            Field::Cycle,
            Value::Uuid(Uuid::nil()),
        )));
        assert_eq!(frag.sql, "NOT ((i.cycle_id IS ?))");
        assert_eq!(frag.params.len(), 1);
    }

    #[test]
    fn multi_valued_fields_use_exists() {
        let frag = where_clause(&Predicate::is_null(Field::Labels));
        assert_eq!(
            frag.sql,
            "NOT EXISTS (SELECT 1 FROM issue_labels a WHERE a.issue_id = i.id)"
        );
        let frag = where_clause(&Predicate::FieldInSet {
            field: Field::Assignees,
            values: [Value::Uuid(Uuid::nil())].into_iter().collect(),
        });
        assert!(frag.sql.contains("active_issue_assignees"));
    }

    #[test]
    fn empty_sets_and_disjunctions_are_false() {
        let frag = where_clause(&Predicate::FieldInSet {
            field: Field::State,
            values: std::collections::BTreeSet::new(),
        });
        assert_eq!(frag.sql, "0");
        assert_eq!(where_clause(&Predicate::Or { any: vec![] }).sql, "0");
        assert_eq!(where_clause(&Predicate::True).sql, "1");
    }

    #[test]
    fn priority_ranges_compare_rank() {
        let frag = where_clause(&Predicate::FieldRange {
            field: Field::Priority,
            lower: Some(Value::Priority(Priority::High)),
            upper: None,
        });
        assert!(frag.sql.starts_with("((CASE i.priority"));
        assert_eq!(frag.params.len(), 1);
    }
}
