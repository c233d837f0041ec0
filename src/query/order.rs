//! Resolve an `order_by` parameter into a total order over issues.
//!
//! Every order ends with `id` ascending, so two runs over the same snapshot
//! always produce the same sequence. Missing values sort last in both
//! directions.

use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::model::Issue;

/// The fallback order.
pub const DEFAULT_ORDER_BY: &str = "-created_at";

/// What an order compares before the id tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    SortOrder,
    Name,
    SequenceId,
    StartDate,
    TargetDate,
    CompletedAt,
    /// Synthetic: urgent=0 through none=4.
    Priority,
    /// Synthetic: backlog=0 through cancelled=4, via the issue's state.
    StateGroup,
}

impl SortKey {
    fn parse(name: &str) -> Option<Self> {
        let key = match name {
            "created_at" => Self::CreatedAt,
            "updated_at" => Self::UpdatedAt,
            "sort_order" => Self::SortOrder,
            "name" => Self::Name,
            "sequence_id" => Self::SequenceId,
            "start_date" => Self::StartDate,
            "target_date" => Self::TargetDate,
            "completed_at" => Self::CompletedAt,
            "priority" => Self::Priority,
            "state__name" | "state__group" => Self::StateGroup,
            _ => return None,
        };
        Some(key)
    }

    const fn nullable(self) -> bool {
        matches!(
            self,
            Self::StartDate | Self::TargetDate | Self::CompletedAt | Self::StateGroup
        )
    }

    /// SQL expression for this key over `issues i LEFT JOIN states s`.
    const fn sql_expr(self) -> &'static str {
        match self {
            Self::CreatedAt => "i.created_at",
            Self::UpdatedAt => "i.updated_at",
            Self::SortOrder => "i.sort_order",
            Self::Name => "i.name COLLATE NOCASE",
            Self::SequenceId => "i.sequence_id",
            Self::StartDate => "i.start_date",
            Self::TargetDate => "i.target_date",
            Self::CompletedAt => "i.completed_at",
            Self::Priority => {
                "CASE i.priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 \
                 WHEN 'medium' THEN 2 WHEN 'low' THEN 3 ELSE 4 END"
            }
            Self::StateGroup => {
                "CASE s.group_name WHEN 'backlog' THEN 0 WHEN 'unstarted' THEN 1 \
                 WHEN 'started' THEN 2 WHEN 'completed' THEN 3 WHEN 'cancelled' THEN 4 END"
            }
        }
    }
}

/// A resolved ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    key: SortKey,
    descending: bool,
    effective: String,
}

impl Default for OrderSpec {
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            descending: true,
            effective: DEFAULT_ORDER_BY.to_string(),
        }
    }
}

/// Resolve `order_by`. Absent or unrecognized input yields `-created_at`.
#[must_use]
pub fn resolve(order_by: Option<&str>) -> OrderSpec {
    let Some(raw) = order_by.map(str::trim).filter(|s| !s.is_empty()) else {
        return OrderSpec::default();
    };
    let (descending, name) = raw
        .strip_prefix('-')
        .map_or((false, raw), |rest| (true, rest));
    SortKey::parse(name).map_or_else(OrderSpec::default, |key| OrderSpec {
        key,
        descending,
        effective: raw.to_string(),
    })
}

impl OrderSpec {
    /// `updated_at` ascending, the order sync export walks.
    #[must_use]
    pub fn sync() -> Self {
        Self {
            key: SortKey::UpdatedAt,
            descending: false,
            effective: "updated_at".to_string(),
        }
    }

    /// The `order_by` value actually applied.
    #[must_use]
    pub fn effective_order_by(&self) -> &str {
        &self.effective
    }

    #[must_use]
    pub const fn key(&self) -> SortKey {
        self.key
    }

    #[must_use]
    pub const fn is_descending(&self) -> bool {
        self.descending
    }

    /// Total order: the key (nulls last), then id ascending.
    #[must_use]
    pub fn compare(&self, a: &Issue, b: &Issue) -> Ordering {
        self.compare_key(a, b).then_with(|| a.id.cmp(&b.id))
    }

    /// Sort a slice in place.
    pub fn sort(&self, items: &mut [Issue]) {
        items.sort_by(|a, b| self.compare(a, b));
    }

    fn compare_key(&self, a: &Issue, b: &Issue) -> Ordering {
        let directed = |ord: Ordering| if self.descending { ord.reverse() } else { ord };
        match self.key {
            SortKey::CreatedAt => directed(a.created_at.cmp(&b.created_at)),
            SortKey::UpdatedAt => directed(a.updated_at.cmp(&b.updated_at)),
            SortKey::SortOrder => directed(a.sort_order.total_cmp(&b.sort_order)),
            SortKey::Name => directed(
                a.name
                    .to_ascii_lowercase()
                    .cmp(&b.name.to_ascii_lowercase()),
            ),
            SortKey::SequenceId => directed(a.sequence_id.cmp(&b.sequence_id)),
            SortKey::Priority => directed(a.priority.rank().cmp(&b.priority.rank())),
            SortKey::StartDate => nulls_last(a.start_date, b.start_date, directed),
            SortKey::TargetDate => nulls_last(a.target_date, b.target_date, directed),
            SortKey::CompletedAt => nulls_last(a.completed_at, b.completed_at, directed),
            SortKey::StateGroup => nulls_last(
                a.state_group.map(crate::model::StateGroup::rank),
                b.state_group.map(crate::model::StateGroup::rank),
                directed,
            ),
        }
    }

    /// `ORDER BY` clause matching [`OrderSpec::compare`].
    #[must_use]
    pub fn to_sql(&self) -> String {
        let expr = self.key.sql_expr();
        let dir = if self.descending { "DESC" } else { "ASC" };
        let mut sql = String::from("ORDER BY ");
        if self.key.nullable() {
            let _ = write!(sql, "({expr}) IS NULL, ");
        }
        let _ = write!(sql, "{expr} {dir}, i.id ASC");
        sql
    }
}

fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>, directed: impl Fn(Ordering) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => directed(a.cmp(&b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn issue(n: u128) -> Issue {
        let mut issue = Issue::new(Uuid::nil(), i64::try_from(n).unwrap(), format!("Issue {n}"));
        issue.id = Uuid::from_u128(n);
        issue
    }

    #[test]
    fn absent_or_unknown_falls_back() {
        assert_eq!(resolve(None).effective_order_by(), "-created_at");
        assert_eq!(resolve(Some("")).effective_order_by(), "-created_at");
        assert_eq!(resolve(Some("-colour")).effective_order_by(), "-created_at");
        assert_eq!(resolve(Some("-priority")).effective_order_by(), "-priority");
    }

    #[test]
    fn priority_uses_rank_not_name() {
        let order = resolve(Some("priority"));
        let mut items: Vec<Issue> = [Priority::None, Priority::Low, Priority::Urgent, Priority::High]
            .into_iter()
            .enumerate()
            .map(|(n, p)| {
                let mut item = issue(n as u128 + 1);
                item.priority = p;
                item
            })
            .collect();
        order.sort(&mut items);
        let got: Vec<Priority> = items.iter().map(|i| i.priority).collect();
        assert_eq!(
            got,
            vec![Priority::Urgent, Priority::High, Priority::Low, Priority::None]
        );
    }

    #[test]
    fn ties_break_by_id_ascending_in_both_directions() {
        let mut items = vec![issue(3), issue(1), issue(2)];
        for item in &mut items {
            item.priority = Priority::High;
        }
        for param in ["priority", "-priority"] {
            resolve(Some(param)).sort(&mut items);
            let ids: Vec<u128> = items.iter().map(|i| i.id.as_u128()).collect();
            assert_eq!(ids, vec![1, 2, 3]);
        }
    }

    #[test]
    fn null_dates_sort_last_both_ways() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let mut a = issue(1);
        a.target_date = Some(d(5));
        let mut b = issue(2);
        b.target_date = Some(d(9));
        let c = issue(3);

        let mut items = vec![c.clone(), a.clone(), b.clone()];
        resolve(Some("target_date")).sort(&mut items);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a.id, b.id, c.id]);

        resolve(Some("-target_date")).sort(&mut items);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![b.id, a.id, c.id]);
    }

    #[test]
    fn sql_mirrors_comparator() {
        assert_eq!(
            resolve(Some("-created_at")).to_sql(),
            "ORDER BY i.created_at DESC, i.id ASC"
        );
        assert_eq!(
            resolve(Some("start_date")).to_sql(),
            "ORDER BY (i.start_date) IS NULL, i.start_date ASC, i.id ASC"
        );
    }
}
