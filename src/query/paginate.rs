//! Offset, grouped and keyset pagination.
//!
//! The paginators only talk to an [`ItemSource`], so the same code pages
//! over the SQLite store and over an in-memory snapshot.

use schemars::JsonSchema;
use serde::Serialize;
use tracing::{debug, instrument};

use super::cursor::{Direction, OffsetCursor, SyncCursor};
use super::group::{GroupKey, GroupSpec, Groups};
use super::order::OrderSpec;
use super::predicate::Predicate;
use crate::error::Result;
use crate::model::Issue;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound on page size unless configured otherwise.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

/// Where paginated issues come from.
pub trait ItemSource {
    /// Number of live issues matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn count(&self, filter: &Predicate) -> Result<usize>;

    /// Live issues matching `filter`, ordered, skipping `offset`, at most
    /// `limit`, annotated.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn slice(
        &self,
        filter: &Predicate,
        order: &OrderSpec,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Issue>>;

    /// Up to `limit` live issues matching `filter` strictly past `boundary`
    /// in `(updated_at, id)` order, returned ascending. With a `Prev`
    /// boundary these are the `limit` issues nearest before it.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    fn keyset(
        &self,
        filter: &Predicate,
        boundary: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<Vec<Issue>>;
}

/// An [`ItemSource`] over a borrowed snapshot. Soft-deleted issues are
/// skipped.
#[derive(Debug, Clone, Copy)]
pub struct MemorySource<'a> {
    items: &'a [Issue],
}

impl<'a> MemorySource<'a> {
    #[must_use]
    pub const fn new(items: &'a [Issue]) -> Self {
        Self { items }
    }

    fn live_matching<'f>(
        &self,
        filter: &'f Predicate,
    ) -> impl Iterator<Item = &'a Issue> + use<'a, 'f> {
        self.items
            .iter()
            .filter(move |issue| issue.is_live() && filter.matches(issue))
    }
}

impl ItemSource for MemorySource<'_> {
    fn count(&self, filter: &Predicate) -> Result<usize> {
        Ok(self.live_matching(filter).count())
    }

    fn slice(
        &self,
        filter: &Predicate,
        order: &OrderSpec,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        let mut matched: Vec<Issue> = self.live_matching(filter).cloned().collect();
        order.sort(&mut matched);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    fn keyset(
        &self,
        filter: &Predicate,
        boundary: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        let mut matched: Vec<Issue> = self
            .live_matching(filter)
            .filter(|issue| boundary.is_none_or(|b| b.admits(&issue.updated_at, &issue.id)))
            .cloned()
            .collect();
        OrderSpec::sync().sort(&mut matched);
        if boundary.is_some_and(|b| b.direction == Direction::Prev) {
            let skip = matched.len().saturating_sub(limit);
            return Ok(matched.split_off(skip));
        }
        matched.truncate(limit);
        Ok(matched)
    }
}

/// Clamp a requested page size into `[1, max]`.
#[must_use]
pub fn clamp_page_size(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max.max(1))
}

/// Decode an offset cursor, or start at page 0 with `per_page`.
///
/// # Errors
///
/// Returns `IssueError::InvalidCursor` for an undecodable token.
pub fn offset_cursor(token: Option<&str>, per_page: usize) -> Result<OffsetCursor> {
    match token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => token.parse(),
        None => Ok(OffsetCursor::first(per_page)),
    }
}

/// One group's slice.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct GroupPage<T> {
    pub results: Vec<T>,
    pub total_results: usize,
    pub has_next: bool,
}

impl<T> GroupPage<T> {
    fn map_items<U, F: FnMut(T) -> U>(self, f: &mut F) -> GroupPage<U> {
        GroupPage {
            results: self.results.into_iter().map(f).collect(),
            total_results: self.total_results,
            has_next: self.has_next,
        }
    }
}

/// One group's sub-groups.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SubGroupPage<T> {
    pub results: Groups<GroupPage<T>>,
    pub total_results: usize,
}

/// Page payload, shaped by the grouping that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PageResults<T> {
    Flat(Vec<T>),
    Grouped(Groups<GroupPage<T>>),
    SubGrouped(Groups<SubGroupPage<T>>),
}

/// A bounded slice of results plus pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Page<T> {
    pub grouped_by: Option<String>,
    pub sub_grouped_by: Option<String>,
    /// Distinct issues in the filtered set.
    pub total_count: usize,
    pub next_cursor: String,
    pub prev_cursor: String,
    pub next_page_results: bool,
    pub prev_page_results: bool,
    /// Issues (group memberships, when grouped) on this page.
    pub count: usize,
    pub total_pages: usize,
    pub total_results: usize,
    pub extra_stats: Option<String>,
    pub results: PageResults<T>,
}

impl<T> Page<T> {
    /// Convert every result, keeping the page metadata.
    #[must_use]
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Page<U> {
        let results = match self.results {
            PageResults::Flat(items) => PageResults::Flat(items.into_iter().map(&mut f).collect()),
            PageResults::Grouped(groups) => {
                PageResults::Grouped(groups.map(|page| page.map_items(&mut f)))
            }
            PageResults::SubGrouped(groups) => {
                PageResults::SubGrouped(groups.map(|sub| SubGroupPage {
                    results: sub.results.map(|page| page.map_items(&mut f)),
                    total_results: sub.total_results,
                }))
            }
        };
        Page {
            grouped_by: self.grouped_by,
            sub_grouped_by: self.sub_grouped_by,
            total_count: self.total_count,
            next_cursor: self.next_cursor,
            prev_cursor: self.prev_cursor,
            next_page_results: self.next_page_results,
            prev_page_results: self.prev_page_results,
            count: self.count,
            total_pages: self.total_pages,
            total_results: self.total_results,
            extra_stats: self.extra_stats,
            results,
        }
    }

    /// Flat results, if this page is not grouped.
    #[must_use]
    pub fn flat_results(&self) -> Option<&[T]> {
        match &self.results {
            PageResults::Flat(items) => Some(items),
            _ => None,
        }
    }
}

/// Ungrouped offset pagination.
///
/// # Errors
///
/// Propagates store errors.
#[instrument(level = "debug", skip(source, filter, order))]
pub fn paginate_flat<S: ItemSource + ?Sized>(
    source: &S,
    filter: &Predicate,
    order: &OrderSpec,
    cursor: OffsetCursor,
) -> Result<Page<Issue>> {
    let per_page = cursor.per_page;
    let total = source.count(filter)?;
    let mut items = source.slice(filter, order, cursor.offset(), per_page + 1)?;
    let has_next = items.len() > per_page;
    items.truncate(per_page);

    debug!(total, returned = items.len(), has_next, "Flat page");
    Ok(Page {
        grouped_by: None,
        sub_grouped_by: None,
        total_count: total,
        next_cursor: cursor.next().to_string(),
        prev_cursor: cursor.prev().to_string(),
        next_page_results: has_next,
        prev_page_results: cursor.page > 0,
        count: items.len(),
        total_pages: total.div_ceil(per_page),
        total_results: total,
        extra_stats: None,
        results: PageResults::Flat(items),
    })
}

/// Everything the grouped paginator needs besides the cursor.
#[derive(Debug, Clone, Copy)]
pub struct GroupedQuery<'a> {
    pub filter: &'a Predicate,
    pub order: &'a OrderSpec,
    /// Extra condition applied to per-group totals only.
    pub count_filter: &'a Predicate,
    pub group_by: GroupSpec,
    pub sub_group_by: Option<GroupSpec>,
    pub domain: &'a [GroupKey],
    pub sub_domain: &'a [GroupKey],
}

impl GroupedQuery<'_> {
    fn slice_group<S: ItemSource + ?Sized>(
        &self,
        source: &S,
        member: &Predicate,
        cursor: OffsetCursor,
    ) -> Result<GroupPage<Issue>> {
        let per_page = cursor.per_page;
        let scoped = Predicate::and([self.filter.clone(), member.clone()]);
        let mut results = source.slice(&scoped, self.order, cursor.offset(), per_page + 1)?;
        let has_next = results.len() > per_page;
        results.truncate(per_page);
        let total_results = self.group_total(source, member)?;
        Ok(GroupPage {
            results,
            total_results,
            has_next,
        })
    }

    fn group_total<S: ItemSource + ?Sized>(&self, source: &S, member: &Predicate) -> Result<usize> {
        source.count(&Predicate::and([
            self.filter.clone(),
            self.count_filter.clone(),
            member.clone(),
        ]))
    }
}

/// Grouped offset pagination: every group (and sub-group) is sliced
/// independently with the same offset and limit.
///
/// # Errors
///
/// Propagates store errors, and validation errors for domain keys that do
/// not parse for the grouped field.
#[instrument(level = "debug", skip(source, query), fields(group_by = %query.group_by))]
pub fn paginate_grouped<S: ItemSource + ?Sized>(
    source: &S,
    query: &GroupedQuery<'_>,
    cursor: OffsetCursor,
) -> Result<Page<Issue>> {
    let per_page = cursor.per_page;
    let total = source.count(query.filter)?;

    let mut largest = 0;
    let mut any_next = false;
    let mut count = 0;

    let results = if let Some(sub_spec) = query.sub_group_by {
        let mut groups = Groups::new();
        for key in query.domain {
            let member = query.group_by.member_predicate(key)?;
            let mut subs = Groups::new();
            for sub_key in query.sub_domain {
                let sub_member =
                    Predicate::and([member.clone(), sub_spec.member_predicate(sub_key)?]);
                let page = query.slice_group(source, &sub_member, cursor)?;
                largest = largest.max(page.total_results);
                any_next |= page.has_next;
                count += page.results.len();
                subs.entry_or_insert_with(sub_key, || page);
            }
            let total_results = query.group_total(source, &member)?;
            groups.entry_or_insert_with(key, || SubGroupPage {
                results: subs,
                total_results,
            });
        }
        PageResults::SubGrouped(groups)
    } else {
        let mut groups = Groups::new();
        for key in query.domain {
            let member = query.group_by.member_predicate(key)?;
            let page = query.slice_group(source, &member, cursor)?;
            largest = largest.max(page.total_results);
            any_next |= page.has_next;
            count += page.results.len();
            groups.entry_or_insert_with(key, || page);
        }
        PageResults::Grouped(groups)
    };

    debug!(total, count, any_next, "Grouped page");
    Ok(Page {
        grouped_by: Some(query.group_by.as_str().to_string()),
        sub_grouped_by: query.sub_group_by.map(|s| s.as_str().to_string()),
        total_count: total,
        next_cursor: cursor.next().to_string(),
        prev_cursor: cursor.prev().to_string(),
        next_page_results: any_next,
        prev_page_results: cursor.page > 0,
        count,
        total_pages: largest.div_ceil(per_page),
        total_results: total,
        extra_stats: None,
        results,
    })
}

/// Keyset pagination in `(updated_at, id)` order for sync export.
///
/// `total_results` counts `base`; the page is drawn from `filter`.
///
/// # Errors
///
/// Returns `IssueError::InvalidCursor` for an undecodable token, and
/// propagates store errors.
#[instrument(level = "debug", skip(source, base, filter))]
pub fn paginate_sync<S: ItemSource + ?Sized>(
    source: &S,
    base: &Predicate,
    filter: &Predicate,
    cursor: Option<&str>,
    per_page: usize,
) -> Result<Page<Issue>> {
    let per_page = per_page.max(1);
    let boundary = cursor
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(SyncCursor::decode)
        .transpose()?;
    let direction = boundary.map_or(Direction::Next, |b| b.direction);

    let mut items = source.keyset(filter, boundary.as_ref(), per_page + 1)?;
    let has_more = items.len() > per_page;
    if has_more {
        match direction {
            Direction::Next => items.truncate(per_page),
            Direction::Prev => {
                items.drain(..items.len() - per_page);
            }
        }
    }

    let at = |issue: &Issue, direction| SyncCursor {
        updated_at: issue.updated_at,
        id: issue.id,
        direction,
    };
    let rebound = |direction| {
        boundary.map_or_else(String::new, |b| {
            SyncCursor { direction, ..b }.encode()
        })
    };
    let next_cursor = items
        .last()
        .map_or_else(|| rebound(Direction::Next), |i| at(i, Direction::Next).encode());
    let prev_cursor = items
        .first()
        .map_or_else(|| rebound(Direction::Prev), |i| at(i, Direction::Prev).encode());

    let (next_page_results, prev_page_results) = match direction {
        Direction::Next => (has_more, boundary.is_some()),
        Direction::Prev => (true, has_more),
    };

    let total = source.count(base)?;
    debug!(total, returned = items.len(), has_more, "Sync page");
    Ok(Page {
        grouped_by: None,
        sub_grouped_by: None,
        total_count: total,
        next_cursor,
        prev_cursor,
        next_page_results,
        prev_page_results,
        count: items.len(),
        total_pages: total.div_ceil(per_page),
        total_results: total,
        extra_stats: None,
        results: PageResults::Flat(items),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::group::NONE_GROUP;
    use crate::query::order::resolve;
    use chrono::Duration;
    use uuid::Uuid;

    fn issues(n: u128) -> Vec<Issue> {
        let base = crate::util::time::parse_timestamp("2024-01-01T00:00:00Z", "t").unwrap();
        (1..=n)
            .map(|i| {
                let mut issue = Issue::new(Uuid::nil(), i64::try_from(i).unwrap(), format!("#{i}"));
                issue.id = Uuid::from_u128(i);
                issue.created_at = base + Duration::minutes(i64::try_from(i).unwrap());
                issue.updated_at = issue.created_at;
                issue
            })
            .collect()
    }

    #[test]
    fn flat_pages_of_two_over_five() {
        let items = issues(5);
        let source = MemorySource::new(&items);
        let order = resolve(None);
        let mut cursor = OffsetCursor::first(2);
        let mut sizes = Vec::new();
        let mut flags = Vec::new();
        for _ in 0..3 {
            let page = paginate_flat(&source, &Predicate::True, &order, cursor).unwrap();
            sizes.push(page.count);
            flags.push(page.next_page_results);
            assert_eq!(page.total_results, 5);
            assert_eq!(page.total_pages, 3);
            cursor = page.next_cursor.parse().unwrap();
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn empty_set_is_an_empty_page() {
        let source = MemorySource::new(&[]);
        let page =
            paginate_flat(&source, &Predicate::True, &resolve(None), OffsetCursor::first(10))
                .unwrap();
        assert_eq!(page.count, 0);
        assert_eq!(page.total_pages, 0);
        assert!(!page.next_page_results);

        let sync = paginate_sync(&source, &Predicate::True, &Predicate::True, None, 10).unwrap();
        assert_eq!(sync.count, 0);
        assert_eq!(sync.next_cursor, "");
    }

    #[test]
    fn grouped_pages_slice_each_group() {
        let mut items = issues(5);
        items[0].priority = crate::model::Priority::High;
        items[1].priority = crate::model::Priority::High;
        items[2].priority = crate::model::Priority::High;
        let source = MemorySource::new(&items);
        let order = resolve(None);
        let domain = GroupSpec::Priority.static_domain().unwrap();
        let query = GroupedQuery {
            filter: &Predicate::True,
            order: &order,
            count_filter: &Predicate::True,
            group_by: GroupSpec::Priority,
            sub_group_by: None,
            domain: &domain,
            sub_domain: &[],
        };
        let page = paginate_grouped(&source, &query, OffsetCursor::first(2)).unwrap();
        let PageResults::Grouped(groups) = &page.results else {
            panic!("expected groups");
        };
        let high = groups.get("high").unwrap();
        assert_eq!(high.results.len(), 2);
        assert_eq!(high.total_results, 3);
        assert!(high.has_next);
        assert!(!groups.get("none").unwrap().has_next);
        assert!(groups.get("urgent").unwrap().results.is_empty());
        assert!(page.next_page_results);
        assert_eq!(page.total_count, 5);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.grouped_by.as_deref(), Some("priority"));
    }

    #[test]
    fn sub_grouped_pages_nest() {
        let items = issues(3);
        let source = MemorySource::new(&items);
        let order = resolve(None);
        let domain = GroupSpec::Priority.static_domain().unwrap();
        let sub_domain = vec![NONE_GROUP.to_string()];
        let query = GroupedQuery {
            filter: &Predicate::True,
            order: &order,
            count_filter: &Predicate::True,
            group_by: GroupSpec::Priority,
            sub_group_by: Some(GroupSpec::Cycle),
            domain: &domain,
            sub_domain: &sub_domain,
        };
        let page = paginate_grouped(&source, &query, OffsetCursor::first(10)).unwrap();
        let PageResults::SubGrouped(groups) = &page.results else {
            panic!("expected sub-groups");
        };
        let none = groups.get("none").unwrap();
        assert_eq!(none.total_results, 3);
        assert_eq!(none.results.get(NONE_GROUP).unwrap().results.len(), 3);
        assert_eq!(page.count, 3);
    }

    #[test]
    fn sync_walks_forward_and_back() {
        let items = issues(5);
        let source = MemorySource::new(&items);
        let first = paginate_sync(&source, &Predicate::True, &Predicate::True, None, 2).unwrap();
        assert_eq!(first.count, 2);
        assert!(first.next_page_results);

        let second = paginate_sync(
            &source,
            &Predicate::True,
            &Predicate::True,
            Some(&first.next_cursor),
            2,
        )
        .unwrap();
        let ids: Vec<u128> = second
            .flat_results()
            .unwrap()
            .iter()
            .map(|i| i.id.as_u128())
            .collect();
        assert_eq!(ids, vec![3, 4]);

        let back = paginate_sync(
            &source,
            &Predicate::True,
            &Predicate::True,
            Some(&second.prev_cursor),
            2,
        )
        .unwrap();
        let ids: Vec<u128> = back
            .flat_results()
            .unwrap()
            .iter()
            .map(|i| i.id.as_u128())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn invalid_cursors_fail() {
        let source = MemorySource::new(&[]);
        assert!(paginate_sync(&source, &Predicate::True, &Predicate::True, Some("@@"), 5).is_err());
        assert!(offset_cursor(Some("nope"), 5).is_err());
        assert_eq!(offset_cursor(Some(" "), 5).unwrap(), OffsetCursor::first(5));
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(clamp_page_size(None, 100, 1000), 100);
        assert_eq!(clamp_page_size(Some(0), 100, 1000), 1);
        assert_eq!(clamp_page_size(Some(5000), 100, 1000), 1000);
    }

    #[test]
    fn map_keeps_metadata() {
        let items = issues(3);
        let source = MemorySource::new(&items);
        let page =
            paginate_flat(&source, &Predicate::True, &resolve(None), OffsetCursor::first(2))
                .unwrap();
        let names = page.map(|i| i.name);
        assert_eq!(names.count, 2);
        assert_eq!(names.flat_results().unwrap(), ["#3", "#2"]);
    }
}
