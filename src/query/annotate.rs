//! Per-issue aggregates merged in memory.
//!
//! The store loads each aggregate with its own query keyed by issue id, so
//! joining labels, assignees and links never multiplies rows.

use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::model::Issue;

/// Aggregates for a batch of issues, keyed by issue id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub link_count: HashMap<Uuid, u32>,
    pub attachment_count: HashMap<Uuid, u32>,
    pub sub_issues_count: HashMap<Uuid, u32>,
    pub label_ids: HashMap<Uuid, BTreeSet<Uuid>>,
    pub assignee_ids: HashMap<Uuid, BTreeSet<Uuid>>,
    pub module_ids: HashMap<Uuid, BTreeSet<Uuid>>,
    pub subscriber_ids: HashMap<Uuid, BTreeSet<Uuid>>,
}

impl Annotations {
    /// Fill in one issue. Ids with no entry get zero counts and empty sets.
    pub fn apply(&self, issue: &mut Issue) {
        let id = issue.id;
        let count = |map: &HashMap<Uuid, u32>| map.get(&id).copied().unwrap_or(0);
        let set = |map: &HashMap<Uuid, BTreeSet<Uuid>>| map.get(&id).cloned().unwrap_or_default();

        issue.link_count = count(&self.link_count);
        issue.attachment_count = count(&self.attachment_count);
        issue.sub_issues_count = count(&self.sub_issues_count);
        issue.label_ids = set(&self.label_ids);
        issue.assignee_ids = set(&self.assignee_ids);
        issue.module_ids = set(&self.module_ids);
        issue.subscriber_ids = set(&self.subscriber_ids);
    }
}

/// Merge `annotations` into every item. The item count never changes.
pub fn annotate(items: &mut [Issue], annotations: &Annotations) {
    for item in items.iter_mut() {
        annotations.apply(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_by_id_and_defaults_missing() {
        let mut a = Issue::new(Uuid::nil(), 1, "a");
        a.link_count = 9;
        let b = Issue::new(Uuid::nil(), 2, "b");
        let label = Uuid::now_v7();

        let mut ann = Annotations::default();
        ann.label_ids.insert(b.id, [label].into_iter().collect());
        ann.sub_issues_count.insert(b.id, 2);

        let mut items = vec![a, b];
        annotate(&mut items, &ann);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link_count, 0);
        assert!(items[0].label_ids.is_empty());
        assert_eq!(items[1].sub_issues_count, 2);
        assert!(items[1].label_ids.contains(&label));
    }
}
