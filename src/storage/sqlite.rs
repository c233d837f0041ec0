//! `SQLite` storage implementation.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use super::activity;
use super::schema::apply_schema;
use super::sql::{ISSUE_COLUMNS, ISSUE_FROM, SqlFragment, where_clause};
use crate::access::MembershipStore;
use crate::error::{IssueError, OptionExt, Result};
use crate::model::{
    ActivityEvent, ActivityKind, Cycle, Issue, IssueAttachment, IssueLink, IssueReaction, Label,
    Module, Project, ProjectMember, Role, State, UserProperties, Visit,
};
use crate::query::annotate::{Annotations, annotate};
use crate::query::cursor::{Direction, SyncCursor};
use crate::query::group::{GroupDomain, GroupKey, GroupSpec, NONE_GROUP};
use crate::query::order::OrderSpec;
use crate::query::paginate::ItemSource;
use crate::query::predicate::Predicate;
use crate::util::time::{format_date, format_timestamp, now};
use crate::validation::ProjectCatalog;

/// SQLite has a finite variable limit (default 999); id lists are chunked
/// below it.
const SQLITE_VAR_LIMIT: usize = 900;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Context for a mutation operation, collecting the activity it produced.
pub struct MutationContext {
    pub op_name: String,
    pub actor: Uuid,
    pub activities: Vec<ActivityEvent>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: Uuid) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor,
            activities: Vec::new(),
        }
    }

    /// Queue an activity event for `issue`, dispatched once the transaction
    /// commits.
    pub fn record_activity(
        &mut self,
        kind: ActivityKind,
        issue: &Issue,
        requested_data: Option<serde_json::Value>,
        current_instance: Option<serde_json::Value>,
    ) {
        self.activities.push(ActivityEvent {
            kind,
            issue_id: issue.id,
            project_id: issue.project_id,
            actor_id: self.actor,
            requested_data,
            current_instance,
            epoch: now().timestamp(),
        });
    }
}

/// The result of a committed mutation and the activity it queued.
#[derive(Debug)]
pub struct Committed<R> {
    pub value: R,
    pub activities: Vec<ActivityEvent>,
}

/// Replacement sets for an issue's associations. `None` leaves a set alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationChanges {
    pub labels: Option<BTreeSet<Uuid>>,
    pub assignees: Option<BTreeSet<Uuid>>,
    pub modules: Option<BTreeSet<Uuid>>,
}

impl AssociationChanges {
    /// Every set taken from `issue`, as on creation.
    #[must_use]
    pub fn all_from(issue: &Issue) -> Self {
        Self {
            labels: Some(issue.label_ids.clone()),
            assignees: Some(issue.assignee_ids.clone()),
            modules: Some(issue.module_ids.clone()),
        }
    }
}

impl SqliteStorage {
    /// Open a new connection to the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a new connection with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        debug!(path = %path.display(), "Opened issue store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Database file, or `None` for an in-memory store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` in one immediate transaction. Activity recorded on the
    /// context is returned for dispatch only when the commit succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, actor: Uuid, f: F) -> Result<Committed<R>>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(op, actor);

        let value = f(&tx, &mut ctx)?;
        tx.commit()?;

        debug!(
            op = %ctx.op_name,
            actor = %ctx.actor,
            activities = ctx.activities.len(),
            "Mutation committed"
        );
        Ok(Committed {
            value,
            activities: ctx.activities,
        })
    }

    // ------------------------------------------------------------------
    // Projects and catalog
    // ------------------------------------------------------------------

    /// Insert a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. duplicate identifier).
    pub fn create_project(&mut self, project: &Project) -> Result<()> {
        self.conn.execute(
            "INSERT INTO projects (id, name, identifier, default_assignee_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project.id.to_string(),
                project.name,
                project.identifier,
                opt_id(project.default_assignee_id),
                format_timestamp(&project.created_at),
            ],
        )?;
        Ok(())
    }

    /// Set or clear a project's default assignee.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the project does not exist.
    pub fn set_default_assignee(&mut self, project_id: Uuid, assignee: Option<Uuid>) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE projects SET default_assignee_id = ?1 WHERE id = ?2",
            params![opt_id(assignee), project_id.to_string()],
        )?;
        if rows == 0 {
            return Err(IssueError::not_found("Project", project_id));
        }
        Ok(())
    }

    /// Look a project up by id or identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn find_project(&self, key: &str) -> Result<Option<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, identifier, default_assignee_id, created_at
             FROM projects WHERE id = ?1 OR identifier = ?1 COLLATE NOCASE",
        )?;
        let project = stmt
            .query_row([key.trim()], |row| {
                Ok(Project {
                    id: uuid_col(row, 0)?,
                    name: row.get(1)?,
                    identifier: row.get(2)?,
                    default_assignee_id: opt_uuid_col(row, 3)?,
                    created_at: timestamp_col(row, 4)?,
                })
            })
            .optional()?;
        Ok(project)
    }

    /// # Errors
    ///
    /// Returns `NotFound` if no project has this id.
    pub fn get_project(&self, id: Uuid) -> Result<Project> {
        self.find_project(&id.to_string())?
            .ok_or_not_found("Project", id)
    }

    /// Insert or replace a membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn upsert_member(&mut self, member: &ProjectMember) -> Result<()> {
        self.conn.execute(
            "INSERT INTO project_members (project_id, member_id, role, is_active)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, member_id) DO UPDATE SET
                role = excluded.role, is_active = excluded.is_active",
            params![
                member.project_id.to_string(),
                member.member_id.to_string(),
                member.role.as_i64(),
                i64::from(member.is_active),
            ],
        )?;
        Ok(())
    }

    /// All memberships of a project, active first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_members(&self, project_id: Uuid) -> Result<Vec<ProjectMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, member_id, role, is_active FROM project_members
             WHERE project_id = ?1 ORDER BY is_active DESC, member_id",
        )?;
        let members = stmt
            .query_map([project_id.to_string()], member_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_state(&mut self, state: &State) -> Result<()> {
        self.conn.execute(
            "INSERT INTO states (id, project_id, name, group_name, sequence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state.id.to_string(),
                state.project_id.to_string(),
                state.name,
                state.group.as_str(),
                state.sequence,
            ],
        )?;
        Ok(())
    }

    /// States of a project by sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_states(&self, project_id: Uuid) -> Result<Vec<State>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, group_name, sequence FROM states
             WHERE project_id = ?1 ORDER BY sequence, id",
        )?;
        let states = stmt
            .query_map([project_id.to_string()], state_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_label(&mut self, label: &Label) -> Result<()> {
        self.conn.execute(
            "INSERT INTO labels (id, project_id, name) VALUES (?1, ?2, ?3)",
            params![label.id.to_string(), label.project_id.to_string(), label.name],
        )?;
        Ok(())
    }

    /// Labels of a project by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_labels(&self, project_id: Uuid) -> Result<Vec<Label>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name FROM labels
             WHERE project_id = ?1 ORDER BY name COLLATE NOCASE, id",
        )?;
        let labels = stmt
            .query_map([project_id.to_string()], |row| {
                Ok(Label {
                    id: uuid_col(row, 0)?,
                    project_id: uuid_col(row, 1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_module(&mut self, module: &Module) -> Result<()> {
        self.conn.execute(
            "INSERT INTO modules (id, project_id, name, archived_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                module.id.to_string(),
                module.project_id.to_string(),
                module.name,
                module.archived_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// Archive a module. Its issues drop out of module annotations and
    /// module groups.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the module does not exist.
    pub fn archive_module(&mut self, module_id: Uuid) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE modules SET archived_at = ?1 WHERE id = ?2 AND archived_at IS NULL",
            params![format_timestamp(&now()), module_id.to_string()],
        )?;
        if rows == 0 {
            return Err(IssueError::not_found("Module", module_id));
        }
        Ok(())
    }

    /// Modules of a project by name, archived ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_modules(&self, project_id: Uuid) -> Result<Vec<Module>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, archived_at FROM modules
             WHERE project_id = ?1 ORDER BY name COLLATE NOCASE, id",
        )?;
        let modules = stmt
            .query_map([project_id.to_string()], |row| {
                Ok(Module {
                    id: uuid_col(row, 0)?,
                    project_id: uuid_col(row, 1)?,
                    name: row.get(2)?,
                    archived_at: opt_timestamp_col(row, 3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(modules)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_cycle(&mut self, cycle: &Cycle) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cycles (id, project_id, name) VALUES (?1, ?2, ?3)",
            params![cycle.id.to_string(), cycle.project_id.to_string(), cycle.name],
        )?;
        Ok(())
    }

    /// Cycles of a project by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_cycles(&self, project_id: Uuid) -> Result<Vec<Cycle>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name FROM cycles
             WHERE project_id = ?1 ORDER BY name COLLATE NOCASE, id",
        )?;
        let cycles = stmt
            .query_map([project_id.to_string()], |row| {
                Ok(Cycle {
                    id: uuid_col(row, 0)?,
                    project_id: uuid_col(row, 1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cycles)
    }

    // ------------------------------------------------------------------
    // Issues
    // ------------------------------------------------------------------

    /// Get an issue by ID, soft-deleted or not, without annotations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: Uuid) -> Result<Option<Issue>> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i LEFT JOIN states s ON s.id = i.state_id
             WHERE i.id = ?1"
        );
        let issue = self
            .conn
            .query_row(&sql, [id.to_string()], issue_from_row)
            .optional()?;
        Ok(issue)
    }

    /// A live issue of `project_id`, annotated.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is missing, deleted, or in
    /// another project.
    pub fn get_live_issue(&self, project_id: Uuid, id: Uuid) -> Result<Issue> {
        let mut issue = self
            .get_issue(id)?
            .filter(|i| i.is_live() && i.project_id == project_id)
            .ok_or_issue_not_found(id)?;
        let annotations = self.load_annotations(&[issue.id])?;
        annotations.apply(&mut issue);
        Ok(issue)
    }

    /// Insert `issue` with the next sequence id of its project.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_issue(
        &mut self,
        mut issue: Issue,
        actor: Uuid,
        requested: Option<serde_json::Value>,
    ) -> Result<Committed<Issue>> {
        self.mutate("create_issue", actor, |tx, ctx| {
            issue.sequence_id = next_sequence_id(tx, issue.project_id)?;
            insert_issue_row(tx, &issue)?;
            write_associations(tx, issue.id, &AssociationChanges::all_from(&issue))?;
            ctx.record_activity(ActivityKind::Created, &issue, requested, None);
            trace!(id = %issue.id, sequence_id = issue.sequence_id, "Inserted issue");
            Ok(issue)
        })
    }

    /// Write `after` over the stored row and replace the changed
    /// association sets.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the row vanished, or a database error.
    pub fn update_issue(
        &mut self,
        before: &Issue,
        after: &Issue,
        changes: &AssociationChanges,
        actor: Uuid,
        requested: Option<serde_json::Value>,
    ) -> Result<Committed<()>> {
        let current = serde_json::to_value(before)?;
        self.mutate("update_issue", actor, |tx, ctx| {
            let rows = update_issue_row(tx, after)?;
            if rows == 0 {
                return Err(IssueError::IssueNotFound {
                    id: after.id.to_string(),
                });
            }
            write_associations(tx, after.id, changes)?;
            ctx.record_activity(ActivityKind::Updated, after, requested, Some(current));
            Ok(())
        })
    }

    /// Soft-delete one issue.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue is not live.
    pub fn delete_issue(&mut self, issue: &Issue, actor: Uuid) -> Result<Committed<()>> {
        let current = serde_json::to_value(issue)?;
        self.mutate("delete_issue", actor, |tx, ctx| {
            let stamp = format_timestamp(&now());
            let rows = tx.execute(
                "UPDATE issues SET deleted_at = ?1, updated_at = ?1, updated_by = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![stamp, actor.to_string(), issue.id.to_string()],
            )?;
            if rows == 0 {
                return Err(IssueError::IssueNotFound {
                    id: issue.id.to_string(),
                });
            }
            ctx.record_activity(ActivityKind::Deleted, issue, None, Some(current));
            Ok(())
        })
    }

    /// Soft-delete the live issues of `project_id` among `ids`, all or
    /// nothing. Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is deleted then.
    pub fn bulk_delete(
        &mut self,
        project_id: Uuid,
        ids: &[Uuid],
        actor: Uuid,
    ) -> Result<Committed<usize>> {
        let wanted: Vec<String> = ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        self.mutate("bulk_delete", actor, |tx, ctx| {
            let stamp = format_timestamp(&now());
            let mut deleted = 0;
            for chunk in wanted.chunks(SQLITE_VAR_LIMIT) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let live_sql = format!(
                    "SELECT {ISSUE_COLUMNS} {ISSUE_FROM} AND i.project_id = ? AND i.id IN ({placeholders})"
                );
                let mut live_params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
                let project = project_id.to_string();
                live_params.push(&project);
                live_params.extend(chunk.iter().map(|s| s as &dyn rusqlite::ToSql));
                let live: Vec<Issue> = tx
                    .prepare(&live_sql)?
                    .query_map(live_params.as_slice(), issue_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                for issue in &live {
                    tx.execute(
                        "UPDATE issues SET deleted_at = ?1, updated_at = ?1, updated_by = ?2
                         WHERE id = ?3",
                        params![stamp, actor.to_string(), issue.id.to_string()],
                    )?;
                    let current = serde_json::to_value(issue)?;
                    ctx.record_activity(ActivityKind::Deleted, issue, None, Some(current));
                }
                deleted += live.len();
            }
            Ok(deleted)
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Live issues matching `filter`, ordered and sliced, annotated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn fetch(
        &self,
        filter: &Predicate,
        order: &OrderSpec,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        let mut frag = where_clause(filter);
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} {ISSUE_FROM} AND {} {} LIMIT ? OFFSET ?",
            frag.sql,
            order.to_sql()
        );
        frag.params.push(Box::new(limit));
        frag.params.push(Box::new(offset));
        self.query_annotated(&sql, &frag)
    }

    /// Number of live issues matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_matching(&self, filter: &Predicate) -> Result<usize> {
        let frag = where_clause(filter);
        let sql = format!("SELECT COUNT(*) {ISSUE_FROM} AND {}", frag.sql);
        let count: i64 = self
            .conn
            .query_row(&sql, frag.param_refs().as_slice(), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Keyset read in `(updated_at, id)` order, returned ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn fetch_after(
        &self,
        filter: &Predicate,
        boundary: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        let mut frag = where_clause(filter);
        let mut sql = format!("SELECT {ISSUE_COLUMNS} {ISSUE_FROM} AND {}", frag.sql);
        let descending = boundary.is_some_and(|b| b.direction == Direction::Prev);
        if let Some(b) = boundary {
            let op = if descending { "<" } else { ">" };
            sql.push_str(&format!(
                " AND (i.updated_at {op} ? OR (i.updated_at = ? AND i.id {op} ?))"
            ));
            let key = format_timestamp(&b.updated_at);
            frag.params.push(Box::new(key.clone()));
            frag.params.push(Box::new(key));
            frag.params.push(Box::new(b.id.to_string()));
        }
        if descending {
            sql.push_str(" ORDER BY i.updated_at DESC, i.id DESC LIMIT ?");
        } else {
            sql.push_str(" ORDER BY i.updated_at ASC, i.id ASC LIMIT ?");
        }
        frag.params.push(Box::new(limit));

        let mut items = self.query_annotated(&sql, &frag)?;
        if descending {
            items.reverse();
        }
        Ok(items)
    }

    fn query_annotated(&self, sql: &str, frag: &SqlFragment) -> Result<Vec<Issue>> {
        trace!(sql, params = frag.params.len(), "Issue query");
        let mut stmt = self.conn.prepare(sql)?;
        let mut items = stmt
            .query_map(frag.param_refs().as_slice(), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let annotations = self.load_annotations(&ids)?;
        annotate(&mut items, &annotations);
        Ok(items)
    }

    /// Load every aggregate for `ids`, one query per aggregate per chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if a database query fails.
    pub fn load_annotations(&self, ids: &[Uuid]) -> Result<Annotations> {
        let mut ann = Annotations::default();
        if ids.is_empty() {
            return Ok(ann);
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();

        self.load_counts(
            "SELECT issue_id, COUNT(*) FROM issue_links WHERE issue_id IN ({ids}) GROUP BY issue_id",
            &ids,
            &mut ann.link_count,
        )?;
        self.load_counts(
            "SELECT issue_id, COUNT(*) FROM issue_attachments WHERE issue_id IN ({ids}) GROUP BY issue_id",
            &ids,
            &mut ann.attachment_count,
        )?;
        self.load_counts(
            "SELECT parent_id, COUNT(*) FROM issues
             WHERE deleted_at IS NULL AND parent_id IN ({ids}) GROUP BY parent_id",
            &ids,
            &mut ann.sub_issues_count,
        )?;
        self.load_sets(
            "SELECT issue_id, label_id FROM issue_labels WHERE issue_id IN ({ids})",
            &ids,
            &mut ann.label_ids,
        )?;
        self.load_sets(
            "SELECT issue_id, assignee_id FROM active_issue_assignees WHERE issue_id IN ({ids})",
            &ids,
            &mut ann.assignee_ids,
        )?;
        self.load_sets(
            "SELECT issue_id, module_id FROM live_issue_modules WHERE issue_id IN ({ids})",
            &ids,
            &mut ann.module_ids,
        )?;
        self.load_sets(
            "SELECT issue_id, subscriber_id FROM issue_subscribers WHERE issue_id IN ({ids})",
            &ids,
            &mut ann.subscriber_ids,
        )?;
        Ok(ann)
    }

    fn load_counts(
        &self,
        template: &str,
        ids: &[String],
        into: &mut HashMap<Uuid, u32>,
    ) -> Result<()> {
        for chunk in ids.chunks(SQLITE_VAR_LIMIT) {
            let sql = template.replace("{ids}", &vec!["?"; chunk.len()].join(","));
            let params: Vec<&dyn rusqlite::ToSql> =
                chunk.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params.as_slice(), |row| {
                Ok((uuid_col(row, 0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (id, count) = row?;
                into.insert(id, count);
            }
        }
        Ok(())
    }

    fn load_sets(
        &self,
        template: &str,
        ids: &[String],
        into: &mut HashMap<Uuid, BTreeSet<Uuid>>,
    ) -> Result<()> {
        for chunk in ids.chunks(SQLITE_VAR_LIMIT) {
            let sql = template.replace("{ids}", &vec!["?"; chunk.len()].join(","));
            let params: Vec<&dyn rusqlite::ToSql> =
                chunk.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params.as_slice(), |row| {
                Ok((uuid_col(row, 0)?, uuid_col(row, 1)?))
            })?;
            for row in rows {
                let (id, value) = row?;
                into.entry(id).or_default().insert(value);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Detail sub-resources
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_link(&mut self, link: &IssueLink) -> Result<()> {
        self.conn.execute(
            "INSERT INTO issue_links (id, issue_id, url, title, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.id.to_string(),
                link.issue_id.to_string(),
                link.url,
                link.title,
                opt_id(link.created_by),
                format_timestamp(&link.created_at),
            ],
        )?;
        Ok(())
    }

    /// Links of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_links(&self, issue_id: Uuid) -> Result<Vec<IssueLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, url, title, created_by, created_at FROM issue_links
             WHERE issue_id = ?1 ORDER BY created_at, id",
        )?;
        let links = stmt
            .query_map([issue_id.to_string()], |row| {
                Ok(IssueLink {
                    id: uuid_col(row, 0)?,
                    issue_id: uuid_col(row, 1)?,
                    url: row.get(2)?,
                    title: row.get(3)?,
                    created_by: opt_uuid_col(row, 4)?,
                    created_at: timestamp_col(row, 5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_attachment(&mut self, attachment: &IssueAttachment) -> Result<()> {
        self.conn.execute(
            "INSERT INTO issue_attachments (id, issue_id, asset, size, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attachment.id.to_string(),
                attachment.issue_id.to_string(),
                attachment.asset,
                attachment.size,
                opt_id(attachment.created_by),
                format_timestamp(&attachment.created_at),
            ],
        )?;
        Ok(())
    }

    /// Attachments of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_attachments(&self, issue_id: Uuid) -> Result<Vec<IssueAttachment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, asset, size, created_by, created_at FROM issue_attachments
             WHERE issue_id = ?1 ORDER BY created_at, id",
        )?;
        let attachments = stmt
            .query_map([issue_id.to_string()], |row| {
                Ok(IssueAttachment {
                    id: uuid_col(row, 0)?,
                    issue_id: uuid_col(row, 1)?,
                    asset: row.get(2)?,
                    size: row.get(3)?,
                    created_by: opt_uuid_col(row, 4)?,
                    created_at: timestamp_col(row, 5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(attachments)
    }

    /// Add a reaction; a repeated reaction by the same actor is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn add_reaction(&mut self, reaction: &IssueReaction) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO issue_reactions (id, issue_id, actor_id, reaction, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reaction.id.to_string(),
                reaction.issue_id.to_string(),
                reaction.actor_id.to_string(),
                reaction.reaction,
                format_timestamp(&reaction.created_at),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Reactions of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn list_reactions(&self, issue_id: Uuid) -> Result<Vec<IssueReaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, actor_id, reaction, created_at FROM issue_reactions
             WHERE issue_id = ?1 ORDER BY created_at, id",
        )?;
        let reactions = stmt
            .query_map([issue_id.to_string()], |row| {
                Ok(IssueReaction {
                    id: uuid_col(row, 0)?,
                    issue_id: uuid_col(row, 1)?,
                    actor_id: uuid_col(row, 2)?,
                    reaction: row.get(3)?,
                    created_at: timestamp_col(row, 4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reactions)
    }

    /// Subscribe a user to an issue. Returns false if already subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn subscribe(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO issue_subscribers (issue_id, subscriber_id) VALUES (?1, ?2)",
            params![issue_id.to_string(), user_id.to_string()],
        )?;
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------
    // User properties
    // ------------------------------------------------------------------

    /// Stored preferences of a user in a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored document is malformed.
    pub fn get_user_properties(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<UserProperties>> {
        let row = self
            .conn
            .query_row(
                "SELECT filters, display_filters, display_properties FROM user_properties
                 WHERE user_id = ?1 AND project_id = ?2",
                params![user_id.to_string(), project_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(filters, display_filters, display_properties)| {
            Ok(UserProperties {
                user_id,
                project_id,
                filters: serde_json::from_str(&filters)?,
                display_filters: serde_json::from_str(&display_filters)?,
                display_properties: serde_json::from_str(&display_properties)?,
            })
        })
        .transpose()
    }

    /// Insert or replace preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn save_user_properties(&mut self, props: &UserProperties) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_properties
                (user_id, project_id, filters, display_filters, display_properties)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, project_id) DO UPDATE SET
                filters = excluded.filters,
                display_filters = excluded.display_filters,
                display_properties = excluded.display_properties",
            params![
                props.user_id.to_string(),
                props.project_id.to_string(),
                serde_json::to_string(&props.filters)?,
                serde_json::to_string(&props.display_filters)?,
                serde_json::to_string(&props.display_properties)?,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Activity and visits
    // ------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_activity(&self, event: &ActivityEvent) -> Result<()> {
        activity::insert_activity(&self.conn, event).map(|_| ())
    }

    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub fn record_visit(&self, visit: &Visit) -> Result<()> {
        activity::upsert_visit(&self.conn, visit)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_activities(&self, issue_id: Uuid) -> Result<Vec<ActivityEvent>> {
        activity::list_activities(&self.conn, issue_id)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_visits(&self, user_id: Uuid, limit: usize) -> Result<Vec<Visit>> {
        activity::recent_visits(&self.conn, user_id, limit)
    }

    fn id_column(&self, sql: &str, project_id: Uuid) -> Result<Vec<GroupKey>> {
        let mut stmt = self.conn.prepare(sql)?;
        let keys = stmt
            .query_map([project_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn existing_ids(&self, template: &str, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(SQLITE_VAR_LIMIT) {
            let sql = template.replace("{ids}", &vec!["?"; chunk.len()].join(","));
            let mut owned: Vec<String> = Vec::with_capacity(chunk.len() + 1);
            owned.push(project_id.to_string());
            owned.extend(chunk.iter().map(ToString::to_string));
            let params: Vec<&dyn rusqlite::ToSql> =
                owned.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params.as_slice(), |row| uuid_col(row, 0))?;
            for row in rows {
                found.insert(row?);
            }
        }
        Ok(found)
    }
}

impl ItemSource for SqliteStorage {
    fn count(&self, filter: &Predicate) -> Result<usize> {
        self.count_matching(filter)
    }

    fn slice(
        &self,
        filter: &Predicate,
        order: &OrderSpec,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        self.fetch(filter, order, offset, limit)
    }

    fn keyset(
        &self,
        filter: &Predicate,
        boundary: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        self.fetch_after(filter, boundary, limit)
    }
}

impl GroupDomain for SqliteStorage {
    fn group_values(&self, project_id: Uuid, spec: GroupSpec) -> Result<Vec<GroupKey>> {
        if let Some(domain) = spec.static_domain() {
            return Ok(domain);
        }
        let sql = match spec {
            GroupSpec::State => {
                "SELECT id FROM states WHERE project_id = ?1 ORDER BY sequence, id"
            }
            GroupSpec::Labels => {
                "SELECT id FROM labels WHERE project_id = ?1 ORDER BY name COLLATE NOCASE, id"
            }
            GroupSpec::Assignees | GroupSpec::CreatedBy => {
                "SELECT member_id FROM project_members
                 WHERE project_id = ?1 AND is_active = 1 ORDER BY member_id"
            }
            GroupSpec::Modules => {
                "SELECT id FROM modules WHERE project_id = ?1 AND archived_at IS NULL
                 ORDER BY name COLLATE NOCASE, id"
            }
            GroupSpec::Cycle => {
                "SELECT id FROM cycles WHERE project_id = ?1 ORDER BY name COLLATE NOCASE, id"
            }
            GroupSpec::Parent => {
                "SELECT DISTINCT parent_id FROM issues
                 WHERE project_id = ?1 AND deleted_at IS NULL AND parent_id IS NOT NULL
                 ORDER BY parent_id"
            }
            GroupSpec::StartDate => {
                "SELECT DISTINCT start_date FROM issues
                 WHERE project_id = ?1 AND deleted_at IS NULL AND start_date IS NOT NULL
                 ORDER BY start_date"
            }
            GroupSpec::TargetDate => {
                "SELECT DISTINCT target_date FROM issues
                 WHERE project_id = ?1 AND deleted_at IS NULL AND target_date IS NOT NULL
                 ORDER BY target_date"
            }
            GroupSpec::Priority | GroupSpec::StateGroup => unreachable_static(spec)?,
        };
        let mut keys = self.id_column(sql, project_id)?;
        keys.push(NONE_GROUP.to_string());
        debug!(group_by = %spec, keys = keys.len(), "Loaded group domain");
        Ok(keys)
    }
}

fn unreachable_static(spec: GroupSpec) -> Result<&'static str> {
    Err(IssueError::Other(anyhow::anyhow!(
        "group domain for {spec} is static"
    )))
}

impl MembershipStore for SqliteStorage {
    fn membership(&self, project_id: Uuid, user_id: Uuid) -> Result<Option<ProjectMember>> {
        let member = self
            .conn
            .query_row(
                "SELECT project_id, member_id, role, is_active FROM project_members
                 WHERE project_id = ?1 AND member_id = ?2",
                params![project_id.to_string(), user_id.to_string()],
                member_from_row,
            )
            .optional()?;
        Ok(member)
    }
}

impl ProjectCatalog for SqliteStorage {
    fn project_state(&self, project_id: Uuid, state_id: Uuid) -> Result<Option<State>> {
        let state = self
            .conn
            .query_row(
                "SELECT id, project_id, name, group_name, sequence FROM states
                 WHERE id = ?1 AND project_id = ?2",
                params![state_id.to_string(), project_id.to_string()],
                state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    fn known_labels(&self, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        self.existing_ids(
            "SELECT id FROM labels WHERE project_id = ? AND id IN ({ids})",
            project_id,
            ids,
        )
    }

    fn known_modules(&self, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        self.existing_ids(
            "SELECT id FROM modules WHERE project_id = ? AND archived_at IS NULL AND id IN ({ids})",
            project_id,
            ids,
        )
    }

    fn active_members(&self, project_id: Uuid, ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        self.existing_ids(
            "SELECT member_id FROM project_members
             WHERE project_id = ? AND is_active = 1 AND member_id IN ({ids})",
            project_id,
            ids,
        )
    }

    fn cycle_exists(&self, project_id: Uuid, cycle_id: Uuid) -> Result<bool> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM cycles WHERE id = ?1 AND project_id = ?2")?
            .exists(params![cycle_id.to_string(), project_id.to_string()])?;
        Ok(exists)
    }

    fn parent_of(&self, project_id: Uuid, issue_id: Uuid) -> Result<Option<Option<Uuid>>> {
        let parent = self
            .conn
            .query_row(
                "SELECT parent_id FROM issues
                 WHERE id = ?1 AND project_id = ?2 AND deleted_at IS NULL",
                params![issue_id.to_string(), project_id.to_string()],
                |row| opt_uuid_col(row, 0),
            )
            .optional()?;
        Ok(parent)
    }
}

// ----------------------------------------------------------------------
// Row helpers
// ----------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn timestamp_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_timestamp_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(idx, e))
        })
        .transpose()
}

fn opt_date_col(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn opt_text(row: &Row, idx: usize) -> rusqlite::Result<Option<String>> {
    row.get(idx)
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn issue_from_row(row: &Row) -> rusqlite::Result<Issue> {
    let priority = row
        .get::<_, String>(7)?
        .parse()
        .map_err(|e| conversion_error(7, e))?;
    let state_group = row
        .get::<_, Option<String>>(6)?
        .map(|g| g.parse().map_err(|e| conversion_error(6, e)))
        .transpose()?;
    Ok(Issue {
        id: uuid_col(row, 0)?,
        project_id: uuid_col(row, 1)?,
        sequence_id: row.get(2)?,
        name: row.get(3)?,
        description_html: row.get(4)?,
        state_id: opt_uuid_col(row, 5)?,
        state_group,
        priority,
        sort_order: row.get(8)?,
        start_date: opt_date_col(row, 9)?,
        target_date: opt_date_col(row, 10)?,
        completed_at: opt_timestamp_col(row, 11)?,
        parent_id: opt_uuid_col(row, 12)?,
        cycle_id: opt_uuid_col(row, 13)?,
        created_at: timestamp_col(row, 14)?,
        updated_at: timestamp_col(row, 15)?,
        created_by: opt_uuid_col(row, 16)?,
        updated_by: opt_uuid_col(row, 17)?,
        archived_at: opt_timestamp_col(row, 18)?,
        deleted_at: opt_timestamp_col(row, 19)?,
        is_draft: row.get::<_, i64>(20)? != 0,
        // Loaded separately by the annotator
        label_ids: BTreeSet::new(),
        assignee_ids: BTreeSet::new(),
        module_ids: BTreeSet::new(),
        subscriber_ids: BTreeSet::new(),
        sub_issues_count: 0,
        link_count: 0,
        attachment_count: 0,
    })
}

fn member_from_row(row: &Row) -> rusqlite::Result<ProjectMember> {
    let raw_role: i64 = row.get(2)?;
    let role = Role::from_i64(raw_role).ok_or_else(|| {
        conversion_error(
            2,
            IssueError::validation("role", format!("'{raw_role}' is not a valid role")),
        )
    })?;
    Ok(ProjectMember {
        project_id: uuid_col(row, 0)?,
        member_id: uuid_col(row, 1)?,
        role,
        is_active: row.get::<_, i64>(3)? != 0,
    })
}

fn state_from_row(row: &Row) -> rusqlite::Result<State> {
    let group = row
        .get::<_, String>(3)?
        .parse()
        .map_err(|e| conversion_error(3, e))?;
    Ok(State {
        id: uuid_col(row, 0)?,
        project_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        group,
        sequence: row.get(4)?,
    })
}

// ----------------------------------------------------------------------
// In-transaction writes
// ----------------------------------------------------------------------

fn next_sequence_id(tx: &Transaction<'_>, project_id: Uuid) -> Result<i64> {
    let next = tx.query_row(
        "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM issues WHERE project_id = ?1",
        [project_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn insert_issue_row(tx: &Transaction<'_>, issue: &Issue) -> Result<()> {
    tx.execute(
        "INSERT INTO issues (
            id, project_id, sequence_id, name, description_html, state_id, priority,
            sort_order, start_date, target_date, completed_at, parent_id, cycle_id,
            created_at, updated_at, created_by, updated_by, archived_at, deleted_at, is_draft
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
        )",
        params![
            issue.id.to_string(),
            issue.project_id.to_string(),
            issue.sequence_id,
            issue.name,
            issue.description_html,
            opt_id(issue.state_id),
            issue.priority.as_str(),
            issue.sort_order,
            issue.start_date.map(format_date),
            issue.target_date.map(format_date),
            issue.completed_at.as_ref().map(format_timestamp),
            opt_id(issue.parent_id),
            opt_id(issue.cycle_id),
            format_timestamp(&issue.created_at),
            format_timestamp(&issue.updated_at),
            opt_id(issue.created_by),
            opt_id(issue.updated_by),
            issue.archived_at.as_ref().map(format_timestamp),
            issue.deleted_at.as_ref().map(format_timestamp),
            i64::from(issue.is_draft),
        ],
    )?;
    Ok(())
}

fn update_issue_row(tx: &Transaction<'_>, issue: &Issue) -> Result<usize> {
    let rows = tx.execute(
        "UPDATE issues SET
            name = ?2, description_html = ?3, state_id = ?4, priority = ?5, sort_order = ?6,
            start_date = ?7, target_date = ?8, completed_at = ?9, parent_id = ?10,
            cycle_id = ?11, updated_at = ?12, updated_by = ?13, archived_at = ?14, is_draft = ?15
         WHERE id = ?1 AND deleted_at IS NULL",
        params![
            issue.id.to_string(),
            issue.name,
            issue.description_html,
            opt_id(issue.state_id),
            issue.priority.as_str(),
            issue.sort_order,
            issue.start_date.map(format_date),
            issue.target_date.map(format_date),
            issue.completed_at.as_ref().map(format_timestamp),
            opt_id(issue.parent_id),
            opt_id(issue.cycle_id),
            format_timestamp(&issue.updated_at),
            opt_id(issue.updated_by),
            issue.archived_at.as_ref().map(format_timestamp),
            i64::from(issue.is_draft),
        ],
    )?;
    Ok(rows)
}

fn write_associations(
    tx: &Transaction<'_>,
    issue_id: Uuid,
    changes: &AssociationChanges,
) -> Result<()> {
    let targets = [
        ("issue_labels", "label_id", changes.labels.as_ref()),
        ("issue_assignees", "assignee_id", changes.assignees.as_ref()),
        ("issue_modules", "module_id", changes.modules.as_ref()),
    ];
    for (table, column, ids) in targets {
        let Some(ids) = ids else { continue };
        tx.execute(
            &format!("DELETE FROM {table} WHERE issue_id = ?1"),
            [issue_id.to_string()],
        )?;
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {table} (issue_id, {column}) VALUES (?1, ?2)"
        ))?;
        for id in ids {
            stmt.execute(params![issue_id.to_string(), id.to_string()])?;
        }
    }
    Ok(())
}
