//! Issue operations for an acting user in one project.
//!
//! Every operation checks access first, then compiles and runs its query
//! against the store, and finally hands side effects to the configured
//! sinks. The sinks never fail an operation.

mod payload;

pub use payload::{IssueCreate, IssuePatch};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::access::{Action, GuestVisibility, ensure_access};
use crate::effects::{ActivitySink, LogSink, VisitRecorder};
use crate::error::{IssueError, Result};
use crate::format::{IssueDetail, IssueView};
use crate::model::{
    ActivityEvent, Issue, IssueAttachment, IssueLink, IssueReaction, Priority, StateGroup,
    UserProperties, UserPropertiesPatch, Visit, VisitEntity,
};
use crate::query::{
    DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE, Field, FilterCompiler, FilterMode, FilterParams,
    Group, GroupDomain, GroupedQuery, Groups, NONE_GROUP, Page, Predicate, Value,
    clamp_page_size, count_filter, group, offset_cursor, paginate_flat, paginate_grouped,
    paginate_sync, resolve, validate_group_specs,
};
use crate::storage::{AssociationChanges, SqliteStorage};
use crate::util::time::{UserTimezone, now, to_user_timezone};
use crate::validation::{IssueValidator, ProjectCatalog};

/// The acting user and the project they act in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub project_id: Uuid,
}

impl RequestContext {
    #[must_use]
    pub const fn new(user_id: Uuid, project_id: Uuid) -> Self {
        Self {
            user_id,
            project_id,
        }
    }
}

/// Tunables resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub timezone: UserTimezone,
    pub page_size: usize,
    pub max_page_size: usize,
    pub sync_page_size: usize,
    pub guest_visibility: GuestVisibility,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            timezone: UserTimezone::Utc,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            sync_page_size: DEFAULT_PAGE_SIZE,
            guest_visibility: GuestVisibility::OwnIssuesOnly,
        }
    }
}

/// Parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub params: FilterParams,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
    pub sub_group_by: Option<String>,
    pub cursor: Option<String>,
    pub per_page: Option<usize>,
}

/// Parameters of a sync export request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub cursor: Option<String>,
    pub updated_since: Option<DateTime<Utc>>,
    pub include_description: bool,
    pub per_page: Option<usize>,
}

/// Unpaginated result of a by-id listing.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum Listing {
    Flat(Vec<IssueView>),
    Grouped(Groups<Vec<IssueView>>),
    SubGrouped(Groups<Groups<Vec<IssueView>>>),
}

/// Issue operations over one store.
pub struct IssueService {
    storage: SqliteStorage,
    settings: ServiceSettings,
    activity: Arc<dyn ActivitySink>,
    visits: Arc<dyn VisitRecorder>,
}

impl IssueService {
    /// A service with default settings whose side effects are only logged.
    #[must_use]
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            settings: ServiceSettings::default(),
            activity: Arc::new(LogSink),
            visits: Arc::new(LogSink),
        }
    }

    #[must_use]
    pub const fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_effects(
        mut self,
        activity: Arc<dyn ActivitySink>,
        visits: Arc<dyn VisitRecorder>,
    ) -> Self {
        self.activity = activity;
        self.visits = visits;
        self
    }

    #[must_use]
    pub const fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub const fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    #[must_use]
    pub const fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// Filtered, ordered, optionally grouped page of issues.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-members, `Conflict` when both group specs name
    /// the same field, `Validation` for bad parameters and `InvalidCursor`
    /// for an undecodable cursor.
    #[instrument(level = "debug", skip(self, request), fields(project = %ctx.project_id))]
    pub fn list_issues(&self, ctx: &RequestContext, request: &ListRequest) -> Result<Page<IssueView>> {
        let member = ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::List, None)?;
        let (group_by, sub_group_by) =
            validate_group_specs(request.group_by.as_deref(), request.sub_group_by.as_deref())?;

        let compiled = self.compile(ctx, &request.params)?;
        let filter = Predicate::and([
            project_scope(ctx.project_id),
            compiled,
            self.settings.guest_visibility.predicate(member.as_ref()),
        ]);
        let order = resolve(request.order_by.as_deref());

        self.visits.record(Visit {
            user_id: ctx.user_id,
            project_id: ctx.project_id,
            entity: VisitEntity::Project,
            entity_id: ctx.project_id,
            visited_at: now(),
        });

        let per_page = clamp_page_size(
            request.per_page,
            self.settings.page_size,
            self.settings.max_page_size,
        );
        let mut cursor = offset_cursor(request.cursor.as_deref(), per_page)?;
        cursor.per_page = cursor.per_page.clamp(1, self.settings.max_page_size.max(1));

        let page = if let Some(group_by) = group_by {
            let domain = self.storage.group_values(ctx.project_id, group_by)?;
            let sub_domain = match sub_group_by {
                Some(sub) => self.storage.group_values(ctx.project_id, sub)?,
                None => Vec::new(),
            };
            let count_filter = count_filter();
            let query = GroupedQuery {
                filter: &filter,
                order: &order,
                count_filter: &count_filter,
                group_by,
                sub_group_by,
                domain: &domain,
                sub_domain: &sub_domain,
            };
            paginate_grouped(&self.storage, &query, cursor)?
        } else {
            paginate_flat(&self.storage, &filter, &order, cursor)?
        };

        debug!(
            order_by = order.effective_order_by(),
            total = page.total_count,
            count = page.count,
            "Listed issues"
        );
        let tz = self.settings.timezone;
        Ok(page.map(|issue| IssueView::new(issue, tz, false)))
    }

    /// The issues named by the `issues` parameter, filtered and ordered,
    /// grouped in memory when asked.
    ///
    /// # Errors
    ///
    /// `Validation` when `issues` is missing or empty, plus the errors of
    /// [`Self::list_issues`].
    pub fn list_issues_by_ids(&self, ctx: &RequestContext, request: &ListRequest) -> Result<Listing> {
        let member = ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::List, None)?;
        let requested = request
            .params
            .get("issues")
            .map(String::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if requested.is_empty() {
            return Err(IssueError::validation("issues", "is required"));
        }
        let (group_by, sub_group_by) =
            validate_group_specs(request.group_by.as_deref(), request.sub_group_by.as_deref())?;

        let filter = Predicate::and([
            project_scope(ctx.project_id),
            self.compile(ctx, &request.params)?,
            self.settings.guest_visibility.predicate(member.as_ref()),
        ]);
        let order = resolve(request.order_by.as_deref());
        let total = self.storage.count_matching(&filter)?;
        let items = self.storage.fetch(&filter, &order, 0, total)?;

        let tz = self.settings.timezone;
        let view = |items: Vec<Issue>| -> Vec<IssueView> {
            items
                .into_iter()
                .map(|issue| IssueView::new(issue, tz, false))
                .collect()
        };
        let Some(group_by) = group_by else {
            return Ok(Listing::Flat(view(items)));
        };

        let domain = self.storage.group_values(ctx.project_id, group_by)?;
        let sub_domain = match sub_group_by {
            Some(sub) => self.storage.group_values(ctx.project_id, sub)?,
            None => Vec::new(),
        };
        let grouped = group(&items, group_by, sub_group_by, &domain, &sub_domain);
        if sub_group_by.is_some() {
            Ok(Listing::SubGrouped(grouped.map(|g| match g {
                Group::SubGroups(subs) => subs.map(&view),
                Group::Items(items) => {
                    let mut only = Groups::new();
                    only.entry_or_insert_with(NONE_GROUP, || view(items));
                    only
                }
            })))
        } else {
            Ok(Listing::Grouped(grouped.map(|g| match g {
                Group::Items(items) => view(items),
                Group::SubGroups(subs) => {
                    view(subs.iter().flat_map(|(_, i)| i.iter().cloned()).collect())
                }
            })))
        }
    }

    /// Keyset-paginated export in `(updated_at, id)` order.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-members and `InvalidCursor` for an undecodable
    /// cursor.
    #[instrument(level = "debug", skip(self, request), fields(project = %ctx.project_id))]
    pub fn list_paginated_sync(
        &self,
        ctx: &RequestContext,
        request: &SyncRequest,
    ) -> Result<Page<IssueView>> {
        let member = ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::Sync, None)?;
        let since = request.updated_since.map(|ts| Predicate::FieldRange {
            field: Field::UpdatedAt,
            lower: Some(Value::Timestamp(ts)),
            upper: None,
        });
        let base = Predicate::and(
            [
                project_scope(ctx.project_id),
                self.settings.guest_visibility.predicate(member.as_ref()),
            ]
            .into_iter()
            .chain(since),
        );
        let per_page = clamp_page_size(
            request.per_page,
            self.settings.sync_page_size,
            self.settings.max_page_size,
        );
        let page = paginate_sync(&self.storage, &base, &base, request.cursor.as_deref(), per_page)?;

        let tz = self.settings.timezone;
        let include = request.include_description;
        Ok(page.map(|issue| IssueView::new(issue, tz, include)))
    }

    // ------------------------------------------------------------------
    // Single issue
    // ------------------------------------------------------------------

    /// One issue with its links, attachments, reactions and the viewer's
    /// subscription.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the viewer may view it or created it;
    /// `IssueNotFound` when it is missing or deleted.
    pub fn retrieve_issue(&self, ctx: &RequestContext, issue_id: Uuid) -> Result<IssueDetail> {
        let issue = self.load_guarded(ctx, issue_id, Action::Retrieve)?;

        let links = self.storage.list_links(issue.id)?;
        let attachments = self.storage.list_attachments(issue.id)?;
        let reactions = self.storage.list_reactions(issue.id)?;
        let is_subscribed = issue.subscriber_ids.contains(&ctx.user_id);

        self.visits.record(Visit {
            user_id: ctx.user_id,
            project_id: ctx.project_id,
            entity: VisitEntity::Issue,
            entity_id: issue.id,
            visited_at: now(),
        });

        Ok(IssueDetail {
            issue: IssueView::new(issue, self.settings.timezone, true),
            links,
            attachments,
            reactions,
            is_subscribed,
        })
    }

    /// Create an issue with the next sequence id of the project.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless admin or member; `ValidationErrors` listing every
    /// rule the payload breaks.
    #[instrument(level = "debug", skip(self, payload), fields(project = %ctx.project_id))]
    pub fn create_issue(&mut self, ctx: &RequestContext, payload: IssueCreate) -> Result<IssueView> {
        ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::Create, None)?;
        let project = self.storage.get_project(ctx.project_id)?;
        let requested = serde_json::to_value(&payload)?;

        let mut issue = Issue::new(ctx.project_id, 0, payload.name.trim());
        issue.description_html = payload.description_html;
        issue.state_id = payload.state_id;
        issue.priority = payload.priority;
        if let Some(sort_order) = payload.sort_order {
            issue.sort_order = sort_order;
        }
        issue.start_date = payload.start_date;
        issue.target_date = payload.target_date;
        issue.parent_id = payload.parent_id;
        issue.cycle_id = payload.cycle_id;
        issue.label_ids = payload.label_ids;
        issue.assignee_ids = payload.assignee_ids;
        issue.module_ids = payload.module_ids;
        issue.is_draft = payload.is_draft;
        issue.created_by = Some(ctx.user_id);
        issue.updated_by = Some(ctx.user_id);

        if issue.assignee_ids.is_empty() {
            if let Some(default) = project.default_assignee_id {
                if !self
                    .storage
                    .active_members(ctx.project_id, &[default])?
                    .is_empty()
                {
                    issue.assignee_ids.insert(default);
                }
            }
        }

        self.apply_state(&mut issue, None)?;
        IssueValidator::validate(&issue, &self.storage, true)?;

        let committed = self
            .storage
            .create_issue(issue, ctx.user_id, Some(requested))?;
        self.dispatch(committed.activities);
        info!(id = %committed.value.id, sequence_id = committed.value.sequence_id, "Created issue");

        let stored = self.storage.get_live_issue(ctx.project_id, committed.value.id)?;
        Ok(IssueView::new(stored, self.settings.timezone, true))
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless admin, member or guest; `IssueNotFound` when the
    /// issue is not live in the project; `ValidationErrors` for bad fields.
    #[instrument(level = "debug", skip(self, patch), fields(project = %ctx.project_id))]
    pub fn update_issue(
        &mut self,
        ctx: &RequestContext,
        issue_id: Uuid,
        patch: IssuePatch,
    ) -> Result<()> {
        ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::Update, None)?;
        let before = self.storage.get_live_issue(ctx.project_id, issue_id)?;
        let requested = serde_json::to_value(&patch)?;

        let mut after = before.clone();
        if let Some(name) = patch.name {
            after.name = name.trim().to_string();
        }
        if let Some(description) = patch.description_html {
            after.description_html = description;
        }
        if let Some(priority) = patch.priority {
            after.priority = priority.unwrap_or(Priority::None);
        }
        if let Some(sort_order) = patch.sort_order {
            after.sort_order = sort_order;
        }
        if let Some(start_date) = patch.start_date {
            after.start_date = start_date;
        }
        if let Some(target_date) = patch.target_date {
            after.target_date = target_date;
        }
        if let Some(parent_id) = patch.parent_id {
            after.parent_id = parent_id;
        }
        if let Some(cycle_id) = patch.cycle_id {
            after.cycle_id = cycle_id;
        }
        if let Some(is_draft) = patch.is_draft {
            after.is_draft = is_draft;
        }
        let changes = AssociationChanges {
            labels: patch.label_ids.map(Option::unwrap_or_default),
            assignees: patch.assignee_ids.map(Option::unwrap_or_default),
            modules: patch.module_ids.map(Option::unwrap_or_default),
        };
        if let Some(labels) = &changes.labels {
            after.label_ids.clone_from(labels);
        }
        if let Some(assignees) = &changes.assignees {
            after.assignee_ids.clone_from(assignees);
        }
        if let Some(modules) = &changes.modules {
            after.module_ids.clone_from(modules);
        }
        if let Some(state_id) = patch.state_id {
            after.state_id = state_id;
            self.apply_state(&mut after, before.state_group)?;
        }
        after.updated_at = now();
        after.updated_by = Some(ctx.user_id);

        // An untouched parent that has since been deleted is not re-checked.
        let mut checked = after.clone();
        if patch.parent_id.is_none() {
            checked.parent_id = None;
        }
        IssueValidator::validate(&checked, &self.storage, changes.assignees.is_some())?;

        let committed =
            self.storage
                .update_issue(&before, &after, &changes, ctx.user_id, Some(requested))?;
        self.dispatch(committed.activities);
        info!(id = %issue_id, "Updated issue");
        Ok(())
    }

    /// Soft-delete one issue.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless admin or the creator; `IssueNotFound` when the
    /// issue is not live in the project.
    pub fn delete_issue(&mut self, ctx: &RequestContext, issue_id: Uuid) -> Result<()> {
        let issue = self.load_guarded(ctx, issue_id, Action::Delete)?;
        let committed = self.storage.delete_issue(&issue, ctx.user_id)?;
        self.dispatch(committed.activities);
        info!(id = %issue_id, "Deleted issue");
        Ok(())
    }

    /// Soft-delete many issues at once, all or nothing.
    ///
    /// Returns how many live issues of the project were deleted.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless admin; `Validation` for an empty id list.
    pub fn bulk_delete(&mut self, ctx: &RequestContext, issue_ids: &[Uuid]) -> Result<usize> {
        ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::BulkDelete, None)?;
        if issue_ids.is_empty() {
            return Err(IssueError::validation("issue_ids", "Issue IDs are required"));
        }
        let committed = self
            .storage
            .bulk_delete(ctx.project_id, issue_ids, ctx.user_id)?;
        self.dispatch(committed.activities);
        info!(deleted = committed.value, requested = issue_ids.len(), "Bulk delete");
        Ok(committed.value)
    }

    // ------------------------------------------------------------------
    // Sub-resources
    // ------------------------------------------------------------------

    /// Attach a link to an issue.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `IssueNotFound`, or `Validation` for a blank URL.
    pub fn add_link(
        &mut self,
        ctx: &RequestContext,
        issue_id: Uuid,
        url: &str,
        title: Option<String>,
    ) -> Result<IssueLink> {
        let issue = self.load_guarded(ctx, issue_id, Action::Update)?;
        if url.trim().is_empty() {
            return Err(IssueError::validation("url", "cannot be empty"));
        }
        let link = IssueLink {
            id: Uuid::now_v7(),
            issue_id: issue.id,
            url: url.trim().to_string(),
            title,
            created_by: Some(ctx.user_id),
            created_at: now(),
        };
        self.storage.add_link(&link)?;
        Ok(link)
    }

    /// Record an uploaded asset against an issue.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `IssueNotFound`, or `Validation` for a blank asset name
    /// or negative size.
    pub fn add_attachment(
        &mut self,
        ctx: &RequestContext,
        issue_id: Uuid,
        asset: &str,
        size: i64,
    ) -> Result<IssueAttachment> {
        let issue = self.load_guarded(ctx, issue_id, Action::Update)?;
        if asset.trim().is_empty() {
            return Err(IssueError::validation("asset", "cannot be empty"));
        }
        if size < 0 {
            return Err(IssueError::validation("size", "cannot be negative"));
        }
        let attachment = IssueAttachment {
            id: Uuid::now_v7(),
            issue_id: issue.id,
            asset: asset.trim().to_string(),
            size,
            created_by: Some(ctx.user_id),
            created_at: now(),
        };
        self.storage.add_attachment(&attachment)?;
        Ok(attachment)
    }

    /// React to an issue. Returns false when the reaction already existed.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `IssueNotFound`, or `Validation` for a blank reaction.
    pub fn add_reaction(
        &mut self,
        ctx: &RequestContext,
        issue_id: Uuid,
        reaction: &str,
    ) -> Result<bool> {
        let issue = self.load_guarded(ctx, issue_id, Action::Update)?;
        if reaction.trim().is_empty() {
            return Err(IssueError::validation("reaction", "cannot be empty"));
        }
        self.storage.add_reaction(&IssueReaction {
            id: Uuid::now_v7(),
            issue_id: issue.id,
            actor_id: ctx.user_id,
            reaction: reaction.trim().to_string(),
            created_at: now(),
        })
    }

    /// Subscribe the viewer to an issue.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `IssueNotFound`.
    pub fn subscribe(&mut self, ctx: &RequestContext, issue_id: Uuid) -> Result<bool> {
        let issue = self.load_guarded(ctx, issue_id, Action::List)?;
        self.storage.subscribe(issue.id, ctx.user_id)
    }

    /// Recorded activity of an issue, oldest first.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `IssueNotFound`.
    pub fn issue_activity(&self, ctx: &RequestContext, issue_id: Uuid) -> Result<Vec<ActivityEvent>> {
        let issue = self.load_guarded(ctx, issue_id, Action::Retrieve)?;
        self.storage.list_activities(issue.id)
    }

    // ------------------------------------------------------------------
    // Preferences
    // ------------------------------------------------------------------

    /// The viewer's display preferences, created with defaults on first
    /// read.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-members, or a store error.
    pub fn get_user_properties(&mut self, ctx: &RequestContext) -> Result<UserProperties> {
        ensure_access(&self.storage, ctx.user_id, ctx.project_id, Action::Preferences, None)?;
        if let Some(props) = self
            .storage
            .get_user_properties(ctx.user_id, ctx.project_id)?
        {
            return Ok(props);
        }
        let props = UserProperties::defaults_for(ctx.user_id, ctx.project_id);
        self.storage.save_user_properties(&props)?;
        Ok(props)
    }

    /// Replace the sections present in `patch`.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-members, or a store error.
    pub fn set_user_properties(
        &mut self,
        ctx: &RequestContext,
        patch: UserPropertiesPatch,
    ) -> Result<UserProperties> {
        let mut props = self.get_user_properties(ctx)?;
        props.apply(patch);
        self.storage.save_user_properties(&props)?;
        Ok(props)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn compile(&self, ctx: &RequestContext, params: &FilterParams) -> Result<Predicate> {
        let today = to_user_timezone(&now(), self.settings.timezone).date_naive();
        FilterCompiler::new(FilterMode::Get)
            .with_viewer(ctx.user_id)
            .with_today(today)
            .compile(params)
    }

    /// Load a live issue and check `action`, letting the creator through
    /// where the action allows it. Non-members are refused before the
    /// issue's existence is revealed.
    fn load_guarded(&self, ctx: &RequestContext, issue_id: Uuid, action: Action) -> Result<Issue> {
        let issue = self.storage.get_live_issue(ctx.project_id, issue_id);
        let creator = issue.as_ref().ok().and_then(|i| i.created_by);
        ensure_access(&self.storage, ctx.user_id, ctx.project_id, action, creator)?;
        issue
    }

    /// Resolve `issue.state_group` from its state and stamp or clear
    /// `completed_at` when the issue enters or leaves the completed group.
    fn apply_state(&self, issue: &mut Issue, previous: Option<StateGroup>) -> Result<()> {
        let group = match issue.state_id {
            Some(state_id) => self
                .storage
                .project_state(issue.project_id, state_id)?
                .map(|state| state.group),
            None => None,
        };
        issue.state_group = group;
        let completed = group == Some(StateGroup::Completed);
        let was_completed = previous == Some(StateGroup::Completed);
        if completed && !was_completed {
            issue.completed_at = Some(now());
        } else if !completed {
            issue.completed_at = None;
        }
        Ok(())
    }

    fn dispatch(&self, activities: Vec<ActivityEvent>) {
        for event in activities {
            self.activity.record(event);
        }
    }
}

fn project_scope(project_id: Uuid) -> Predicate {
    Predicate::equals(Field::Project, Value::Uuid(project_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::MemoryEffects;
    use crate::model::{Label, Project, ProjectMember, Role, State};

    struct Fixture {
        service: IssueService,
        effects: Arc<MemoryEffects>,
        admin: RequestContext,
        guest: RequestContext,
        done: State,
    }

    fn member(storage: &mut SqliteStorage, project: Uuid, role: Role) -> Uuid {
        let id = Uuid::now_v7();
        storage
            .upsert_member(&ProjectMember {
                project_id: project,
                member_id: id,
                role,
                is_active: true,
            })
            .unwrap();
        id
    }

    fn fixture() -> Fixture {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let project = Project {
            id: Uuid::now_v7(),
            name: "Core".into(),
            identifier: "CORE".into(),
            default_assignee_id: None,
            created_at: now(),
        };
        storage.create_project(&project).unwrap();
        let admin = member(&mut storage, project.id, Role::Admin);
        let guest = member(&mut storage, project.id, Role::Guest);
        let done = State {
            id: Uuid::now_v7(),
            project_id: project.id,
            name: "Done".into(),
            group: StateGroup::Completed,
            sequence: 1,
        };
        storage.create_state(&done).unwrap();

        let effects = Arc::new(MemoryEffects::new());
        let service = IssueService::new(storage).with_effects(effects.clone(), effects.clone());
        Fixture {
            service,
            effects,
            admin: RequestContext::new(admin, project.id),
            guest: RequestContext::new(guest, project.id),
            done,
        }
    }

    fn create(fx: &mut Fixture, name: &str) -> IssueView {
        fx.service
            .create_issue(
                &fx.admin,
                IssueCreate {
                    name: name.into(),
                    ..IssueCreate::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn create_records_activity_and_sequence() {
        let mut fx = fixture();
        let first = create(&mut fx, "first");
        let second = create(&mut fx, "second");
        assert_eq!(first.sequence_id, 1);
        assert_eq!(second.sequence_id, 2);
        assert_eq!(fx.effects.activities().len(), 2);
    }

    #[test]
    fn guests_cannot_create() {
        let mut fx = fixture();
        let err = fx
            .service
            .create_issue(
                &fx.guest,
                IssueCreate {
                    name: "nope".into(),
                    ..IssueCreate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, IssueError::Forbidden { .. }));
    }

    #[test]
    fn moving_into_completed_stamps_completed_at() {
        let mut fx = fixture();
        let issue = create(&mut fx, "ship");
        let patch = IssuePatch {
            state_id: Some(Some(fx.done.id)),
            ..IssuePatch::default()
        };
        fx.service.update_issue(&fx.admin, issue.id, patch).unwrap();
        let stored = fx.service.retrieve_issue(&fx.admin, issue.id).unwrap();
        assert!(stored.issue.completed_at.is_some());
        assert_eq!(stored.issue.state_group, Some(StateGroup::Completed));

        let clear = IssuePatch {
            state_id: Some(None),
            ..IssuePatch::default()
        };
        fx.service.update_issue(&fx.admin, issue.id, clear).unwrap();
        let stored = fx.service.retrieve_issue(&fx.admin, issue.id).unwrap();
        assert!(stored.issue.completed_at.is_none());
    }

    #[test]
    fn update_rejects_foreign_labels() {
        let mut fx = fixture();
        let issue = create(&mut fx, "x");
        let stranger = Label {
            id: Uuid::now_v7(),
            project_id: Uuid::now_v7(),
            name: "elsewhere".into(),
        };
        let patch = IssuePatch {
            label_ids: Some(Some([stranger.id].into_iter().collect())),
            ..IssuePatch::default()
        };
        let err = fx.service.update_issue(&fx.admin, issue.id, patch).unwrap_err();
        assert!(matches!(err, IssueError::Validation { .. }));
    }

    #[test]
    fn empty_bulk_delete_is_a_validation_error() {
        let mut fx = fixture();
        let err = fx.service.bulk_delete(&fx.admin, &[]).unwrap_err();
        assert!(matches!(err, IssueError::Validation { .. }));
    }

    #[test]
    fn guest_lists_only_own_issues_and_list_records_a_visit() {
        let mut fx = fixture();
        create(&mut fx, "admin's");
        let page = fx
            .service
            .list_issues(&fx.guest, &ListRequest::default())
            .unwrap();
        assert_eq!(page.total_count, 0);
        let visits = fx.effects.visits();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].entity, VisitEntity::Project);
    }

    #[test]
    fn by_ids_requires_issues() {
        let fx = fixture();
        let err = fx
            .service
            .list_issues_by_ids(&fx.admin, &ListRequest::default())
            .unwrap_err();
        assert!(matches!(err, IssueError::Validation { .. }));
    }

    #[test]
    fn preferences_are_created_on_first_read() {
        let mut fx = fixture();
        let props = fx.service.get_user_properties(&fx.admin).unwrap();
        assert_eq!(props.display_filters.layout, "list");
        let patch: UserPropertiesPatch =
            serde_json::from_str(r#"{"display_filters": {"group_by": "labels"}}"#).unwrap();
        let saved = fx.service.set_user_properties(&fx.admin, patch).unwrap();
        assert_eq!(saved.display_filters.group_by.as_deref(), Some("labels"));
        assert_eq!(fx.service.get_user_properties(&fx.admin).unwrap(), saved);
    }
}
