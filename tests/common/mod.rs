#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;
use workitems::effects::MemoryEffects;
use workitems::model::{Cycle, Issue, Label, Module, Project, ProjectMember, Role, State};
use workitems::service::{IssueService, RequestContext};
use workitems::storage::SqliteStorage;
use workitems::util::time::now;

pub mod cli;
pub mod fixtures;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        workitems::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

pub fn test_db() -> SqliteStorage {
    init_test_logging();
    SqliteStorage::open_memory().expect("Failed to create test database")
}

/// A project with one user per role and a small catalog.
pub struct ProjectFixture {
    pub project: Project,
    pub admin: Uuid,
    pub member: Uuid,
    pub viewer: Uuid,
    pub guest: Uuid,
    pub outsider: Uuid,
    pub states: Vec<State>,
    pub labels: Vec<Label>,
    pub modules: Vec<Module>,
    pub cycle: Cycle,
}

impl ProjectFixture {
    /// Seed `storage` with the project, members, default states, labels
    /// `A` and `B`, one module and one cycle.
    pub fn seed(storage: &mut SqliteStorage) -> Self {
        let project = Project {
            id: Uuid::now_v7(),
            name: "Core".to_string(),
            identifier: "CORE".to_string(),
            default_assignee_id: None,
            created_at: now(),
        };
        storage.create_project(&project).expect("project");

        let mut add = |role| {
            let id = Uuid::now_v7();
            storage
                .upsert_member(&ProjectMember {
                    project_id: project.id,
                    member_id: id,
                    role,
                    is_active: true,
                })
                .expect("member");
            id
        };
        let admin = add(Role::Admin);
        let member = add(Role::Member);
        let viewer = add(Role::Viewer);
        let guest = add(Role::Guest);

        let states = State::defaults_for(project.id);
        for state in &states {
            storage.create_state(state).expect("state");
        }
        let labels: Vec<Label> = ["A", "B"]
            .iter()
            .map(|name| Label {
                id: Uuid::now_v7(),
                project_id: project.id,
                name: (*name).to_string(),
            })
            .collect();
        for label in &labels {
            storage.create_label(label).expect("label");
        }
        let modules = vec![Module {
            id: Uuid::now_v7(),
            project_id: project.id,
            name: "Platform".to_string(),
            archived_at: None,
        }];
        storage.create_module(&modules[0]).expect("module");
        let cycle = Cycle {
            id: Uuid::now_v7(),
            project_id: project.id,
            name: "Sprint 1".to_string(),
        };
        storage.create_cycle(&cycle).expect("cycle");

        Self {
            project,
            admin,
            member,
            viewer,
            guest,
            outsider: Uuid::now_v7(),
            states,
            labels,
            modules,
            cycle,
        }
    }

    pub fn ctx(&self, user: Uuid) -> RequestContext {
        RequestContext::new(user, self.project.id)
    }

    pub fn state(&self, name: &str) -> &State {
        self.states
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no state {name}"))
    }
}

/// A service over an in-memory store, with effects kept in memory.
pub fn test_service() -> (IssueService, ProjectFixture, Arc<MemoryEffects>) {
    let mut storage = test_db();
    let fixture = ProjectFixture::seed(&mut storage);
    let effects = Arc::new(MemoryEffects::new());
    let service = IssueService::new(storage).with_effects(effects.clone(), effects.clone());
    (service, fixture, effects)
}

/// Insert `issues` as they are (ids, timestamps, associations) and return
/// them as the store reads them back.
pub fn store_issues(storage: &mut SqliteStorage, issues: &[Issue], actor: Uuid) -> Vec<Issue> {
    issues
        .iter()
        .map(|issue| {
            let committed = storage
                .create_issue(issue.clone(), actor, None)
                .expect("create issue");
            storage
                .get_live_issue(issue.project_id, committed.value.id)
                .expect("read back")
        })
        .collect()
}
