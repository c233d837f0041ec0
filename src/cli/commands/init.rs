use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::cli::InitArgs;
use crate::config::{self, CliOverrides, ConfigLayer, DEFAULT_DB_FILENAME, WORKSPACE_DIR};
use crate::error::{IssueError, Result};
use crate::model::{Project, ProjectMember, Role, State};
use crate::output::OutputContext;
use crate::storage::SqliteStorage;
use crate::util::time::now;

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub workspace: PathBuf,
    pub project: Project,
    pub actor: Uuid,
    pub states: Vec<State>,
}

/// Execute the init command.
///
/// Creates `.workitems/` with a database holding one project, its default
/// states and the actor as admin, and writes the actor and project to the
/// workspace config. An actor is generated when none is configured.
///
/// # Errors
///
/// `AlreadyInitialized` when a database exists and `--force` is not given;
/// I/O and database errors otherwise.
pub fn execute(
    args: &InitArgs,
    cli: &CliOverrides,
    root_dir: Option<&Path>,
    out: &OutputContext,
) -> Result<InitResult> {
    let base_dir = root_dir.unwrap_or_else(|| Path::new("."));
    let workspace = base_dir.join(WORKSPACE_DIR);
    let db_path = workspace.join(DEFAULT_DB_FILENAME);

    if db_path.exists() {
        if !args.force {
            return Err(IssueError::AlreadyInitialized { path: db_path });
        }
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
    } else {
        fs::create_dir_all(&workspace)?;
    }

    let identifier = args.identifier.trim().to_uppercase();
    if identifier.is_empty() {
        return Err(IssueError::validation("identifier", "cannot be empty"));
    }

    let known = ConfigLayer::merge_layers(&[
        config::load_user_config()?,
        ConfigLayer::from_env(),
        cli.as_layer(),
    ]);
    let actor = match known.get("actor") {
        Some(_) => config::actor_from_layer(&known)?,
        None => Uuid::now_v7(),
    };

    let mut storage = SqliteStorage::open(&db_path)?;
    let project = Project {
        id: Uuid::now_v7(),
        name: args.name.trim().to_string(),
        identifier: identifier.clone(),
        default_assignee_id: None,
        created_at: now(),
    };
    storage.create_project(&project)?;
    storage.upsert_member(&ProjectMember {
        project_id: project.id,
        member_id: actor,
        role: Role::Admin,
        is_active: true,
    })?;
    let states = State::defaults_for(project.id);
    for state in &states {
        storage.create_state(state)?;
    }

    let mut layer = config::load_project_config(&workspace)?;
    layer.insert("actor", actor.to_string());
    layer.insert("project", identifier);
    layer.write_yaml(&workspace.join("config.yaml"))?;

    let gitignore_path = workspace.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(gitignore_path, "*.db\n*.db-shm\n*.db-wal\n")?;
    }

    info!(project = %project.id, %actor, "Initialized workspace");
    let result = InitResult {
        workspace,
        project,
        actor,
        states,
    };
    out.emit(&result, || {
        format!(
            "Initialized {} in {} (actor {})",
            result.project.identifier,
            result.workspace.display(),
            result.actor
        )
    })?;
    Ok(result)
}
