//! Command implementations for the `wi` binary.
//!
//! Each command resolves configuration, opens the workspace store and calls
//! into [`crate::service::IssueService`]. Side effects are written by a
//! background dispatcher that is flushed when the workspace is dropped.

pub mod catalog;
pub mod completions;
pub mod create;
pub mod delete;
pub mod init;
pub mod list;
pub mod props;
pub mod resource;
pub mod schema;
pub mod show;
pub mod sync;
pub mod update;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::access::{Action, ensure_access};
use crate::config::{self, CliOverrides};
use crate::effects::BackgroundDispatcher;
use crate::error::{OptionExt, Result};
use crate::service::{IssueService, RequestContext};

/// An opened workspace: the service, and who is acting in which project.
pub struct Workspace {
    pub service: IssueService,
    pub ctx: RequestContext,
    pub dir: PathBuf,
}

impl Workspace {
    /// Discover the workspace from the CWD and open it.
    ///
    /// # Errors
    ///
    /// `NotInitialized` outside a workspace, `Config` for a missing actor
    /// or project, `NotFound` for an unknown project.
    pub fn open(cli: &CliOverrides) -> Result<Self> {
        let dir = config::discover_workspace_dir(None)?;
        Self::open_at(&dir, cli)
    }

    /// Open the workspace rooted at `dir`.
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_at(dir: &Path, cli: &CliOverrides) -> Result<Self> {
        let layer = config::load_config(dir, cli)?;
        let settings = config::settings_from_layer(&layer)?;
        let actor = config::actor_from_layer(&layer)?;
        let project_key = config::project_from_layer(&layer)?;
        let lock_timeout = config::lock_timeout_from_layer(&layer)?;

        let (storage, db_path) = config::open_storage(dir, &layer)?;
        let project = storage
            .find_project(project_key)?
            .ok_or_not_found("Project", project_key)?;
        debug!(project = %project.id, %actor, "Opened workspace");

        let dispatcher = Arc::new(BackgroundDispatcher::spawn(db_path, Some(lock_timeout))?);
        let service = IssueService::new(storage)
            .with_settings(settings)
            .with_effects(dispatcher.clone(), dispatcher);

        Ok(Self {
            service,
            ctx: RequestContext::new(actor, project.id),
            dir: dir.to_path_buf(),
        })
    }

    /// Require the actor to be a project admin.
    ///
    /// # Errors
    ///
    /// `Forbidden` otherwise.
    pub fn ensure_admin(&self) -> Result<()> {
        ensure_access(
            self.service.storage(),
            self.ctx.user_id,
            self.ctx.project_id,
            Action::Manage,
            None,
        )
        .map(|_| ())
    }
}
