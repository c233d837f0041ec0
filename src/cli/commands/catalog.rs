//! Project catalog commands: members, states, labels, modules and cycles.
//!
//! Listing is open to any member; changes require an admin.

use std::fmt::Write as _;
use tracing::info;
use uuid::Uuid;

use crate::access::{Action, ensure_access};
use crate::cli::{CycleCommands, LabelCommands, MemberCommands, ModuleCommands, StateCommands};
use crate::cli::commands::Workspace;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::model::{Cycle, Label, Module, ProjectMember, Role, State, StateGroup};
use crate::output::OutputContext;

fn ensure_member(ws: &Workspace) -> Result<()> {
    ensure_access(
        ws.service.storage(),
        ws.ctx.user_id,
        ws.ctx.project_id,
        Action::List,
        None,
    )
    .map(|_| ())
}

/// # Errors
///
/// `Forbidden` for non-admin changes, `Validation` for an unknown role.
pub fn member(command: &MemberCommands, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    match command {
        MemberCommands::Add {
            user,
            role,
            inactive,
        } => {
            ws.ensure_admin()?;
            let member = ProjectMember {
                project_id: ws.ctx.project_id,
                member_id: *user,
                role: role.parse::<Role>()?,
                is_active: !inactive,
            };
            ws.service.storage_mut().upsert_member(&member)?;
            info!(member = %user, role = %member.role, "Saved member");
            out.emit(&member, || format!("{} is now {}", member.member_id, member.role))
        }
        MemberCommands::Default { user } => {
            ws.ensure_admin()?;
            let project_id = ws.ctx.project_id;
            ws.service
                .storage_mut()
                .set_default_assignee(project_id, *user)?;
            let project = ws.service.storage().get_project(project_id)?;
            info!(assignee = ?user, "Saved default assignee");
            out.emit(&project, || match project.default_assignee_id {
                Some(id) => format!("New issues default to {id}"),
                None => "New issues have no default assignee".to_string(),
            })
        }
        MemberCommands::List => {
            ensure_member(&ws)?;
            let members = ws.service.storage().list_members(ws.ctx.project_id)?;
            out.emit(&members, || {
                members.iter().fold(String::new(), |mut acc, m| {
                    let status = if m.is_active { "" } else { " (inactive)" };
                    let _ = writeln!(acc, "{} {}{status}", m.member_id, m.role);
                    acc
                })
            })
        }
    }
}

/// # Errors
///
/// `Forbidden` for non-admin changes, `Validation` for an unknown group.
pub fn state(command: &StateCommands, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    match command {
        StateCommands::Add {
            name,
            group,
            sequence,
        } => {
            ws.ensure_admin()?;
            let state = State {
                id: Uuid::now_v7(),
                project_id: ws.ctx.project_id,
                name: name.trim().to_string(),
                group: group.parse::<StateGroup>()?,
                sequence: *sequence,
            };
            ws.service.storage_mut().create_state(&state)?;
            out.emit(&state, || format!("{} {} ({})", state.id, state.name, state.group))
        }
        StateCommands::List => {
            ensure_member(&ws)?;
            let states = ws.service.storage().list_states(ws.ctx.project_id)?;
            out.emit(&states, || {
                states.iter().fold(String::new(), |mut acc, s| {
                    let _ = writeln!(acc, "{} {} ({})", s.id, s.name, s.group);
                    acc
                })
            })
        }
    }
}

/// # Errors
///
/// `Forbidden` for non-admin changes, or a store error.
pub fn label(command: &LabelCommands, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    match command {
        LabelCommands::Add { name } => {
            ws.ensure_admin()?;
            let label = Label {
                id: Uuid::now_v7(),
                project_id: ws.ctx.project_id,
                name: name.trim().to_string(),
            };
            ws.service.storage_mut().create_label(&label)?;
            out.emit(&label, || format!("{} {}", label.id, label.name))
        }
        LabelCommands::List => {
            ensure_member(&ws)?;
            let labels = ws.service.storage().list_labels(ws.ctx.project_id)?;
            out.emit(&labels, || {
                labels.iter().fold(String::new(), |mut acc, l| {
                    let _ = writeln!(acc, "{} {}", l.id, l.name);
                    acc
                })
            })
        }
    }
}

/// # Errors
///
/// `Forbidden` for non-admin changes, `NotFound` for an unknown module.
pub fn module(command: &ModuleCommands, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    match command {
        ModuleCommands::Add { name } => {
            ws.ensure_admin()?;
            let module = Module {
                id: Uuid::now_v7(),
                project_id: ws.ctx.project_id,
                name: name.trim().to_string(),
                archived_at: None,
            };
            ws.service.storage_mut().create_module(&module)?;
            out.emit(&module, || format!("{} {}", module.id, module.name))
        }
        ModuleCommands::Archive { id } => {
            ws.ensure_admin()?;
            ws.service.storage_mut().archive_module(*id)?;
            out.success(&format!("Archived module {id}"));
            Ok(())
        }
        ModuleCommands::List => {
            ensure_member(&ws)?;
            let modules = ws.service.storage().list_modules(ws.ctx.project_id)?;
            out.emit(&modules, || {
                modules.iter().fold(String::new(), |mut acc, m| {
                    let archived = if m.archived_at.is_some() { " (archived)" } else { "" };
                    let _ = writeln!(acc, "{} {}{archived}", m.id, m.name);
                    acc
                })
            })
        }
    }
}

/// # Errors
///
/// `Forbidden` for non-admin changes, or a store error.
pub fn cycle(command: &CycleCommands, cli: &CliOverrides, out: &OutputContext) -> Result<()> {
    let mut ws = Workspace::open(cli)?;
    match command {
        CycleCommands::Add { name } => {
            ws.ensure_admin()?;
            let cycle = Cycle {
                id: Uuid::now_v7(),
                project_id: ws.ctx.project_id,
                name: name.trim().to_string(),
            };
            ws.service.storage_mut().create_cycle(&cycle)?;
            out.emit(&cycle, || format!("{} {}", cycle.id, cycle.name))
        }
        CycleCommands::List => {
            ensure_member(&ws)?;
            let cycles = ws.service.storage().list_cycles(ws.ctx.project_id)?;
            out.emit(&cycles, || {
                cycles.iter().fold(String::new(), |mut acc, c| {
                    let _ = writeln!(acc, "{} {}", c.id, c.name);
                    acc
                })
            })
        }
    }
}
