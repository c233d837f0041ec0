//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

pub mod commands;

/// Project issue tracker: filtered, grouped and paginated listings over SQLite
#[derive(Parser, Debug)]
#[command(name = "wi", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: .workitems/items.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Acting user id
    #[arg(long, global = true, env = "WI_ACTOR")]
    pub actor: Option<String>,

    /// Project id or identifier
    #[arg(long, global = true, env = "WI_PROJECT")]
    pub project: Option<String>,

    /// Display timezone (`UTC` or a fixed offset such as `+05:30`)
    #[arg(long, global = true)]
    pub timezone: Option<String>,

    /// `SQLite` busy timeout in ms
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a workspace with one project
    Init(InitArgs),

    /// Manage project members
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },

    /// Manage workflow states
    State {
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Manage labels
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },

    /// Manage modules
    Module {
        #[command(subcommand)]
        command: ModuleCommands,
    },

    /// Manage cycles
    Cycle {
        #[command(subcommand)]
        command: CycleCommands,
    },

    /// List issues
    List(ListArgs),

    /// Show issue details
    Show {
        /// Issue id
        id: Uuid,
    },

    /// Create a new issue
    Create(CreateArgs),

    /// Update an issue
    Update(UpdateArgs),

    /// Delete an issue
    Delete {
        /// Issue id
        id: Uuid,
    },

    /// Delete many issues at once
    BulkDelete {
        /// Issue ids
        ids: Vec<Uuid>,
    },

    /// Attach a link to an issue
    Link {
        id: Uuid,
        url: String,
        #[arg(long)]
        title: Option<String>,
    },

    /// Record an attachment on an issue
    Attach {
        id: Uuid,
        asset: String,
        /// Size in bytes
        #[arg(long, default_value_t = 0)]
        size: i64,
    },

    /// React to an issue
    React { id: Uuid, reaction: String },

    /// Subscribe to an issue
    Subscribe { id: Uuid },

    /// Show an issue's activity
    Activity { id: Uuid },

    /// Display preferences
    Props {
        #[command(subcommand)]
        command: PropsCommands,
    },

    /// Export issues in update order, page by page
    Sync(SyncArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Print the JSON schema of a response type
    Schema {
        #[arg(value_enum)]
        target: SchemaTarget,
    },
}

/// Arguments for the completions command.
#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: ShellType,

    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Supported shells for completion generation.
#[derive(ValueEnum, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    #[value(name = "powershell")]
    #[value(alias = "pwsh")]
    /// `PowerShell`
    PowerShell,
    /// Elvish
    Elvish,
}

/// Response types with a published schema.
#[derive(ValueEnum, Debug, Clone, Copy, Eq, PartialEq)]
pub enum SchemaTarget {
    Issue,
    Detail,
    Page,
    Properties,
    Create,
    Patch,
    Error,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project name
    #[arg(long, default_value = "Default")]
    pub name: String,

    /// Short project identifier
    #[arg(long, default_value = "WI")]
    pub identifier: String,

    /// Reinitialize an existing workspace
    #[arg(long)]
    pub force: bool,
}

#[derive(Subcommand, Debug)]
pub enum MemberCommands {
    /// Add or change a member
    Add {
        user: Uuid,
        /// admin, member, viewer or guest
        #[arg(long, default_value = "member")]
        role: String,
        /// Record the membership as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Set the project's default assignee; omit the user to clear it
    Default { user: Option<Uuid> },
    /// List members
    List,
}

#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Add a state
    Add {
        name: String,
        /// backlog, unstarted, started, completed or cancelled
        #[arg(long)]
        group: String,
        #[arg(long, default_value_t = 65535)]
        sequence: i64,
    },
    /// List states
    List,
}

#[derive(Subcommand, Debug)]
pub enum LabelCommands {
    /// Add a label
    Add { name: String },
    /// List labels
    List,
}

#[derive(Subcommand, Debug)]
pub enum ModuleCommands {
    /// Add a module
    Add { name: String },
    /// Archive a module
    Archive { id: Uuid },
    /// List modules
    List,
}

#[derive(Subcommand, Debug)]
pub enum CycleCommands {
    /// Add a cycle
    Add { name: String },
    /// List cycles
    List,
}

#[derive(Subcommand, Debug)]
pub enum PropsCommands {
    /// Show preferences (created with defaults on first read)
    Get,
    /// Replace the sections present in a JSON patch
    Set {
        /// e.g. '{"display_filters": {"group_by": "labels"}}'
        patch: String,
    },
}

/// Arguments for the list command.
#[derive(Args, Debug, Default, Clone)]
pub struct ListArgs {
    /// Filter parameter as key=value (repeatable), e.g. -f priority=high,urgent
    #[arg(long = "filter", short = 'f', value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Only these issue ids (comma-separated); disables pagination
    #[arg(long)]
    pub ids: Option<String>,

    /// Ordering, e.g. -priority or created_at
    #[arg(long)]
    pub order_by: Option<String>,

    /// Group by field
    #[arg(long)]
    pub group_by: Option<String>,

    /// Sub-group by field (requires --group-by)
    #[arg(long)]
    pub sub_group_by: Option<String>,

    /// Cursor from a previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Page size
    #[arg(long)]
    pub per_page: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct CreateArgs {
    /// Issue name
    pub name: String,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub state: Option<Uuid>,

    /// urgent, high, medium, low or none
    #[arg(long)]
    pub priority: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub start: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub target: Option<String>,

    #[arg(long)]
    pub parent: Option<Uuid>,

    #[arg(long)]
    pub cycle: Option<Uuid>,

    #[arg(long = "label", value_delimiter = ',')]
    pub labels: Vec<Uuid>,

    #[arg(long = "assignee", value_delimiter = ',')]
    pub assignees: Vec<Uuid>,

    #[arg(long = "module", value_delimiter = ',')]
    pub modules: Vec<Uuid>,

    #[arg(long)]
    pub draft: bool,
}

#[derive(Args, Debug, Default)]
pub struct UpdateArgs {
    /// Issue id
    pub id: Uuid,

    /// Partial update as JSON; `null` clears a field
    #[arg(long, value_name = "JSON")]
    pub patch: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long)]
    pub state: Option<Uuid>,

    #[arg(long)]
    pub priority: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// Cursor from a previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Only issues updated at or after this time (RFC3339, date, or relative)
    #[arg(long)]
    pub since: Option<String>,

    /// Include descriptions
    #[arg(long)]
    pub description: bool,

    #[arg(long)]
    pub per_page: Option<usize>,
}
