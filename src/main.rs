use clap::Parser;
use std::io::{self, IsTerminal};
use workitems::cli::commands;
use workitems::cli::{Cli, Commands};
use workitems::config;
use workitems::logging::init_logging;
use workitems::output::OutputContext;
use workitems::{IssueError, StructuredError};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet, cli.log_json) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let overrides = build_cli_overrides(&cli);
    let out = OutputContext::from_flags(cli.json, cli.quiet);

    let result = match &cli.command {
        Commands::Init(args) => commands::init::execute(args, &overrides, None, &out).map(|_| ()),
        Commands::Member { command } => commands::catalog::member(command, &overrides, &out),
        Commands::State { command } => commands::catalog::state(command, &overrides, &out),
        Commands::Label { command } => commands::catalog::label(command, &overrides, &out),
        Commands::Module { command } => commands::catalog::module(command, &overrides, &out),
        Commands::Cycle { command } => commands::catalog::cycle(command, &overrides, &out),
        Commands::List(args) => commands::list::execute(args, &overrides, &out),
        Commands::Show { id } => commands::show::execute(*id, &overrides, &out),
        Commands::Create(args) => commands::create::execute(args, &overrides, &out),
        Commands::Update(args) => commands::update::execute(args, &overrides, &out),
        Commands::Delete { id } => commands::delete::execute(*id, &overrides, &out),
        Commands::BulkDelete { ids } => commands::delete::execute_bulk(ids, &overrides, &out),
        Commands::Link { id, url, title } => {
            commands::resource::link(*id, url, title.clone(), &overrides, &out)
        }
        Commands::Attach { id, asset, size } => {
            commands::resource::attach(*id, asset, *size, &overrides, &out)
        }
        Commands::React { id, reaction } => {
            commands::resource::react(*id, reaction, &overrides, &out)
        }
        Commands::Subscribe { id } => commands::resource::subscribe(*id, &overrides, &out),
        Commands::Activity { id } => commands::show::activity(*id, &overrides, &out),
        Commands::Props { command } => commands::props::execute(command, &overrides, &out),
        Commands::Sync(args) => commands::sync::execute(args, &overrides, &out),
        Commands::Completions(args) => commands::completions::execute(args),
        Commands::Schema { target } => commands::schema::execute(*target),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs human-readable error with optional color.
fn handle_error(err: &IssueError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}

fn build_cli_overrides(cli: &Cli) -> config::CliOverrides {
    config::CliOverrides {
        db: cli.db.clone(),
        actor: cli.actor.clone(),
        project: cli.project.clone(),
        timezone: cli.timezone.clone(),
        lock_timeout: cli.lock_timeout,
    }
}
