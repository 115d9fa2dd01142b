//! tidemark: terminal shell for the Tidemark learning planner.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod host;
mod notify_cmd;
mod state;
mod tasks_cmd;

use notify_cmd::NotifyCommand;
use tasks_cmd::{FormatArg, ScopeArg, SummaryCommand, TaskFields};

#[derive(Parser, Debug)]
#[command(name = "tidemark", version, about = "Versioned learning-task planner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a task
    Add {
        title: String,
        #[command(flatten)]
        fields: TaskFields,
    },

    /// Change a task; omitted fields keep their current value
    Edit {
        id: String,
        #[arg(long, short = 't')]
        title: Option<String>,
        #[command(flatten)]
        fields: TaskFields,
    },

    /// Delete a task (its history is kept)
    Delete { id: String },

    /// Show a task and its full history
    Show { id: String },

    /// List current tasks
    List {
        /// Only tasks scheduled before today
        #[arg(long)]
        overdue: bool,
    },

    /// Every version of every task, newest first
    History {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Tasks for one day (default: today)
    Day { date: Option<String> },

    /// Tasks for the week containing a date (default: this week)
    Week { date: Option<String> },

    /// Reschedule a task to a day, a time slot, or `none` for unscheduled
    Move {
        id: String,
        /// YYYY-MM-DD, today, tomorrow, or none
        to: String,
        /// Drop onto a time slot (snapped to 15 minutes)
        #[arg(long)]
        time: Option<String>,
    },

    /// Export tasks as JSON or CSV
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: FormatArg,
        #[arg(long, value_enum, default_value = "current")]
        scope: ScopeArg,
        /// Output path, or - for stdout (default: learning-tasks-<date>.<ext>)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Time per category, focus distribution and upcoming tasks
    Dashboard,

    /// Weekly reflections
    Summary {
        #[command(subcommand)]
        command: SummaryCommand,
    },

    /// Due-date notifications
    Notify {
        #[command(subcommand)]
        command: NotifyCommand,
    },

    /// Manage ~/.tidemark/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a default config file if none exists
    Init,
    /// Print the effective config
    Show,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Quiet unless RUST_LOG asks for more.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    if let Command::Config { command } = cli.command {
        return match command {
            ConfigCommand::Init => config::init_config(),
            ConfigCommand::Show => config::show_config(),
        };
    }

    let mut planner = host::open_planner()?;
    let p = &mut planner;

    match cli.command {
        Command::Add { title, fields } => tasks_cmd::add(p, title, fields)?,
        Command::Edit { id, title, fields } => tasks_cmd::edit(p, &id, title, fields)?,
        Command::Delete { id } => tasks_cmd::delete(p, &id)?,
        Command::Show { id } => tasks_cmd::show(p, &id)?,
        Command::List { overdue } => tasks_cmd::list(p, overdue)?,
        Command::History { limit } => tasks_cmd::history(p, limit)?,
        Command::Day { date } => tasks_cmd::day(p, date)?,
        Command::Week { date } => tasks_cmd::week(p, date)?,
        Command::Move { id, to, time } => tasks_cmd::move_task(p, &id, &to, time)?,
        Command::Export { format, scope, out } => tasks_cmd::export(p, format, scope, out)?,
        Command::Dashboard => tasks_cmd::dashboard(p)?,
        Command::Summary { command } => tasks_cmd::summary(p, command)?,
        Command::Notify { command } => notify_cmd::run(p, command).await?,
        Command::Config { .. } => unreachable!("handled before the planner is opened"),
    }

    Ok(())
}
