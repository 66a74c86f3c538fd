pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use toolgate_core::config::{ConfigOverrides, LoadOptions};

use crate::commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "toolgate",
    about = "Toolgate conversational agent CLI",
    long_about = "Chat with a tool-using agent, approve or reject sensitive tool calls, and inspect persisted conversation threads.",
    after_help = "Examples:\n  toolgate chat --thread demo \"What's 10 plus 5?\"\n  toolgate chat --thread notes --approval \"Write hi to notes.txt\"\n  toolgate approve --thread notes --reject file_operations\n  toolgate doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a toolgate.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the SQLite database url")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Send a message to a thread, or resume it when no message is given")]
    Chat {
        #[arg(long, help = "Thread identifier; a new one is generated when omitted")]
        thread: Option<String>,
        #[arg(long, conflicts_with = "no_approval", help = "Require approval for sensitive tools")]
        approval: bool,
        #[arg(long, help = "Execute every tool call without asking")]
        no_approval: bool,
        message: Option<String>,
    },
    #[command(about = "Resume a thread suspended for approval with a decision")]
    Approve {
        #[arg(long)]
        thread: String,
        #[arg(long = "approve", value_name = "TOOL", help = "Tool name to approve (repeatable)")]
        approved: Vec<String>,
        #[arg(long = "reject", value_name = "TOOL", help = "Tool name to reject (repeatable)")]
        rejected: Vec<String>,
        #[arg(long, conflicts_with = "approved", help = "Approve every pending tool call")]
        all: bool,
    },
    #[command(about = "List persisted threads, most recently updated first")]
    Threads,
    #[command(about = "Print the latest state of a thread")]
    Show {
        #[arg(long)]
        thread: String,
    },
    #[command(about = "Summarize message and tool usage of a thread")]
    Stats {
        #[arg(long)]
        thread: String,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model credentials, workspace, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn execute(cli: Cli) -> CommandResult {
    let options = cli.load_options();

    match cli.command {
        Command::Chat { thread, approval, no_approval, message } => {
            let approval = match (approval, no_approval) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::chat::run(options, thread, message, approval)
        }
        Command::Approve { thread, approved, rejected, all } => {
            commands::approve::run(options, thread, approved, rejected, all)
        }
        Command::Threads => commands::threads::run(options),
        Command::Show { thread } => commands::show::run(options, thread),
        Command::Stats { thread } => commands::stats::run(options, thread),
        Command::Migrate => commands::migrate::run(options),
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run(options) },
        Command::Doctor { json } => {
            CommandResult { exit_code: 0, output: commands::doctor::run(options, json) }
        }
    }
}
