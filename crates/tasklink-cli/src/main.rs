mod browser;
mod cmd;
mod context;
mod output;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use cmd::hook::HookSubcommand;
use context::Ctx;
use std::path::PathBuf;
use tasklink_core::paths::{BASE_URL_ENV, CONFIG_DIR_ENV};
use tasklink_core::types::{Complexity, TaskPatch, TaskStatus};

#[derive(Parser)]
#[command(
    name = "tasklink",
    about = "Mirror agent tasks to a project tracker and gate plans behind human review",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config directory (default: ~/.tasklink)
    #[arg(long, global = true, env = CONFIG_DIR_ENV)]
    config_dir: Option<PathBuf>,

    /// Folder to act for (default: current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks in the linked project
    Tasks {
        /// Only tasks with this status (todo, in_progress, done)
        #[arg(long)]
        status: Option<TaskStatus>,
    },

    /// Create a task
    Create {
        #[arg(required = true)]
        title: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        /// low, medium or high
        #[arg(long)]
        complexity: Option<Complexity>,
        /// Initial status (default: todo)
        #[arg(long)]
        status: Option<TaskStatus>,
    },

    /// Update fields of a task
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        complexity: Option<Complexity>,
    },

    /// Show one task
    Get { id: String },

    /// Start a task and make it the active task
    Claim { id: String },

    /// Comment on a task
    Comment {
        id: String,
        #[arg(required = true)]
        body: Vec<String>,
    },

    /// Show the project the API credentials belong to
    Whoami,

    /// Show the local link for this folder (no network)
    Status,

    /// Link this folder to a project through the browser
    Connect {
        /// Service URL (default: https://app.tasklink.dev)
        #[arg(long, env = BASE_URL_ENV)]
        base_url: Option<String>,
    },

    /// Remove the link for this folder
    Disconnect,

    /// Re-authorize the linked folder, replacing its credentials
    Upgrade,

    /// Upload a plan and wait for a browser review
    ReviewPlan {
        /// Plan file (default: tool input, transcript, then plan.md)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Session transcript to search for the latest plan
        #[arg(long)]
        transcript: Option<PathBuf>,
    },

    /// Hook entry points (read the hook payload on stdin)
    Hook {
        #[command(subcommand)]
        subcommand: HookSubcommand,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    let default_level = match &cli.command {
        Commands::Connect { .. } | Commands::Upgrade | Commands::ReviewPlan { .. } => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config_dir,
        cwd,
        json,
        command,
    } = cli;
    let ctx = || Ctx::new(config_dir.as_deref(), cwd.as_deref(), json);

    match command {
        // Hooks run without a Ctx so a missing config dir still exits 0.
        Commands::Hook { subcommand } => {
            cmd::hook::run(config_dir.as_deref(), cwd.as_deref(), subcommand);
            Ok(())
        }
        Commands::Tasks { status } => cmd::task::list(&ctx()?, status),
        Commands::Create {
            title,
            description,
            complexity,
            status,
        } => cmd::task::create(&ctx()?, &title.join(" "), description, complexity, status),
        Commands::Update {
            id,
            title,
            description,
            status,
            complexity,
        } => cmd::task::update(
            &ctx()?,
            &id,
            TaskPatch {
                title,
                description,
                project_status: status,
                complexity,
            },
        ),
        Commands::Get { id } => cmd::task::get(&ctx()?, &id),
        Commands::Claim { id } => cmd::task::claim(&ctx()?, &id),
        Commands::Comment { id, body } => cmd::task::comment(&ctx()?, &id, &body.join(" ")),
        Commands::Whoami => cmd::project::whoami(&ctx()?),
        Commands::Status => cmd::project::status(&ctx()?),
        Commands::Connect { base_url } => cmd::connect::connect(&ctx()?, base_url.as_deref()),
        Commands::Disconnect => cmd::connect::disconnect(&ctx()?),
        Commands::Upgrade => cmd::connect::upgrade(&ctx()?),
        Commands::ReviewPlan { file, transcript } => {
            cmd::review::run(&ctx()?, file.as_deref(), transcript.as_deref())
        }
    }
}
