pub mod commands;
pub mod output;

use crate::errors::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "us")]
#[command(about = "Unstacked - signed stacked diffs kept in sync across upstream rebases")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the repository for unstacked
    Init {
        /// Reinitialize even if already initialized
        #[arg(long)]
        force: bool,
    },

    /// Stack management
    Stack {
        #[command(subcommand)]
        action: StackAction,
    },

    /// Capture the working state as a new change on top of the stack
    New {
        /// Change title
        #[arg(long, short)]
        message: String,

        /// Longer description appended to the commit message
        #[arg(long, short)]
        description: Option<String>,

        /// Commit only what is staged in the index
        #[arg(long)]
        staged: bool,
    },

    /// Rewrite a change with the captured working state
    Amend {
        /// Change id prefix (defaults to the top change)
        change: Option<String>,

        /// Replace the commit message
        #[arg(long, short)]
        message: Option<String>,

        /// Amend only what is staged in the index
        #[arg(long)]
        staged: bool,
    },

    /// Rebase the stack onto the current upstream head
    Sync {
        /// Rebase onto an explicit commit instead of the upstream head
        #[arg(long)]
        onto: Option<String>,

        /// Accept the working state as the resolution of the conflicted
        /// change and continue the interrupted pass
        #[arg(long = "continue", conflicts_with = "onto")]
        resume: bool,
    },

    /// Move a change to a new position in the stack
    Reorder {
        /// Change id prefix
        change: String,

        /// New zero-based position
        index: usize,
    },

    /// Drop a change and rebase its descendants over the gap
    Remove {
        /// Change id prefix
        change: String,
    },

    /// Fast-forward the upstream branch to the bottom change
    Land {
        /// Also push the upstream branch and delete the landed branch remotely
        #[arg(long)]
        push: bool,
    },

    /// Show the stack and its changes
    Status {
        /// Also fetch and compare against the remote
        #[arg(long)]
        remote: bool,
    },

    /// Push change branches to the remote
    Push {
        /// Overwrite diverged branches without prompting
        #[arg(long)]
        force_diverged: bool,
    },

    /// Verify the signature of every change commit
    Verify,

    /// Delete orphaned branch refs in the unstacked namespace
    Cleanup,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum StackAction {
    /// Create a new stack and make it active
    New {
        /// Stack name
        name: String,

        /// Upstream branch to build on (defaults to the configured one)
        #[arg(long)]
        base: Option<String>,
    },

    /// List stacks
    List,

    /// Switch the active stack
    Switch {
        /// Stack name
        name: String,
    },

    /// Delete a stack and its refs
    Delete {
        /// Stack name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Set a configuration value
    Set {
        /// Configuration key (e.g. signing.key_id)
        key: String,
        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List all configuration values
    List,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        self.setup_logging();

        match self.command {
            Commands::Init { force } => commands::init::run(force),
            Commands::Stack { action } => commands::stack::run(action),
            Commands::New {
                message,
                description,
                staged,
            } => commands::new::run(&message, description.as_deref(), staged),
            Commands::Amend {
                change,
                message,
                staged,
            } => commands::amend::run(change.as_deref(), message.as_deref(), staged),
            Commands::Sync { onto, resume } => commands::sync::run(onto.as_deref(), resume),
            Commands::Reorder { change, index } => commands::reorder::run(&change, index),
            Commands::Remove { change } => commands::remove::run(&change),
            Commands::Land { push } => commands::land::run(push),
            Commands::Status { remote } => commands::status::run(remote),
            Commands::Push { force_diverged } => commands::push::run(force_diverged),
            Commands::Verify => commands::verify::run(),
            Commands::Cleanup => commands::cleanup::run(),
            Commands::Config { action } => commands::config::run(action),
            Commands::Completions { shell } => commands::completions::run(shell),
        }
    }

    fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .without_time();

        if self.no_color {
            subscriber.with_ansi(false).init();
        } else {
            subscriber.init();
        }
    }
}
