use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use satchel_core::models::{Priority, RecordKind};

#[derive(Parser)]
#[command(name = "satchel")]
#[command(about = "Capture tasks, notes, and bookmarks that follow you across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Quick capture: satchel "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new record
    #[command(alias = "new")]
    Add {
        /// Record kind
        #[arg(long, value_enum, default_value_t = KindArg::Note)]
        kind: KindArg,
        /// Title (defaults to the first content line)
        #[arg(long)]
        title: Option<String>,
        /// Source URL (required for bookmarks)
        #[arg(long)]
        url: Option<String>,
        /// Task priority
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,
        /// Task due date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
        /// Attach a tag (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Record content
        content: Vec<String>,
    },
    /// Capture a record from a page context
    Capture {
        /// Page URL
        #[arg(long)]
        url: String,
        /// Page title
        #[arg(long)]
        title: String,
        /// Record kind
        #[arg(long, value_enum, default_value_t = KindArg::Bookmark)]
        kind: KindArg,
        /// Optional note content
        content: Vec<String>,
    },
    /// List recent records
    List {
        /// Filter by record kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Filter by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing record
    Edit {
        /// Record ID or unique ID prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,
        /// Task due date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
        /// Replace the tag set (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Replace the collection set (repeatable)
        #[arg(long = "collection", value_name = "NAME")]
        collections: Vec<String>,
    },
    /// Toggle a task's completion state
    Done {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Delete an existing record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Sync with the configured remote
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show this install's device identity
    Device,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Task,
    Note,
    Bookmark,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Task => Self::Task,
            KindArg::Note => Self::Note,
            KindArg::Bookmark => Self::Bookmark,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(priority: PriorityArg) -> Self {
        match priority {
            PriorityArg::Low => Self::Low,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::High => Self::High,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
