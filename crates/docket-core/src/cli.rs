use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::model::{Priority, StatusFilter};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "docket",
    version,
    about = "Docket: categorised to-do lists with weekly recurring tasks",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "docketrc")]
    pub docketrc: Option<PathBuf>,

    #[arg(long = "data", conflicts_with = "memory")]
    pub data: Option<PathBuf>,

    /// Keep everything in memory; nothing is written to disk.
    #[arg(long = "memory")]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show categories in display order with their task counts.
    Categories,
    #[command(subcommand)]
    Category(CategoryCommand),
    #[command(subcommand)]
    Task(TaskCommand),
    /// Show tasks, optionally narrowed to one category and status.
    List {
        #[arg(short = 'c', long = "category")]
        category: Option<String>,
        #[arg(short = 's', long = "status", default_value = "all")]
        status: StatusFilter,
    },
    Stats,
    /// Report what the startup renewal sweep did and list weekly tasks.
    Renew,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    Add {
        name: String,
        #[arg(long, default_value = "fas fa-folder")]
        icon: String,
        #[arg(long, default_value = "var(--color-primary)")]
        color: String,
    },
    Edit {
        category: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a category together with all of its tasks.
    Delete {
        category: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Move a category to a 1-based position.
    Move { category: String, position: usize },
}

#[derive(Args, Debug, Clone, Default)]
pub struct TaskFields {
    #[arg(short = 'd', long)]
    pub description: Option<String>,
    #[arg(short = 'p', long)]
    pub priority: Option<Priority>,
    /// `today`, `tomorrow` or YYYY-MM-DD.
    #[arg(long)]
    pub due: Option<String>,
    /// Re-open the task every week on this day (0-6 or a weekday name).
    #[arg(long)]
    pub every: Option<String>,
}

/// Flags of `task edit`; anything left out keeps its current value.
#[derive(Args, Debug, Clone, Default)]
pub struct TaskEditArgs {
    pub task: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(short = 'c', long = "category")]
    pub category: Option<String>,
    #[command(flatten)]
    pub fields: TaskFields,
    #[arg(long = "no-due", conflicts_with = "due")]
    pub no_due: bool,
    #[arg(long = "once", conflicts_with = "every")]
    pub once: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommand {
    /// Add a task; several `-c` flags create one copy per category.
    Add {
        title: String,
        #[arg(short = 'c', long = "category", required = true)]
        categories: Vec<String>,
        #[command(flatten)]
        fields: TaskFields,
    },
    Edit(TaskEditArgs),
    Done {
        task: String,
    },
    Undo {
        task: String,
    },
    Delete {
        task: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls bare `rc.key=value` (or `rc.key:value`) tokens out of the argument
/// list so they can sit anywhere on the command line.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k.to_string(), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
