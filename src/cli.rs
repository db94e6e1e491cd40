//! Command-line surface: subcommands and the global flags layered across all
//! of them, the way the teacher's `Cli` layers `no_animate`/`unformatted`/
//! `ttl_minutes` with `global = true`.
//!
//! Grounded on spec.md §6.1 and `fz/cli.py`'s subcommand structure (`input`,
//! `compile`, `output`, `run`, `design`, `list`, `install`, `uninstall`).

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "fz", version, about = "Parametric computation driver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    //
    // Global args start here.
    //

    /// Logging verbosity. Overrides FZ_LOG_LEVEL for this invocation.
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Skip the progress spinner and ETA line.
    #[arg(long, default_value_t = false, global = true)]
    pub no_animate: bool,

    /// Output format for anything that renders a result table.
    #[arg(long, short = 'f', value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
    Html,
    Markdown,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the variable names discovered in a template input.
    Input(InputArgs),

    /// Materialize per-case directories without running any calculator.
    Compile(CompileArgs),

    /// Parse already-finished case directories into a result table.
    Output(OutputArgs),

    /// Run the full parametric sweep: compile, dispatch, collect.
    Run(RunArgs),

    /// Drive an iterative design algorithm (propose, run, analyze, repeat).
    Design(DesignArgs),

    /// List installed models/calculators/algorithms, optionally validating them.
    List(ListArgs),

    /// Install a model or algorithm plugin from a GitHub shortname, URL, or local path.
    Install(InstallArgs),

    /// Remove a previously installed model or algorithm.
    Uninstall(UninstallArgs),
}

#[derive(clap::Args, Debug)]
pub struct InputArgs {
    /// Template input file or directory.
    #[arg(short = 'i', long)]
    pub input: String,

    /// Model descriptor: JSON literal, path, or alias under .fz/models/.
    #[arg(short = 'm', long)]
    pub model: String,
}

#[derive(clap::Args, Debug)]
pub struct CompileArgs {
    #[arg(short = 'i', long)]
    pub input: String,

    #[arg(short = 'm', long)]
    pub model: String,

    /// Variable assignment: JSON object mapping name to scalar or list.
    #[arg(short = 'v', long)]
    pub variables: String,

    /// Results directory. Defaults to "results".
    #[arg(short = 'o', long)]
    pub output: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct OutputArgs {
    /// Case directory, or a glob matching several.
    #[arg(short = 'o', long)]
    pub output: String,

    #[arg(short = 'm', long)]
    pub model: String,
}

#[derive(clap::Args, Debug, Serialize)]
pub struct RunArgs {
    #[arg(short = 'i', long)]
    pub input: String,

    #[arg(short = 'm', long)]
    pub model: String,

    #[arg(short = 'v', long)]
    pub variables: String,

    /// Results directory. Defaults to "results".
    #[arg(short = 'r', long)]
    pub results_dir: Option<String>,

    /// Calculator URIs/aliases, comma-separated. Defaults to "sh://".
    #[arg(short = 'c', long, value_delimiter = ',')]
    pub calculators: Vec<String>,

    /// Minutes to reuse a memoized result table for an identical invocation
    /// instead of re-running the sweep. 0 disables memoization.
    #[arg(long, default_value_t = 0)]
    pub ttl_minutes: i64,
}

#[derive(clap::Args, Debug)]
pub struct DesignArgs {
    #[arg(short = 'i', long)]
    pub input: String,

    /// Variable ranges: JSON object mapping name to [min, max] or a list of levels.
    #[arg(short = 'v', long)]
    pub ranges: String,

    #[arg(short = 'm', long)]
    pub model: String,

    /// Analysis expression, evaluated by the algorithm after each round.
    #[arg(short = 'e', long)]
    pub expression: String,

    /// Algorithm name: an installed plugin, or the built-in "random".
    #[arg(short = 'a', long)]
    pub algorithm: String,

    /// Algorithm options: JSON-or-path-or-alias.
    #[arg(short = 'o', long)]
    pub options: Option<String>,

    #[arg(short = 'c', long, value_delimiter = ',')]
    pub calculators: Vec<String>,

    #[arg(short = 'r', long)]
    pub results_dir: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub models: Option<String>,

    #[arg(long)]
    pub calculators: Option<String>,

    #[arg(long)]
    pub algorithms: Option<String>,

    /// Validate each discovered entry instead of just naming it.
    #[arg(long, default_value_t = false)]
    pub check: bool,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    #[command(subcommand)]
    pub kind: PluginKind,
}

#[derive(clap::Args, Debug)]
pub struct UninstallArgs {
    #[command(subcommand)]
    pub kind: UninstallKind,
}

#[derive(Subcommand, Debug)]
pub enum PluginKind {
    Model {
        /// GitHub shortname ("owner/repo"), URL, or local path to a zip/directory.
        src: String,
        #[arg(long, default_value_t = false)]
        global: bool,
    },
    Algorithm {
        src: String,
        #[arg(long, default_value_t = false)]
        global: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum UninstallKind {
    Model {
        name: String,
        #[arg(long, default_value_t = false)]
        global: bool,
    },
    Algorithm {
        name: String,
        #[arg(long, default_value_t = false)]
        global: bool,
    },
}

impl Cli {
    pub fn resolve_log_level(&self) -> LogLevel {
        self.log_level.unwrap_or_else(LogLevel::from_env_or_default)
    }
}

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            LogLevel::Quiet,
            LogLevel::Error,
            LogLevel::Warning,
            LogLevel::Info,
            LogLevel::Debug,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        let name = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        Some(clap::builder::PossibleValue::new(name))
    }
}
