//! CLI argument parsing for the reindex binary.
//!
//! Flags given here override the layered settings.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Search index maintenance
///
/// Rebuilds, reruns and queries search indexes over a JSON fixture of
/// entity types, index declarations and entities.
#[derive(Parser, Debug)]
#[command(name = "reindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/reindex/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the tantivy index directory
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Fixture shared by every command.
#[derive(Args, Debug, Clone)]
pub struct FixtureArgs {
    /// JSON fixture with types, dimensions, indexes and entities
    #[arg(short, long)]
    pub fixture: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerArg {
    /// Run every group inline
    Immediate,
    /// Enqueue one job per group and drain the queue
    Queued,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild indexes from the fixture
    Full {
        #[command(flatten)]
        fixture: FixtureArgs,

        /// Index to rebuild (repeatable; default: all declared)
        #[arg(short, long)]
        index: Vec<String>,

        /// Only rebuild these classes (skips the obsolete-class cleanup)
        #[arg(long)]
        class: Vec<String>,

        /// Override the configured reindex handler
        #[arg(long, value_enum)]
        handler: Option<HandlerArg>,

        /// Override the configured group size
        #[arg(long)]
        batch_size: Option<u64>,
    },

    /// Rerun a single reindex group
    Group {
        #[command(flatten)]
        fixture: FixtureArgs,

        #[arg(short, long)]
        index: String,

        #[arg(long)]
        class: String,

        /// State vector as JSON, e.g. '{"stage":"Live"}'
        #[arg(long, default_value = "{}")]
        state: String,

        #[arg(long)]
        group_count: u64,

        #[arg(long)]
        group_index: u64,
    },

    /// Reindex one entity and everything that depends on it
    Trigger {
        #[command(flatten)]
        fixture: FixtureArgs,

        /// Declared type of the entity
        #[arg(long = "type")]
        type_name: String,

        #[arg(long)]
        id: u64,

        /// Treat the entity as deleted
        #[arg(long)]
        delete: bool,
    },

    /// Query an index under a variant state
    Search {
        #[command(flatten)]
        fixture: FixtureArgs,

        #[arg(short, long)]
        index: String,

        /// Fulltext terms (all must match)
        terms: Vec<String>,

        /// Restrict to these classes (default: the index's classes)
        #[arg(long)]
        class: Vec<String>,

        /// FIELD=VALUE filter; repeat a field to accept any of its values
        #[arg(long)]
        filter: Vec<String>,

        /// FIELD=VALUE exclusion
        #[arg(long)]
        exclude: Vec<String>,

        /// State to query under, as JSON
        #[arg(long)]
        state: Option<String>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
