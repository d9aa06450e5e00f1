//! Reindex command-line library.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (full, group, trigger, search)
//! - `fixture`: JSON fixtures standing in for the entity store

pub mod cli;
pub mod commands;
pub mod fixture;

pub use cli::{Cli, Commands, FixtureArgs, HandlerArg};
pub use commands::{
    handle_command, init_logging, load_settings, parse_filters, parse_state, run_full, run_group,
    run_search, run_trigger, Workspace, MAX_DRAIN_PASSES,
};
pub use fixture::{
    AccessorDecl, ClassDecl, DimensionDecl, EntityRecord, Fixture, IndexDecl, LinkRecord,
};
