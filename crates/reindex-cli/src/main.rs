//! Search index maintenance CLI.
//!
//! # Usage
//!
//! ```bash
//! reindex full   --fixture site.json [--index Main] [--class Page] [--handler queued]
//! reindex group  --fixture site.json --index Main --class Page \
//!                --state '{"stage":"Live"}' --group-count 4 --group-index 2
//! reindex trigger --fixture site.json --type Member --id 9
//! reindex search --fixture site.json --index Main --state '{"stage":"Live"}' welcome
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/reindex/config.toml)
//! 3. Environment variables (REINDEX_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use reindex_cli::{handle_command, Cli};

fn main() -> Result<()> {
    handle_command(Cli::parse())
}
