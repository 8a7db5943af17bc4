// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface
//!
//! Bootstrap-layer CLI for the catalog pipeline daemon. Parsing stays here
//! so the main crate receives an already-structured command; interpretation
//! of the configuration file is the main crate's business.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Catalog pipeline: staged entry processor for filesystem catalogs.
#[derive(Debug, Parser)]
#[command(name = "catalog_pipeline", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk a directory tree and resynchronise the catalog with it.
    Scan {
        /// Root of the tree to walk.
        root: PathBuf,

        /// Sweep catalog entries the walk did not see.
        #[arg(long)]
        gc: bool,
    },
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

/// Parses the process arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}
