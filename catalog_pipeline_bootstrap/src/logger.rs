// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logger Initialisation
//!
//! Sets up the process-wide tracing subscriber. `RUST_LOG` wins when set;
//! otherwise the verbosity counter from the CLI maps to a default filter.

use tracing_subscriber::EnvFilter;

/// Initialises the global subscriber. Call once, before any pipeline work.
pub fn init_logging(verbose: u8) -> Result<(), String> {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|err| format!("cannot initialise logging: {err}"))
}
