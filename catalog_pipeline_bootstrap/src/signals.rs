// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! Installs an interrupt listener that flips the shutdown coordinator. The
//! listener runs a small single-threaded tokio runtime on its own OS thread
//! so the pipeline itself stays free of async machinery.

use crate::shutdown::ShutdownCoordinator;
use tracing::{error, info};

/// Spawns the interrupt listener thread. Returns `false` when the listener
/// could not be installed (the process then only stops by draining).
pub fn spawn_signal_listener(coordinator: &ShutdownCoordinator) -> bool {
    let coordinator = coordinator.clone();
    let spawned = std::thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_io().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("cannot start the signal listener runtime: {err}");
                    return;
                }
            };
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupt received");
                        coordinator.initiate_shutdown();
                    }
                    Err(err) => error!("signal listener failed: {err}"),
                }
            });
        });

    match spawned {
        Ok(_) => true,
        Err(err) => {
            error!("cannot spawn the signal listener: {err}");
            false
        }
    }
}
