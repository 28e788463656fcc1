// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! HDB - Hardware Debugger
//!
//! Post-hoc replay mode: serve a debug session over a recorded waveform,
//! with no live simulator attached. Live-simulation use injects the `vpi`
//! binding into the simulator process instead of going through this binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, Context, Result};
use hdb_db::SymbolDatabaseClient;
use hdb_engine::{Debugger, DEBUG_LOG_PLUS_ARG, DEBUG_PORT_PLUS_ARG};
use hdb_replay::{EmulationEngine, ReplayProvider, VcdDatabase};
use hdb_rtl::RtlClient;
use tracing::{info, warn};

/// Command-line interface for HDB.
#[derive(Debug, Parser)]
#[command(name = "hdb")]
#[command(about = "Hardware Debugger - source-level debugging for RTL simulations")]
#[command(version)]
struct Cli {
    /// Port for the debug server
    #[arg(long, default_value_t = hdb_engine::DEFAULT_PORT)]
    port: u16,

    /// Enable info logging
    #[arg(long)]
    log: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a recorded waveform dump
    Replay {
        /// Waveform file (VCD)
        waveform: PathBuf,
        /// Debug symbol table built alongside the design
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    hdb_utils::logging::init_logging(cli.log)?;

    match &cli.command {
        Commands::Replay { waveform, db } => replay(&cli, waveform, db),
    }
}

fn replay(cli: &Cli, waveform: &Path, db_filename: &Path) -> Result<()> {
    info!(waveform = %waveform.display(), "loading waveform");
    let database = VcdDatabase::open(waveform)
        .wrap_err_with(|| format!("unable to load waveform {}", waveform.display()))?;

    let provider = Arc::new(ReplayProvider::new(Arc::new(database)));
    // replay has no simulator argv; synthesize the plus-args from the CLI
    let mut argv = vec!["hdb".to_string(), format!("{DEBUG_PORT_PLUS_ARG}{}", cli.port)];
    if cli.log {
        argv.push(DEBUG_LOG_PLUS_ARG.to_string());
    }
    provider.set_argv(argv);

    let symdb = SymbolDatabaseClient::open(db_filename)?;

    // locate the design inside the waveform hierarchy before any name
    // translation happens
    match provider.database().compute_instance_mapping(&symdb.get_instance_names()) {
        Some((def_name, prefix)) => {
            info!(def = %def_name, prefix = %prefix, "design located in waveform");
            provider.set_instance_mapping(&def_name, &prefix);
        }
        None => warn!("unable to locate the design inside the waveform hierarchy"),
    }

    let rtl = Arc::new(RtlClient::new(provider.clone()));
    let debugger = Arc::new(Debugger::new(rtl.clone()));
    debugger.initialize_db_client(symdb);

    // evaluation is clock-driven; the clock nets are recorded in the symbol
    // table annotations
    let db = debugger.db().ok_or_else(|| eyre!("symbol table failed to initialize"))?;
    let clocks = db.get_annotation_values("clock");
    if clocks.is_empty() {
        warn!("no clock annotation in the symbol table; breakpoints will never fire");
    }
    for (index, clock) in clocks.iter().enumerate() {
        let Some(handle) = rtl.get_handle(clock) else {
            warn!(clock = %clock, "clock signal not found in waveform");
            continue;
        };
        let session = debugger.clone();
        let registered = rtl.add_callback(
            &format!("eval_clock_{index}"),
            handle,
            Box::new(move |data| {
                // evaluate on rising edges only
                if data.value.is_some_and(|value| value != 0) {
                    session.eval();
                }
            }),
        );
        if registered.is_none() {
            warn!(clock = %clock, "unable to register clock callback");
        }
    }

    // block until the client connects and sends the first continue
    debugger.run()?;

    let engine = EmulationEngine::new(provider);
    engine.run();

    info!("replay finished");
    debugger.stop();
    Ok(())
}
