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

//! Logging configuration for HDB components.
//!
//! The debugger usually lives inside a simulator process, so everything
//! goes to stderr and stays compact. `RUST_LOG` overrides the level; the
//! `+DEBUG_LOG` plus-arg raises the default from WARN to INFO.

use std::sync::Once;

use eyre::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize logging for a component.
///
/// `info_enabled` reflects the `+DEBUG_LOG` plus-arg: the default level is
/// INFO with it, WARN without. `RUST_LOG` always wins when set.
pub fn init_logging(info_enabled: bool) -> Result<()> {
    let default_level = if info_enabled { Level::INFO } else { Level::WARN };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.as_str()))
        .map_err(|e| eyre::eyre!("failed to create environment filter: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("failed to initialize tracing subscriber: {e}"))?;

    Ok(())
}

// ensures logging is only set up once across all tests in one process
static TEST_LOGGING_INIT: Once = Once::new();

/// Safe logging initialization for tests; can be called from any test any
/// number of times.
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let level = default_level.unwrap_or(Level::INFO);
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str()));
        // a subscriber may already be installed; that is fine for tests
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, error, info, warn};

    #[test]
    fn test_logging_functions_work() {
        ensure_test_logging(None);
        info!("test info message");
        warn!("test warning message");
        debug!("test debug message");
        error!("test error message");
    }

    #[test]
    fn test_double_initialization_is_safe() {
        ensure_test_logging(None);
        ensure_test_logging(Some(Level::DEBUG));
        // a second full init may fail, but must not panic
        let _ = init_logging(true);
    }
}
