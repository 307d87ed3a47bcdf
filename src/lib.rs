pub mod commands;
pub mod core;

use std::ffi::OsString;
use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::core::config::LauncherConfig;
use crate::core::error::LauncherError;
use crate::core::launch::{exit_like, ExitOutcome, LaunchFailure, Launcher};

pub const LOG_ENV: &str = "COMPASS_LOG";

/// Structured logging to stderr. Quiet (`warn`) unless `COMPASS_LOG` says
/// otherwise, so stdout stays untouched for the child.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

/// Entry point of the `compass` binary: forwards this process's arguments
/// and environment to the managed binary and mirrors its termination.
pub fn run() -> ! {
    init_tracing();

    let argv: Vec<OsString> = std::env::args_os().skip(1).collect();
    let env: Vec<(OsString, OsString)> = std::env::vars_os().collect();

    match launch(&argv, &env) {
        Ok(outcome) => exit_like(outcome),
        Err(failure) => {
            eprintln!("{}", failure.render());
            std::process::exit(1)
        }
    }
}

fn launch(
    argv: &[OsString],
    env: &[(OsString, OsString)],
) -> Result<ExitOutcome, LaunchFailure> {
    let config = LauncherConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| LauncherError::Config(format!("cannot start async runtime: {e}")))?;

    tracing::debug!("compass launcher {} starting", env!("CARGO_PKG_VERSION"));
    let version = config.version.clone();
    let launcher = Launcher::new(config);
    runtime.block_on(launcher.run(&version, argv, env))
}
