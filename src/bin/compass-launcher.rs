//! compass-launcher - inspect and maintain the Compass binary cache.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use compass_launcher::commands::{self, VerifyReport};
use compass_launcher::core::config::LauncherConfig;
use compass_launcher::core::error::{LauncherError, LauncherResult};

#[derive(Parser, Debug)]
#[command(name = "compass-launcher", author, version, about)]
#[command(
    long_about = "Manage the verified Compass binaries cached by the `compass` launcher.\n\n\
Examples:\n\
    compass-launcher install\n\
    compass-launcher reinstall --version-override 1.4.0\n\
    compass-launcher list --json\n\
    compass-launcher prune --keep 2\n"
)]
struct Cli {
    /// Cache root (defaults to COMPASS_CACHE_HOME or the user cache dir).
    #[arg(long, global = true, value_name = "DIR", env = "COMPASS_CACHE_HOME")]
    cache_dir: Option<PathBuf>,

    /// Release base URL.
    #[arg(long, global = true, value_name = "URL", env = "COMPASS_DOWNLOAD_URL")]
    download_url: Option<String>,

    /// Never touch the network.
    #[arg(long, global = true)]
    offline: bool,

    /// Compass version to operate on (defaults to COMPASS_VERSION).
    #[arg(long, global = true, value_name = "VERSION")]
    version_override: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and verify the binary if it is not cached yet.
    Install,
    /// Discard the cached binary and download it again.
    Reinstall,
    /// Remove the cached binary for this version.
    Evict,
    /// Re-hash the cached binary against its recorded digest.
    Verify,
    /// List cached binaries.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Keep only the newest N versions per platform.
    Prune {
        #[arg(long, default_value_t = 1)]
        keep: usize,
    },
    /// Print the path the launcher would execute.
    Which,
    /// Print the detected platform identifier.
    Platform,
}

fn main() -> ExitCode {
    compass_launcher::init_tracing();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("compass-launcher: cannot start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("compass-launcher: {err}");
            eprintln!("  fix: {}", err.remediation());
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(cli: &Cli) -> LauncherResult<LauncherConfig> {
    let mut config = LauncherConfig::from_env()?;
    if let Some(dir) = &cli.cache_dir {
        config.cache_root = dir.clone();
    }
    if let Some(url) = &cli.download_url {
        config.download_url = url.clone();
    }
    if cli.offline {
        config.offline = true;
    }
    if let Some(version) = &cli.version_override {
        config.version = version.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> LauncherResult<ExitCode> {
    let config = resolve_config(&cli)?;
    let version = config.version.as_str();

    match cli.command {
        Command::Install => {
            let report = commands::install(&config, version).await?;
            println!("{} installed at {}", report.artifact, report.path.display());
        }
        Command::Reinstall => {
            let report = commands::reinstall(&config, version).await?;
            println!("{} reinstalled at {}", report.artifact, report.path.display());
        }
        Command::Evict => {
            let report = commands::evict(&config, version).await?;
            if report.removed {
                println!("Removed {}", report.artifact);
            } else {
                println!("{} was not cached", report.artifact);
            }
        }
        Command::Verify => match commands::verify(&config, version).await? {
            VerifyReport::Ok { artifact, sha256, .. } => println!("{artifact}: ok ({sha256})"),
            VerifyReport::Missing { artifact } => {
                println!("{artifact}: not cached");
                return Ok(ExitCode::from(2));
            }
            VerifyReport::Corrupt { artifact, reason } => {
                println!("{artifact}: corrupt ({reason})");
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::List { json } => {
            let entries = commands::list(&config).await?;
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No cached binaries under {}", config.cache_root.display());
            } else {
                for entry in entries {
                    println!(
                        "{:<14} {:<12} {:>10}  {}",
                        entry.platform,
                        entry.version,
                        entry.size,
                        entry.path.display()
                    );
                }
            }
        }
        Command::Prune { keep } => {
            for artifact in commands::prune(&config, keep).await? {
                println!("Removed {artifact}");
            }
        }
        Command::Which => {
            let report = commands::which(&config, version).await?;
            println!("{}", report.path.display());
            if !report.installed {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Platform => {
            let report = commands::platform()?;
            println!("{}", report.platform);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> LauncherResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(LauncherError::from)?;
    println!("{text}");
    Ok(())
}
