//! Entry point wiring that stitches together the CLI surface, configuration discovery and
//! the live or capture runtime paths before delegating to `run.rs`, while exposing
//! utility commands like `cloudcast config where`.
//!
//! Types:
//!
//! - None; this module focuses on orchestrating submodules.
//!
//! Functions:
//!
//! - `main` parses CLI input, initialises tracing, and dispatches to modes.
//! - `handle_config_command` backs the config subcommand.

mod bootstrap;
mod cli;
mod export;
mod paths;
mod run;
mod sources;

use anyhow::Result;
use cli::{Command, ConfigAction};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Live(args) => run::run_live(cli.config.as_deref(), args),
        Command::Capture(args) => run::run_capture(cli.config.as_deref(), args),
        Command::Config(config_cmd) => handle_config_command(cli.config.as_deref(), config_cmd.action),
    }
}

fn handle_config_command(explicit: Option<&std::path::Path>, action: ConfigAction) -> Result<()> {
    let paths = AppPaths::discover()?;

    match action {
        ConfigAction::Where => {
            println!("Configuration:");
            println!("  config dir:  {}", paths.config_dir().display());
            println!("  config file: {}", paths.config_file().display());
            println!("  output dir:  {}", paths.output_dir().display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = bootstrap::load_config(&paths, explicit)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let target = explicit
                .map(std::path::Path::to_path_buf)
                .unwrap_or_else(|| paths.config_file());
            if bootstrap::write_default_config(&target, force)? {
                println!("wrote {}", target.display());
            } else {
                println!("{} already exists (use --force to overwrite)", target.display());
            }
            Ok(())
        }
    }
}
