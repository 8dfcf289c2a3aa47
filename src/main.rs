//! Main application entry point.
//!
//! Parses arguments, applies the global flags (`--debug`, `--config`) and
//! dispatches to the command handlers in `dogtor::commands`.

use anyhow::Result;

use dogtor::args::{self, CliAction, ParsedArgs};
use dogtor::commands;
use dogtor::config;
use dogtor::logger::Log;
use dogtor::{log_end, log_error, log_pipe};

fn apply_global_flags(debug_enabled: bool, config_dir: Option<String>) -> Result<()> {
    Log::set_debug(debug_enabled);
    if config_dir.is_some() {
        config::set_config_dir(config_dir)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let parsed_args = ParsedArgs::from_env();

    let result = match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            Ok(())
        }
        CliAction::ShowHelp => {
            args::display_help();
            Ok(())
        }
        CliAction::ShowHelpDueToError => {
            args::display_help();
            std::process::exit(2);
        }
        CliAction::Simulate {
            debug_enabled,
            config_dir,
            options,
        } => apply_global_flags(debug_enabled, config_dir)
            .and_then(|()| commands::simulate::handle_simulate_command(options, debug_enabled)),
        CliAction::Status {
            debug_enabled,
            config_dir,
            json,
        } => apply_global_flags(debug_enabled, config_dir)
            .and_then(|()| commands::status::handle_status_command(json)),
    };

    if let Err(e) = &result {
        log_pipe!();
        log_error!("{e:#}");
        log_end!();
        std::process::exit(1);
    }
    result
}
