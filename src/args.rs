//! Command-line argument parsing and processing.
//!
//! Arguments are parsed by hand into a [`CliAction`]. Help and version flags
//! take precedence over everything else; unknown options and malformed values
//! turn into [`CliAction::ShowHelpDueToError`].

use chrono::{DateTime, Utc};

use crate::time_source::parse_datetime;

/// Options of the `simulate` command.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulateOptions {
    /// Number of rotation cycles to run before stopping.
    pub cycles: u32,
    pub angle: Option<u32>,
    pub cycle_minutes: Option<u64>,
    pub rotation_seconds: Option<u64>,
    /// Time acceleration. `0.0` jumps straight through every wait.
    pub multiplier: f64,
    /// Simulated start time; now when absent.
    pub start: Option<DateTime<Utc>>,
    /// Keep settings in the state directory instead of in memory.
    pub persist: bool,
    pub log_file: Option<String>,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            cycles: 3,
            angle: None,
            cycle_minutes: None,
            rotation_seconds: None,
            multiplier: 0.0,
            start: None,
            persist: false,
            log_file: None,
        }
    }
}

/// Represents the parsed command-line arguments and their intended actions.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Drive the coordinator and a page through simulated cycles
    Simulate {
        debug_enabled: bool,
        config_dir: Option<String>,
        options: SimulateOptions,
    },
    /// Print the stored settings record
    Status {
        debug_enabled: bool,
        config_dir: Option<String>,
        json: bool,
    },

    /// Display help information and exit
    ShowHelp,
    /// Display version information and exit
    ShowVersion,
    /// Show help due to unknown arguments and exit
    ShowHelpDueToError,
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Option<T> {
    match value.map(|v| v.parse::<T>()) {
        Some(Ok(parsed)) => Some(parsed),
        Some(Err(_)) => {
            log_warning!("Invalid value for {flag}: {}", value.map(String::as_str).unwrap_or(""));
            None
        }
        None => {
            log_warning!("Missing value for {flag}");
            None
        }
    }
}

impl ParsedArgs {
    /// Parse command-line arguments into a structured result.
    ///
    /// The first item is the program name and is skipped.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        if args_vec
            .iter()
            .any(|arg| arg == "--version" || arg == "-V" || arg == "-v")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }
        if args_vec.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }

        let action = Self::parse_action(&args_vec).unwrap_or(CliAction::ShowHelpDueToError);
        ParsedArgs { action }
    }

    fn parse_action(args: &[String]) -> Option<CliAction> {
        let mut debug_enabled = false;
        let mut config_dir: Option<String> = None;
        let mut command: Option<&str> = None;
        let mut json = false;
        let mut options = SimulateOptions::default();

        let mut idx = 0;
        while idx < args.len() {
            let arg = args[idx].as_str();
            let next = args.get(idx + 1);
            match arg {
                "--debug" | "-d" => debug_enabled = true,
                "--config" | "-c" => {
                    config_dir = Some(next?.clone());
                    idx += 1;
                }
                "--cycles" | "--angle" | "--cycle-minutes" | "--rotation-seconds"
                | "--multiplier" | "--start" | "--log"
                    if command == Some("simulate") =>
                {
                    match arg {
                        "--cycles" => options.cycles = parse_value(arg, next)?,
                        "--angle" => options.angle = Some(parse_value(arg, next)?),
                        "--cycle-minutes" => options.cycle_minutes = Some(parse_value(arg, next)?),
                        "--rotation-seconds" => {
                            options.rotation_seconds = Some(parse_value(arg, next)?)
                        }
                        "--multiplier" => {
                            let multiplier: f64 = parse_value(arg, next)?;
                            if multiplier < 0.0 {
                                log_warning!("--multiplier must not be negative");
                                return None;
                            }
                            options.multiplier = multiplier;
                        }
                        "--start" => match parse_datetime(next?) {
                            Ok(start) => options.start = Some(start),
                            Err(e) => {
                                log_warning!("Invalid value for --start: {e}");
                                return None;
                            }
                        },
                        _ => options.log_file = Some(next?.clone()),
                    }
                    idx += 1;
                }
                "--persist" if command == Some("simulate") => options.persist = true,
                "--json" if command == Some("status") => json = true,
                "simulate" | "status" if command.is_none() => command = Some(arg),
                _ => {
                    log_warning!("Unknown argument: {arg}");
                    return None;
                }
            }
            idx += 1;
        }

        match command {
            Some("simulate") => Some(CliAction::Simulate {
                debug_enabled,
                config_dir,
                options,
            }),
            Some("status") => Some(CliAction::Status {
                debug_enabled,
                config_dir,
                json,
            }),
            _ => Some(CliAction::ShowHelp),
        }
    }

    /// Convenience method to parse from std::env::args()
    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

/// Displays version information using custom logging style.
pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Displays custom help message using logger methods.
pub fn display_help() {
    log_version!();
    log_block_start!(env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage:");
    log_indented!("dogtor [OPTIONS] <COMMAND>");
    log_block_start!("Options:");
    log_indented!("-c, --config <dir>          Use custom configuration directory");
    log_indented!("-d, --debug                 Enable detailed debug output");
    log_indented!("-h, --help                  Print help information");
    log_indented!("-V, --version               Print version information");
    log_block_start!("Commands:");
    log_indented!("simulate                    Run rotation cycles against a simulated page");
    log_indented!("  --cycles <n>              Cycles to run (default 3)");
    log_indented!("  --angle <deg>             Rotation angle (5-45)");
    log_indented!("  --cycle-minutes <m>       Time between rotations (1-120)");
    log_indented!("  --rotation-seconds <s>    Length of one sequence (15-300)");
    log_indented!("  --multiplier <x>          Time acceleration, 0 = fast-forward (default)");
    log_indented!("  --start <datetime>        Simulated start, \"YYYY-MM-DD HH:MM:SS\" local time");
    log_indented!("  --persist                 Store settings in the state directory");
    log_indented!("  --log <file>              Write output to a file");
    log_indented!("status                      Show the stored settings and schedule");
    log_indented!("  --json                    Print the raw stored document");
    log_end!();
}
