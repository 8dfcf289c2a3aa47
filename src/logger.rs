//! Structured logging with box-drawing output.
//!
//! Every component of dogtor logs through the macros defined here. Output goes
//! to stdout with ANSI colors, or to a file through a writer thread when file
//! logging is active. Logging can be disabled at runtime, which the tests use
//! to keep their output quiet.
//!
//! ## Conventions
//!
//! - `log_block_start!` opens a new block for a significant event (startup,
//!   reconciliation, an alarm fire). It prints a spacer pipe and then `┣ message`.
//! - `log_decorated!` continues the current block with `┣ message`.
//! - `log_indented!` prints details under the current line as `┃   message`.
//! - `log_pipe!` prints a bare `┃` spacer, mainly before a levelled message.
//! - `log_info!`, `log_warning!`, `log_error!`, `log_debug!`, `log_critical!`
//!   print `┣[LEVEL] message`. Skip decisions use info, persistence and
//!   delivery failures use warning or error.
//! - `log_version!` and `log_end!` frame a whole run.
//!
//! When a simulated clock is registered with [`Log::set_clock`], every line is
//! prefixed with the simulated wall time so long fast-forwarded runs stay
//! readable.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};

use once_cell::sync::OnceCell;

use crate::time_source::TimeSource;

static LOGGING_ENABLED: AtomicBool = AtomicBool::new(true);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

// Clock used for timestamp prefixes; only consulted when it is simulated
static LOG_CLOCK: OnceCell<Arc<dyn TimeSource>> = OnceCell::new();

// Channel for routing output to a file when --log is active
static LOG_CHANNEL: OnceCell<Sender<LogMessage>> = OnceCell::new();

enum LogMessage {
    Formatted(String),
    Shutdown,
}

/// Line decorations understood by [`emit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Block,
    Decorated,
    Indented,
    Pipe,
    Info,
    Warning,
    Error,
    Debug,
    Critical,
    End,
}

/// Runtime controls for the logging macros.
pub struct Log;

impl Log {
    /// Enable or disable logging.
    pub fn set_enabled(enabled: bool) {
        LOGGING_ENABLED.store(enabled, Ordering::SeqCst);
    }

    /// Check if logging is currently enabled.
    pub fn is_enabled() -> bool {
        LOGGING_ENABLED.load(Ordering::SeqCst)
    }

    /// Show or suppress `log_debug!` output (`--debug`).
    pub fn set_debug(enabled: bool) {
        DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    }

    pub fn is_debug() -> bool {
        DEBUG_ENABLED.load(Ordering::SeqCst)
    }

    /// Register the clock used for simulation timestamps. Only the first call wins.
    pub fn set_clock(clock: Arc<dyn TimeSource>) {
        let _ = LOG_CLOCK.set(clock);
    }

    /// Start file logging to the specified path.
    pub fn start_file_logging(file_path: String) -> anyhow::Result<LoggerGuard> {
        let (tx, rx) = channel();

        LOG_CHANNEL
            .set(tx.clone())
            .map_err(|_| anyhow::anyhow!("Logger channel already initialized"))?;

        let handle = std::thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                let mut file = std::fs::File::create(&file_path)?;
                loop {
                    match rx.recv() {
                        Ok(LogMessage::Formatted(text)) => file.write_all(text.as_bytes())?,
                        Ok(LogMessage::Shutdown) | Err(_) => {
                            file.flush()?;
                            break;
                        }
                    }
                }
                Ok::<(), anyhow::Error>(())
            })?;

        Ok(LoggerGuard {
            tx,
            handle: Some(handle),
        })
    }

    /// Timestamp prefix for simulated runs, empty otherwise.
    pub fn timestamp_prefix() -> String {
        match LOG_CLOCK.get() {
            Some(clock) if clock.is_simulated() => {
                format!("[{}] ", clock.now().format("%H:%M:%S"))
            }
            _ => String::new(),
        }
    }
}

/// Guard for file logging that flushes and joins the writer on drop.
pub struct LoggerGuard {
    tx: Sender<LogMessage>,
    handle: Option<std::thread::JoinHandle<anyhow::Result<()>>>,
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(LogMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == 'm' {
                    break;
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Render one log line without the timestamp prefix.
pub fn render(style: Style, message: &str) -> String {
    match style {
        Style::Block => format!("┃\n┣ {message}\n"),
        Style::Decorated => format!("┣ {message}\n"),
        Style::Indented => format!("┃   {message}\n"),
        Style::Pipe => "┃\n".to_string(),
        Style::Info => format!("┣[\x1b[32mINFO\x1b[0m] {message}\n"),
        Style::Warning => format!("┣[\x1b[33mWARNING\x1b[0m] {message}\n"),
        Style::Error => format!("┣[\x1b[31mERROR\x1b[0m] {message}\n"),
        Style::Debug => format!("┣[\x1b[32mDEBUG\x1b[0m] {message}\n"),
        Style::Critical => format!("┣[\x1b[31mCRITICAL\x1b[0m] {message}\n"),
        Style::End => "╹\n".to_string(),
    }
}

/// Format and route one log line. Called by the macros.
pub fn emit(style: Style, message: &str) {
    if !Log::is_enabled() || (style == Style::Debug && !Log::is_debug()) {
        return;
    }
    let prefix = Log::timestamp_prefix();
    let rendered = render(style, message);
    let text = if prefix.is_empty() {
        rendered
    } else {
        rendered
            .lines()
            .map(|line| format!("{prefix}{line}\n"))
            .collect()
    };
    write_output(&text);
}

/// Route already formatted text to the file writer or stdout.
pub fn write_output(text: &str) {
    if let Some(tx) = LOG_CHANNEL.get() {
        let _ = tx.send(LogMessage::Formatted(strip_ansi_codes(text)));
    } else {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

/// Start a new block of related log lines.
#[macro_export]
macro_rules! log_block_start {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Block, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Block, &$expr.to_string())
    };
}

/// Continue the current block.
#[macro_export]
macro_rules! log_decorated {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Decorated, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Decorated, &$expr.to_string())
    };
}

/// Detail line nested under the previous message.
#[macro_export]
macro_rules! log_indented {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Indented, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Indented, &$expr.to_string())
    };
}

/// Vertical spacer.
#[macro_export]
macro_rules! log_pipe {
    () => {
        $crate::logger::emit($crate::logger::Style::Pipe, "")
    };
}

#[macro_export]
macro_rules! log_info {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Info, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Info, &$expr.to_string())
    };
}

#[macro_export]
macro_rules! log_warning {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Warning, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Warning, &$expr.to_string())
    };
}

#[macro_export]
macro_rules! log_error {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Error, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Error, &$expr.to_string())
    };
}

#[macro_export]
macro_rules! log_debug {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Debug, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Debug, &$expr.to_string())
    };
}

#[macro_export]
macro_rules! log_critical {
    ($fmt:literal $($arg:tt)*) => {
        $crate::logger::emit($crate::logger::Style::Critical, &format!($fmt $($arg)*))
    };
    ($expr:expr) => {
        $crate::logger::emit($crate::logger::Style::Critical, &$expr.to_string())
    };
}

/// Application header, printed once per run.
#[macro_export]
macro_rules! log_version {
    () => {
        $crate::logger::write_output(&format!(
            "{}┏ dogtor v{} ━━╸\n",
            $crate::logger::Log::timestamp_prefix(),
            env!("CARGO_PKG_VERSION")
        ))
    };
}

/// Final termination marker.
#[macro_export]
macro_rules! log_end {
    () => {
        $crate::logger::emit($crate::logger::Style::End, "")
    };
}
