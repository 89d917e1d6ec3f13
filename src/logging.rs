//! Log configuration for the driver.
//!
//! The core only emits `tracing` events (target `pipeline`); installing a
//! subscriber is the driver's business. Settings come from
//! `BASALT_LOG_FORMAT` / `BASALT_LOG_LEVEL`, overridden by CLI flags.

use std::env;
use std::fmt;
use std::str::FromStr;

pub const FORMAT_ENV: &str = "BASALT_LOG_FORMAT";
pub const LEVEL_ENV: &str = "BASALT_LOG_LEVEL";

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Auto,
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogFormat::parse(s).ok_or_else(|| format!("unknown log format `{}`", s))
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogFormat::Auto => "auto",
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "error" | "err" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "verbose" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::parse(s).ok_or_else(|| format!("unknown log level `{}`", s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogOptions {
    pub const DEFAULT: Self = Self {
        format: LogFormat::Auto,
        level: LogLevel::Warn,
    };

    #[must_use]
    pub fn from_env() -> Self {
        let format = env::var(FORMAT_ENV).ok();
        let level = env::var(LEVEL_ENV).ok();
        apply_overrides(Self::DEFAULT, format.as_deref(), level.as_deref())
    }

    /// CLI flags win over the environment.
    #[must_use]
    pub fn with_cli(self, format: Option<LogFormat>, level: Option<LogLevel>) -> Self {
        Self {
            format: format.unwrap_or(self.format),
            level: level.unwrap_or(self.level),
        }
    }

    /// `Auto` picks JSON when stderr is not a terminal.
    #[must_use]
    pub fn resolved(self, stderr_is_terminal: bool) -> Self {
        let format = match self.format {
            LogFormat::Auto if stderr_is_terminal => LogFormat::Text,
            LogFormat::Auto => LogFormat::Json,
            other => other,
        };
        Self { format, ..self }
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn apply_overrides(mut options: LogOptions, format: Option<&str>, level: Option<&str>) -> LogOptions {
    if let Some(parsed) = format.and_then(LogFormat::parse) {
        options.format = parsed;
    }
    if let Some(parsed) = level.and_then(LogLevel::parse) {
        options.level = parsed;
    }
    options
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(options: LogOptions) {
    use std::io::IsTerminal;
    use std::sync::OnceLock;
    use tracing_subscriber::{fmt, EnvFilter};

    static INITIALISED: OnceLock<()> = OnceLock::new();

    INITIALISED.get_or_init(|| {
        let is_terminal = std::io::stderr().is_terminal();
        let options = options.resolved(is_terminal);
        let use_ansi = is_terminal && env::var_os("NO_COLOR").is_none();
        let filter = EnvFilter::try_from_env("BASALT_LOG")
            .unwrap_or_else(|_| EnvFilter::new(options.level.to_string()));

        let builder = fmt::fmt()
            .with_env_filter(filter)
            .with_max_level(options.level.as_tracing_level())
            .with_writer(std::io::stderr)
            .with_target(true);

        let installed = match options.format {
            LogFormat::Json => {
                tracing::subscriber::set_global_default(builder.json().finish())
            }
            _ => tracing::subscriber::set_global_default(
                builder.with_ansi(use_ansi).compact().finish(),
            ),
        };
        if installed.is_err() {
            tracing::debug!(target: "pipeline", "global subscriber already installed");
        }
    });
}
