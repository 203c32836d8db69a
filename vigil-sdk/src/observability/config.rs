//! Logging configuration.

use std::env;
use std::io::IsTerminal;
use std::str::FromStr;

/// Filter used when neither `VIGIL_LOG` nor `RUST_LOG` is set: the pipeline
/// crates at `info`, everything else in the host at `warn`.
pub const DEFAULT_FILTER: &str = "warn,vigil_core=info,vigil_upload=info,vigil_sdk=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    /// Multi-line output for a terminal.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            f if f.eq_ignore_ascii_case("json") => Ok(Self::Json),
            f if f.eq_ignore_ascii_case("pretty") => Ok(Self::Pretty),
            f if f.eq_ignore_ascii_case("compact") => Ok(Self::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// How pipeline diagnostics are written when the host has no subscriber of
/// its own.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    format: LogFormat,
    filter: String,
    location: bool,
    ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            filter: DEFAULT_FILTER.to_string(),
            location: false,
            ansi: false,
        }
    }
}

impl TracingConfig {
    /// Compact output with [`DEFAULT_FILTER`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the environment.
    ///
    /// `VIGIL_LOG_FORMAT` selects the format; unset or unrecognised values
    /// pick `pretty` on a terminal and `compact` otherwise. `VIGIL_LOG`,
    /// then `RUST_LOG`, replace the filter. `VIGIL_LOG_LOCATION=1` adds file
    /// and line. Colour is used on a terminal unless `NO_COLOR` is set.
    pub fn from_env() -> Self {
        let terminal = std::io::stderr().is_terminal();

        let format = env::var("VIGIL_LOG_FORMAT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(if terminal {
                LogFormat::Pretty
            } else {
                LogFormat::Compact
            });

        let filter = env::var("VIGIL_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let location = matches!(
            env::var("VIGIL_LOG_LOCATION").as_deref(),
            Ok("1") | Ok("true") | Ok("TRUE")
        );

        Self {
            format,
            filter,
            location,
            ansi: terminal && env::var_os("NO_COLOR").is_none(),
        }
    }

    /// Use `format`.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Replace the filter directives, e.g. `"warn,vigil_upload=debug"`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Attach file and line to every event.
    pub fn with_location(mut self, location: bool) -> Self {
        self.location = location;
        self
    }

    /// Colour the output.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Output format.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Filter directives.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Whether events carry file and line.
    pub fn location(&self) -> bool {
        self.location
    }

    /// Whether output is coloured.
    pub fn ansi(&self) -> bool {
        self.ansi
    }
}
