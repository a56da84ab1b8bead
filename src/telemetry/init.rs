// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber installation.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// How logs are filtered and formatted.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for this crate when neither `RUST_LOG` nor a directive is set.
    pub default_level: Level,

    /// Log span enter/close events.
    pub include_span_events: bool,

    pub include_file_line: bool,

    pub include_target: bool,

    pub ansi_colors: bool,

    pub compact: bool,

    /// Explicit filter directive; `RUST_LOG` still wins when set.
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::WARN,
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            include_target: true,
            ansi_colors: true,
            compact: false,
            filter_directive: None,
        }
    }

    pub fn production() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: false,
            ansi_colors: false,
            compact: true,
            filter_directive: None,
        }
    }

    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            include_span_events: true,
            include_file_line: true,
            include_target: true,
            ansi_colors: false,
            compact: false,
            filter_directive: Some("toolhost=trace".to_string()),
        }
    }

    /// Preset matching the CLI's `--verbose` / `--debug` / `--trace` flags.
    pub fn from_flags(verbose: bool, debug: bool, trace: bool) -> Self {
        if trace {
            Self::development().with_level(Level::TRACE)
        } else if debug {
            Self::development()
        } else if verbose {
            Self::default().with_level(Level::INFO)
        } else {
            Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    fn directive(&self) -> String {
        self.filter_directive.clone().unwrap_or_else(|| {
            let level = self.default_level.to_string().to_lowercase();
            format!("warn,toolhost={level},mock_tool_server={level}")
        })
    }
}

/// Keep alive for the duration of the program.
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
///
/// ```rust,ignore
/// use toolhost::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(&TelemetryConfig::from_flags(true, false, false))?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directive()))
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let result = if config.compact {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };
    result.map_err(|e| io::Error::other(e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}
