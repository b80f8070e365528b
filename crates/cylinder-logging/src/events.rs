use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for the session lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    SessionStarted {
        id: String,
        closed_previous: Option<String>,
    },
    LevelChanged {
        id: String,
        from: u8,
        to: u8,
        log_count: usize,
    },
    SessionClosed {
        id: String,
        total_hours: f64,
        total_units: f64,
    },
    MutationFailed {
        operation: String,
        id: Option<String>,
        error: String,
    },
    BackendModeChanged {
        from: String,
        to: String,
    },
    StoreDegraded {
        reason: String,
    },
    ConflictDetected {
        ids: Vec<String>,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }

    /// Single-line rendering used by [`LogFormat::Compact`].
    pub fn compact(&self) -> String {
        match self {
            LogEvent::SessionStarted {
                id,
                closed_previous: Some(prev),
            } => format!("session:start {} (closed {})", id, prev),
            LogEvent::SessionStarted { id, .. } => format!("session:start {}", id),
            LogEvent::LevelChanged { id, from, to, .. } => {
                format!("level:{}->{} {}", from, to, id)
            }
            LogEvent::SessionClosed {
                id,
                total_hours,
                total_units,
            } => format!(
                "session:close {} {:.2}h {:.2}u",
                id, total_hours, total_units
            ),
            LogEvent::MutationFailed {
                operation,
                id,
                error,
            } => format!(
                "error:{}:{} {}",
                operation,
                id.as_deref().unwrap_or("-"),
                error
            ),
            LogEvent::BackendModeChanged { from, to } => format!("store:mode {}->{}", from, to),
            LogEvent::StoreDegraded { reason } => format!("store:degraded {}", reason),
            LogEvent::ConflictDetected { ids } => format!("conflict:active {}", ids.join(",")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for lifecycle events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // Log to file if configured (always JSON format for file)
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        // Log to console based on format
        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let line = match event {
            LogEvent::SessionStarted {
                id,
                closed_previous,
            } => {
                let mut line = format!("{} {}", "● New cylinder".bright_green().bold(), id.dimmed());
                if let Some(prev) = closed_previous {
                    line.push_str(&format!(" {}", format!("(replaced {})", prev).dimmed()));
                }
                line
            }
            LogEvent::LevelChanged { id, from, to, .. } => format!(
                "{} {} → {} {}",
                "↕ Level".bright_blue(),
                Self::styled_level(*from),
                Self::styled_level(*to),
                id.dimmed()
            ),
            LogEvent::SessionClosed {
                id,
                total_hours,
                total_units,
            } => format!(
                "{} {} {:.2}h, {} units",
                "■ Closed".bright_white().bold(),
                id.dimmed(),
                total_hours,
                format!("{:.2}", total_units).yellow()
            ),
            LogEvent::MutationFailed {
                operation,
                id,
                error,
            } => format!(
                "{} {} {}: {}",
                "✗".bright_red(),
                operation,
                id.as_deref().unwrap_or("").dimmed(),
                error.bright_red()
            ),
            LogEvent::BackendModeChanged { from, to } => format!(
                "{} {} → {}",
                "⚠ Storage".bright_yellow(),
                from,
                to.bright_yellow().bold()
            ),
            LogEvent::StoreDegraded { reason } => {
                format!("{} {}", "⚠ Degraded:".bright_yellow(), reason)
            }
            LogEvent::ConflictDetected { ids } => format!(
                "{} {}",
                "✗ Multiple active sessions:".bright_red().bold(),
                ids.join(", ")
            ),
        };
        let _ = writeln!(stderr, "{}", line);
    }

    fn log_compact(&self, event: &LogEvent) {
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let _ = writeln!(std::io::stderr(), "[{}] {}", timestamp, event.compact());
    }

    fn styled_level(level: u8) -> String {
        let label = format!("L{}", level);
        match level {
            1 => label.bright_blue().to_string(),
            2 => label.bright_yellow().to_string(),
            _ => label.bright_magenta().to_string(),
        }
    }
}
