// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Logging for flowlane.
//!
//! Everything logs through the `log` facade. [`init_logging`] installs a
//! `logforth` dispatcher writing text or JSON to stdout or a file, and
//! optionally adds the [`RunDiagnostic`] so records carry the run and node
//! they were emitted for.

use std::path::{Path, PathBuf};

use error_stack::report;
use serde::{Deserialize, Serialize};

mod run_diagnostic_context;
pub use run_diagnostic_context::{
    NodeIdGuard, RunDiagnostic, RunInfo, RunInfoGuard, get_node_id, get_run_info,
};

/// Level filter for log output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON logs
    Json,
    /// Human-readable text logs
    #[default]
    Text,
}

/// Log output destination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    #[default]
    Stdout,
    File,
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Level for flowlane crates.
    pub level: LogLevel,
    /// Level for every other crate. When unset, `level` applies to all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_level: Option<LogLevel>,
    pub format: LogFormat,
    pub destination: LogDestination,
    /// Log file, required when `destination` is `file`. `/dev/null` discards logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Add `run_id`/`flow_id`/`node_id` to records.
    pub run_diagnostic: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            other_level: None,
            format: LogFormat::Text,
            destination: LogDestination::Stdout,
            file: None,
            run_diagnostic: true,
        }
    }
}

impl LoggingConfig {
    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        match self.destination {
            LogDestination::File => {
                let Some(file) = &self.file else {
                    return Err(report!(ObservabilityError::ConfigValidationError)
                        .attach_printable("destination is 'file' but file is not set"));
                };
                if file.file_name().is_none() {
                    return Err(report!(ObservabilityError::ConfigValidationError)
                        .attach_printable(format!("log file {} has no file name", file.display())));
                }
            }
            LogDestination::Stdout => {
                if self.file.is_some() {
                    return Err(report!(ObservabilityError::ConfigValidationError)
                        .attach_printable("destination is 'stdout' but file is set"));
                }
            }
        }
        Ok(())
    }

    fn discards(&self) -> bool {
        self.destination == LogDestination::File
            && self.file.as_deref() == Some(Path::new("/dev/null"))
    }
}

/// Install the global logger.
///
/// Call once per process. Logging to the file `/dev/null` installs nothing,
/// which keeps test binaries quiet.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    config.validate()?;

    if config.discards() {
        return Ok(());
    }

    let filter_specs = match config.other_level {
        Some(other_level) => vec![
            format!("flowlane_={}", config.level.as_str()),
            format!("{},flowlane_=off", other_level.as_str()),
        ],
        None => vec![config.level.as_str().to_string()],
    };

    let mut builder = logforth::starter_log::builder();
    for spec in filter_specs {
        let appender = create_appender(config)?;
        builder = add_dispatch(&spec, config.run_diagnostic, appender, builder);
    }
    builder.apply();

    log::debug!("Logging initialized at level {}", config.level.as_str());
    Ok(())
}

#[must_use]
fn add_dispatch(
    filter_spec: &str,
    run_diagnostic: bool,
    appender: Box<dyn logforth::Append>,
    builder: logforth::starter_log::LogStarterBuilder,
) -> logforth::starter_log::LogStarterBuilder {
    use logforth::filter::env_filter::EnvFilterBuilder;

    let filter = EnvFilterBuilder::from_spec(filter_spec).build();

    builder.dispatch(move |d| {
        let mut d = d.filter(filter);
        if run_diagnostic {
            d = d.diagnostic(RunDiagnostic);
        }
        d.append(appender)
    })
}

fn create_appender(config: &LoggingConfig) -> Result<Box<dyn logforth::Append>> {
    use logforth::append;
    use logforth::layout::{JsonLayout, TextLayout};

    match (config.destination, config.file.as_deref()) {
        (LogDestination::Stdout, _) => Ok(match config.format {
            LogFormat::Json => Box::new(append::Stdout::default().with_layout(JsonLayout::default())),
            LogFormat::Text => Box::new(append::Stdout::default().with_layout(TextLayout::default())),
        }),
        (LogDestination::File, Some(path)) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| report!(ObservabilityError::ConfigValidationError))?;
            let file = append::file::FileBuilder::new(directory.to_path_buf(), file_name);
            let file = match config.format {
                LogFormat::Json => file.layout(JsonLayout::default()).build(),
                LogFormat::Text => file.layout(TextLayout::default()).build(),
            };
            let file = file.map_err(|e| {
                report!(ObservabilityError::LogInitError)
                    .attach_printable(format!("failed to open log file {}: {e:?}", path.display()))
            })?;
            Ok(Box::new(file))
        }
        (LogDestination::File, None) => Err(report!(ObservabilityError::ConfigValidationError)
            .attach_printable("destination is 'file' but file is not set")),
    }
}

/// Errors that can occur during logging initialization
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("Failed to initialize logging")]
    LogInitError,
    #[error("Invalid logging configuration")]
    ConfigValidationError,
}

pub type Result<T> = std::result::Result<T, error_stack::Report<ObservabilityError>>;
