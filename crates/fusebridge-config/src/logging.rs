//! Log sink settings consumed by the probe's telemetry.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Filter applied when neither the file, environment nor flags set one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How log events are rendered on standard error.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with flattened fields.
    #[default]
    Json,
    /// Single-line text for interactive use.
    Compact,
}

/// The default filter as a borrowed string.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// The default filter as an owned string, for serde defaults.
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// The default log format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
