//! Core types for the record model.
//!
//! This module provides:
//! - [`LogRecord`] - One parsed or pushed log event, in its wire shape
//! - [`DeviceClass`] - Mobile/desktop class derived from the user agent

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

/// nginx `$time_local` layout, e.g. `10/Oct/2025:10:00:00 +0000`.
const TIME_LOCAL_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Formats a timestamp the way nginx writes `$time_local`.
#[must_use]
pub fn time_local(at: DateTime<Local>) -> String {
    at.format(TIME_LOCAL_FORMAT).to_string()
}

/// Device class derived from a user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceClass {
    /// No user agent was available.
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// Phones and other handheld clients.
    Mobile,
    /// Everything else with a user agent.
    Desktop,
}

impl DeviceClass {
    /// Returns the wire representation of this class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Mobile => "Mobile",
            Self::Desktop => "Desktop",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = LogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Unknown),
            "Mobile" => Ok(Self::Mobile),
            "Desktop" => Ok(Self::Desktop),
            other => Err(LogError::UnknownDeviceClass(other.to_string())),
        }
    }
}

/// A structured log record.
///
/// Optional text fields are empty strings when the source provides nothing,
/// which is also how they appear on the wire. `raw` and `created_at` are
/// always populated. `id` stays 0 until the record has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRecord {
    /// Storage identifier (0 until persisted).
    pub id: i64,
    /// Source address.
    pub ip: String,
    /// Event time, kept in whatever layout the source used.
    pub time: String,
    /// HTTP method or a synthetic tag such as `LOG`, `PUSH`, `BATCH`.
    pub method: String,
    /// Request path.
    pub path: String,
    /// HTTP status code.
    pub status: i32,
    /// Response size in bytes.
    pub bytes: i64,
    /// Referer header.
    pub referer: String,
    /// Raw user-agent string.
    pub ua: String,
    /// Browser name and version.
    pub browser: String,
    /// Operating system name.
    pub os: String,
    /// Mobile/desktop class.
    pub device: DeviceClass,
    /// Client-supplied correlation key.
    pub device_id: String,
    /// Free-form severity level.
    pub level: String,
    /// Free-form grouping label.
    pub tag: String,
    /// Query string, or the free text of a pushed event.
    pub query: String,
    /// Structured payload of a pushed event.
    pub body: String,
    /// The original line or request.
    pub raw: String,
    /// Unix seconds at which the server created this record.
    pub created_at: i64,
}

impl LogRecord {
    /// Creates an empty record for `raw`, stamped with the current time.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            created_at: Utc::now().timestamp(),
            ..Self::default()
        }
    }

    /// Returns true once storage has assigned an identifier.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Serializes the record to its wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
