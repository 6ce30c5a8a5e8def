//! User-agent enrichment.
//!
//! Classification is a capability behind [`UaClassifier`] so the parser does
//! not depend on a particular UA database. [`WootheeClassifier`] is the
//! default implementation.

use woothee::parser::Parser;

use crate::types::{DeviceClass, LogRecord};

/// Label woothee uses for anything it could not identify.
const UNKNOWN: &str = "UNKNOWN";

/// Result of classifying a user-agent string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UaInfo {
    /// Browser name and version, e.g. `Chrome 120.0.0.0`.
    pub browser: String,
    /// Operating system name.
    pub os: String,
    /// Mobile or desktop.
    pub class: DeviceClass,
}

/// Classifies user-agent strings.
pub trait UaClassifier: Send + Sync {
    /// Classifies a non-empty user-agent string.
    fn classify(&self, ua: &str) -> UaInfo;
}

/// [`UaClassifier`] backed by the woothee rule set.
pub struct WootheeClassifier {
    parser: Parser,
}

impl WootheeClassifier {
    /// Creates a classifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl Default for WootheeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl UaClassifier for WootheeClassifier {
    fn classify(&self, ua: &str) -> UaInfo {
        let Some(result) = self.parser.parse(ua) else {
            return UaInfo {
                class: DeviceClass::Desktop,
                ..UaInfo::default()
            };
        };

        let browser = match (result.name, result.version) {
            (UNKNOWN, _) => String::new(),
            (name, version) if version.is_empty() || version == UNKNOWN => name.to_string(),
            (name, version) => format!("{name} {version}"),
        };
        let os = if result.os == UNKNOWN {
            String::new()
        } else {
            result.os.to_string()
        };
        let class = match result.category {
            "smartphone" | "mobilephone" => DeviceClass::Mobile,
            _ => DeviceClass::Desktop,
        };

        UaInfo { browser, os, class }
    }
}

/// Fills `browser`, `os` and `device` on `record` from its `ua` field.
///
/// Records without a user agent are left untouched.
pub fn enrich_user_agent(record: &mut LogRecord, classifier: &dyn UaClassifier) {
    if record.ua.is_empty() {
        return;
    }
    let info = classifier.classify(&record.ua);
    record.browser = info.browser;
    record.os = info.os;
    record.device = info.class;
}
