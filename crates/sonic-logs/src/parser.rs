//! Tiered access-log line parsing.
//!
//! Lines are tried against the active [`CompiledMatcher`], then against the
//! standard combined format, and finally reduced to their first token. A
//! record is produced in every case.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::enrich::{UaClassifier, enrich_user_agent};
use crate::format::{CompiledMatcher, Field};
use crate::routing::{DEFAULT_ROUTING_MARKER, derive_routing_fields};
use crate::types::LogRecord;

/// Path given to records whose line carried none.
pub const DEFAULT_PATH: &str = "-";
/// Method given to records whose line carried none.
pub const DEFAULT_METHOD: &str = "LOG";
/// Status given to records whose line carried none.
pub const DEFAULT_STATUS: i32 = 200;

/// Standard nginx `combined` layout.
static COMBINED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip>\S+) - \S+ \[(?P<time>[^\]]+)\] "(?P<request>[^"]+)" (?P<status>\d+) (?P<bytes>\d+) "(?P<referer>[^"]*)" "(?P<ua>[^"]*)""#,
    )
    .ok()
});

/// Which tier produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// The configured format matched.
    Primary,
    /// The combined format matched.
    Fallback,
    /// Nothing matched; only the leading token was kept.
    Unmatched,
}

/// Parser turning raw access-log lines into [`LogRecord`]s.
#[derive(Clone)]
pub struct LineParser {
    matcher: Arc<CompiledMatcher>,
    classifier: Arc<dyn UaClassifier>,
    routing_marker: String,
}

impl LineParser {
    /// Creates a parser for `matcher` that enriches with `classifier`.
    #[must_use]
    pub fn new(matcher: Arc<CompiledMatcher>, classifier: Arc<dyn UaClassifier>) -> Self {
        Self {
            matcher,
            classifier,
            routing_marker: DEFAULT_ROUTING_MARKER.to_string(),
        }
    }

    /// Sets the path segment that precedes device identifiers.
    #[must_use]
    pub fn with_routing_marker(mut self, marker: impl Into<String>) -> Self {
        self.routing_marker = marker.into();
        self
    }

    /// The active matcher.
    #[must_use]
    pub fn matcher(&self) -> &CompiledMatcher {
        &self.matcher
    }

    /// The UA classifier used for enrichment.
    #[must_use]
    pub fn classifier(&self) -> &Arc<dyn UaClassifier> {
        &self.classifier
    }

    /// The configured routing marker.
    #[must_use]
    pub fn routing_marker(&self) -> &str {
        &self.routing_marker
    }

    /// Parses one line. Never fails.
    #[must_use]
    pub fn parse(&self, line: &str) -> LogRecord {
        self.parse_with_tier(line).0
    }

    /// Parses one line and reports which tier matched.
    #[must_use]
    pub fn parse_with_tier(&self, line: &str) -> (LogRecord, MatchTier) {
        let mut record = LogRecord::new(line);
        record.path = DEFAULT_PATH.to_string();
        record.method = DEFAULT_METHOD.to_string();
        record.status = DEFAULT_STATUS;

        let tier = if let Some(fields) = self.matcher.extract(line) {
            apply_fields(&mut record, &fields);
            MatchTier::Primary
        } else if apply_combined(&mut record, line) {
            MatchTier::Fallback
        } else {
            if let Some(token) = line.split_whitespace().next() {
                record.ip = token.to_string();
            }
            warn!(line = %line, "line did not match any known format");
            MatchTier::Unmatched
        };

        enrich_user_agent(&mut record, self.classifier.as_ref());
        derive_routing_fields(&mut record, &self.routing_marker);

        (record, tier)
    }
}

impl std::fmt::Debug for LineParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineParser")
            .field("matcher", &self.matcher)
            .field("routing_marker", &self.routing_marker)
            .finish_non_exhaustive()
    }
}

fn apply_fields(record: &mut LogRecord, fields: &[(Field, &str)]) {
    for &(field, value) in fields {
        match field {
            Field::Ip => record.ip = value.to_string(),
            Field::Time => record.time = value.to_string(),
            Field::Method => record.method = value.to_string(),
            Field::Path => record.path = value.to_string(),
            Field::Status => {
                if let Ok(status) = value.parse() {
                    record.status = status;
                }
            }
            Field::Bytes => {
                if let Ok(bytes) = value.parse() {
                    record.bytes = bytes;
                }
            }
            Field::Referer => record.referer = value.to_string(),
            Field::Ua => record.ua = value.to_string(),
            Field::Query => record.query = value.to_string(),
            Field::Body => record.body = value.to_string(),
            Field::User | Field::Proto => {}
        }
    }
}

/// Applies the combined layout, returning false if it does not match.
fn apply_combined(record: &mut LogRecord, line: &str) -> bool {
    let Some(caps) = COMBINED.as_ref().and_then(|re| re.captures(line)) else {
        return false;
    };
    let text = |name: &str| caps.name(name).map_or("", |m| m.as_str());

    record.ip = text("ip").to_string();
    record.time = text("time").to_string();

    let mut request = text("request").split(' ');
    if let (Some(method), Some(path)) = (request.next(), request.next()) {
        record.method = method.to_string();
        record.path = path.to_string();
    }

    if let Ok(status) = text("status").parse() {
        record.status = status;
    }
    if let Ok(bytes) = text("bytes").parse() {
        record.bytes = bytes;
    }
    record.referer = text("referer").to_string();
    record.ua = text("ua").to_string();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::UaInfo;
    use crate::types::DeviceClass;
    use proptest::prelude::*;
    use test_case::test_case;

    const SHORT_FORMAT: &str = r#"$remote_addr - $remote_user [$time_local] "$request" $status"#;
    const DEFAULT_FORMAT: &str = r#"$remote_addr - $remote_user [$time_local] "$request" $status GET_ARGS: "$query_string" POST_BODY: "$request_body""#;

    struct FixedClassifier;

    impl UaClassifier for FixedClassifier {
        fn classify(&self, ua: &str) -> UaInfo {
            UaInfo {
                browser: format!("Fixed {}", ua.len()),
                os: "FixedOS".to_string(),
                class: DeviceClass::Desktop,
            }
        }
    }

    fn parser(format: &str) -> LineParser {
        LineParser::new(
            Arc::new(CompiledMatcher::compile(format)),
            Arc::new(FixedClassifier),
        )
    }

    #[test]
    fn health_check_line() {
        let record = parser(SHORT_FORMAT).parse(
            r#"10.0.0.1 - - [10/Oct/2025:10:00:00 +0000] "GET /health HTTP/1.1" 204"#,
        );
        assert_eq!(record.ip, "10.0.0.1");
        assert_eq!(record.method, "GET");
        assert_eq!(record.path, "/health");
        assert_eq!(record.status, 204);
        assert_eq!(record.time, "10/Oct/2025:10:00:00 +0000");
    }

    #[test_case(
        r#"10.0.0.1 - - [10/Oct/2025:10:00:00 +0000] "GET / HTTP/1.1" 200"#,
        MatchTier::Primary ; "active format"
    )]
    #[test_case(
        r#"1.2.3.4 - bob [10/Oct/2025:10:00:00 +0000] "POST /submit HTTP/1.1" 201 512 "https://ref.example" "curl/8.0""#,
        MatchTier::Primary ; "combined line also satisfies the shorter active format"
    )]
    #[test_case("just some words", MatchTier::Unmatched ; "free text")]
    #[test_case("", MatchTier::Unmatched ; "empty")]
    fn tier_selection(line: &str, expected: MatchTier) {
        let (_, tier) = parser(SHORT_FORMAT).parse_with_tier(line);
        assert_eq!(tier, expected);
    }

    #[test]
    fn combined_fallback_fills_request_fields() {
        let line = r#"1.2.3.4 - bob [10/Oct/2025:10:00:00 +0000] "POST /log/dev-9?tag=io HTTP/1.1" 201 512 "https://ref.example" "curl/8.0""#;
        let (record, tier) = parser(DEFAULT_FORMAT).parse_with_tier(line);

        assert_eq!(tier, MatchTier::Fallback);
        assert_eq!(record.ip, "1.2.3.4");
        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/log/dev-9?tag=io");
        assert_eq!(record.status, 201);
        assert_eq!(record.bytes, 512);
        assert_eq!(record.referer, "https://ref.example");
        assert_eq!(record.ua, "curl/8.0");
        assert_eq!(record.browser, "Fixed 8");
        assert_eq!(record.device_id, "dev-9");
        assert_eq!(record.tag, "io");
    }

    #[test]
    fn unmatched_line_gets_defaults() {
        let (record, tier) = parser(SHORT_FORMAT).parse_with_tier("kernel: something odd happened");
        assert_eq!(tier, MatchTier::Unmatched);
        assert_eq!(record.ip, "kernel:");
        assert_eq!(record.path, "-");
        assert_eq!(record.method, "LOG");
        assert_eq!(record.status, 200);
        assert!(record.browser.is_empty());
        assert_eq!(record.device, DeviceClass::Unknown);
    }

    #[test]
    fn default_format_routes_device_and_query() {
        let line = r#"5.6.7.8 - - [10/Oct/2025:10:00:00 +0000] "GET /log/phone-2?x=1 HTTP/1.1" 200 GET_ARGS: "level=warn&tag=gps" POST_BODY: "-""#;
        let record = parser(DEFAULT_FORMAT).parse(line);

        assert_eq!(record.device_id, "phone-2");
        assert_eq!(record.query, "level=warn&tag=gps");
        assert_eq!(record.level, "warn");
        assert_eq!(record.tag, "gps");
        assert_eq!(record.body, "-");
    }

    #[test]
    fn unparseable_numbers_keep_defaults() {
        let record = parser("$remote_addr $status $body_bytes_sent").parse("1.1.1.1 99999999999 x");
        assert_eq!(record.status, 200);
        assert_eq!(record.bytes, 0);
    }

    #[test]
    fn custom_routing_marker() {
        let record = parser(SHORT_FORMAT)
            .with_routing_marker("ingest")
            .parse(r#"10.0.0.1 - - [10/Oct/2025:10:00:00 +0000] "GET /ingest/unit-4 HTTP/1.1" 200"#);
        assert_eq!(record.device_id, "unit-4");
    }

    #[test]
    fn metacharacter_template_falls_through() {
        let (record, tier) = parser("((( $status").parse_with_tier("1.2.3.4 hello");
        assert_eq!(tier, MatchTier::Unmatched);
        assert_eq!(record.ip, "1.2.3.4");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn never_fails_and_keeps_raw(line in ".{0,200}") {
            let record = parser(DEFAULT_FORMAT).parse(&line);
            prop_assert_eq!(&record.raw, &line);
            prop_assert!(record.created_at > 0);
        }
    }
}
