//! Compilation of nginx `log_format` templates into line matchers.
//!
//! A template such as
//! `$remote_addr - $remote_user [$time_local] "$request" $status`
//! is turned into one anchored regular expression with a named capture per
//! recognized variable. Compilation never fails: unknown syntax is matched
//! literally, and a template that cannot be turned into a regex at all yields
//! a matcher that matches nothing.

use std::fmt;

use regex::Regex;
use tracing::warn;

/// Semantic field captured by a [`CompiledMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// `$remote_addr`
    Ip,
    /// `$remote_user`
    User,
    /// `$time_local`
    Time,
    /// First component of `$request`
    Method,
    /// Second component of `$request`
    Path,
    /// Third component of `$request`
    Proto,
    /// `$status`
    Status,
    /// `$body_bytes_sent`
    Bytes,
    /// `$http_referer`
    Referer,
    /// `$http_user_agent`
    Ua,
    /// `$query_string`
    Query,
    /// `$request_body`
    Body,
}

impl Field {
    /// Name of the capture group this field is bound to.
    #[must_use]
    pub const fn group_name(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::User => "user",
            Self::Time => "time",
            Self::Method => "method",
            Self::Path => "path",
            Self::Proto => "proto",
            Self::Status => "status",
            Self::Bytes => "bytes",
            Self::Referer => "referer",
            Self::Ua => "ua",
            Self::Query => "query",
            Self::Body => "body",
        }
    }

    /// Looks up a field by its capture group name.
    #[must_use]
    pub fn from_group_name(name: &str) -> Option<Self> {
        let field = match name {
            "ip" => Self::Ip,
            "user" => Self::User,
            "time" => Self::Time,
            "method" => Self::Method,
            "path" => Self::Path,
            "proto" => Self::Proto,
            "status" => Self::Status,
            "bytes" => Self::Bytes,
            "referer" => Self::Referer,
            "ua" => Self::Ua,
            "query" => Self::Query,
            "body" => Self::Body,
            _ => return None,
        };
        Some(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

/// A template variable and the sub-patterns it expands to.
struct Variable {
    token: &'static str,
    captures: &'static [(Field, &'static str)],
}

/// Recognized variables. A variable whose name is a prefix of another
/// (`$request` / `$request_body`) must come after it.
const VARIABLES: &[Variable] = &[
    Variable {
        token: "$body_bytes_sent",
        captures: &[(Field::Bytes, r"\d*")],
    },
    Variable {
        token: "$http_user_agent",
        captures: &[(Field::Ua, r#"[^"]*"#)],
    },
    Variable {
        token: "$http_referer",
        captures: &[(Field::Referer, r#"[^"]*"#)],
    },
    Variable {
        token: "$request_body",
        captures: &[(Field::Body, r".*")],
    },
    Variable {
        token: "$query_string",
        captures: &[(Field::Query, r#"[^"]*"#)],
    },
    Variable {
        token: "$remote_addr",
        captures: &[(Field::Ip, r"\S+")],
    },
    Variable {
        token: "$remote_user",
        captures: &[(Field::User, r"\S*")],
    },
    Variable {
        token: "$time_local",
        captures: &[(Field::Time, r"[^\]]+")],
    },
    Variable {
        token: "$request",
        captures: &[
            (Field::Method, r"\S+"),
            (Field::Path, r"\S+"),
            (Field::Proto, r#"[^"]*"#),
        ],
    },
    Variable {
        token: "$status",
        captures: &[(Field::Status, r"\d+")],
    },
];

/// Immutable field extractor compiled from a format template.
///
/// Cheap to share behind an `Arc`; matching only takes `&self`.
#[derive(Clone)]
pub struct CompiledMatcher {
    template: String,
    pattern: String,
    regex: Option<Regex>,
}

impl CompiledMatcher {
    /// Compiles `template` into a matcher.
    #[must_use]
    pub fn compile(template: &str) -> Self {
        let normalized = template.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut pattern = regex::escape(&normalized);

        for variable in VARIABLES {
            pattern = substitute(&pattern, variable);
        }

        let pattern = format!("^{}", pattern.replace(' ', r"\s+"));
        let regex = match Regex::new(&pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(error = %e, template = %normalized, "log format did not compile, lines will fall back");
                None
            }
        };

        Self {
            template: normalized,
            pattern,
            regex,
        }
    }

    /// The whitespace-normalized template this matcher was built from.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The generated regular expression source.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the generated pattern compiled.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.regex.is_some()
    }

    /// Fields this matcher can capture, in capture order.
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        self.regex
            .as_ref()
            .map(|regex| {
                regex
                    .capture_names()
                    .flatten()
                    .filter_map(Field::from_group_name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Matches `line`, returning every captured field with non-empty content.
    ///
    /// `None` means the line did not match at all.
    #[must_use]
    pub fn extract<'a>(&self, line: &'a str) -> Option<Vec<(Field, &'a str)>> {
        let regex = self.regex.as_ref()?;
        let caps = regex.captures(line)?;

        let fields = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                let field = Field::from_group_name(name)?;
                let value = caps.name(name)?.as_str();
                (!value.is_empty()).then_some((field, value))
            })
            .collect();
        Some(fields)
    }
}

impl fmt::Debug for CompiledMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMatcher")
            .field("template", &self.template)
            .field("pattern", &self.pattern)
            .field("usable", &self.is_usable())
            .finish()
    }
}

/// Replaces every escaped occurrence of `variable` in `pattern`.
///
/// Only the first occurrence gets named groups; later ones are
/// non-capturing since group names must be unique.
fn substitute(pattern: &str, variable: &Variable) -> String {
    let needle = regex::escape(variable.token);
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    let mut named = true;

    while let Some(idx) = rest.find(&needle) {
        out.push_str(&rest[..idx]);
        out.push_str(&render(variable.captures, named));
        named = false;
        rest = &rest[idx + needle.len()..];
    }
    out.push_str(rest);
    out
}

fn render(captures: &[(Field, &str)], named: bool) -> String {
    captures
        .iter()
        .map(|(field, sub)| {
            if named {
                format!("(?P<{}>{sub})", field.group_name())
            } else {
                format!("(?:{sub})")
            }
        })
        .collect::<Vec<_>>()
        .join(r"\s+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEFAULT_FORMAT: &str = r#"$remote_addr - $remote_user [$time_local] "$request" $status GET_ARGS: "$query_string" POST_BODY: "$request_body""#;

    fn lookup<'a>(fields: &[(Field, &'a str)], field: Field) -> Option<&'a str> {
        fields.iter().find(|(f, _)| *f == field).map(|(_, v)| *v)
    }

    #[test]
    fn compiles_basic_template() {
        let matcher = CompiledMatcher::compile(
            r#"$remote_addr - $remote_user [$time_local] "$request" $status"#,
        );
        assert!(matcher.is_usable());

        let fields = matcher
            .extract(r#"10.0.0.1 - - [10/Oct/2025:10:00:00 +0000] "GET /health HTTP/1.1" 204"#)
            .unwrap();

        assert_eq!(lookup(&fields, Field::Ip), Some("10.0.0.1"));
        assert_eq!(lookup(&fields, Field::Time), Some("10/Oct/2025:10:00:00 +0000"));
        assert_eq!(lookup(&fields, Field::Method), Some("GET"));
        assert_eq!(lookup(&fields, Field::Path), Some("/health"));
        assert_eq!(lookup(&fields, Field::Proto), Some("HTTP/1.1"));
        assert_eq!(lookup(&fields, Field::Status), Some("204"));
        assert_eq!(lookup(&fields, Field::User), Some("-"));
    }

    #[test]
    fn longer_variable_wins_over_prefix() {
        let matcher = CompiledMatcher::compile(r#""$request_body" "$request""#);
        assert!(matcher.pattern().contains("(?P<body>"));
        assert!(matcher.pattern().contains("(?P<method>"));
        assert!(!matcher.pattern().contains("_body"));

        let fields = matcher.extract(r#""{\"a\":1}" "POST /x HTTP/2""#).unwrap();
        assert_eq!(lookup(&fields, Field::Body), Some(r#"{\"a\":1}"#));
        assert_eq!(lookup(&fields, Field::Method), Some("POST"));
    }

    #[test]
    fn default_format_captures_query_and_body() {
        let matcher = CompiledMatcher::compile(DEFAULT_FORMAT);
        let line = r#"1.2.3.4 - - [10/Oct/2025:10:00:00 +0000] "GET /log/dev-1?level=warn HTTP/1.1" 200 GET_ARGS: "level=warn&tag=net" POST_BODY: "-""#;

        let fields = matcher.extract(line).unwrap();
        assert_eq!(lookup(&fields, Field::Query), Some("level=warn&tag=net"));
        assert_eq!(lookup(&fields, Field::Body), Some("-"));
        assert_eq!(lookup(&fields, Field::Path), Some("/log/dev-1?level=warn"));
    }

    #[test]
    fn whitespace_is_normalized_and_flexible() {
        let matcher = CompiledMatcher::compile("  $remote_addr \n\r  $status  ");
        assert_eq!(matcher.template(), "$remote_addr $status");

        let fields = matcher.extract("9.9.9.9 \t   500").unwrap();
        assert_eq!(lookup(&fields, Field::Ip), Some("9.9.9.9"));
        assert_eq!(lookup(&fields, Field::Status), Some("500"));
    }

    #[test]
    fn trailing_content_is_tolerated() {
        let matcher = CompiledMatcher::compile("$remote_addr $status");
        assert!(matcher.extract("1.1.1.1 200 extra fields here").is_some());
    }

    #[test]
    fn anchored_at_line_start() {
        let matcher = CompiledMatcher::compile("[$time_local]");
        assert!(matcher.extract("x [now]").is_none());
        assert!(matcher.extract("[now] x").is_some());
    }

    #[test]
    fn empty_captures_are_omitted() {
        let matcher = CompiledMatcher::compile(r#"$remote_addr "$http_referer""#);
        let fields = matcher.extract(r#"1.1.1.1 """#).unwrap();
        assert_eq!(lookup(&fields, Field::Referer), None);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn unknown_syntax_is_literal() {
        let matcher = CompiledMatcher::compile("$upstream_addr (x) $status");
        assert!(matcher.is_usable());
        assert_eq!(matcher.fields(), vec![Field::Status]);
        assert!(matcher.extract("$upstream_addr (x) 200").is_some());
        assert!(matcher.extract("10.0.0.1:80 (x) 200").is_none());
    }

    #[test]
    fn repeated_variable_captures_first_occurrence() {
        let matcher = CompiledMatcher::compile("$status $status");
        assert!(matcher.is_usable());
        let fields = matcher.extract("200 404").unwrap();
        assert_eq!(fields, vec![(Field::Status, "200")]);
    }

    #[test]
    fn fields_in_capture_order() {
        let matcher = CompiledMatcher::compile(r#"$remote_addr "$request" $body_bytes_sent"#);
        assert_eq!(
            matcher.fields(),
            vec![Field::Ip, Field::Method, Field::Path, Field::Proto, Field::Bytes]
        );
    }

    #[test]
    fn group_names_round_trip() {
        for field in [
            Field::Ip,
            Field::User,
            Field::Time,
            Field::Method,
            Field::Path,
            Field::Proto,
            Field::Status,
            Field::Bytes,
            Field::Referer,
            Field::Ua,
            Field::Query,
            Field::Body,
        ] {
            assert_eq!(Field::from_group_name(field.group_name()), Some(field));
        }
        assert_eq!(Field::from_group_name("nope"), None);
    }

    /// One template segment: the literal text around the variable and the
    /// values a matching line substitutes for it.
    fn segment_strategy() -> impl Strategy<Value = (String, String, Vec<(Field, String)>)> {
        prop_oneof![
            "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}".prop_map(|ip| (
                "$remote_addr".to_string(),
                ip.clone(),
                vec![(Field::Ip, ip)]
            )),
            "[0-9]{2}/[A-Z][a-z]{2}/[0-9]{4}:[0-9]{2}:[0-9]{2}:[0-9]{2} \\+0000".prop_map(|t| (
                "[$time_local]".to_string(),
                format!("[{t}]"),
                vec![(Field::Time, t)]
            )),
            ("[A-Z]{3,7}", "/[a-z0-9/]{0,12}", "HTTP/1\\.[01]").prop_map(|(m, p, v)| (
                "\"$request\"".to_string(),
                format!("\"{m} {p} {v}\""),
                vec![(Field::Method, m), (Field::Path, p), (Field::Proto, v)]
            )),
            "[1-5][0-9]{2}".prop_map(|s| (
                "$status".to_string(),
                s.clone(),
                vec![(Field::Status, s)]
            )),
            "[0-9]{1,7}".prop_map(|b| (
                "$body_bytes_sent".to_string(),
                b.clone(),
                vec![(Field::Bytes, b)]
            )),
            "[a-z:/.]{1,20}".prop_map(|r| (
                "\"$http_referer\"".to_string(),
                format!("\"{r}\""),
                vec![(Field::Referer, r)]
            )),
            "[A-Za-z0-9/().;]{1,10}( [A-Za-z0-9/().;]{1,10}){0,3}".prop_map(|ua| (
                "\"$http_user_agent\"".to_string(),
                format!("\"{ua}\""),
                vec![(Field::Ua, ua)]
            )),
            "[a-z0-9=&]{1,16}".prop_map(|q| (
                "\"$query_string\"".to_string(),
                format!("\"{q}\""),
                vec![(Field::Query, q)]
            )),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn extracts_every_declared_field(
            segments in prop::collection::vec(segment_strategy(), 1..6),
        ) {
            // One occurrence per variable so every value is captured.
            let mut seen = Vec::new();
            let segments: Vec<_> = segments
                .into_iter()
                .filter(|(token, _, _)| {
                    if seen.contains(token) {
                        false
                    } else {
                        seen.push(token.clone());
                        true
                    }
                })
                .collect();

            let template = segments.iter().map(|(t, _, _)| t.as_str()).collect::<Vec<_>>().join(" - ");
            let line = segments.iter().map(|(_, l, _)| l.as_str()).collect::<Vec<_>>().join(" - ");

            let matcher = CompiledMatcher::compile(&template);
            let fields = matcher.extract(&line);
            prop_assert!(fields.is_some(), "template {template:?} did not match {line:?}");
            let fields = fields.unwrap_or_default();

            for (_, _, expected) in &segments {
                for (field, value) in expected {
                    prop_assert_eq!(lookup(&fields, *field), Some(value.as_str()));
                }
            }
        }
    }
}
