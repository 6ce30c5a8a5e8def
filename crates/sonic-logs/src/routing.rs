//! Derivation of device, level and tag from request paths and query strings.

use crate::types::LogRecord;

/// Path segment that precedes a device identifier, as in `/log/{device}`.
pub const DEFAULT_ROUTING_MARKER: &str = "log";

/// Fills `device_id`, `query`, `level` and `tag` from the record's path.
///
/// - A path segment equal to `marker` followed by another segment makes that
///   segment (cut at any `?`) the device identifier.
/// - An empty `query` is taken from everything after the first `?` in the
///   path.
/// - `level` and `tag` pairs from the query are then applied.
///
/// Fields already set on the record are only overwritten by values the query
/// actually carries.
pub fn derive_routing_fields(record: &mut LogRecord, marker: &str) {
    if let Some(device_id) = device_from_path(&record.path, marker) {
        record.device_id = device_id.to_string();
    }

    if record.query.is_empty() {
        if let Some((_, query)) = record.path.split_once('?') {
            record.query = query.to_string();
        }
    }

    let query = record.query.clone();
    apply_query_pairs(record, &query);
}

/// Applies the recognized `level` and `tag` pairs of `query` to `record`.
pub fn apply_query_pairs(record: &mut LogRecord, query: &str) {
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        let (Some(key), Some(value)) = (kv.next(), kv.next()) else {
            continue;
        };
        match key {
            "level" => record.level = value.to_string(),
            "tag" => record.tag = value.to_string(),
            _ => {}
        }
    }
}

fn device_from_path<'a>(path: &'a str, marker: &str) -> Option<&'a str> {
    let path = path.split_once('?').map_or(path, |(before, _)| before);
    let mut segments = path.split('/');
    segments.find(|segment| *segment == marker)?;
    segments.next().filter(|segment| !segment.is_empty())
}
