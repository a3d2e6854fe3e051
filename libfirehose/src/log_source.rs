use chrono::{DateTime, Utc};
use libfirehose_model::CrashRecord;

/// What to do with a log line, based on its source type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSourcePolicy {
    /// Written by an app container: count per container
    Container,
    /// Written by the platform on behalf of the app (staging, ssh, ...): count per app
    NonContainer,
    /// Cloud controller lines: count per app and look for crash reports
    CrashReport,
    /// Router access logs and health checks: too chatty and already covered by
    /// the HTTP statistics
    Ignore,
}

/**
 * The fixed source type policy. Container and non-container log volume must never be
 * mixed up, so any source we don't know is treated as non-container.
 *
 * Only the part before the first `/` matters, e.g., "APP/PROC/WEB" is "APP".
 */
pub fn policy_for_source(source_type: &str) -> LogSourcePolicy {
    let prefix = source_type
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase();
    match prefix.as_str() {
        "APP" => LogSourcePolicy::Container,
        "API" => LogSourcePolicy::CrashReport,
        "RTR" | "HEALTH" => LogSourcePolicy::Ignore,
        // STG, SSH, CELL, LGR, ...
        _ => LogSourcePolicy::NonContainer,
    }
}

/// A crash parsed from a cloud controller log line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrashReport {
    pub app_id: String,
    pub record: CrashRecord,
}

const CRASH_PREFIX: &str = "App instance exited with guid ";

/// Find `"key"=>` in a Ruby-hash style payload and return what follows it
fn hash_value<'a>(payload: &'a str, key: &str) -> Option<&'a str> {
    let marker = format!("\"{}\"=>", key);
    payload
        .find(&marker)
        .map(|pos| payload[pos + marker.len()..].trim_start())
}

/// A quoted value ends at the first `"` that is followed by `,` or `}` (or the end)
fn quoted_value(rest: &str) -> Option<&str> {
    let rest = rest.strip_prefix('"')?;
    let bytes = rest.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'"' {
            let next = rest[i + 1..].trim_start().chars().next();
            if matches!(next, None | Some(',') | Some('}')) {
                return Some(&rest[..i]);
            }
        }
    }
    None
}

fn integer_value(rest: &str) -> Option<i64> {
    let end = rest
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/**
 * Make an exit description fit on one line: newlines (real or escaped) are
 * collapsed, list markers ("* ") and a leading "N error(s) occurred:" are removed.
 */
pub fn clean_exit_description(desc: &str) -> String {
    let flat = desc.replace("\\n", " ").replace("\\t", " ");
    let mut words: Vec<&str> = flat.split_whitespace().filter(|w| *w != "*").collect();
    // "2 error(s) occurred:" or "1 error occurred:"
    if words.len() >= 3
        && words[0].chars().all(|c| c.is_ascii_digit())
        && words[1].starts_with("error")
        && words[2] == "occurred:"
    {
        words.drain(..3);
    }
    words.join(" ")
}

/**
 * Parse a cloud controller crash line, e.g.,
 *
 * `App instance exited with guid 4630f6ba payload: {"cell_id"=>"x", "index"=>1,
 * "reason"=>"CRASHED", "exit_description"=>"out of memory", ...}`
 *
 * Returns None for anything else, including exits whose reason isn't CRASHED.
 */
pub fn parse_crash_report(message: &str, crash_time: DateTime<Utc>) -> Option<CrashReport> {
    let start = message.find(CRASH_PREFIX)?;
    let rest = &message[start + CRASH_PREFIX.len()..];
    let app_id = rest.split_whitespace().next()?.to_string();
    let payload = &rest[rest.find("payload:")?..];
    if quoted_value(hash_value(payload, "reason")?)? != "CRASHED" {
        return None;
    }
    let instance_index = hash_value(payload, "index").and_then(integer_value)?;
    let exit_description = hash_value(payload, "exit_description")
        .and_then(quoted_value)
        .map(clean_exit_description)
        .unwrap_or_default();
    Some(CrashReport {
        app_id,
        record: CrashRecord {
            instance_index,
            crash_time,
            exit_description,
        },
    })
}
