use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::error::EventError;

/**
 * One raw telemetry event from the platform firehose.
 *
 * The JSON form is flat: the envelope's own fields plus an `event_type` discriminator
 * plus the fields of the event itself, e.g.,
 * `{"origin":"gorouter","ip":"10.0.16.4","event_type":"HttpStartStop","status_code":200,...}`
 */
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub index: String,
    /// IP of the VM (cell, router, ...) that emitted the event
    #[serde(default)]
    pub ip: String,
    #[serde_as(as = "Option<serde_with::TimestampNanoSeconds<i64>>")]
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    pub fn new(event: Event) -> Envelope {
        Envelope {
            origin: String::new(),
            deployment: String::new(),
            job: String::new(),
            index: String::new(),
            ip: String::new(),
            timestamp: None,
            event,
        }
    }

    pub fn from_json_line(line: &str) -> Result<Envelope, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum Event {
    HttpStartStop(HttpStartStop),
    ContainerMetric(ContainerMetric),
    LogMessage(LogMessage),
    /// Capacity gauges (and any other named value)
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    /// Any event kind we don't know about
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        use Event::*;
        match self {
            HttpStartStop(_) => EventType::HttpStartStop,
            ContainerMetric(_) => EventType::ContainerMetric,
            LogMessage(_) => EventType::LogMessage,
            ValueMetric(_) => EventType::ValueMetric,
            CounterEvent(_) => EventType::CounterEvent,
            Unknown => EventType::Other,
        }
    }
}

/// The event kinds we keep per-second rates for.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    HttpStartStop,
    ContainerMetric,
    LogMessage,
    ValueMetric,
    CounterEvent,
    Other,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::HttpStartStop,
        EventType::ContainerMetric,
        EventType::LogMessage,
        EventType::ValueMetric,
        EventType::CounterEvent,
        EventType::Other,
    ];

    /// Position in `EventType::ALL`; handy for array-backed counters
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which leg of a request the HTTP event was observed on. The router reports the
/// client-facing leg as `Client`, the backend (application) reports `Server`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerType {
    Client,
    Server,
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    #[default]
    Other,
}

impl From<String> for HttpMethod {
    fn from(s: String) -> HttpMethod {
        use HttpMethod::*;
        match s.to_ascii_uppercase().as_str() {
            "GET" => Get,
            "POST" => Post,
            "PUT" => Put,
            "DELETE" => Delete,
            "HEAD" => Head,
            "OPTIONS" => Options,
            "PATCH" => Patch,
            "CONNECT" => Connect,
            "TRACE" => Trace,
            _ => Other,
        }
    }
}

impl From<HttpMethod> for String {
    fn from(m: HttpMethod) -> String {
        m.to_string()
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use HttpMethod::*;
        let s = match self {
            Get => "GET",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Head => "HEAD",
            Options => "OPTIONS",
            Patch => "PATCH",
            Connect => "CONNECT",
            Trace => "TRACE",
            Other => "OTHER",
        };
        write!(f, "{}", s)
    }
}

/// A completed HTTP transaction. Timestamps are nanoseconds since the epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub request_id: Option<String>,
    pub peer_type: Option<PeerType>,
    pub method: HttpMethod,
    pub uri: String,
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    pub status_code: u16,
    /// Response body size
    pub content_length: u64,
    /// Request body size; older routers don't report it
    pub request_bytes: Option<u64>,
    pub application_id: Option<String>,
    pub instance_index: Option<i32>,
    pub instance_id: Option<String>,
    pub forwarded: Vec<String>,
}

impl HttpStartStop {
    /// Only the router's client-facing leg counts; the backend reports the same
    /// request a second time.
    pub fn is_client_observed(&self) -> bool {
        self.peer_type == Some(PeerType::Client)
    }

    /// `stop - start` in nanoseconds, clamped to zero for skewed clocks
    pub fn latency_nanos(&self) -> u64 {
        self.stop_timestamp
            .saturating_sub(self.start_timestamp)
            .max(0) as u64
    }

    pub fn app_id(&self) -> Result<&str, EventError> {
        non_empty(self.application_id.as_deref(), "application_id")
    }

    pub fn instance_index(&self) -> Result<usize, EventError> {
        instance_index_from(self.instance_index, "instance_index")
    }
}

/// A resource sample for one container
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerMetric {
    pub application_id: Option<String>,
    pub instance_index: Option<i32>,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
    pub memory_bytes_quota: u64,
    pub disk_bytes_quota: u64,
}

impl ContainerMetric {
    pub fn app_id(&self) -> Result<&str, EventError> {
        non_empty(self.application_id.as_deref(), "application_id")
    }

    pub fn instance_index(&self) -> Result<usize, EventError> {
        instance_index_from(self.instance_index, "instance_index")
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogMessageType {
    #[default]
    Out,
    Err,
}

/// One log line. Only counted, never stored (except for crash reports).
/// The line's time is the envelope's `timestamp`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMessage {
    pub message: String,
    pub message_type: LogMessageType,
    pub app_id: Option<String>,
    /// e.g., "APP/PROC/WEB", "STG", "RTR", "API"
    pub source_type: String,
    /// The container index for "APP" sources; unparsable for most others
    pub source_instance: Option<String>,
}

impl LogMessage {
    pub fn app_id(&self) -> Result<&str, EventError> {
        non_empty(self.app_id.as_deref(), "app_id")
    }

    pub fn source_instance_index(&self) -> Result<usize, EventError> {
        let raw = self
            .source_instance
            .as_deref()
            .ok_or(EventError::MissingField("source_instance"))?;
        raw.trim()
            .parse::<usize>()
            .map_err(|_| EventError::InvalidField {
                field: "source_instance",
                value: raw.to_string(),
            })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

fn non_empty<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, EventError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EventError::MissingField(field)),
    }
}

fn instance_index_from(idx: Option<i32>, field: &'static str) -> Result<usize, EventError> {
    let idx = idx.ok_or(EventError::MissingField(field))?;
    usize::try_from(idx).map_err(|_| EventError::InvalidField {
        field,
        value: idx.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_envelope_parse_http() {
        let line = r#"{"origin":"gorouter","deployment":"cf","job":"router","index":"0","ip":"10.0.16.4","timestamp":1700000000000000000,"event_type":"HttpStartStop","start_timestamp":1000,"stop_timestamp":5000,"peer_type":"Client","method":"get","uri":"http://app.example.com/foo","status_code":201,"content_length":42,"application_id":"app-1","instance_index":2}"#;
        let env = Envelope::from_json_line(line).unwrap();
        assert_eq!(env.ip, "10.0.16.4");
        assert_eq!(env.event_type(), EventType::HttpStartStop);
        assert_eq!(env.timestamp.unwrap().timestamp(), 1_700_000_000);
        match env.event {
            Event::HttpStartStop(http) => {
                assert!(http.is_client_observed());
                assert_eq!(http.latency_nanos(), 4000);
                assert_eq!(http.method, HttpMethod::Get);
                assert_eq!(http.app_id().unwrap(), "app-1");
                assert_eq!(http.instance_index().unwrap(), 2);
                assert!(http.forwarded.is_empty());
                assert_eq!(http.request_bytes, None);
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let env = Envelope::from_json_line(r#"{"event_type":"Error","message":"boom"}"#).unwrap();
        assert_eq!(env.event, Event::Unknown);
        assert_eq!(env.event_type(), EventType::Other);
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        let http = HttpStartStop {
            application_id: Some(String::new()),
            instance_index: Some(-1),
            ..Default::default()
        };
        assert_eq!(
            http.app_id(),
            Err(EventError::MissingField("application_id"))
        );
        assert!(matches!(
            http.instance_index(),
            Err(EventError::InvalidField { .. })
        ));

        let log = LogMessage {
            source_instance: Some("abc".to_string()),
            ..Default::default()
        };
        assert!(log.source_instance_index().is_err());
        let log = LogMessage {
            source_instance: Some("3".to_string()),
            ..Default::default()
        };
        assert_eq!(log.source_instance_index().unwrap(), 3);
    }

    #[test]
    fn test_latency_clamped() {
        let http = HttpStartStop {
            start_timestamp: 5000,
            stop_timestamp: 1000,
            ..Default::default()
        };
        assert_eq!(http.latency_nanos(), 0);
    }

    #[test]
    fn test_event_type_index() {
        for (i, t) in EventType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }

    #[test]
    fn test_http_method_roundtrip_names() {
        assert_eq!(HttpMethod::from("PoSt".to_string()), HttpMethod::Post);
        assert_eq!(HttpMethod::from("BREW".to_string()), HttpMethod::Other);
        assert_eq!(String::from(HttpMethod::Delete), "DELETE");
    }
}
