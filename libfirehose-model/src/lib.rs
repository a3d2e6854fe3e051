pub mod app_stats;
pub mod cell_stats;
pub mod envelope;
pub mod error;
pub mod event_rate;
pub mod metadata;
pub mod route_stats;
pub mod sort;
pub mod traffic_stats;

// reshare the commonly used identifiers in this namespace
pub use app_stats::{AppStats, ContainerMetricSample, ContainerStats, CrashRecord};
pub use cell_stats::CellStats;
pub use envelope::{Envelope, Event, EventType, HttpMethod, LogMessageType, PeerType};
pub use error::EventError;
pub use event_rate::{EventRate, RateRange};
pub use metadata::{display_app_name, MetadataProvider, StaticMetadata};
pub use route_stats::{AppRouteStats, DomainStats, HostStats, HttpMethodStats, RouteStats};
pub use traffic_stats::TrafficStats;

/**
 * Print a value with an SI prefix (k, M, G, ...) and the given unit, e.g.,
 * `pretty_print_si_units(Some(1234.0), "B")` returns "1.23 KB".
 *
 * Values below one get milli/micro/nano prefixes, which is what we want for
 * response times in seconds. `None` prints as "None".
 */
pub fn pretty_print_si_units(x: Option<f64>, unit: &str) -> String {
    let x = match x {
        Some(x) => x,
        None => return "None".to_string(),
    };
    if x == 0.0 || !x.is_finite() {
        return format!("{} {}", x, unit);
    }
    const PREFIXES: [(f64, &str); 9] = [
        (1e12, "T"),
        (1e9, "G"),
        (1e6, "M"),
        (1e3, "K"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "u"),
        (1e-9, "n"),
        (1e-12, "p"),
    ];
    let abs = x.abs();
    let (scale, prefix) = PREFIXES
        .iter()
        .find(|(scale, _)| abs >= *scale)
        .copied()
        .unwrap_or((1e-12, "p"));
    format!("{:.2} {}{}", x / scale, prefix, unit)
}
